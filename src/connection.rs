// backupengine/src/connection.rs
use std::collections::{BTreeMap, BTreeSet};

use sqlx::postgres::PgConnectOptions;

use crate::errors::{PipelineError, Result};

/// Connection parameters for one source database.
///
/// Validated on construction and immutable afterwards: every delivery and
/// dump step reads the same spec the run started with.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    host: String,
    port: u16,
    database: String,
    username: String,
    password: String,
    compress: bool,
    skipped_tables: BTreeSet<String>,
    structure_only_tables: BTreeSet<String>,
    label: Option<String>,
    driver_options: BTreeMap<String, String>,
}

impl ConnectionSpec {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        compress: bool,
        skipped_tables: BTreeSet<String>,
        structure_only_tables: BTreeSet<String>,
        label: Option<String>,
        driver_options: BTreeMap<String, String>,
    ) -> Result<Self> {
        let host = host.into();
        let database = database.into();
        let username = username.into();

        if host.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "connection host cannot be empty".to_string(),
            ));
        }
        if database.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "connection database cannot be empty".to_string(),
            ));
        }
        if username.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "connection username cannot be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(PipelineError::InvalidInput(
                "connection port must be in 1..=65535".to_string(),
            ));
        }

        Ok(ConnectionSpec {
            host,
            port,
            database,
            username,
            password: password.into(),
            compress,
            skipped_tables,
            structure_only_tables,
            label,
            driver_options,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn skipped_tables(&self) -> &BTreeSet<String> {
        &self.skipped_tables
    }

    pub fn structure_only_tables(&self) -> &BTreeSet<String> {
        &self.structure_only_tables
    }

    /// Display name for run records and artifact filenames: the configured
    /// label when present, the database name otherwise.
    pub fn source_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.database)
    }

    /// Builds sqlx connect options, including any free-form driver options
    /// forwarded as server settings.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password);

        if !self.driver_options.is_empty() {
            options = options.options(
                self.driver_options
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(host: &str, port: u16, database: &str, username: &str) -> Result<ConnectionSpec> {
        ConnectionSpec::new(
            host,
            port,
            database,
            username,
            "secret",
            true,
            BTreeSet::new(),
            BTreeSet::new(),
            None,
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_valid_spec() -> Result<()> {
        let spec = spec_with("db.internal", 5432, "appdb", "backup")?;
        assert_eq!(spec.host(), "db.internal");
        assert_eq!(spec.port(), 5432);
        assert_eq!(spec.database(), "appdb");
        assert_eq!(spec.source_name(), "appdb");
        assert!(spec.compress());
        Ok(())
    }

    #[test]
    fn test_rejects_empty_required_fields() {
        assert!(spec_with("", 5432, "appdb", "backup").is_err());
        assert!(spec_with("db.internal", 5432, "", "backup").is_err());
        assert!(spec_with("db.internal", 5432, "appdb", "  ").is_err());
    }

    #[test]
    fn test_rejects_port_zero() {
        let err = spec_with("db.internal", 0, "appdb", "backup").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_label_overrides_source_name() -> Result<()> {
        let spec = ConnectionSpec::new(
            "db.internal",
            5432,
            "appdb",
            "backup",
            "secret",
            false,
            BTreeSet::new(),
            BTreeSet::new(),
            Some("production".to_string()),
            BTreeMap::new(),
        )?;
        assert_eq!(spec.source_name(), "production");
        Ok(())
    }
}
