// backupengine/src/dump/producer.rs
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tempfile::TempDir;

use super::artifact::ArtifactHandle;
use crate::connection::ConnectionSpec;
use crate::errors::{PipelineError, Result};

const DATA_BATCH_SIZE: i64 = 500;

/// Produces database dumps into scoped temporary workspaces.
pub struct DumpProducer;

impl DumpProducer {
    /// Cheap round-trip query to verify the source is reachable before any
    /// workspace is allocated.
    pub async fn verify_connectivity(spec: &ConnectionSpec) -> Result<()> {
        let pool = connect(spec).await?;
        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                PipelineError::Connection(format!(
                    "round-trip query against {} failed: {}",
                    spec.database(),
                    e
                ))
            })?;
        pool.close().await;
        Ok(())
    }

    /// Estimated on-disk size of the source database, in bytes. Exposed
    /// standalone so callers can run pre-flight disk-space checks.
    pub async fn estimate_size(spec: &ConnectionSpec) -> Result<u64> {
        let pool = connect(spec).await?;
        let size: i64 = sqlx::query_scalar("SELECT pg_database_size(current_database())")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                PipelineError::Estimation(format!(
                    "pg_database_size for {} failed: {}",
                    spec.database(),
                    e
                ))
            })?;
        pool.close().await;
        u64::try_from(size).map_err(|_| {
            PipelineError::Estimation(format!("pg_database_size returned {}", size))
        })
    }

    /// Base tables of the public schema, ordered by name.
    pub async fn get_tables(spec: &ConnectionSpec) -> Result<Vec<String>> {
        let pool = connect(spec).await?;
        let tables = list_tables(&pool).await?;
        pool.close().await;
        Ok(tables)
    }

    /// Dumps the source database into a fresh scoped workspace and returns
    /// the artifact handle that owns it.
    ///
    /// Tables in `skipped_tables` are excluded entirely; tables in
    /// `structure_only_tables` get schema but no rows. When compression is
    /// enabled the dump is gzipped as it is written, so the artifact on disk
    /// is already compressed — one pass, no dump-then-compress.
    ///
    /// Any error drops the workspace before propagating; a failed dump never
    /// leaks its temp directory.
    pub async fn produce(spec: &ConnectionSpec) -> Result<ArtifactHandle> {
        Self::verify_connectivity(spec).await?;

        let workspace = tempfile::Builder::new()
            .prefix(&format!("backup_{}_", spec.source_name()))
            .tempdir()?;

        // Errors from here on drop `workspace` on the way out.
        let dump_path = write_dump(spec, &workspace).await?;
        ArtifactHandle::new(workspace, dump_path)
    }
}

async fn connect(spec: &ConnectionSpec) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(1)
        .connect_with(spec.connect_options())
        .await
        .map_err(|e| {
            PipelineError::Connection(format!(
                "failed to connect to {}@{}:{}/{}: {}",
                spec.username(),
                spec.host(),
                spec.port(),
                spec.database(),
                e
            ))
        })
}

async fn list_tables(pool: &PgPool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT table_name FROM information_schema.tables
         WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
         ORDER BY table_name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| PipelineError::Dump(format!("failed to enumerate tables: {}", e)))?;

    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("table_name"))
        .collect())
}

/// One table's place in the dump.
#[derive(Debug, PartialEq, Eq)]
struct TablePlan {
    name: String,
    include_data: bool,
}

/// Applies the skip / structure-only sets to the enumerated table list.
fn plan_tables(tables: Vec<String>, spec: &ConnectionSpec) -> Vec<TablePlan> {
    tables
        .into_iter()
        .filter(|t| !spec.skipped_tables().contains(t))
        .map(|name| {
            let include_data = !spec.structure_only_tables().contains(&name);
            TablePlan { name, include_data }
        })
        .collect()
}

/// Write target for the dump: plain file or gzip stream over it.
enum DumpSink {
    Plain(BufWriter<File>),
    Compressed(GzEncoder<BufWriter<File>>),
}

impl DumpSink {
    fn create(path: &PathBuf, compress: bool) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(if compress {
            DumpSink::Compressed(GzEncoder::new(writer, Compression::default()))
        } else {
            DumpSink::Plain(writer)
        })
    }

    /// Flushes and, for the gzip variant, writes the stream trailer. A dump
    /// is not complete until this has run.
    fn finish(self) -> io::Result<()> {
        match self {
            DumpSink::Plain(mut writer) => writer.flush(),
            DumpSink::Compressed(encoder) => encoder.finish().and_then(|mut w| w.flush()),
        }
    }
}

impl Write for DumpSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DumpSink::Plain(w) => w.write(buf),
            DumpSink::Compressed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DumpSink::Plain(w) => w.flush(),
            DumpSink::Compressed(w) => w.flush(),
        }
    }
}

async fn write_dump(spec: &ConnectionSpec, workspace: &TempDir) -> Result<PathBuf> {
    let pool = connect(spec).await?;

    let timestamp = Local::now().format("%Y-%m-%d_%H_%M_%S");
    let extension = if spec.compress() { "sql.gz" } else { "sql" };
    let dump_path = workspace
        .path()
        .join(format!("{}_{}.{}", spec.source_name(), timestamp, extension));

    let mut sink = DumpSink::create(&dump_path, spec.compress())?;

    writeln!(sink, "-- PostgreSQL backup")?;
    writeln!(sink, "-- Database: {}", spec.database())?;
    writeln!(sink, "-- Dumped at: {}", Local::now())?;
    writeln!(sink, "BEGIN;\n")?;

    let plans = plan_tables(list_tables(&pool).await?, spec);

    for plan in &plans {
        write_table_schema(&pool, &mut sink, &plan.name).await?;
    }
    for plan in &plans {
        write_table_constraints(&pool, &mut sink, &plan.name).await?;
    }
    for plan in plans.iter().filter(|p| p.include_data) {
        write_table_data(&pool, &mut sink, &plan.name).await?;
    }

    writeln!(sink, "\nCOMMIT;")?;
    sink.finish()?;
    pool.close().await;

    Ok(dump_path)
}

async fn write_table_schema(pool: &PgPool, sink: &mut DumpSink, table_name: &str) -> Result<()> {
    let columns = sqlx::query(
        "SELECT column_name, data_type, is_nullable, column_default
         FROM information_schema.columns
         WHERE table_schema = 'public' AND table_name = $1
         ORDER BY ordinal_position",
    )
    .bind(table_name)
    .fetch_all(pool)
    .await
    .map_err(|e| {
        PipelineError::Dump(format!("failed to fetch columns for {}: {}", table_name, e))
    })?;

    let mut ddl = format!("CREATE TABLE \"{}\" (\n", table_name);
    for (i, row) in columns.iter().enumerate() {
        let col_name: String = row.get("column_name");
        let data_type: String = row.get("data_type");
        let is_nullable: String = row.get("is_nullable");
        let default: Option<String> = row.get("column_default");

        if i > 0 {
            ddl.push_str(",\n");
        }
        ddl.push_str(&format!("  \"{}\" {}", col_name, data_type));
        if is_nullable == "NO" {
            ddl.push_str(" NOT NULL");
        }
        if let Some(def) = default {
            ddl.push_str(&format!(" DEFAULT {}", def));
        }
    }
    ddl.push_str("\n);\n");
    writeln!(sink, "{}", ddl)?;
    Ok(())
}

async fn write_table_constraints(
    pool: &PgPool,
    sink: &mut DumpSink,
    table_name: &str,
) -> Result<()> {
    // Primary key, foreign key and unique constraints, then plain indexes.
    for contype in ["p", "f", "u"] {
        let constraints = sqlx::query(
            "SELECT pg_get_constraintdef(oid) AS def
             FROM pg_constraint
             WHERE conrelid = $1::regclass AND contype = $2::\"char\"",
        )
        .bind(table_name)
        .bind(contype)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            PipelineError::Dump(format!(
                "failed to fetch constraints for {}: {}",
                table_name, e
            ))
        })?;

        for row in constraints {
            let def: String = row.get("def");
            writeln!(sink, "ALTER TABLE \"{}\" ADD {};", table_name, def)?;
        }
    }

    let indexes = sqlx::query(
        "SELECT pg_get_indexdef(i.indexrelid) AS def
         FROM pg_index i
         JOIN pg_class t ON t.oid = i.indrelid
         WHERE t.relname = $1 AND NOT i.indisprimary AND NOT i.indisunique",
    )
    .bind(table_name)
    .fetch_all(pool)
    .await
    .map_err(|e| {
        PipelineError::Dump(format!("failed to fetch indexes for {}: {}", table_name, e))
    })?;

    for row in indexes {
        let def: String = row.get("def");
        writeln!(sink, "{};", def)?;
    }
    Ok(())
}

async fn write_table_data(pool: &PgPool, sink: &mut DumpSink, table_name: &str) -> Result<()> {
    let columns = sqlx::query(
        "SELECT column_name FROM information_schema.columns
         WHERE table_schema = 'public' AND table_name = $1
         ORDER BY ordinal_position",
    )
    .bind(table_name)
    .fetch_all(pool)
    .await
    .map_err(|e| {
        PipelineError::Dump(format!("failed to fetch columns for {}: {}", table_name, e))
    })?;

    let column_names: Vec<String> = columns
        .iter()
        .map(|row| row.get::<String, _>("column_name"))
        .collect();

    writeln!(sink, "\n-- Data for table: {}", table_name)?;

    let column_list = column_names
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut offset = 0i64;
    loop {
        let query = format!(
            "SELECT * FROM \"{}\" ORDER BY 1 LIMIT {} OFFSET {}",
            table_name, DATA_BATCH_SIZE, offset
        );
        let rows = sqlx::query(&query).fetch_all(pool).await.map_err(|e| {
            PipelineError::Dump(format!(
                "failed to fetch rows from {} at offset {}: {}",
                table_name, offset, e
            ))
        })?;

        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let values = column_names
                .iter()
                .map(|col| serialize_value(row, col))
                .collect::<Result<Vec<String>>>()?;
            writeln!(
                sink,
                "INSERT INTO \"{}\" ({}) VALUES ({});",
                table_name,
                column_list,
                values.join(", ")
            )?;
        }

        offset += DATA_BATCH_SIZE;
    }

    Ok(())
}

/// Renders one column of one row as a SQL literal.
fn serialize_value(row: &sqlx::postgres::PgRow, column: &str) -> Result<String> {
    if let Ok(val) = row.try_get::<Option<String>, _>(column) {
        return Ok(val.map(quote_text).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<i64>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<i32>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<i16>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<f64>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<bool>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<uuid::Uuid>, _>(column) {
        return Ok(val
            .map(|v| format!("'{}'", v))
            .unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<sqlx::types::BigDecimal>, _>(column) {
        return Ok(val.map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<serde_json::Value>, _>(column) {
        return Ok(val
            .map(|v| quote_text(v.to_string()))
            .unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(column) {
        return Ok(val
            .map(|v| format!("'{}'", v.naive_utc()))
            .unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<chrono::NaiveDateTime>, _>(column) {
        return Ok(val
            .map(|v| format!("'{}'", v))
            .unwrap_or_else(|| "NULL".to_string()));
    }
    if let Ok(val) = row.try_get::<Option<chrono::NaiveDate>, _>(column) {
        return Ok(val
            .map(|v| format!("'{}'", v))
            .unwrap_or_else(|| "NULL".to_string()));
    }

    Err(PipelineError::Dump(format!(
        "unsupported data type for column {}",
        column
    )))
}

fn quote_text(v: String) -> String {
    if v.contains('\'') || v.contains('\\') {
        // Dollar-quoting sidesteps escaping of embedded quotes.
        format!("$${}$$", v)
    } else {
        format!("'{}'", v)
    }
}
