use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Size estimation failed: {0}")]
    Estimation(String),

    #[error("Dump failed: {0}")]
    Dump(String),

    #[error("Destination store failed: {0}")]
    DestinationStore(String),

    #[error("File record creation failed: {0}")]
    DestinationRecord(String),

    #[error("Orphan cleanup failed: {0}")]
    OrphanCleanup(String),

    #[error("Run state error: {0}")]
    InvalidTransition(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
