use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Encryption requested but no key is available (set CLUSTERVAULT_ENCRYPTION_KEY)")]
    MissingKey,

    #[error("Cloud transfer failed for {key}: {reason}")]
    TransferFailed { key: String, reason: String },

    #[error("Integrity check failed for artifact {artifact}: {reason}")]
    IntegrityCheckFailed { artifact: String, reason: String },

    #[error("Transform chain on filename does not match artifact metadata for {artifact}: {reason}")]
    ChainMismatch { artifact: String, reason: String },

    #[error("Partial restore is only supported for structured text exports: {0}")]
    UnsupportedFormat(String),

    #[error("Point-in-time recovery did not complete within {timeout_secs}s; data state is indeterminate")]
    RecoveryTimeout { timeout_secs: u64 },

    #[error("Restore failed during '{state}': {reason}")]
    RestoreState { state: String, reason: String },

    #[error("Artifact pipeline failed at stage '{stage}': {reason}")]
    Pipeline { stage: String, reason: String },

    #[error("Database engine error: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
