use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid transaction: {field} {reason}")]
    InvalidTransaction { field: &'static str, reason: String },

    #[error("Invalid config patch: {0}")]
    InvalidConfigPatch(String),

    #[error("Config change not authorized")]
    Unauthorized,

    #[error("Risk scorer failed: {0}")]
    Scorer(String),

    #[error("Audit queue unavailable: {0}")]
    AuditQueue(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type GuardResult<T> = Result<T, GuardError>;
