use thiserror::Error;

/// Errors are split into three tiers the tick loops route differently:
///
/// - validation errors abort one transition attempt and leave state unchanged;
/// - recoverable errors (exchange, persistence, insufficient data) are
///   reported and retried on the next iteration;
/// - fatal errors terminate the owning loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Fatal errors terminate the owning tick loop; everything else is
    /// reported on the error channel and retried next iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
