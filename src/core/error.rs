use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Partition '{0}' is not registered")]
    UnknownPartition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shard misconfigured: {0}")]
    ShardMisconfigured(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
