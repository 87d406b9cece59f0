/// Error types for the chat synchronization core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A superseded async operation. Never user-visible; callers discard it.
    #[error("Stale request (generation {generation})")]
    Stale { generation: u64 },

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid account id: {0}")]
    InvalidAccount(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;
