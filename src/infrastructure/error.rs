use crate::domain::session::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Remote API error: {0}")]
    Remote(String),
    #[error("Not authenticated; run `pomotask login` first")]
    Unauthenticated,
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Malformed persisted session: {0}")]
    MalformedPersistedState(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}
