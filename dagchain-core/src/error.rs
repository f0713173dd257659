use thiserror::Error;

pub type Result<T> = std::result::Result<T, DagError>;

#[derive(Error, Debug)]
pub enum DagError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid finality event: {0}")]
    InvalidEvent(String),

    /// Block persistence failed; no index pointer was touched.
    #[error("Storage write failure: {0}")]
    StorageWriteFailure(String),

    #[error("Index inconsistency: {0}")]
    IndexInconsistency(String),

    #[error("Insufficient data: {0}")]
    DataInsufficiency(String),

    #[error("Index store error: {0}")]
    IndexStore(#[from] redis::RedisError),

    #[error("Content store error: {0}")]
    ContentStore(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
