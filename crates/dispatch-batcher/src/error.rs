use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatcherError {
    #[error(transparent)]
    Persistence(#[from] dispatch_persistence::PersistenceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BatcherError>;
