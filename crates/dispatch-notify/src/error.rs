use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Persistence(#[from] dispatch_persistence::PersistenceError),

    #[error("webhook delivery failed: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
