use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no channel registered for responder {0}")]
    ChannelNotFound(String),

    #[error("timed out waiting for a channel to be registered for responder {0}")]
    ChannelTimeout(String),

    #[error(transparent)]
    Persistence(#[from] dispatch_persistence::PersistenceError),

    #[error(transparent)]
    Assistant(#[from] dispatch_assistant::AssistantError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
