use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("operator endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("operator has no Telegram id configured")]
    NoTgId,

    #[error("timed out waiting for session id")]
    SidTimeout,

    #[error("timed out waiting for an operator reply")]
    AskTimeout,

    #[error("session is shutting down")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, OperatorError>;
