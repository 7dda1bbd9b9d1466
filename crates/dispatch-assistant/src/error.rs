use thiserror::Error;

/// Errors surfaced by an `AssistantClient` implementation.
///
/// Deliberately string-shaped on the API-error path: `dispatch-ask`'s
/// classifier matches literal substrings against `Display` output per the
/// closed table in spec §4.4 / §9, so the exact wording here (status codes,
/// "Bad Gateway", "insufficient quota", …) is load-bearing, not decorative.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{status} {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl AssistantError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;
