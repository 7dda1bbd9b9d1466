use thiserror::Error;

/// Crate-wide error for the pieces owned directly by `dispatch-core`
/// (config loading, type conversions). Component crates define their own
/// error enums and convert into this one only at the gateway boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DispatchError {
    /// Short error code, mirrored in logs and in any surfaced API error body.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Config(_) => "CONFIG_ERROR",
            DispatchError::Serialization(_) => "SERIALIZATION_ERROR",
            DispatchError::InvalidId(_) => "INVALID_ID",
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
