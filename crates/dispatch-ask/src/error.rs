use thiserror::Error;

/// What `AskPipeline` surfaces once retries are exhausted (or short-circuited).
///
/// `Retryable` never crosses this boundary — it is consumed entirely inside
/// `ask_with_retry`, which either resolves it through backoff or downgrades
/// it to `NonCritical` once attempts run out (§4.4).
#[derive(Debug, Error)]
pub enum AskError {
    #[error("{0}")]
    Fatal(String),

    #[error("{0}")]
    NonCritical(String),
}

pub type Result<T> = std::result::Result<T, AskError>;
