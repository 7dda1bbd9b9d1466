use thiserror::Error;

/// Errors that cross the Listener/Respondent boundary onto `errCh` (§4.6
/// "Failure semantics"). Only `Fatal` ever gets here — `NonCritical` is
/// logged and absorbed inside the Respondent loop.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Session(#[from] dispatch_sessions::SessionError),

    #[error(transparent)]
    Batcher(#[from] dispatch_batcher::BatcherError),
}

pub type Result<T> = std::result::Result<T, DispatcherError>;
