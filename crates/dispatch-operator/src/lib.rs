pub mod error;
pub mod registry;
pub mod session;
pub mod sse;

pub use error::{OperatorError, Result};
pub use registry::OperatorRegistry;
pub use session::OperatorSession;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use dispatch_core::types::{DialogId, UserId};

    use super::*;

    #[tokio::test]
    async fn connection_errors_is_already_closed_when_no_session_exists() {
        let registry = OperatorRegistry::new(
            "http://127.0.0.1:0",
            Duration::from_secs(300),
            Duration::from_secs(300),
            CancellationToken::new(),
        );

        let mut errors = registry.connection_errors(UserId(1), DialogId(1)).await;
        assert!(errors.recv().await.is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn delete_on_unknown_session_is_a_no_op() {
        let registry = OperatorRegistry::new(
            "http://127.0.0.1:0",
            Duration::from_secs(300),
            Duration::from_secs(300),
            CancellationToken::new(),
        );
        registry.delete(UserId(1), DialogId(1));
        assert_eq!(registry.len(), 0);
    }
}
