use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use dispatch_assistant::{AssistantClient, AssistantError, MessageOrder, RunStatus, ThreadHandle};
use dispatch_core::types::AssistResponse;

use crate::classify::{classify, ErrorKind};
use crate::error::{AskError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Turns one accumulated question into one model reply, retrying transient
/// upstream failures with exponential backoff (§4.4).
pub struct AskPipeline {
    client: Arc<dyn AssistantClient>,
    retry_max_attempts: u32,
    retry_base_delay_secs: u64,
    /// When set, `ask` returns this text without calling `client` at all —
    /// used by integration tests exercising the dispatcher end to end
    /// without a live assistant backend (`AssistantConfig::test_answer`).
    test_answer: Option<String>,
}

impl AskPipeline {
    pub fn new(
        client: Arc<dyn AssistantClient>,
        retry_max_attempts: u32,
        retry_base_delay_secs: u64,
    ) -> Self {
        Self {
            client,
            retry_max_attempts,
            retry_base_delay_secs,
            test_answer: None,
        }
    }

    pub fn with_test_answer(mut self, answer: impl Into<String>) -> Self {
        self.test_answer = Some(answer.into());
        self
    }

    /// One attempt: post, run, poll to completion, fetch the latest reply.
    async fn ask_once(
        &self,
        thread: &ThreadHandle,
        model_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<AssistResponse, AssistantError> {
        if let Some(answer) = &self.test_answer {
            return Ok(AssistResponse::text(answer.clone()));
        }

        self.client.post_message(thread, text).await?;
        let run = self.client.run(thread, model_id).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(AssistantError::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            match self.client.poll_run(&run, thread).await? {
                RunStatus::Completed => break,
                RunStatus::Failed(message) => {
                    return Err(AssistantError::Api { status: 0, message })
                }
                RunStatus::Queued | RunStatus::InProgress => continue,
            }
        }

        let messages = self
            .client
            .list_messages(thread, 1, MessageOrder::Descending)
            .await?;
        let raw = messages.into_iter().next().unwrap_or_default();
        Ok(parse_assist_text(&raw))
    }

    /// `ask_once`, retried on `Retryable` failures with exponential backoff
    /// up to `retry_max_attempts`. `Fatal` and `NonCritical` short-circuit
    /// immediately; a `Retryable` failure that survives every attempt is
    /// downgraded to `NonCritical` rather than propagated as a retry error.
    #[instrument(skip(self, cancel), fields(model_id = %model_id))]
    pub async fn ask_with_retry(
        &self,
        thread: &ThreadHandle,
        model_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<AssistResponse> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.ask_once(thread, model_id, text, cancel).await {
                Ok(response) => return Ok(response),
                Err(err) => match classify(&err.to_string()) {
                    ErrorKind::Fatal => return Err(AskError::Fatal(err.to_string())),
                    ErrorKind::NonCritical => return Err(AskError::NonCritical(err.to_string())),
                    ErrorKind::Retryable => {
                        if attempt >= self.retry_max_attempts {
                            warn!(attempts = attempt, "retries exhausted, downgrading to non-critical");
                            return Err(AskError::NonCritical(err.to_string()));
                        }
                        let delay = self.retry_base_delay_secs.saturating_mul(1u64 << (attempt - 1));
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return Err(AskError::NonCritical("cancelled during backoff".to_string()))
                            }
                            _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        }
                    }
                },
            }
        }
    }
}

/// A raw assistant reply may be a JSON-encoded `AssistResponse` (meta/action/
/// operator flags included) or plain text. Try the former, fall back to the
/// latter — the wire contract doesn't require every backend to emit JSON.
fn parse_assist_text(raw: &str) -> AssistResponse {
    match serde_json::from_str::<AssistResponse>(raw) {
        Ok(response) => response,
        Err(_) => AssistResponse::text(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_assistant::test_double::{Scripted, ScriptedAssistant};

    fn thread() -> ThreadHandle {
        ThreadHandle("thread-1".to_string())
    }

    #[tokio::test]
    async fn retry_then_succeed() {
        let client = Arc::new(ScriptedAssistant::new(vec![
            Scripted::Err {
                status: 503,
                message: "Service Unavailable".into(),
            },
            Scripted::Err {
                status: 503,
                message: "Service Unavailable".into(),
            },
            Scripted::Ok("all good".into()),
        ]));
        let pipeline = AskPipeline::new(client.clone(), 3, 0);
        let cancel = CancellationToken::new();

        let response = pipeline
            .ask_with_retry(&thread(), "model-x", "hello", &cancel)
            .await
            .expect("should eventually succeed");

        assert_eq!(response.message, "all good");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_short_circuits_without_retrying() {
        let client = Arc::new(ScriptedAssistant::new(vec![Scripted::Err {
            status: 401,
            message: "Unauthorized".into(),
        }]));
        let pipeline = AskPipeline::new(client.clone(), 3, 0);
        let cancel = CancellationToken::new();

        let err = pipeline
            .ask_with_retry(&thread(), "model-x", "hello", &cancel)
            .await
            .expect_err("fatal errors must not resolve to Ok");

        assert!(matches!(err, AskError::Fatal(_)));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn non_critical_short_circuits_without_retrying() {
        let client = Arc::new(ScriptedAssistant::new(vec![Scripted::Err {
            status: 400,
            message: "Bad Request".into(),
        }]));
        let pipeline = AskPipeline::new(client.clone(), 3, 0);
        let cancel = CancellationToken::new();

        let err = pipeline
            .ask_with_retry(&thread(), "model-x", "hello", &cancel)
            .await
            .expect_err("non-critical errors must not resolve to Ok");

        assert!(matches!(err, AskError::NonCritical(_)));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn retryable_exhausted_downgrades_to_non_critical() {
        let client = Arc::new(ScriptedAssistant::new(vec![
            Scripted::Err {
                status: 503,
                message: "Service Unavailable".into(),
            },
            Scripted::Err {
                status: 503,
                message: "Service Unavailable".into(),
            },
            Scripted::Err {
                status: 503,
                message: "Service Unavailable".into(),
            },
        ]));
        let pipeline = AskPipeline::new(client.clone(), 3, 0);
        let cancel = CancellationToken::new();

        let err = pipeline
            .ask_with_retry(&thread(), "model-x", "hello", &cancel)
            .await
            .expect_err("exhausted retries must surface an error");

        assert!(matches!(err, AskError::NonCritical(_)));
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_answer_bypasses_the_client_entirely() {
        let client = Arc::new(ScriptedAssistant::new(vec![]));
        let pipeline = AskPipeline::new(client.clone(), 3, 0).with_test_answer("canned");
        let cancel = CancellationToken::new();

        let response = pipeline
            .ask_with_retry(&thread(), "model-x", "hello", &cancel)
            .await
            .unwrap();

        assert_eq!(response.message, "canned");
        assert_eq!(client.call_count(), 0);
    }
}
