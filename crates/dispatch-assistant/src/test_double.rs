//! A deterministic, in-process `AssistantClient` used by this workspace's
//! own tests — no network calls, fully scripted responses — following the
//! pack's habit of hand-rolled trait-object fakes over a mocking framework
//! (see `skynet-agent::router`'s `AlwaysFail`/`AlwaysOk`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{AssistantClient, MessageOrder, RunHandle, RunStatus, ThreadHandle};
use crate::error::{AssistantError, Result};

/// One scripted outcome for a single `ask` attempt.
#[derive(Debug, Clone)]
pub enum Scripted {
    Ok(String),
    Err { status: u16, message: String },
}

/// Scripted `AssistantClient`: consumes one `Scripted` entry per `ask`
/// attempt (i.e. per `list_messages` call — the step that actually
/// produces or fails to produce a reply). `create_thread`/`post_message`/
/// `run`/`poll_run` always succeed immediately.
pub struct ScriptedAssistant {
    script: Mutex<std::collections::VecDeque<Scripted>>,
    /// Falls back to this once the script is exhausted.
    default_reply: String,
    call_count: AtomicUsize,
}

impl ScriptedAssistant {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            default_reply: "ok".to_string(),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Number of completed `list_messages` calls so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssistantClient for ScriptedAssistant {
    async fn create_thread(&self, _metadata: serde_json::Value) -> Result<ThreadHandle> {
        Ok(ThreadHandle(format!(
            "thread-{}",
            uuid_like(self.call_count.load(Ordering::SeqCst))
        )))
    }

    async fn post_message(&self, _thread: &ThreadHandle, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn run(&self, _thread: &ThreadHandle, _model_id: &str) -> Result<RunHandle> {
        Ok(RunHandle("run-0".to_string()))
    }

    async fn poll_run(&self, _run: &RunHandle, _thread: &ThreadHandle) -> Result<RunStatus> {
        Ok(RunStatus::Completed)
    }

    async fn list_messages(
        &self,
        _thread: &ThreadHandle,
        _limit: usize,
        _order: MessageOrder,
    ) -> Result<Vec<String>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Ok(text)) => Ok(vec![text]),
            Some(Scripted::Err { status, message }) => {
                Err(AssistantError::api(status, message))
            }
            None => Ok(vec![self.default_reply.clone()]),
        }
    }

    async fn transcribe(&self, _audio: &[u8], _filename: &str) -> Result<String> {
        Ok("[transcribed audio]".to_string())
    }
}

fn uuid_like(n: usize) -> String {
    format!("{:08x}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_errors_consume_in_order() {
        let client = ScriptedAssistant::new(vec![
            Scripted::Err { status: 503, message: "Service Unavailable".into() },
            Scripted::Err { status: 503, message: "Service Unavailable".into() },
            Scripted::Ok("ok-after-retry".into()),
        ]);
        let thread = client.create_thread(serde_json::json!({})).await.unwrap();

        let first = client
            .list_messages(&thread, 1, MessageOrder::Descending)
            .await;
        assert!(first.is_err());
        let second = client
            .list_messages(&thread, 1, MessageOrder::Descending)
            .await;
        assert!(second.is_err());
        let third = client
            .list_messages(&thread, 1, MessageOrder::Descending)
            .await
            .unwrap();
        assert_eq!(third, vec!["ok-after-retry".to_string()]);
        assert_eq!(client.call_count(), 3);
    }
}
