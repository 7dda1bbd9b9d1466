use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque per-dialog conversation context maintained by the vendor LLM
/// backend. Serialisable so `SessionCache` can round-trip it through
/// `PersistenceApi::save_context` / `read_context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadHandle(pub String);

/// Handle to an in-flight run, returned by `AssistantClient::run` and
/// polled via `AssistantClient::poll_run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle(pub String);

/// Status of a run, polled every 100ms by the caller per §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Failed(String),
}

/// Ordering requested from `list_messages`; §6 notes only the most recent
/// message is actually used by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrder {
    Ascending,
    Descending,
}

/// External contract for "create thread, post message, run, poll, return
/// text", plus audio transcription (§6). No concrete vendor SDK is
/// implemented here — that integration is explicitly out of core (§1); this
/// crate defines only the interface the dispatch core consumes, plus a
/// deterministic test double (see `test_double`).
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn create_thread(&self, metadata: serde_json::Value) -> Result<ThreadHandle>;

    async fn post_message(&self, thread: &ThreadHandle, text: &str) -> Result<()>;

    async fn run(&self, thread: &ThreadHandle, model_id: &str) -> Result<RunHandle>;

    async fn poll_run(&self, run: &RunHandle, thread: &ThreadHandle) -> Result<RunStatus>;

    /// Returns message bodies in the requested order; callers take only the
    /// most recent entry.
    async fn list_messages(
        &self,
        thread: &ThreadHandle,
        limit: usize,
        order: MessageOrder,
    ) -> Result<Vec<String>>;

    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String>;
}
