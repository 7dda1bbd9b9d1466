use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use dispatch_core::types::{DialogId, Message, UserId};

use crate::error::Result;
use crate::session::OperatorSession;

/// Default fire-and-forget send timeout (§5: "operator send blocks at most ≈5 s").
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of live `OperatorSession`s keyed by `(user_id, dialog_id)`,
/// exposing the operations the Dispatcher calls (§4.5).
pub struct OperatorRegistry {
    sessions: DashMap<(UserId, DialogId), Arc<OperatorSession>>,
    client: reqwest::Client,
    base_url: String,
    idle_duration: Duration,
    idle_operator: Duration,
    cancel: CancellationToken,
}

impl OperatorRegistry {
    pub fn new(
        base_url: impl Into<String>,
        idle_duration: Duration,
        idle_operator: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            idle_duration,
            idle_operator,
            cancel,
        }
    }

    fn get_or_connect(&self, user_id: UserId, dialog_id: DialogId) -> Arc<OperatorSession> {
        if let Some(existing) = self.sessions.get(&(user_id, dialog_id)) {
            if !existing.is_cancelled() {
                return existing.clone();
            }
        }

        let session = OperatorSession::connect(
            self.client.clone(),
            &self.base_url,
            user_id,
            dialog_id,
            self.idle_duration,
            self.idle_operator,
            &self.cancel,
        );
        self.sessions.insert((user_id, dialog_id), session.clone());
        session
    }

    /// Synchronous request/response: push `msg`, then wait for the operator's
    /// reply, ctx cancellation, or `timeout`.
    #[instrument(skip(self, msg))]
    pub async fn ask(
        &self,
        user_id: UserId,
        dialog_id: DialogId,
        msg: Message,
        timeout: Duration,
    ) -> Result<Message> {
        let session = self.get_or_connect(user_id, dialog_id);
        session.ask(msg, timeout).await
    }

    /// Fire-and-forget push with a short timeout.
    #[instrument(skip(self, msg))]
    pub async fn send(&self, user_id: UserId, dialog_id: DialogId, msg: Message) -> Result<()> {
        let session = self.get_or_connect(user_id, dialog_id);
        session.send(msg, DEFAULT_SEND_TIMEOUT).await
    }

    /// Expose the session's rx stream, creating the session if absent.
    pub async fn receive(&self, user_id: UserId, dialog_id: DialogId) -> Option<Message> {
        let session = self.get_or_connect(user_id, dialog_id);
        session.recv().await
    }

    /// If a session exists return its error channel; otherwise return an
    /// already-closed channel — this operation never creates a session.
    pub async fn connection_errors(
        &self,
        user_id: UserId,
        dialog_id: DialogId,
    ) -> mpsc::Receiver<String> {
        if let Some(session) = self.sessions.get(&(user_id, dialog_id)) {
            if let Some(rx) = session.take_error_receiver().await {
                return rx;
            }
        }
        let (_, closed_rx) = mpsc::channel(1);
        closed_rx
    }

    /// Idempotent removal + cleanup of a session.
    #[instrument(skip(self))]
    pub fn delete(&self, user_id: UserId, dialog_id: DialogId) {
        if let Some((_, session)) = self.sessions.remove(&(user_id, dialog_id)) {
            session.cleanup();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
