pub mod error;
pub mod sqlite;

pub use error::{PersistenceError, Result};

use dispatch_core::types::DialogId;
use dispatch_core::types::UserId;
use serde::{Deserialize, Serialize};

/// One resolved delivery channel for a user's notifications (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub channel_type: String,
    pub channel_value: String,
}

/// Opaque store for per-dialog transcript chunks and assistant thread
/// snapshots (§6 "PersistenceAPI (consumed)"). `dispatch-sessions` and
/// `dispatch-batcher` consume this trait; `dispatch-notify` consumes
/// `get_notification_channels` and `get_user_subscription_limits`.
///
/// Implementations are synchronous — the reference `SqlitePersistence`
/// guards a single connection behind a `Mutex`, matching the rest of this
/// stack's SQLite-backed managers. Callers on an async task pay a brief
/// lock-and-query stall, never an `.await`.
pub trait PersistenceApi: Send + Sync {
    /// Read the serialised `ThreadHandle` snapshot for a dialog.
    /// `Ok(None)` is a first-class "no rows" signal meaning "new dialog",
    /// never surfaced to callers as an error.
    fn read_context(&self, dialog_id: DialogId) -> Result<Option<String>>;

    /// Persist (upsert) the serialised `ThreadHandle` snapshot for a dialog.
    fn save_context(&self, dialog_id: DialogId, json: &str) -> Result<()>;

    /// Append one serialised `TranscriptEntry` to a dialog's transcript.
    fn save_dialog(&self, dialog_id: DialogId, entry_json: &str) -> Result<()>;

    /// Read up to `limit` most recent serialised `TranscriptEntry` rows,
    /// oldest first. `Ok(Vec::new())` when the dialog has no transcript yet.
    fn read_dialog(&self, dialog_id: DialogId, limit: usize) -> Result<Vec<String>>;

    /// Update free-form per-dialog metadata (arbitrary JSON object).
    fn update_dialogs_meta(&self, dialog_id: DialogId, meta_json: &str) -> Result<()>;

    /// Resolve delivery channels for a user's lifecycle notifications.
    fn get_notification_channels(&self, user_id: UserId) -> Result<Vec<NotificationChannel>>;

    /// Raw subscription/quota JSON document for a user, or `None` if the
    /// user has no subscription row at all.
    fn get_user_subscription_limits(&self, user_id: UserId) -> Result<Option<String>>;
}
