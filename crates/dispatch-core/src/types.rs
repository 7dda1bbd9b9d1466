//! Shared domain types: the entities of §3 ("DATA MODEL") that cross crate
//! boundaries. Component-local types (e.g. `Session`, `OperatorSession`)
//! live in their owning crate instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric dialog identifier — one long-lived conversation between one user
/// and one assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogId(pub u64);

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user-side endpoint of a dialog. One dialog may hold more than one
/// responder channel (e.g. a primary chat UI and a mirrored admin view).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponderId(pub String);

impl fmt::Display for ResponderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque assistant id, addressed through a per-dialog thread handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssistId(pub String);

/// A file attached to a message, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub url: String,
    pub name: Option<String>,
}

/// Lifecycle-event toggles an assistant can have enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantEvents {
    pub start: bool,
    pub end: bool,
    pub target: bool,
}

/// User-configured trigger/goal metadata for an assistant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMetas {
    /// Notification action name fired when the model reports `meta=true`.
    /// Empty string means "no target event configured".
    #[serde(default)]
    pub meta_action: String,
    /// Substrings scanned against the joined question text.
    #[serde(default)]
    pub triggers: Vec<String>,
}

/// Immutable per-session assistant definition (§3 `Assistant`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub assist_id: AssistId,
    pub assist_name: String,
    pub user_id: UserId,
    /// Vendor model identifier passed to `AssistantClient::run`.
    pub model_id: String,
    pub metas: AssistantMetas,
    pub events: AssistantEvents,
    /// Debounce window, seconds.
    pub espero: u64,
    /// When true, the dispatcher goes "deaf" to further input while an ask
    /// is outstanding (see §4.6 step 6).
    pub ignore: bool,
    /// Character cap (code points) enforced by `AskAccumulator`.
    pub limit: u32,
    /// Per-responder variant of `limit`, currently equal to `limit` unless
    /// overridden by configuration.
    pub responder_limit: u32,
}

/// The three kinds of inbound/outbound message this system moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    UserVoice,
    Assist,
}

/// Escalation/operator-control flags carried on `Message`, `Question`, and
/// `Answer`. `sender_name` is only meaningful on `Message` (the operator's
/// display name); it is `None` everywhere else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorTag {
    pub operator: bool,
    #[serde(default)]
    pub set_operator: bool,
    #[serde(default)]
    pub sender_name: Option<String>,
}

/// Action payload a model response can carry — currently just file sends,
/// left open (serde `Value` passthrough for unknown future action kinds is
/// deliberately not modelled; unknown keys are simply absent here).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistAction {
    #[serde(default)]
    pub send_files: Vec<FileRef>,
}

/// The assistant's (or operator's, wrapped identically) reply payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistResponse {
    pub message: String,
    #[serde(default)]
    pub action: AssistAction,
    /// `true` signals the configured goal was reached.
    #[serde(default)]
    pub meta: bool,
    /// `true` signals the model itself requests escalation to a human.
    #[serde(default)]
    pub operator: bool,
}

impl AssistResponse {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// A single transport-level message flowing over a `DialogChannel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub content: AssistResponse,
    pub name: Option<String>,
    #[serde(default)]
    pub operator: OperatorTag,
    #[serde(default)]
    pub files: Vec<FileRef>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            msg_type: MessageType::User,
            content: AssistResponse::text(text),
            name: None,
            operator: OperatorTag::default(),
            files: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn assist(response: AssistResponse, operator: OperatorTag) -> Self {
        Self {
            msg_type: MessageType::Assist,
            content: response,
            name: None,
            operator,
            files: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Dispatcher-internal: one debounced user utterance, ready to route.
#[derive(Debug, Clone, Default)]
pub struct Question {
    pub lines: Vec<String>,
    pub voice: bool,
    pub files: Vec<FileRef>,
    pub operator: OperatorTag,
}

/// Dispatcher-internal: one outbound reply, ready for `Listener` to emit.
#[derive(Debug, Clone)]
pub struct Answer {
    pub response: AssistResponse,
    pub voice_question: bool,
    pub operator: OperatorTag,
}

/// Who produced a `TranscriptEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Creator {
    User,
    UserVoice,
    #[serde(rename = "ai")]
    Ai,
    Operator,
}

/// A single persisted line of a dialog's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub creator: Creator,
    pub message: AssistResponse,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(creator: Creator, message: AssistResponse) -> Self {
        Self {
            creator,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle/trigger notification record emitted onto the `NotificationBus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    Start,
    End,
    Target,
    Trigger,
    Reauth,
    Subscription,
    ModelOperator,
}

/// One queued notification — §4.8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub event: NotificationEvent,
    pub user_name: String,
    pub assist_name: String,
    pub target: String,
}
