use async_trait::async_trait;

use dispatch_core::types::{DialogId, UserId};

/// Out-of-core collaborator (§6 "Bot ingress"): the transport-side bot
/// client the Respondent calls back into when operator mode lapses, so the
/// UI the human operator was using can be told to stop routing there.
#[async_trait]
pub trait BotControl: Send + Sync {
    async fn disable_operator_mode(&self, user_id: UserId, dialog_id: DialogId, silent: bool);
}

/// No-op implementation — used wherever no real bot transport is wired up
/// (tests, or a deployment that drives operator mode entirely through
/// webhooks rather than a bot UI).
#[derive(Debug, Default)]
pub struct NullBotControl;

#[async_trait]
impl BotControl for NullBotControl {
    async fn disable_operator_mode(&self, _user_id: UserId, _dialog_id: DialogId, _silent: bool) {}
}
