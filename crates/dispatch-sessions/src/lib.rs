pub mod cache;
pub mod channel;
pub mod error;
pub mod session;

pub use cache::SessionCache;
pub use channel::{DialogChannel, DIALOG_QUEUE_CAPACITY};
pub use error::{Result, SessionError};
pub use session::Session;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use dispatch_assistant::test_double::ScriptedAssistant;
    use dispatch_core::types::{Assistant, AssistantEvents, AssistantMetas, AssistId, DialogId, ResponderId, UserId};
    use dispatch_persistence::sqlite::SqlitePersistence;

    use super::*;

    fn assistant(user_id: u32) -> Assistant {
        Assistant {
            assist_id: AssistId("a1".to_string()),
            assist_name: "demo".to_string(),
            user_id: UserId(user_id),
            model_id: "model-x".to_string(),
            metas: AssistantMetas::default(),
            events: AssistantEvents::default(),
            espero: 5,
            ignore: false,
            limit: 4000,
            responder_limit: 4000,
        }
    }

    fn cache() -> SessionCache<SqlitePersistence> {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let client = Arc::new(ScriptedAssistant::new(vec![]));
        SessionCache::new(persistence, client, 30, CancellationToken::new())
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_for_the_same_dialog() {
        let cache = cache();
        let dialog_id = DialogId(1);
        let resp_id = ResponderId("r1".to_string());

        let first = cache
            .get_or_create(assistant(1), dialog_id, resp_id.clone(), "web")
            .await
            .unwrap();
        let second = cache
            .get_or_create(assistant(1), dialog_id, resp_id, "web")
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn get_channel_sender_finds_a_registered_channel() {
        let cache = cache();
        let dialog_id = DialogId(2);
        let resp_id = ResponderId("r2".to_string());

        cache
            .get_or_create(assistant(1), dialog_id, resp_id.clone(), "web")
            .await
            .unwrap();

        let (_tx, rx_sender) = cache.get_channel_sender(&resp_id).await.unwrap();
        rx_sender
            .send(dispatch_core::types::Message::user("hi"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_channel_sender_times_out_when_never_registered() {
        let cache = cache();
        let resp_id = ResponderId("ghost".to_string());
        let result = cache.get_channel_sender(&resp_id).await;
        assert!(matches!(result, Err(SessionError::ChannelTimeout(_))));
    }

    #[tokio::test]
    async fn clean_dialog_removes_the_session_and_is_idempotent() {
        let cache = cache();
        let dialog_id = DialogId(3);
        let resp_id = ResponderId("r3".to_string());

        cache
            .get_or_create(assistant(1), dialog_id, resp_id, "web")
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        cache.clean_dialog(dialog_id).await.unwrap();
        assert_eq!(cache.len(), 0);

        // second call on an already-removed dialog must not error
        cache.clean_dialog(dialog_id).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_evicts_only_expired_sessions() {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let client = Arc::new(ScriptedAssistant::new(vec![]));
        // TTL of 0 minutes: every session is immediately expired.
        let cache = SessionCache::new(persistence, client, 0, CancellationToken::new());

        cache
            .get_or_create(assistant(1), DialogId(4), ResponderId("r4".to_string()), "web")
            .await
            .unwrap();

        cache.sweep().await;
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn dialog_ids_reflects_live_sessions() {
        let cache = cache();
        cache
            .get_or_create(assistant(1), DialogId(5), ResponderId("r5".to_string()), "web")
            .await
            .unwrap();
        cache
            .get_or_create(assistant(1), DialogId(6), ResponderId("r6".to_string()), "web")
            .await
            .unwrap();

        let mut ids = cache.dialog_ids();
        ids.sort();
        assert_eq!(ids, vec![DialogId(5), DialogId(6)]);
    }
}
