pub mod bot;
pub mod error;
pub mod listener;
pub mod operator_mode;
pub mod respondent;

pub use bot::{BotControl, NullBotControl};
pub use error::{DispatcherError, Result};
pub use listener::Listener;
pub use operator_mode::OperatorMode;
pub use respondent::Respondent;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dispatch_ask::{AskAccumulator, AskPipeline};
use dispatch_batcher::Batcher;
use dispatch_core::types::{Answer, Assistant, DialogId, ResponderId, TranscriptEntry, UserId};
use dispatch_notify::NotificationBus;
use dispatch_operator::OperatorRegistry;
use dispatch_persistence::PersistenceApi;
use dispatch_sessions::{Session, SessionCache};

/// Internal channel capacity for the question/full-question/answer pipes
/// (§5: "question/answer/full/err: capacity 1 per dialog").
const INTERNAL_QUEUE_CAPACITY: usize = 1;

/// The shared collaborators a `Respondent`/`Listener` pair borrows from the
/// running process — everything `run_dialog` needs beyond the dialog's own
/// identity (§1 "the per-dialog dispatcher together with its supporting
/// pieces").
pub struct DialogDeps<P: PersistenceApi> {
    pub session_cache: Arc<SessionCache<P>>,
    pub batcher: Arc<Batcher<P>>,
    pub accumulator: Arc<AskAccumulator>,
    pub pipeline: Arc<AskPipeline>,
    pub operator: Arc<OperatorRegistry>,
    pub notifications: Arc<NotificationBus>,
    pub bot: Arc<dyn BotControl>,
    pub operator_response_timeout: Duration,
}

/// Spawn the Respondent task and run the Listener loop for one dialog until
/// cancellation or a Fatal assistant error.
///
/// Enforces §3's Session invariant — "at most one active listener and at
/// most one active respondent per Session at any time" — with a
/// compare-and-swap on the Session's `listener_active` flag; a second
/// concurrent call for the same Session fails fast instead of racing two
/// dispatch loops against the same channels.
pub async fn run_dialog<P: PersistenceApi + 'static>(
    assist: Assistant,
    dialog_id: DialogId,
    resp_id: ResponderId,
    user_id: UserId,
    session: Arc<Session>,
    deps: DialogDeps<P>,
    cancel: CancellationToken,
) -> Result<()> {
    if session
        .listener_active
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(DispatcherError::Fatal(format!(
            "dialog {dialog_id} already has an active listener"
        )));
    }

    let result = run_dialog_inner(assist, dialog_id, resp_id, user_id, session.clone(), deps, cancel).await;
    session.listener_active.store(false, Ordering::SeqCst);
    result
}

async fn run_dialog_inner<P: PersistenceApi + 'static>(
    assist: Assistant,
    dialog_id: DialogId,
    resp_id: ResponderId,
    user_id: UserId,
    session: Arc<Session>,
    deps: DialogDeps<P>,
    cancel: CancellationToken,
) -> Result<()> {
    let (tx_sender, rx_receiver) = session.take_dispatcher_channel(&resp_id).await.ok_or_else(|| {
        DispatcherError::Fatal(format!("no channel registered for responder {resp_id}"))
    })?;

    let (question_tx, question_rx) = mpsc::channel(INTERNAL_QUEUE_CAPACITY);
    let (full_quest_tx, full_quest_rx) = mpsc::channel::<TranscriptEntry>(INTERNAL_QUEUE_CAPACITY);
    let (answer_tx, answer_rx) = mpsc::channel::<Answer>(INTERNAL_QUEUE_CAPACITY);
    let (deaf_tx, deaf_rx) = watch::channel(false);

    let respondent = Respondent::new(
        dialog_id,
        resp_id,
        user_id,
        assist,
        session,
        deps.session_cache,
        question_rx,
        full_quest_tx,
        answer_tx,
        deaf_tx,
        deps.accumulator,
        deps.pipeline,
        deps.operator,
        deps.notifications,
        deps.bot,
        deps.operator_response_timeout,
        cancel.clone(),
    );

    let respondent_handle: JoinHandle<Result<()>> = tokio::spawn(respondent.run());

    let listener = Listener::new(
        dialog_id,
        tx_sender,
        rx_receiver,
        question_tx,
        full_quest_rx,
        answer_rx,
        deaf_rx,
        deps.batcher,
        cancel,
    );

    listener.run(respondent_handle).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration as StdDuration;

    use dispatch_assistant::test_double::ScriptedAssistant;
    use dispatch_core::types::{AssistId, AssistantEvents, AssistantMetas, DialogId, Message, ResponderId, UserId};
    use dispatch_persistence::sqlite::SqlitePersistence;

    fn assistant() -> Assistant {
        Assistant {
            assist_id: AssistId("a1".to_string()),
            assist_name: "demo".to_string(),
            user_id: UserId(1),
            model_id: "model-x".to_string(),
            metas: AssistantMetas::default(),
            events: AssistantEvents::default(),
            espero: 0,
            ignore: false,
            limit: 4000,
            responder_limit: 4000,
        }
    }

    fn deps_with(
        session_cache: Arc<SessionCache<SqlitePersistence>>,
        reply: &str,
    ) -> DialogDeps<SqlitePersistence> {
        let client = Arc::new(ScriptedAssistant::new(vec![]).with_default_reply(reply));
        DialogDeps {
            session_cache,
            batcher: Arc::new(Batcher::new(
                Arc::new(SqlitePersistence::open_in_memory().unwrap()),
                dispatch_batcher::DEFAULT_BATCH_SIZE,
            )),
            accumulator: Arc::new(AskAccumulator::new()),
            pipeline: Arc::new(AskPipeline::new(client, 3, 0)),
            operator: Arc::new(OperatorRegistry::new(
                "http://127.0.0.1:0",
                StdDuration::from_secs(300),
                StdDuration::from_secs(300),
                CancellationToken::new(),
            )),
            notifications: Arc::new(NotificationBus::new()),
            bot: Arc::new(NullBotControl),
            operator_response_timeout: StdDuration::from_secs(120),
        }
    }

    #[tokio::test]
    async fn a_simple_question_produces_one_ai_answer() {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let session_client = Arc::new(ScriptedAssistant::new(vec![]));
        let session_cache = Arc::new(SessionCache::new(persistence, session_client, 30, CancellationToken::new()));

        let dialog_id = DialogId(1);
        let resp_id = ResponderId("r1".to_string());
        let session = session_cache
            .get_or_create(assistant(), dialog_id, resp_id.clone(), "web")
            .await
            .unwrap();

        // Transport side: the half a gateway connection would hold.
        let (transport_in, mut transport_out) = session.take_transport_channel(&resp_id).await.unwrap();

        let cancel = CancellationToken::new();
        let deps = deps_with(session_cache.clone(), "hello back");

        let task = tokio::spawn(run_dialog(
            assistant(),
            dialog_id,
            resp_id,
            UserId(1),
            session.clone(),
            deps,
            cancel.clone(),
        ));

        transport_in.send(Message::user("ping")).await.unwrap();

        // First the listener echoes the inbound message, then the dispatcher
        // loop resolves an answer once the debounce window (`espero`) elapses.
        let echoed = tokio::time::timeout(StdDuration::from_secs(1), transport_out.recv())
            .await
            .expect("echo should arrive")
            .expect("channel open");
        assert_eq!(echoed.content.message, "ping");

        let answered = tokio::time::timeout(StdDuration::from_secs(1), transport_out.recv())
            .await
            .expect("answer should arrive")
            .expect("channel open");
        assert_eq!(answered.content.message, "hello back");

        cancel.cancel();
        let _ = tokio::time::timeout(StdDuration::from_secs(2), task).await;
    }

    #[tokio::test]
    async fn a_second_concurrent_listener_is_rejected() {
        let persistence = Arc::new(SqlitePersistence::open_in_memory().unwrap());
        let session_client = Arc::new(ScriptedAssistant::new(vec![]));
        let session_cache = Arc::new(SessionCache::new(persistence, session_client, 30, CancellationToken::new()));

        let dialog_id = DialogId(1);
        let resp_id = ResponderId("r1".to_string());
        let session = session_cache
            .get_or_create(assistant(), dialog_id, resp_id.clone(), "web")
            .await
            .unwrap();

        session.listener_active.store(true, Ordering::SeqCst);

        let deps = deps_with(session_cache.clone(), "hello back");
        let err = run_dialog(
            assistant(),
            dialog_id,
            resp_id,
            UserId(1),
            session.clone(),
            deps,
            CancellationToken::new(),
        )
        .await
        .expect_err("a second listener on the same session must be rejected");

        assert!(matches!(err, DispatcherError::Fatal(_)));
    }
}
