use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use dispatch_ask::{AskAccumulator, AskPipeline};
use dispatch_assistant::test_double::ScriptedAssistant;
use dispatch_batcher::Batcher;
use dispatch_core::config::DispatchConfig;
use dispatch_dispatcher::{BotControl, DialogDeps, NullBotControl};
use dispatch_notify::{NotificationBus, WebhookDelivery};
use dispatch_operator::OperatorRegistry;
use dispatch_persistence::sqlite::SqlitePersistence;
use dispatch_sessions::SessionCache;

/// Every long-lived collaborator the process needs, assembled once at
/// startup and threaded explicitly into whatever consumes it — the
/// `Runtime` value §9's design notes call for in place of global mutable
/// singletons.
pub struct Runtime {
    pub config: DispatchConfig,
    pub session_cache: Arc<SessionCache<SqlitePersistence>>,
    pub batcher: Arc<Batcher<SqlitePersistence>>,
    pub accumulator: Arc<AskAccumulator>,
    pub pipeline: Arc<AskPipeline>,
    pub operator: Arc<OperatorRegistry>,
    pub notifications: Arc<NotificationBus>,
    pub bot: Arc<dyn BotControl>,
    pub cancel: CancellationToken,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Wire up every collaborator from `config`. No concrete vendor SDK is
    /// implemented in this core (§1 Non-goals) — `ScriptedAssistant` stands
    /// in for it, returning `assistant.test_answer` style canned replies
    /// unless a real `AssistantClient` is substituted by the embedder.
    pub fn new(config: DispatchConfig) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let persistence = Arc::new(SqlitePersistence::open(&config.database.path)?);
        let cancel = CancellationToken::new();

        let client: Arc<dyn dispatch_assistant::AssistantClient> =
            Arc::new(ScriptedAssistant::new(Vec::new()));

        let session_cache = Arc::new(SessionCache::new(
            persistence.clone(),
            client.clone(),
            config.sessions.user_model_ttl_mins,
            cancel.clone(),
        ));

        let batcher = Arc::new(Batcher::new(persistence.clone(), config.batcher.batch_size));

        let accumulator = Arc::new(AskAccumulator::new());

        let mut pipeline = AskPipeline::new(
            client,
            config.ask.retry_max_attempts,
            config.ask.retry_base_delay_secs,
        );
        if config.assistant.test_answer {
            pipeline = pipeline.with_test_answer("this is a test response");
        }
        let pipeline = Arc::new(pipeline);

        let operator = Arc::new(OperatorRegistry::new(
            config.operator.base_url.clone(),
            Duration::from_secs(config.operator.idle_duration_mins * 60),
            Duration::from_secs(config.operator.idle_operator_mins * 60),
            cancel.clone(),
        ));

        let notifications = Arc::new(NotificationBus::new());
        let bot: Arc<dyn BotControl> = Arc::new(NullBotControl);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            session_cache,
            batcher,
            accumulator,
            pipeline,
            operator,
            notifications,
            bot,
            cancel,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Collaborators a freshly spawned dialog dispatcher needs (§4.6), bundled
    /// for `dispatch_dispatcher::run_dialog`.
    pub fn dialog_deps(&self) -> DialogDeps<SqlitePersistence> {
        DialogDeps {
            session_cache: self.session_cache.clone(),
            batcher: self.batcher.clone(),
            accumulator: self.accumulator.clone(),
            pipeline: self.pipeline.clone(),
            operator: self.operator.clone(),
            notifications: self.notifications.clone(),
            bot: self.bot.clone(),
            operator_response_timeout: Duration::from_secs(self.config.operator.operator_response_timeout_secs),
        }
    }

    /// Start background consumers: the session sweeper, the batcher ticker,
    /// and the notification webhook delivery consumer. Per §9's shutdown
    /// ordering, consumers start before producers — this must be called
    /// before any dialog is dispatched.
    pub async fn spawn_background_tasks(self: &Arc<Self>) {
        let sweeper_cache = self.session_cache.clone();
        let sweeper_interval = Duration::from_secs(self.config.sessions.sweep_interval_mins * 60);
        let sweeper_shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move { sweeper_cache.run_sweeper(sweeper_interval, sweeper_shutdown).await });

        let ticker_batcher = self.batcher.clone();
        let ticker_period = Duration::from_secs(self.config.batcher.flush_period_secs);
        let ticker_shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move { ticker_batcher.run_ticker(ticker_period, ticker_shutdown).await });

        if let Some(receiver) = self.notifications.take_receiver().await {
            match SqlitePersistence::open(&self.config.database.path) {
                Ok(persistence) => {
                    let delivery = Arc::new(WebhookDelivery::new(Arc::new(persistence), &self.config.notify));
                    tokio::spawn(async move { delivery.run_consumer(receiver).await });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open persistence for webhook delivery, notifications will not be delivered");
                }
            }
        }

        info!("background consumers started");
    }

    /// Signal every background consumer to flush and exit, then cancel the
    /// root context so in-flight dialog dispatchers observe cancellation.
    /// Ordering per §9: cancel root context before closing queues.
    pub async fn shutdown(&self) {
        info!("runtime shutdown initiated");
        let _ = self.shutdown_tx.send(true);
        self.cancel.cancel();
        self.batcher.clone().shutdown().await;
        self.session_cache.save_all_on_exit().await;
    }
}
