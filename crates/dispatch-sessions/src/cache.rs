use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use dispatch_assistant::AssistantClient;
use dispatch_core::types::{Assistant, DialogId, ResponderId};
use dispatch_persistence::PersistenceApi;

use crate::channel::DialogChannel;
use crate::error::{Result, SessionError};
use crate::session::Session;

const GET_CHANNEL_TIMEOUT: StdDuration = StdDuration::from_secs(1);

/// Owns and recycles per-dialog `Session`s (§4.1).
///
/// A concurrent map keyed by `DialogId`; each entry's TTL is refreshed on
/// access and reclaimed by a background sweeper. Eviction persists the
/// dialog's thread handles through `PersistenceApi` before dropping state.
pub struct SessionCache<P: PersistenceApi> {
    sessions: DashMap<DialogId, Arc<Session>>,
    waiters: DashMap<ResponderId, Arc<Notify>>,
    persistence: Arc<P>,
    client: Arc<dyn AssistantClient>,
    ttl: Duration,
    cancel: CancellationToken,
}

impl<P: PersistenceApi + 'static> SessionCache<P> {
    pub fn new(
        persistence: Arc<P>,
        client: Arc<dyn AssistantClient>,
        user_model_ttl_mins: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            waiters: DashMap::new(),
            persistence,
            client,
            ttl: Duration::minutes(user_model_ttl_mins as i64),
            cancel,
        }
    }

    /// Return the Session for `dialog_id`, creating it (and a fresh
    /// `DialogChannel` for `resp_id`) if absent. Extends the TTL either way.
    #[instrument(skip(self, assist), fields(dialog_id = %dialog_id, resp_id = %resp_id))]
    pub async fn get_or_create(
        &self,
        assist: Assistant,
        dialog_id: DialogId,
        resp_id: ResponderId,
        resp_name: &str,
    ) -> Result<Arc<Session>> {
        let new_ttl = Utc::now() + self.ttl;

        // Clone the Arc and drop the DashMap guard immediately — holding a
        // shard lock across the `.await` points below would risk deadlocking
        // a concurrent `get_or_create` on the same shard.
        let existing = self.sessions.get(&dialog_id).map(|e| e.value().clone());
        if let Some(session) = existing {
            session.refresh_ttl(new_ttl);
            if !session.channel_exists(&resp_id).await {
                session
                    .insert_channel(
                        resp_id.clone(),
                        DialogChannel::new(assist.user_id, dialog_id, resp_name),
                    )
                    .await;
                self.signal_waiter(&resp_id);
            }
            return Ok(session);
        }

        let session = Arc::new(Session::new(assist.clone(), resp_name, new_ttl, &self.cancel));

        if let Some(raw) = self.persistence.read_context(dialog_id)? {
            if let Ok(thread) = serde_json::from_str(&raw) {
                session.install_thread(dialog_id, thread).await;
            } else {
                warn!("stored thread context was not valid JSON, ignoring");
            }
        }

        session
            .insert_channel(
                resp_id.clone(),
                DialogChannel::new(assist.user_id, dialog_id, resp_name),
            )
            .await;

        self.sessions.insert(dialog_id, session.clone());
        self.signal_waiter(&resp_id);
        debug!("session created");
        Ok(session)
    }

    /// Locate the `DialogChannel` owning `resp_id`, waiting up to one second
    /// for `get_or_create` to populate it if it isn't registered yet.
    #[instrument(skip(self))]
    pub async fn get_channel_sender(
        &self,
        resp_id: &ResponderId,
    ) -> Result<(tokio::sync::mpsc::Sender<dispatch_core::types::Message>, tokio::sync::mpsc::Sender<dispatch_core::types::Message>)> {
        if let Some(found) = self.find_channel_senders(resp_id) {
            return Ok(found);
        }

        let notify = self
            .waiters
            .entry(resp_id.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        let waited = tokio::time::timeout(GET_CHANNEL_TIMEOUT, notify.notified()).await;
        self.waiters.remove(resp_id);

        if waited.is_err() {
            return Err(SessionError::ChannelTimeout(resp_id.0.clone()));
        }

        self.find_channel_senders(resp_id)
            .ok_or_else(|| SessionError::ChannelNotFound(resp_id.0.clone()))
    }

    fn find_channel_senders(
        &self,
        resp_id: &ResponderId,
    ) -> Option<(tokio::sync::mpsc::Sender<dispatch_core::types::Message>, tokio::sync::mpsc::Sender<dispatch_core::types::Message>)> {
        for entry in self.sessions.iter() {
            // Best-effort, non-blocking peek: channel registration happens
            // under the session's own async lock inside get_or_create, so a
            // concurrent writer just means the next waiter cycle will see it.
            if let Ok(chans) = entry.value().try_channel_senders(resp_id) {
                if let Some(pair) = chans {
                    return Some(pair);
                }
            }
        }
        None
    }

    fn signal_waiter(&self, resp_id: &ResponderId) {
        if let Some(notify) = self.waiters.get(resp_id) {
            notify.notify_waiters();
        }
    }

    /// Mint a thread for `dialog_id` via `AssistantClient` if the Session
    /// doesn't already have one.
    #[instrument(skip(self))]
    pub async fn create_thread(&self, dialog_id: DialogId) -> Result<()> {
        let session = match self.sessions.get(&dialog_id) {
            Some(s) => s.clone(),
            None => return Ok(()),
        };
        if session.thread(dialog_id).await.is_some() {
            return Ok(());
        }
        let thread = self
            .client
            .create_thread(serde_json::json!({ "dialog_id": dialog_id.0 }))
            .await?;
        session.install_thread(dialog_id, thread).await;
        Ok(())
    }

    /// Persist the thread handle, tear down channels, cancel the Session's
    /// context, and drop the cache entry. Safe to call more than once.
    #[instrument(skip(self))]
    pub async fn clean_dialog(&self, dialog_id: DialogId) -> Result<()> {
        let Some((_, session)) = self.sessions.remove(&dialog_id) else {
            return Ok(());
        };
        self.persist_session_threads(&session).await?;
        let _ = session.drain_channels().await;
        session.cancel.cancel();
        info!("dialog cleaned up");
        Ok(())
    }

    async fn persist_session_threads(&self, session: &Session) -> Result<()> {
        for (dialog_id, thread) in session.all_threads().await {
            let json = serde_json::to_string(&thread)?;
            self.persistence.save_context(dialog_id, &json)?;
        }
        Ok(())
    }

    /// Evict every Session whose TTL has passed.
    #[instrument(skip(self))]
    pub async fn sweep(&self) {
        let now = Utc::now();
        let expired: Vec<DialogId> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| *e.key())
            .collect();

        for dialog_id in expired {
            if let Err(e) = self.clean_dialog(dialog_id).await {
                warn!(%dialog_id, error = %e, "sweep failed to clean dialog");
            }
        }
    }

    /// Best-effort persistence of every live Session's thread handles.
    #[instrument(skip(self))]
    pub async fn save_all_on_exit(&self) {
        let sessions: Vec<(DialogId, Arc<Session>)> = self
            .sessions
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        for (dialog_id, session) in sessions {
            if let Err(e) = self.persist_session_threads(&session).await {
                warn!(%dialog_id, error = %e, "failed to persist on exit");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn dialog_ids(&self) -> Vec<DialogId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    /// Background sweeper: calls `sweep` every `interval` until `shutdown`
    /// broadcasts `true`.
    pub async fn run_sweeper(self: Arc<Self>, interval: StdDuration, mut shutdown: watch::Receiver<bool>) {
        info!("session sweeper started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("session sweeper shutting down");
                        self.save_all_on_exit().await;
                        break;
                    }
                }
            }
        }
    }
}
