use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use dispatch_assistant::ThreadHandle;
use dispatch_core::types::{Assistant, DialogId, Message, ResponderId};

use crate::channel::DialogChannel;

/// Per-dialog state, owned exclusively by `SessionCache` (§3 `RespModel`).
///
/// At most one active Listener and one active Respondent may run against a
/// Session at any time — `listener_active`/`respondent_active` are the
/// flags the dispatcher flips to enforce that.
pub struct Session {
    pub assist: Assistant,
    pub resp_name: String,

    ttl: StdMutex<DateTime<Utc>>,
    threads: RwLock<HashMap<DialogId, ThreadHandle>>,
    chans: RwLock<HashMap<ResponderId, DialogChannel>>,

    pub listener_active: AtomicBool,
    pub respondent_active: AtomicBool,
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(assist: Assistant, resp_name: impl Into<String>, ttl: DateTime<Utc>, parent: &CancellationToken) -> Self {
        Self {
            assist,
            resp_name: resp_name.into(),
            ttl: StdMutex::new(ttl),
            threads: RwLock::new(HashMap::new()),
            chans: RwLock::new(HashMap::new()),
            listener_active: AtomicBool::new(false),
            respondent_active: AtomicBool::new(false),
            cancel: parent.child_token(),
        }
    }

    pub fn ttl(&self) -> DateTime<Utc> {
        *self.ttl.lock().unwrap()
    }

    pub fn refresh_ttl(&self, new_ttl: DateTime<Utc>) {
        *self.ttl.lock().unwrap() = new_ttl;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.ttl()
    }

    pub async fn thread(&self, dialog_id: DialogId) -> Option<ThreadHandle> {
        self.threads.read().await.get(&dialog_id).cloned()
    }

    pub async fn install_thread(&self, dialog_id: DialogId, thread: ThreadHandle) {
        self.threads.write().await.insert(dialog_id, thread);
    }

    pub async fn all_threads(&self) -> Vec<(DialogId, ThreadHandle)> {
        self.threads
            .read()
            .await
            .iter()
            .map(|(id, t)| (*id, t.clone()))
            .collect()
    }

    /// Register a fresh `DialogChannel` for `resp_id`, replacing any existing one.
    pub async fn insert_channel(&self, resp_id: ResponderId, channel: DialogChannel) {
        self.chans.write().await.insert(resp_id, channel);
    }

    pub async fn channel_exists(&self, resp_id: &ResponderId) -> bool {
        self.chans.read().await.contains_key(resp_id)
    }

    /// Non-blocking lookup of `resp_id`'s tx/rx senders. `Err(())` means the
    /// map is momentarily write-locked by a concurrent `insert_channel` — the
    /// caller should retry rather than treat this as "not registered".
    pub fn try_channel_senders(
        &self,
        resp_id: &ResponderId,
    ) -> std::result::Result<Option<(mpsc::Sender<Message>, mpsc::Sender<Message>)>, ()> {
        match self.chans.try_read() {
            Ok(guard) => Ok(guard
                .get(resp_id)
                .map(|c| (c.tx_sender(), c.rx_sender()))),
            Err(_) => Err(()),
        }
    }

    /// Remove and return every registered channel, for teardown.
    pub async fn drain_channels(&self) -> Vec<DialogChannel> {
        self.chans.write().await.drain().map(|(_, c)| c).collect()
    }

    /// The dispatcher-side handles for `resp_id`: a clonable sender for
    /// emitting echoes/answers, and the single consuming end of `rx` (taken
    /// once, by whichever `Listener` owns this dialog). `None` if no channel
    /// is registered or the `rx` receiver was already taken.
    pub async fn take_dispatcher_channel(
        &self,
        resp_id: &ResponderId,
    ) -> Option<(mpsc::Sender<Message>, mpsc::Receiver<Message>)> {
        let chans = self.chans.read().await;
        let chan = chans.get(resp_id)?;
        let rx_receiver = chan.take_rx_receiver().await?;
        Some((chan.tx_sender(), rx_receiver))
    }

    /// The transport-side handles for `resp_id`: a clonable sender for
    /// delivering inbound messages, and the single consuming end of `tx`
    /// (taken once, by whichever transport connection owns this dialog).
    /// `None` if no channel is registered or the `tx` receiver was already
    /// taken.
    pub async fn take_transport_channel(
        &self,
        resp_id: &ResponderId,
    ) -> Option<(mpsc::Sender<Message>, mpsc::Receiver<Message>)> {
        let chans = self.chans.read().await;
        let chan = chans.get(resp_id)?;
        let tx_receiver = chan.take_tx_receiver().await?;
        Some((chan.rx_sender(), tx_receiver))
    }
}
