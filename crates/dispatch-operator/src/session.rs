use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use dispatch_core::types::{DialogId, Message, UserId};

use crate::error::{OperatorError, Result};
use crate::sse::{parse_sse_line, SseParsed};

const QUEUE_CAPACITY: usize = 1;
const ERROR_QUEUE_CAPACITY: usize = 1;

/// One long-lived operator event-stream subscription for a (user, dialog)
/// pair (§4.5). Owns two background tasks — an SSE reader and an HTTP
/// sender — plus an idle timer, all cancelled together on cleanup.
pub struct OperatorSession {
    pub user_id: UserId,
    pub dialog_id: DialogId,

    tx_sender: mpsc::Sender<Message>,
    rx_receiver: AsyncMutex<mpsc::Receiver<Message>>,
    error_receiver: AsyncMutex<Option<mpsc::Receiver<String>>>,

    rx_sender: mpsc::Sender<Message>,
    error_sender: mpsc::Sender<String>,

    sid: StdMutex<Option<i64>>,
    sid_ready: Notify,

    cleanup_once: AtomicBool,
    cancel: CancellationToken,

    last_touch: StdMutex<Instant>,
    idle_duration: Duration,
}

impl OperatorSession {
    /// Connect a new session: subscribe to the operator event stream and
    /// spawn the reader/sender/idle-timer tasks that drive it.
    #[instrument(skip(client, parent_cancel), fields(%user_id, %dialog_id))]
    pub fn connect(
        client: reqwest::Client,
        base_url: &str,
        user_id: UserId,
        dialog_id: DialogId,
        idle_duration: Duration,
        idle_operator: Duration,
        parent_cancel: &CancellationToken,
    ) -> Arc<Self> {
        let (tx_sender, tx_receiver) = mpsc::channel(QUEUE_CAPACITY);
        let (rx_sender, rx_receiver) = mpsc::channel(QUEUE_CAPACITY);
        let (error_sender, error_receiver) = mpsc::channel(ERROR_QUEUE_CAPACITY);

        let session = Arc::new(Self {
            user_id,
            dialog_id,
            tx_sender,
            rx_receiver: AsyncMutex::new(rx_receiver),
            error_receiver: AsyncMutex::new(Some(error_receiver)),
            rx_sender,
            error_sender,
            sid: StdMutex::new(None),
            sid_ready: Notify::new(),
            cleanup_once: AtomicBool::new(false),
            cancel: parent_cancel.child_token(),
            last_touch: StdMutex::new(Instant::now()),
            idle_duration,
        });

        tokio::spawn(reader_task(session.clone(), client.clone(), base_url.to_string()));
        tokio::spawn(sender_task(session.clone(), client, base_url.to_string(), tx_receiver, idle_operator));
        tokio::spawn(idle_timer_task(session.clone()));

        session
    }

    fn touch(&self) {
        *self.last_touch.lock().unwrap() = Instant::now();
    }

    fn set_sid(&self, sid: i64) {
        let mut guard = self.sid.lock().unwrap();
        if guard.is_none() {
            *guard = Some(sid);
            self.sid_ready.notify_waiters();
        }
    }

    fn sid(&self) -> Option<i64> {
        *self.sid.lock().unwrap()
    }

    /// Push to tx and block (up to `timeout`) for a reply on rx — the
    /// synchronous Dispatcher-facing `ask` operation.
    pub async fn ask(&self, msg: Message, timeout: Duration) -> Result<Message> {
        self.send(msg, timeout).await?;
        let mut rx = self.rx_receiver.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(OperatorError::Cancelled),
            reply = rx.recv() => reply.ok_or(OperatorError::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(OperatorError::AskTimeout),
        }
    }

    /// Fire-and-forget push to tx with a short timeout.
    pub async fn send(&self, msg: Message, timeout: Duration) -> Result<()> {
        self.touch();
        tokio::time::timeout(timeout, self.tx_sender.send(msg))
            .await
            .map_err(|_| OperatorError::AskTimeout)?
            .map_err(|_| OperatorError::Cancelled)
    }

    /// Take the receiving end of rx for exclusive consumption by the caller.
    /// Only meaningful to call once; subsequent calls see an empty queue
    /// behind the lock since the real consumer already owns the guard.
    pub async fn recv(&self) -> Option<Message> {
        self.rx_receiver.lock().await.recv().await
    }

    pub async fn take_error_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.error_receiver.lock().await.take()
    }

    /// Idempotent cleanup: cancel the session's tasks, run at most once.
    pub fn cleanup(&self) {
        if self.cleanup_once.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(user_id = %self.user_id, dialog_id = %self.dialog_id, "operator session cleanup");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn reader_task(session: Arc<OperatorSession>, client: reqwest::Client, base_url: String) {
    let url = format!(
        "{}/op?user_id={}&dialog_id={}",
        base_url.trim_end_matches('/'),
        session.user_id.0,
        session.dialog_id.0
    );

    let response = tokio::select! {
        _ = session.cancel.cancelled() => return,
        resp = client.get(&url).send() => resp,
    };

    let response = match response {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error = %e, "operator stream connect failed");
            let _ = session.error_sender.try_send(e.to_string());
            session.cleanup();
            return;
        }
    };

    let mut current_event = String::new();
    let mut line_buf = String::new();
    let mut byte_stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = session.cancel.cancelled() => break,
            next = byte_stream.next() => next,
        };

        let Some(chunk) = chunk else {
            break;
        };

        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "operator stream read error");
                let _ = session.error_sender.try_send(e.to_string());
                break;
            }
        };

        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };

        line_buf.push_str(text);
        let lines: Vec<String> = line_buf.split('\n').map(String::from).collect();
        let (complete, remainder) = lines.split_at(lines.len().saturating_sub(1));
        let remainder = remainder.first().cloned().unwrap_or_default();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_sse_line(line) {
                Some(SseParsed::Event(ev)) => current_event = ev,
                Some(SseParsed::Data(data)) => handle_event(&session, &current_event, &data),
                None => {}
            }
        }

        line_buf = remainder;
    }

    session.cleanup();
}

fn handle_event(session: &Arc<OperatorSession>, event: &str, data: &str) {
    session.touch();

    match event {
        "init" => {
            #[derive(serde::Deserialize)]
            struct Init {
                sid: i64,
            }
            match serde_json::from_str::<Init>(data) {
                Ok(init) => {
                    debug!(sid = init.sid, "operator session initialised");
                    session.set_sid(init.sid);
                }
                Err(e) => warn!(error = %e, "malformed init event"),
            }
        }
        "error" => {
            if data.contains("no_tg_id") {
                let _ = session.error_sender.try_send("no_tg_id".to_string());
                session.cleanup();
            } else {
                let _ = session.error_sender.try_send(data.to_string());
            }
        }
        _ => {
            if data.is_empty() {
                return;
            }
            match serde_json::from_str::<Message>(data) {
                Ok(msg) => {
                    if session.rx_sender.try_send(msg).is_err() {
                        warn!("operator rx queue full or closed, dropping inbound message");
                    }
                }
                Err(e) => warn!(error = %e, "malformed operator event payload"),
            }
        }
    }
}

async fn sender_task(
    session: Arc<OperatorSession>,
    client: reqwest::Client,
    base_url: String,
    mut tx_receiver: mpsc::Receiver<Message>,
    idle_operator: Duration,
) {
    loop {
        let msg = tokio::select! {
            _ = session.cancel.cancelled() => break,
            next = tx_receiver.recv() => next,
        };
        let Some(msg) = msg else { break };

        if session.sid().is_none() {
            let waited = tokio::time::timeout(idle_operator, session.sid_ready.notified()).await;
            if waited.is_err() {
                warn!("timed out waiting for sid before sending, dropping message");
                let _ = session.error_sender.try_send("sid timeout".to_string());
                continue;
            }
        }

        let Some(sid) = session.sid() else { continue };

        let body = serde_json::json!({
            "user_id": session.user_id.0,
            "dialog_id": session.dialog_id.0,
            "sid": sid,
            "msg": msg,
        });

        let url = format!("{}/op", base_url.trim_end_matches('/'));
        match client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                warn!(status, "operator POST returned non-2xx");
                let _ = session.error_sender.try_send(format!("{status} {text}"));
            }
            Err(e) => {
                warn!(error = %e, "operator POST transport error");
                let _ = session.error_sender.try_send(e.to_string());
            }
        }
    }
}

async fn idle_timer_task(session: Arc<OperatorSession>) {
    loop {
        let elapsed = session.last_touch.lock().unwrap().elapsed();
        let remaining = session.idle_duration.saturating_sub(elapsed);

        tokio::select! {
            _ = session.cancel.cancelled() => return,
            _ = tokio::time::sleep(remaining) => {
                let elapsed = session.last_touch.lock().unwrap().elapsed();
                if elapsed >= session.idle_duration {
                    info!("operator session idle timeout");
                    session.cleanup();
                    return;
                }
            }
        }
    }
}
