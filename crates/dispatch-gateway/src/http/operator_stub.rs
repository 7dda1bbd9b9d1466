//! Local/test stand-in for the operator event-stream backend (§6 "Operator
//! event stream" wire contract), exposed so `dispatch-operator::OperatorSession`
//! has something to talk to without a real human-operator console.
//!
//! `GET /op` opens one SSE subscription per `(user_id, dialog_id)`, issuing an
//! `init` event carrying a freshly minted `sid` exactly once, per §3's
//! OperatorSession invariant. `POST /op` accepts a message addressed to that
//! `sid` and re-emits it on the same subscriber's stream — this stub has no
//! second party to relay to, so it loops the dispatcher's own message back,
//! which is enough to exercise the wire path end to end (connect, handshake,
//! post, read) in local development and integration tests.

use std::convert::Infallible;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use dashmap::DashMap;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use dispatch_core::types::{DialogId, Message, UserId};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 16;

struct Subscriber {
    sid: i64,
    tx: mpsc::Sender<Event>,
}

/// Registry of live `GET /op` subscriptions, keyed by `(user_id, dialog_id)`.
pub struct OperatorStubState {
    subscribers: DashMap<(UserId, DialogId), Subscriber>,
    next_sid: AtomicI64,
}

impl OperatorStubState {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_sid: AtomicI64::new(1),
        }
    }
}

impl Default for OperatorStubState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    user_id: u32,
    dialog_id: u64,
}

/// `GET /op?user_id=<u32>&dialog_id=<u64>` → `text/event-stream`.
pub async fn op_stream(
    State(state): State<Arc<OperatorStubState>>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let key = (UserId(query.user_id), DialogId(query.dialog_id));
    let sid = state.next_sid.fetch_add(1, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

    state.subscribers.insert(key, Subscriber { sid, tx });
    debug!(user_id = query.user_id, dialog_id = query.dialog_id, sid, "operator stub subscriber connected");

    let init = Event::default().event("init").data(json!({ "sid": sid }).to_string());

    let stream = async_stream::stream! {
        yield Ok(init);
        while let Some(event) = rx.recv().await {
            yield Ok(event);
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    user_id: u32,
    dialog_id: u64,
    sid: i64,
    msg: Message,
}

/// `POST /op` — `{user_id, dialog_id, sid, msg}`; 2xx on acceptance.
pub async fn op_send(
    State(state): State<Arc<OperatorStubState>>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    let key = (UserId(body.user_id), DialogId(body.dialog_id));

    let Some(subscriber) = state.subscribers.get(&key) else {
        return (StatusCode::NOT_FOUND, "no subscriber for this dialog");
    };
    if subscriber.sid != body.sid {
        return (StatusCode::CONFLICT, "sid does not match the active subscription");
    }

    let payload = match serde_json::to_string(&body.msg) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialise operator message");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to serialise message");
        }
    };

    if subscriber.tx.try_send(Event::default().data(payload)).is_err() {
        warn!("operator stub subscriber queue full or closed, dropping message");
        return (StatusCode::SERVICE_UNAVAILABLE, "subscriber queue full");
    }

    (StatusCode::OK, "accepted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_unknown_dialog_returns_not_found() {
        let state = Arc::new(OperatorStubState::new());
        let response = op_send(
            State(state),
            Json(SendRequest {
                user_id: 1,
                dialog_id: 1,
                sid: 1,
                msg: Message::user("hi"),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_with_stale_sid_is_rejected() {
        let state = Arc::new(OperatorStubState::new());
        state.subscribers.insert(
            (UserId(1), DialogId(1)),
            Subscriber {
                sid: 42,
                tx: mpsc::channel(1).0,
            },
        );
        let response = op_send(
            State(state),
            Json(SendRequest {
                user_id: 1,
                dialog_id: 1,
                sid: 41,
                msg: Message::user("hi"),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
