use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::warn;

use dispatch_core::types::Notification;

/// Queue capacity of the notification bus — §4.8 specifies 1, matching the
/// rest of this stack's tightly backpressured internal channels.
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 1;

/// Single process-wide bounded queue of lifecycle/trigger notifications
/// (§4.8). Producers never block — a full queue drops the record with a
/// warning rather than stall the dispatcher that emitted it.
pub struct NotificationBus {
    sender: mpsc::Sender<Notification>,
    receiver: AsyncMutex<Option<mpsc::Receiver<Notification>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);
        Self {
            sender,
            receiver: AsyncMutex::new(Some(receiver)),
        }
    }

    /// Non-blocking publish. Logs and drops on a full or closed queue.
    pub fn publish(&self, notification: Notification) {
        if let Err(e) = self.sender.try_send(notification) {
            warn!(error = %e, "notification bus full or closed, dropping record");
        }
    }

    /// Take the single consuming end. `None` if a consumer already took it.
    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<Notification>> {
        self.receiver.lock().await.take()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::types::{NotificationEvent, UserId};

    fn notification() -> Notification {
        Notification {
            user_id: UserId(1),
            event: NotificationEvent::Start,
            user_name: "alice".to_string(),
            assist_name: "demo".to_string(),
            target: String::new(),
        }
    }

    #[tokio::test]
    async fn publish_then_consume_round_trips() {
        let bus = NotificationBus::new();
        let mut receiver = bus.take_receiver().await.unwrap();
        bus.publish(notification());
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.user_name, "alice");
    }

    #[tokio::test]
    async fn full_queue_drops_without_panicking() {
        let bus = NotificationBus::new();
        let _receiver = bus.take_receiver().await.unwrap();
        bus.publish(notification());
        // Queue capacity is 1 and nothing has drained it yet — this one drops.
        bus.publish(notification());
    }

    #[tokio::test]
    async fn receiver_can_only_be_taken_once() {
        let bus = NotificationBus::new();
        assert!(bus.take_receiver().await.is_some());
        assert!(bus.take_receiver().await.is_none());
    }
}
