use tokio::sync::{mpsc, Mutex as AsyncMutex};

use dispatch_core::types::{DialogId, Message, UserId};

/// Capacity of the tx/rx queues backing one dialog — deliberately tiny (§5
/// "Channels are sized for backpressure"), forcing producers to block on a
/// slow consumer rather than build up an unbounded backlog.
pub const DIALOG_QUEUE_CAPACITY: usize = 1;

/// Two independent one-directional pipes wired to a single dialog.
///
/// `tx` carries dispatcher output to the transport (echoes and answers);
/// `rx` carries transport input to the dispatcher (user messages, operator
/// control messages). Each side's receiving end is taken out exactly once
/// by whichever task owns consuming it — a second `take` returns `None`.
pub struct DialogChannel {
    pub user_id: UserId,
    pub dialog_id: DialogId,
    pub resp_name: String,

    tx_sender: mpsc::Sender<Message>,
    tx_receiver: AsyncMutex<Option<mpsc::Receiver<Message>>>,

    rx_sender: mpsc::Sender<Message>,
    rx_receiver: AsyncMutex<Option<mpsc::Receiver<Message>>>,
}

impl DialogChannel {
    pub fn new(user_id: UserId, dialog_id: DialogId, resp_name: impl Into<String>) -> Self {
        let (tx_sender, tx_receiver) = mpsc::channel(DIALOG_QUEUE_CAPACITY);
        let (rx_sender, rx_receiver) = mpsc::channel(DIALOG_QUEUE_CAPACITY);
        Self {
            user_id,
            dialog_id,
            resp_name: resp_name.into(),
            tx_sender,
            tx_receiver: AsyncMutex::new(Some(tx_receiver)),
            rx_sender,
            rx_receiver: AsyncMutex::new(Some(rx_receiver)),
        }
    }

    /// Dispatcher's handle for emitting echoes/answers to the transport.
    pub fn tx_sender(&self) -> mpsc::Sender<Message> {
        self.tx_sender.clone()
    }

    /// Transport's handle for delivering inbound messages to the dispatcher.
    pub fn rx_sender(&self) -> mpsc::Sender<Message> {
        self.rx_sender.clone()
    }

    /// Take the transport-side consuming end of `tx`. `None` if already taken.
    pub async fn take_tx_receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.tx_receiver.lock().await.take()
    }

    /// Take the dispatcher-side consuming end of `rx`. `None` if already taken.
    pub async fn take_rx_receiver(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx_receiver.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receivers_can_only_be_taken_once() {
        let chan = DialogChannel::new(UserId(1), DialogId(1), "resp");
        assert!(chan.take_tx_receiver().await.is_some());
        assert!(chan.take_tx_receiver().await.is_none());
        assert!(chan.take_rx_receiver().await.is_some());
        assert!(chan.take_rx_receiver().await.is_none());
    }

    #[tokio::test]
    async fn messages_flow_tx_and_rx_independently() {
        let chan = DialogChannel::new(UserId(1), DialogId(1), "resp");
        let mut tx_rx = chan.take_tx_receiver().await.unwrap();
        let mut rx_rx = chan.take_rx_receiver().await.unwrap();

        chan.tx_sender().send(Message::user("echo")).await.unwrap();
        chan.rx_sender().send(Message::user("inbound")).await.unwrap();

        assert_eq!(tx_rx.recv().await.unwrap().content.message, "echo");
        assert_eq!(rx_rx.recv().await.unwrap().content.message, "inbound");
    }
}
