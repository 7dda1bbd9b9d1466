use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use dispatch_batcher::Batcher;
use dispatch_core::types::{Answer, Creator, Message, MessageType, Question, TranscriptEntry};
use dispatch_persistence::PersistenceApi;

use crate::error::{DispatcherError, Result};

/// How long Listener waits for Respondent to drain before closing internal
/// channels on cancellation (§5 "Listener waits ≤ 5 s").
const RESPONDENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns one dialog's user-facing `DialogChannel` (§4.6 "Listener").
///
/// Converts inbound transport messages into `Question`s for the Respondent,
/// echoes user input back to the transport, and persists both the user's
/// aggregated utterance and the dispatcher's answer as they arrive from the
/// Respondent's internal channels.
pub struct Listener<P: PersistenceApi> {
    dialog_id: dispatch_core::types::DialogId,
    tx_sender: mpsc::Sender<Message>,
    rx_receiver: mpsc::Receiver<Message>,
    question_tx: mpsc::Sender<Question>,
    full_quest_rx: mpsc::Receiver<TranscriptEntry>,
    answer_rx: mpsc::Receiver<Answer>,
    deaf_rx: watch::Receiver<bool>,
    batcher: std::sync::Arc<Batcher<P>>,
    cancel: CancellationToken,

    /// Echoes held back while Respondent is deaf (§4.6 step 6; SPEC_FULL.md
    /// §C's resolution: queued but not echoed until the answer returns).
    pending_echoes: VecDeque<Message>,
}

impl<P: PersistenceApi + 'static> Listener<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dialog_id: dispatch_core::types::DialogId,
        tx_sender: mpsc::Sender<Message>,
        rx_receiver: mpsc::Receiver<Message>,
        question_tx: mpsc::Sender<Question>,
        full_quest_rx: mpsc::Receiver<TranscriptEntry>,
        answer_rx: mpsc::Receiver<Answer>,
        deaf_rx: watch::Receiver<bool>,
        batcher: std::sync::Arc<Batcher<P>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dialog_id,
            tx_sender,
            rx_receiver,
            question_tx,
            full_quest_rx,
            answer_rx,
            deaf_rx,
            batcher,
            cancel,
            pending_echoes: VecDeque::new(),
        }
    }

    /// Drive the dialog until cancellation, then wait up to 5 s for
    /// `respondent` to finish before returning. A `Fatal` error surfacing
    /// from Respondent propagates here as the whole pair's result.
    #[instrument(skip(self, respondent), fields(dialog_id = %self.dialog_id))]
    pub async fn run(mut self, respondent: JoinHandle<Result<()>>) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("listener cancelled, draining respondent");
                    break;
                }
                inbound = self.rx_receiver.recv() => {
                    match inbound {
                        Some(msg) => self.handle_inbound(msg).await,
                        None => break,
                    }
                }
                full_quest = self.full_quest_rx.recv() => {
                    match full_quest {
                        Some(entry) => self.batcher.save(self.dialog_id, entry).await,
                        None => break,
                    }
                }
                answer = self.answer_rx.recv() => {
                    match answer {
                        Some(answer) => self.handle_answer(answer).await,
                        None => break,
                    }
                }
                Ok(()) = self.deaf_rx.changed() => {
                    if !*self.deaf_rx.borrow_and_update() {
                        self.flush_pending_echoes().await;
                    }
                }
            }
        }

        match tokio::time::timeout(RESPONDENT_DRAIN_TIMEOUT, respondent).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DispatcherError::Fatal(format!("respondent task panicked: {join_err}"))),
            Err(_) => {
                warn!("respondent did not drain within the grace period");
                Ok(())
            }
        }
    }

    async fn handle_inbound(&mut self, msg: Message) {
        match msg.msg_type {
            MessageType::User | MessageType::UserVoice => {
                let question = Question {
                    lines: msg.content.message.split('\n').map(str::to_string).collect(),
                    voice: matches!(msg.msg_type, MessageType::UserVoice),
                    files: msg.files.clone(),
                    operator: msg.operator.clone(),
                };
                if self.question_tx.send(question).await.is_err() {
                    warn!("respondent question channel closed, dropping inbound message");
                    return;
                }
                if *self.deaf_rx.borrow() {
                    self.pending_echoes.push_back(msg);
                } else if self.tx_sender.send(msg).await.is_err() {
                    warn!("tx channel closed while echoing inbound message");
                }
            }
            MessageType::Assist => {
                // Produced here, never consumed — an assist message arriving
                // inbound is a transport bug, not ours to act on.
            }
        }
    }

    async fn flush_pending_echoes(&mut self) {
        while let Some(msg) = self.pending_echoes.pop_front() {
            if self.tx_sender.send(msg).await.is_err() {
                warn!("tx channel closed while flushing queued echo");
                break;
            }
        }
    }

    async fn handle_answer(&mut self, answer: Answer) {
        let creator = if answer.operator.operator { Creator::Operator } else { Creator::Ai };
        let msg = Message::assist(answer.response.clone(), answer.operator.clone());
        if self.tx_sender.send(msg).await.is_err() {
            warn!("tx channel closed while emitting answer");
        }
        self.batcher
            .save(self.dialog_id, TranscriptEntry::new(creator, answer.response))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dispatch_core::types::DialogId;
    use dispatch_persistence::sqlite::SqlitePersistence;

    use super::*;

    fn listener() -> (
        Listener<SqlitePersistence>,
        mpsc::Sender<Message>,
        mpsc::Receiver<Message>,
        mpsc::Receiver<Question>,
        watch::Sender<bool>,
    ) {
        let (tx_sender, tx_receiver_for_asserts) = mpsc::channel(8);
        let (rx_sender_for_test, rx_receiver) = mpsc::channel(8);
        let (question_tx, question_rx) = mpsc::channel(8);
        let (_full_quest_tx, full_quest_rx) = mpsc::channel(8);
        let (_answer_tx, answer_rx) = mpsc::channel(8);
        let (deaf_tx, deaf_rx) = watch::channel(false);
        let batcher = Arc::new(Batcher::new(
            Arc::new(SqlitePersistence::open_in_memory().unwrap()),
            dispatch_batcher::DEFAULT_BATCH_SIZE,
        ));

        let listener = Listener::new(
            DialogId(1),
            tx_sender,
            rx_receiver,
            question_tx,
            full_quest_rx,
            answer_rx,
            deaf_rx,
            batcher,
            CancellationToken::new(),
        );

        (listener, rx_sender_for_test, tx_receiver_for_asserts, question_rx, deaf_tx)
    }

    #[tokio::test]
    async fn echo_is_held_back_while_deaf_and_flushed_once_not_deaf() {
        let (mut listener, _rx_sender, mut tx_out, mut question_out, deaf_tx) = listener();

        deaf_tx.send(true).unwrap();

        listener.handle_inbound(Message::user("while deaf")).await;

        // the Question still reaches Respondent — only the echo is held back.
        let question = question_out.try_recv().expect("question forwarded despite deaf");
        assert_eq!(question.lines, vec!["while deaf".to_string()]);
        assert!(tx_out.try_recv().is_err(), "echo must not be sent while deaf");
        assert_eq!(listener.pending_echoes.len(), 1);

        deaf_tx.send(false).unwrap();
        listener.flush_pending_echoes().await;

        let echoed = tx_out.try_recv().expect("echo flushed once not deaf");
        assert_eq!(echoed.content.message, "while deaf");
        assert!(listener.pending_echoes.is_empty());
    }

    #[tokio::test]
    async fn echo_is_sent_immediately_when_not_deaf() {
        let (mut listener, _rx_sender, mut tx_out, _question_out, _deaf_tx) = listener();

        listener.handle_inbound(Message::user("hi")).await;

        let echoed = tx_out.try_recv().expect("echo sent immediately");
        assert_eq!(echoed.content.message, "hi");
        assert!(listener.pending_echoes.is_empty());
    }
}
