use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use dispatch_ask::{AskAccumulator, AskError, AskPipeline};
use dispatch_core::types::{
    Answer, Assistant, AssistResponse, Creator, DialogId, Message, NotificationEvent, OperatorTag,
    Question, ResponderId, TranscriptEntry, UserId,
};
use dispatch_notify::NotificationBus;
use dispatch_operator::OperatorRegistry;
use dispatch_persistence::PersistenceApi;
use dispatch_sessions::{Session, SessionCache};

use crate::bot::BotControl;
use crate::error::{DispatcherError, Result};
use crate::operator_mode::OperatorMode;

/// The central per-dialog state machine (§4.6 "Respondent").
///
/// Owns no transport state of its own — it borrows the Session's channels
/// indirectly through `question_rx`/`full_quest_tx`/`answer_tx`, which
/// `Listener` wires to the user-facing `DialogChannel` and to `Batcher`.
pub struct Respondent<P: PersistenceApi> {
    dialog_id: DialogId,
    resp_id: ResponderId,
    user_id: UserId,
    assist: Assistant,

    session: Arc<Session>,
    session_cache: Arc<SessionCache<P>>,

    question_rx: mpsc::Receiver<Question>,
    full_quest_tx: mpsc::Sender<TranscriptEntry>,
    answer_tx: mpsc::Sender<Answer>,
    deaf_tx: watch::Sender<bool>,

    accumulator: Arc<AskAccumulator>,
    pipeline: Arc<AskPipeline>,
    operator: Arc<OperatorRegistry>,
    notifications: Arc<NotificationBus>,
    bot: Arc<dyn BotControl>,

    operator_response_timeout: Duration,

    cancel: CancellationToken,

    // --- mutable loop state (§3 `Session`/`Respondent` locals) ---
    deaf: bool,
    current_quest: Option<Question>,
    operator_mode: OperatorMode,
    operator_error_rx: Option<mpsc::Receiver<String>>,
    operator_timeout_deadline: Option<Instant>,
}

#[allow(clippy::too_many_arguments)]
impl<P: PersistenceApi + 'static> Respondent<P> {
    pub fn new(
        dialog_id: DialogId,
        resp_id: ResponderId,
        user_id: UserId,
        assist: Assistant,
        session: Arc<Session>,
        session_cache: Arc<SessionCache<P>>,
        question_rx: mpsc::Receiver<Question>,
        full_quest_tx: mpsc::Sender<TranscriptEntry>,
        answer_tx: mpsc::Sender<Answer>,
        deaf_tx: watch::Sender<bool>,
        accumulator: Arc<AskAccumulator>,
        pipeline: Arc<AskPipeline>,
        operator: Arc<OperatorRegistry>,
        notifications: Arc<NotificationBus>,
        bot: Arc<dyn BotControl>,
        operator_response_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dialog_id,
            resp_id,
            user_id,
            assist,
            session,
            session_cache,
            question_rx,
            full_quest_tx,
            answer_tx,
            deaf_tx,
            accumulator,
            pipeline,
            operator,
            notifications,
            bot,
            operator_response_timeout,
            cancel,
            deaf: false,
            current_quest: None,
            operator_mode: OperatorMode::Off,
            operator_error_rx: None,
            operator_timeout_deadline: None,
        }
    }

    /// Drive the dialog's dispatch loop until cancellation or a Fatal error.
    #[instrument(skip(self), fields(dialog_id = %self.dialog_id, resp_id = %self.resp_id))]
    pub async fn run(mut self) -> Result<()> {
        self.session.respondent_active.store(true, std::sync::atomic::Ordering::SeqCst);
        let result = self.run_inner().await;
        self.session.respondent_active.store(false, std::sync::atomic::Ordering::SeqCst);
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("respondent cancelled");
                    return Ok(());
                }
                Some(msg) = Self::recv_operator(&self.operator_mode, &self.operator, self.user_id, self.dialog_id) => {
                    self.handle_operator_message(msg).await?;
                }
                Some(err) = Self::recv_operator_error(&mut self.operator_error_rx) => {
                    self.handle_connection_error(err).await;
                }
                _ = Self::sleep_until_opt(self.operator_timeout_deadline) => {
                    self.handle_operator_timeout().await?;
                }
                maybe_question = self.question_rx.recv() => {
                    let Some(question) = maybe_question else {
                        debug!("question channel closed, respondent exiting");
                        return Ok(());
                    };
                    self.handle_question(question).await?;
                }
            }
        }
    }

    /// Update `deaf` and publish it to `Listener` over the watch channel so
    /// it can stop echoing inbound messages while an ask is in flight (§4.6
    /// step 6, "while not `deaf` …").
    fn set_deaf(&mut self, value: bool) {
        self.deaf = value;
        let _ = self.deaf_tx.send(value);
    }

    // --- channel helpers: conditionally-active select arms ---

    async fn recv_operator(
        mode: &OperatorMode,
        operator: &Arc<OperatorRegistry>,
        user_id: UserId,
        dialog_id: DialogId,
    ) -> Option<Message> {
        if !mode.is_active() {
            futures_util::future::pending::<()>().await;
            unreachable!()
        }
        operator.receive(user_id, dialog_id).await
    }

    async fn recv_operator_error(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
        match rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => {
                futures_util::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn sleep_until_opt(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => futures_util::future::pending::<()>().await,
        }
    }

    // --- step 5: a fresh Question arrives ---

    async fn handle_question(&mut self, question: Question) -> Result<()> {
        self.current_quest = Some(question.clone());

        if self.operator_mode.is_active() {
            self.forward_to_operator(&question).await;
            self.persist_full_question(&question).await;
            return Ok(());
        }

        if question.operator.set_operator {
            self.activate_operator_mode_pending().await;
            self.forward_to_operator(&question).await;
            self.persist_full_question(&question).await;
            return Ok(());
        }

        self.scan_triggers(&question);

        let text = question.lines.join("\n");
        let accepted = self.accumulator.push(
            self.dialog_id,
            self.resp_id.clone(),
            &text,
            self.assist.responder_limit,
        );

        let espero = Duration::from_secs(self.assist.espero);
        let mut deadline = if accepted {
            Instant::now() + espero
        } else {
            // rejected push: collapse the timer to zero, flush immediately
            Instant::now()
        };

        // step 6: inner debounce loop
        loop {
            tokio::select! {
                maybe_q = self.question_rx.recv() => {
                    match maybe_q {
                        Some(q) => {
                            self.scan_triggers(&q);
                            self.current_quest = Some(q.clone());
                            let text = q.lines.join("\n");
                            let accepted = self.accumulator.push(
                                self.dialog_id,
                                self.resp_id.clone(),
                                &text,
                                self.assist.responder_limit,
                            );
                            deadline = if accepted { Instant::now() + espero } else { Instant::now() };
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.set_deaf(self.assist.ignore);
                    break;
                }
            }
        }

        self.dispatch_current().await
    }

    fn scan_triggers(&self, question: &Question) {
        if self.assist.metas.triggers.is_empty() {
            return;
        }
        let text = question.lines.join("\n").to_lowercase();
        for trigger in &self.assist.metas.triggers {
            if !trigger.is_empty() && text.contains(&trigger.to_lowercase()) {
                self.notify(NotificationEvent::Trigger, trigger.clone());
                break;
            }
        }
    }

    // --- step 7-10: drain, route, emit ---

    async fn dispatch_current(&mut self) -> Result<()> {
        let fragments = self.accumulator.drain(self.dialog_id, self.resp_id.clone());
        let text = fragments.join("\n");

        if text.trim().is_empty() {
            return Ok(());
        }

        let Some(question) = self.current_quest.take() else {
            return Ok(());
        };

        let creator = if question.voice { Creator::UserVoice } else { Creator::User };
        let _ = self
            .full_quest_tx
            .send(TranscriptEntry::new(creator, AssistResponse::text(text.clone())))
            .await;

        let mut operator_answered = false;
        let mut set_operator_mode = self.operator_mode.is_active();

        let response = if question.operator.operator {
            match self.ask_operator(&text).await {
                Some(reply) if !reply.message.trim().is_empty() => {
                    operator_answered = true;
                    set_operator_mode = true;
                    self.promote_to_permanent();
                    reply
                }
                _ => {
                    operator_answered = false;
                    self.run_ask_pipeline(&text).await?
                }
            }
        } else {
            let response = self.run_ask_pipeline(&text).await?;
            if response.operator {
                self.enter_operator_mode_from_model(&text).await;
                set_operator_mode = true;
            }
            response
        };

        if question.operator.set_operator {
            // one-way hand-off: the user's message was routed, not answered
            return Ok(());
        }

        self.set_deaf(false);

        if response.message.trim().is_empty() {
            return Ok(());
        }

        if response.meta && !self.assist.metas.meta_action.is_empty() {
            self.notify(NotificationEvent::Target, self.assist.metas.meta_action.clone());
        }

        let answer = Answer {
            response,
            voice_question: question.voice,
            operator: OperatorTag {
                operator: operator_answered,
                set_operator: set_operator_mode,
                sender_name: None,
            },
        };

        if self.answer_tx.send(answer).await.is_err() {
            warn!("answer channel closed, dropping answer");
        }

        Ok(())
    }

    async fn persist_full_question(&self, question: &Question) {
        let creator = if question.voice { Creator::UserVoice } else { Creator::User };
        let text = question.lines.join("\n");
        let _ = self
            .full_quest_tx
            .send(TranscriptEntry::new(creator, AssistResponse::text(text)))
            .await;
    }

    async fn ask_operator(&self, text: &str) -> Option<AssistResponse> {
        let msg = Message::user(text);
        match self
            .operator
            .ask(self.user_id, self.dialog_id, msg, self.operator_response_timeout)
            .await
        {
            Ok(reply) => Some(reply.content),
            Err(e) => {
                warn!(error = %e, "operator ask failed, falling back to AI");
                None
            }
        }
    }

    async fn forward_to_operator(&self, question: &Question) {
        // stop any ask timer semantics are implicit: we never entered the
        // accumulator/debounce path for an active-operator-mode question.
        let msg = Message::user(question.lines.join("\n"));
        if let Err(e) = self.operator.send(self.user_id, self.dialog_id, msg).await {
            warn!(error = %e, "failed to forward question to operator");
        }
    }

    async fn run_ask_pipeline(&self, text: &str) -> Result<AssistResponse> {
        let thread = self.thread_handle().await?;
        match self
            .pipeline
            .ask_with_retry(&thread, &self.assist.model_id, text, &self.cancel)
            .await
        {
            Ok(response) => Ok(response),
            Err(AskError::Fatal(message)) => {
                warn!(error = %message, "fatal assistant error, terminating dialog");
                Err(DispatcherError::Fatal(message))
            }
            Err(AskError::NonCritical(message)) => {
                warn!(error = %message, "non-critical assistant error, continuing with empty reply");
                Ok(AssistResponse::default())
            }
        }
    }

    async fn thread_handle(&self) -> Result<dispatch_assistant::ThreadHandle> {
        self.session_cache.create_thread(self.dialog_id).await?;
        match self.session.thread(self.dialog_id).await {
            Some(thread) => Ok(thread),
            None => Err(DispatcherError::Fatal("no thread handle available after create_thread".to_string())),
        }
    }

    // --- step 2: operator control/reply message ---

    async fn handle_operator_message(&mut self, msg: Message) -> Result<()> {
        if msg.content.message == "Set-Mode-To-AI" && msg.operator.set_operator && msg.operator.operator {
            self.operator_mode = OperatorMode::Off;
            self.operator_timeout_deadline = None;
            self.operator_error_rx = None;
            self.operator.delete(self.user_id, self.dialog_id);
            self.bot.disable_operator_mode(self.user_id, self.dialog_id, false).await;
            info!("operator switched dialog back to AI mode");
            return Ok(());
        }

        // first reply in Pending mode makes operator mode permanent
        if self.operator_mode == OperatorMode::Pending {
            self.operator_mode = OperatorMode::Permanent;
            self.operator_timeout_deadline = None;
        }

        let answer = Answer {
            response: msg.content,
            voice_question: false,
            operator: OperatorTag {
                operator: true,
                set_operator: true,
                sender_name: msg.operator.sender_name,
            },
        };
        if self.answer_tx.send(answer).await.is_err() {
            warn!("answer channel closed, dropping operator reply");
        }
        Ok(())
    }

    // --- step 3: operator connection error ---

    async fn handle_connection_error(&mut self, err: String) {
        if err != "no_tg_id" {
            warn!(error = %err, "operator connection error");
            return;
        }

        self.operator_mode = OperatorMode::Off;
        self.operator_timeout_deadline = None;

        let answer = Answer {
            response: AssistResponse::text(NO_OPERATORS_MESSAGE),
            voice_question: false,
            operator: OperatorTag::default(),
        };
        let _ = self.answer_tx.send(answer).await;

        // refresh the error subscription for the next activation
        self.operator_error_rx = Some(self.operator.connection_errors(self.user_id, self.dialog_id).await);
    }

    // --- step 4: operator-response timeout ---

    async fn handle_operator_timeout(&mut self) -> Result<()> {
        self.operator_mode = OperatorMode::Off;
        self.operator_timeout_deadline = None;
        self.operator.delete(self.user_id, self.dialog_id);
        self.bot.disable_operator_mode(self.user_id, self.dialog_id, false).await;

        let timeout_message = operator_timeout_message(self.operator_response_timeout.as_secs());
        let canned = Answer {
            response: AssistResponse::text(timeout_message),
            voice_question: false,
            operator: OperatorTag::default(),
        };
        let _ = self.answer_tx.send(canned).await;

        if let Some(question) = self.current_quest.take() {
            let text = question.lines.join("\n");
            if !text.trim().is_empty() {
                let response = self.run_ask_pipeline(&text).await?;
                if !response.message.trim().is_empty() {
                    let answer = Answer {
                        response,
                        voice_question: question.voice,
                        operator: OperatorTag::default(),
                    };
                    let _ = self.answer_tx.send(answer).await;
                }
            }
        }
        Ok(())
    }

    // --- operator mode transitions (§4.6 state summary) ---

    async fn activate_operator_mode_pending(&mut self) {
        self.operator_mode = OperatorMode::Pending;
        self.operator_timeout_deadline = Some(Instant::now() + self.operator_response_timeout);
        if self.operator_error_rx.is_none() {
            self.operator_error_rx = Some(self.operator.connection_errors(self.user_id, self.dialog_id).await);
        }
    }

    fn promote_to_permanent(&mut self) {
        self.operator_mode = OperatorMode::Permanent;
        self.operator_timeout_deadline = None;
    }

    async fn enter_operator_mode_from_model(&mut self, text: &str) {
        self.activate_operator_mode_pending().await;
        self.notify(NotificationEvent::ModelOperator, String::new());
        let msg = Message::user(text);
        if let Err(e) = self.operator.send(self.user_id, self.dialog_id, msg).await {
            warn!(error = %e, "failed to forward model-escalated question to operator");
        }
    }

    fn notify(&self, event: NotificationEvent, target: String) {
        self.notifications.publish(dispatch_core::types::Notification {
            user_id: self.user_id,
            event,
            user_name: self.session.resp_name.clone(),
            assist_name: self.assist.assist_name.clone(),
            target,
        });
    }
}

/// Canned fallback text when the operator backend reports `no_tg_id` (§7
/// "User-visible failure behaviour").
const NO_OPERATORS_MESSAGE: &str =
    "Операторы недоступны, продолжаю отвечать в режиме ИИ.";

/// Canned fallback text for an operator-response timeout (§8 scenario 3
/// requires the literal substring "Оператор не ответил в течение N секунд").
fn operator_timeout_message(secs: u64) -> String {
    if secs >= 60 && secs % 60 == 0 {
        format!(
            "Оператор не ответил в течение {} минут, продолжаю отвечать в режиме ИИ.",
            secs / 60
        )
    } else {
        format!(
            "Оператор не ответил в течение {secs} секунд, продолжаю отвечать в режиме ИИ."
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_uses_seconds_under_a_minute() {
        let msg = operator_timeout_message(5);
        assert!(msg.contains("Оператор не ответил в течение 5 секунд"));
    }

    #[test]
    fn timeout_message_uses_minutes_on_exact_minute_boundaries() {
        let msg = operator_timeout_message(120);
        assert!(msg.contains("2 минут"));
    }
}
