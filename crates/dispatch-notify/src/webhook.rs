use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{instrument, warn};

use dispatch_core::config::NotifyConfig;
use dispatch_core::types::Notification;
use dispatch_persistence::PersistenceApi;

/// Delivers queued notifications to per-user webhook endpoints (§4.8, §6).
///
/// Looks up each user's registered channels from `PersistenceApi` and POSTs
/// a backend-specific payload. A transport-level failure is retried exactly
/// once; a non-2xx response is logged and not retried (the endpoint is
/// reachable, it rejected the payload).
pub struct WebhookDelivery<P: PersistenceApi> {
    persistence: Arc<P>,
    client: reqwest::Client,
    telegram_host: Option<String>,
    telegram_port: Option<u16>,
    mail_host: Option<String>,
    mail_port: Option<u16>,
}

impl<P: PersistenceApi> WebhookDelivery<P> {
    pub fn new(persistence: Arc<P>, config: &NotifyConfig) -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .unwrap_or_default();

        Self {
            persistence,
            client,
            telegram_host: config.telegram_host.clone(),
            telegram_port: config.telegram_port,
            mail_host: config.mail_host.clone(),
            mail_port: config.mail_port,
        }
    }

    #[instrument(skip(self, notification), fields(user_id = %notification.user_id, event = ?notification.event))]
    pub async fn deliver(&self, notification: &Notification) {
        let channels = match self.persistence.get_notification_channels(notification.user_id) {
            Ok(channels) => channels,
            Err(e) => {
                warn!(error = %e, "failed to look up notification channels");
                return;
            }
        };

        for channel in channels {
            match channel.channel_type.as_str() {
                "telegram" => self.deliver_telegram(notification, &channel.channel_value).await,
                "mail" => self.deliver_mail(notification, &channel.channel_value).await,
                other => warn!(channel_type = other, "unrecognised notification channel type"),
            }
        }
    }

    async fn deliver_telegram(&self, notification: &Notification, tid: &str) {
        let (Some(host), Some(port)) = (&self.telegram_host, self.telegram_port) else {
            warn!("telegram notification channel configured but no telegram host/port set");
            return;
        };
        let url = format!("http://{host}:{port}/notification");
        let body = serde_json::json!({
            "tid": tid,
            "event": notification.event,
            "user": notification.user_name,
            "assist": notification.assist_name,
            "target": notification.target,
        });
        self.send_with_retry(&url, body).await;
    }

    async fn deliver_mail(&self, notification: &Notification, email: &str) {
        let (Some(host), Some(port)) = (&self.mail_host, self.mail_port) else {
            warn!("mail notification channel configured but no mail host/port set");
            return;
        };
        let url = format!("https://{host}:{port}/notification");
        let body = serde_json::json!({
            "email": email,
            "event": notification.event,
            "user": notification.user_name,
            "assist": notification.assist_name,
            "target": notification.target,
        });
        self.send_with_retry(&url, body).await;
    }

    async fn send_with_retry(&self, url: &str, body: serde_json::Value) {
        for attempt in 1..=2 {
            match self.client.post(url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => return,
                Ok(resp) => {
                    warn!(status = resp.status().as_u16(), url, "webhook rejected payload");
                    return;
                }
                Err(e) if attempt == 1 => {
                    warn!(error = %e, url, "webhook transport error, retrying once");
                }
                Err(e) => {
                    warn!(error = %e, url, "webhook transport error, giving up after retry");
                }
            }
        }
    }

    /// Drain `receiver` forever, delivering each notification as it arrives.
    pub async fn run_consumer(self: Arc<Self>, mut receiver: mpsc::Receiver<Notification>) {
        while let Some(notification) = receiver.recv().await {
            self.deliver(&notification).await;
        }
        warn!("notification bus receiver closed, delivery consumer exiting");
    }
}
