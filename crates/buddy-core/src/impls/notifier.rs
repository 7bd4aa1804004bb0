//! Notifier 実装
//!
//! - **LogNotifier**: tracing に書くだけ（SMTP 未設定時のデフォルト）
//! - **SmtpNotifier**: lettre の async SMTP で送信
//! - **RecordingNotifier**: テスト用。送信内容を記録し、失敗を台本どおりに返す

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};

use crate::domain::{Notification, NotifyError};
use crate::ports::Notifier;

/// Writes reminders to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            key = %notification.idempotency_key,
            "reminder (log only)"
        );
        Ok(())
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> u64 {
    30
}

/// Sends reminders as plain-text mail through a STARTTLS relay.
pub struct SmtpNotifier {
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    /// Build the transport. No connection is made until the first send.
    pub fn new(settings: &SmtpSettings, sender: &str) -> Result<Self, NotifyError> {
        let from: Mailbox = sender
            .parse()
            .map_err(|e| NotifyError::Rejected(format!("invalid sender {sender:?}: {e}")))?;

        let creds = Credentials::new(settings.username.clone(), settings.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| NotifyError::Rejected(format!("SMTP relay: {e}")))?
            .port(settings.port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(settings.timeout_secs)))
            .build();

        Ok(Self { from, mailer })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let to: Mailbox = notification.recipient.parse().map_err(|e| {
            NotifyError::Rejected(format!("invalid recipient {:?}: {e}", notification.recipient))
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject.as_str())
            .message_id(Some(format!("<{}@buddy>", notification.idempotency_key)))
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Rejected(format!("build email: {e}")))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = self.build_message(notification)?;

        self.mailer.send(email).await.map_err(|e| {
            if e.is_permanent() {
                NotifyError::Rejected(format!("SMTP send: {e}"))
            } else {
                NotifyError::Transient(format!("SMTP send: {e}"))
            }
        })?;

        tracing::info!(recipient = %notification.recipient, "reminder sent");
        Ok(())
    }
}

/// Test notifier: records what was sent and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failures: Arc<Mutex<VecDeque<NotifyError>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue errors returned by the next sends, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = NotifyError>) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(errors);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}
