//! Reminder message sent when a task is still open at check-in time.

use serde::{Deserialize, Serialize};

use super::signal::IdempotencyKey;

/// An outbound notification, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Where to send it (an email address for the SMTP transport).
    pub recipient: String,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Stable per invocation. Transports that support de-duplication should
    /// pass it through so a resend after a crash is dropped downstream.
    pub idempotency_key: String,
}

impl Notification {
    /// Compose the check-in reminder for `title`.
    pub fn reminder(recipient: impl Into<String>, title: &str, key: &IdempotencyKey) -> Self {
        Self {
            recipient: recipient.into(),
            subject: format!("Hey! Did you finish: {title}?"),
            body: format!(
                "Time to check in!\n\n\
                 You wanted to accomplish:\n\n    {title}\n\n\
                 Did you finish it? Go mark it done!\n\n\
                 -- Your Accountability Buddy\n"
            ),
            idempotency_key: key.as_str().to_string(),
        }
    }
}
