//! Notifier port - 通知の送信
//!
//! プロセスごとに 1 度だけ構築し、`Arc<dyn Notifier>` としてワークフローに注入します。
//! トランスポート内部のリトライはこの trait の外側の話です。

use async_trait::async_trait;

use crate::domain::{Notification, NotifyError};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification. `Ok` means the transport accepted it.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}
