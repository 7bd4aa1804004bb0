//! EventSink port - イベント記録の抽象化
//!
//! - TracingEventSink: tracing に流す（デフォルト、オペレーター向け）
//! - MemoryEventSink: テスト用

use crate::domain::DomainEvent;

/// EventSink はドメインイベントを記録
///
/// 同期 API です。重い処理はしないこと（ワークフローのステップ間で呼ばれる）。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}
