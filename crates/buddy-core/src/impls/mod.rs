//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore / InMemoryInvocationStore**: 開発用・テスト用
//! - **SqliteStore**: 単一ファイルの永続ストア（本番用）
//! - **LogNotifier / SmtpNotifier / RecordingNotifier**: 通知
//! - **TracingEventSink / MemoryEventSink**: イベント記録

pub mod event_sink;
pub mod memory;
pub mod notifier;
pub mod sqlite;

pub use self::event_sink::{MemoryEventSink, TracingEventSink};
pub use self::memory::{InMemoryInvocationStore, InMemoryTaskStore};
pub use self::notifier::{LogNotifier, RecordingNotifier, SmtpNotifier, SmtpSettings};
pub use self::sqlite::SqliteStore;
