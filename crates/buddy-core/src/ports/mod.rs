//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（タスクストア、メール送信、永続化）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - invocation store が workflow 進捗の正本
//! - task store はタスク状態の正本（workflow は読むだけ）
//! - 時刻と ID 生成も port 越しに注入（テストで差し替え可能）

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod invocation_store;
pub mod notifier;
pub mod task_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::invocation_store::{InsertOutcome, InvocationStore};
pub use self::notifier::Notifier;
pub use self::task_store::TaskStore;
