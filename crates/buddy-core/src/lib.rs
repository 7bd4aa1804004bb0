//! buddy-core
//!
//! Core building blocks for the check-in buddy: a durable delayed-verification
//! workflow that waits, re-checks a task, and reminds only when it is not done.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, duration, task, signal, invocation, state, retry, errors, events）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, TaskStore, InvocationStore, Notifier, EventSink）
//! - **impls**: 実装（インメモリ、SQLite、SMTP、tracing）
//! - **app**: アプリケーションロジック（workflow, runner, builder, status）
//! - **config**: 設定（TOML + 環境変数）
//! - **observability**: 集計ビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use self::app::{App, AppBuilder};
pub use self::config::BuddyConfig;
