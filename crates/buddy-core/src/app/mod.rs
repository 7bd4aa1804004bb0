//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: 構築とワイヤリング、タスク作成（シグナル発行）
//! - **CheckInWorkflow**: 遅延確認の状態機械（start / advance / resume）
//! - **WorkflowRunner**: invocation ごとの driver と永続タイマー、クラッシュ後の recover
//! - **InvocationStatus**: 詰まり理由などを説明するビュー

pub mod builder;
pub mod runner;
pub mod status;
pub mod workflow;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::runner::{RunnerSettings, WorkflowRunner};
pub use self::status::InvocationStatus;
pub use self::workflow::{
    CheckInWorkflow, Progress, ResumeOutcome, StartOutcome, WorkflowSettings,
};
