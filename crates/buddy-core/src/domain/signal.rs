//! TaskCreated - ワークフロー起動シグナル
//!
//! タスク作成ごとに 1 つ発行され、at-least-once で配送される前提です。
//! 重複配送の排除はシグナルの配送メタデータではなく `task_id` から導出した
//! idempotency key で行います。

use serde::{Deserialize, Serialize};

use super::TaskId;

/// Signal emitted after a task-store `create`, consumed by the check-in workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: TaskId,
    pub title: String,
    pub delay_hours: f64,
}

impl TaskCreated {
    /// De-duplication key for this signal. Depends on nothing but the task id,
    /// so every redelivery maps onto the same invocation.
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::for_task(self.task_id)
    }
}

/// Deterministic key identifying the single invocation a task may have.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn for_task(task_id: TaskId) -> Self {
        Self(format!("check-in/{task_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
