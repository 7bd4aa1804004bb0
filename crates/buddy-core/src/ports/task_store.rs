//! TaskStore port - タスクの正本（source of truth）
//!
//! 単純な CRUD です。ワークフローは `get` で読むだけで、`done` を書きません。
//!
//! # 整合性
//! 同じ呼び出し元から見て、`mark_done` の後の `is_done` / `get` は必ず true を返すこと
//! （read-after-write）。

use async_trait::async_trait;

use crate::domain::{StoreError, Task, TaskId};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Store a freshly built task. Inserting an id that already exists is `Conflict`.
    async fn insert(&self, task: &Task) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Set `done`. Returns the updated task, or `None` if it does not exist.
    async fn mark_done(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// All tasks, newest first.
    async fn list(&self) -> Result<Vec<Task>, StoreError>;

    /// Whether the task is done. A task that does not exist counts as done:
    /// there is nobody left to remind about it.
    async fn is_done(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.get(id).await?.map_or(true, |task| task.done))
    }
}
