//! InvocationStore port - check-in invocation の永続化
//!
//! # 設計原則
//! - invocation は idempotency key（task_id から導出）ごとに最大 1 件
//! - `insert_if_absent` は原子的な create-if-absent
//! - `update` は revision による楽観ロック。古い revision での更新は Conflict
//! - すべての進捗（phase, deadline, check 結果）はここから再構築できる

use async_trait::async_trait;

use crate::domain::{InvocationRecord, StoreError, TaskId};

/// Result of an atomic create-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(InvocationRecord),
    /// A record with the same key was already there; it is returned unchanged.
    AlreadyExists(InvocationRecord),
}

#[async_trait]
pub trait InvocationStore: Send + Sync {
    async fn insert_if_absent(&self, record: InvocationRecord)
    -> Result<InsertOutcome, StoreError>;

    async fn get(&self, task_id: TaskId) -> Result<Option<InvocationRecord>, StoreError>;

    /// Persist `record` if the stored revision still equals `record.revision`.
    /// On success the revision is bumped in both the store and `record`.
    async fn update(&self, record: &mut InvocationRecord) -> Result<(), StoreError>;

    /// Every invocation that has not reached `Complete`, halted ones included.
    async fn list_incomplete(&self) -> Result<Vec<InvocationRecord>, StoreError>;

    async fn list(&self) -> Result<Vec<InvocationRecord>, StoreError>;
}
