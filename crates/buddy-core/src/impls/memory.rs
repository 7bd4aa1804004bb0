//! In-memory stores - 開発用・テスト用
//!
//! プロセスが落ちると中身も消えます。クラッシュ再開のテストでは
//! 同じインスタンス（Arc）を新しい workflow に渡して「再起動」を表現します。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{IdempotencyKey, InvocationRecord, StoreError, Task, TaskId};
use crate::ports::{InsertOutcome, InvocationStore, TaskStore};

/// HashMap を Mutex で包んだだけのタスクストア
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a task outright. Used to exercise the missing-task path.
    pub async fn remove(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().await.remove(&id)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Conflict {
                key: task.id.to_string(),
                expected: 0,
                found: 1,
            });
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn mark_done(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let mut tasks = self.tasks.lock().await;
        Ok(tasks.get_mut(&id).map(|task| {
            task.mark_done();
            task.clone()
        }))
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self.tasks.lock().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks)
    }
}

/// Invocation store keyed by idempotency key.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInvocationStore {
    records: Arc<Mutex<HashMap<IdempotencyKey, InvocationRecord>>>,
}

impl InMemoryInvocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvocationStore for InMemoryInvocationStore {
    async fn insert_if_absent(
        &self,
        record: InvocationRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(&record.key) {
            return Ok(InsertOutcome::AlreadyExists(existing.clone()));
        }
        records.insert(record.key.clone(), record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<InvocationRecord>, StoreError> {
        let key = IdempotencyKey::for_task(task_id);
        Ok(self.records.lock().await.get(&key).cloned())
    }

    async fn update(&self, record: &mut InvocationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let stored = records
            .get_mut(&record.key)
            .ok_or_else(|| StoreError::NotFound(record.key.to_string()))?;

        if stored.revision != record.revision {
            return Err(StoreError::Conflict {
                key: record.key.to_string(),
                expected: record.revision,
                found: stored.revision,
            });
        }

        record.revision += 1;
        *stored = record.clone();
        Ok(())
    }

    async fn list_incomplete(&self) -> Result<Vec<InvocationRecord>, StoreError> {
        let mut out: Vec<InvocationRecord> = self
            .records
            .lock()
            .await
            .values()
            .filter(|r| !r.is_complete())
            .cloned()
            .collect();
        out.sort_by_key(|r| r.deadline);
        Ok(out)
    }

    async fn list(&self) -> Result<Vec<InvocationRecord>, StoreError> {
        let mut out: Vec<InvocationRecord> =
            self.records.lock().await.values().cloned().collect();
        out.sort_by_key(|r| r.started_at);
        Ok(out)
    }
}
