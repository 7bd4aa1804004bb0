//! WorkflowRunner - 永続タイマー
//!
//! 生きている invocation ごとに 1 つの driver タスクを持ちます。
//! driver は `advance` を呼び、返ってきた時刻まで眠り、また `advance` を呼ぶだけです。
//! 状態はすべて invocation store にあるので、プロセスが落ちても
//! `recover()` で store から driver を作り直せば続きから再開できます。
//!
//! - 同じ task に driver が 2 つ立たないよう active set で管理
//! - shutdown は watch channel。driver は次の待機点で止まる（ステップの途中では止めない）
//! - 1 回の sleep は `rescan_interval` で頭打ち。ホストがスリープしても起床後すぐ deadline に気付く

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::workflow::{CheckInWorkflow, Progress};
use crate::domain::{ErrorKind, TaskId, WorkflowError};
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// How often `run` rescans the store for invocations started elsewhere.
    pub rescan_interval_secs: u64,
    /// Pause before retrying `advance` after a transient error.
    pub error_backoff_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            rescan_interval_secs: 30,
            error_backoff_secs: 5,
        }
    }
}

impl RunnerSettings {
    fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs.max(1))
    }

    fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs.max(1))
    }
}

type ActiveSet = Arc<Mutex<HashSet<TaskId>>>;

/// Drives invocations to completion.
/// - `request_shutdown()` で全 driver に停止を伝える
/// - `shutdown_and_join()` で全 driver の終了を待てる
pub struct WorkflowRunner {
    workflow: Arc<CheckInWorkflow>,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
    active: ActiveSet,
    joins: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkflowRunner {
    pub fn new(
        workflow: Arc<CheckInWorkflow>,
        clock: Arc<dyn Clock>,
        settings: RunnerSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            workflow,
            clock,
            settings,
            active: Arc::new(Mutex::new(HashSet::new())),
            joins: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn workflow(&self) -> &Arc<CheckInWorkflow> {
        &self.workflow
    }

    /// Spawn a driver for `task_id` unless one is already running.
    ///
    /// Returns whether a driver was spawned.
    pub fn submit(&self, task_id: TaskId) -> bool {
        if *self.shutdown_tx.borrow() {
            return false;
        }
        if !lock(&self.active).insert(task_id) {
            return false;
        }

        let driver = Driver {
            task_id,
            workflow: Arc::clone(&self.workflow),
            clock: Arc::clone(&self.clock),
            active: Arc::clone(&self.active),
            max_sleep: self.settings.rescan_interval(),
            error_backoff: self.settings.error_backoff(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let join = tokio::spawn(driver.run(shutdown_rx));

        let mut joins = lock(&self.joins);
        joins.retain(|j| !j.is_finished());
        joins.push(join);
        true
    }

    /// Spawn drivers for every non-complete, non-halted invocation in the store.
    ///
    /// Returns how many new drivers were spawned.
    pub async fn recover(&self) -> Result<usize, WorkflowError> {
        let records = self.workflow.runnable().await?;
        let spawned = records
            .iter()
            .filter(|r| self.submit(r.task_id))
            .count();
        if spawned > 0 {
            info!(spawned, "resumed check-ins from store");
        }
        Ok(spawned)
    }

    /// Recover, then keep rescanning until shutdown is requested.
    pub async fn run(&self) -> Result<(), WorkflowError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.recover().await?;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.rescan_interval()) => {
                    if let Err(err) = self.recover().await {
                        warn!(error = %err, "rescan failed");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Ask every driver to stop at its next suspension point.
    pub fn request_shutdown(&self) {
        // send_replace: the flag must stick even when no driver is listening
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for the drivers spawned so far to finish on their own.
    pub async fn join_idle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = lock(&self.joins).drain(..).collect();
            if pending.is_empty() {
                break;
            }
            for join in pending {
                if let Err(err) = join.await {
                    error!(error = %err, "driver task failed");
                }
            }
        }
    }

    /// Shutdown and wait for all drivers.
    pub async fn shutdown_and_join(&self) {
        self.request_shutdown();
        self.join_idle().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes the task from the active set however the driver ends, panics included.
struct ActiveGuard {
    task_id: TaskId,
    active: ActiveSet,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.task_id);
    }
}

struct Driver {
    task_id: TaskId,
    workflow: Arc<CheckInWorkflow>,
    clock: Arc<dyn Clock>,
    active: ActiveSet,
    max_sleep: Duration,
    error_backoff: Duration,
}

impl Driver {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let task_id = self.task_id;
        let _active = ActiveGuard {
            task_id,
            active: Arc::clone(&self.active),
        };
        debug!(%task_id, "driver started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let Some(wait) = self.tick().await else {
                break;
            };

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait.min(self.max_sleep)) => {}
            }
        }

        debug!(%task_id, "driver stopped");
    }

    /// One `advance`. `None` means this driver is done.
    async fn tick(&self) -> Option<Duration> {
        let task_id = self.task_id;
        match self.workflow.advance(task_id).await {
            Ok(Progress::WaitUntil(at)) => {
                Some((at - self.clock.now()).to_std().unwrap_or(Duration::ZERO))
            }
            Ok(Progress::Completed) => None,
            Ok(Progress::Halted(reason)) => {
                let err = WorkflowError::halted(task_id, &reason);
                error!(%task_id, error = %err, "driver parked; run `buddy resume` to retry");
                None
            }
            Err(err) if err.kind() == ErrorKind::Transient => {
                warn!(%task_id, error = %err, "advance failed; backing off");
                Some(self.error_backoff)
            }
            Err(err) => {
                error!(%task_id, error = %err, "advance failed; dropping driver");
                None
            }
        }
    }
}
