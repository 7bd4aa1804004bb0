//! Events - ドメインイベント
//!
//! ワークフローの各遷移で発行され、EventSink に渡されます。
//! 起動拒否と halt はオペレーターに見える経路（ログ等）へ必ず流れます。

use serde::{Deserialize, Serialize};

use super::state::{CheckResult, HaltReason};
use super::{InvocationId, TaskId};

/// DomainEvent はワークフローで発生したイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    InvocationStarted {
        task_id: TaskId,
        invocation_id: InvocationId,
        deadline: chrono::DateTime<chrono::Utc>,
    },
    /// Redelivered creation signal. Not a failure.
    DuplicateInvocationIgnored { task_id: TaskId },
    StartRejected { task_id: TaskId, reason: String },
    Checked { task_id: TaskId, result: CheckResult },
    RetryScheduled {
        task_id: TaskId,
        attempts: u32,
        reason: String,
    },
    NotificationSent { task_id: TaskId },
    Suppressed { task_id: TaskId, result: CheckResult },
    Completed { task_id: TaskId },
    Halted { task_id: TaskId, reason: HaltReason },
    Resumed { task_id: TaskId },
}

impl DomainEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            DomainEvent::InvocationStarted { task_id, .. }
            | DomainEvent::DuplicateInvocationIgnored { task_id }
            | DomainEvent::StartRejected { task_id, .. }
            | DomainEvent::Checked { task_id, .. }
            | DomainEvent::RetryScheduled { task_id, .. }
            | DomainEvent::NotificationSent { task_id }
            | DomainEvent::Suppressed { task_id, .. }
            | DomainEvent::Completed { task_id }
            | DomainEvent::Halted { task_id, .. }
            | DomainEvent::Resumed { task_id } => *task_id,
        }
    }

    /// Events an operator has to look at.
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            DomainEvent::StartRejected { .. } | DomainEvent::Halted { .. }
        )
    }
}
