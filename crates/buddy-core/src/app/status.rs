//! Status - ステータスクエリ
//!
//! invocation がどこで止まっているか、なぜ止まっているかを説明するビューです。
//! CLI の `status` はこれを JSON でそのまま出します。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{CheckResult, HaltReason, InvocationRecord, Phase, TaskId};

/// Read-only view of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationStatus {
    pub task_id: TaskId,
    pub title: String,
    pub phase: Phase,
    /// Canonical wait, e.g. "2m" or "4h".
    pub wait: String,
    pub deadline: DateTime<Utc>,
    pub check: Option<CheckResult>,
    pub check_attempts: u32,
    pub notify_attempts: u32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub notify_claimed_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub halt: Option<HaltReason>,
    pub notified_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&InvocationRecord> for InvocationStatus {
    fn from(record: &InvocationRecord) -> Self {
        Self {
            task_id: record.task_id,
            title: record.title.clone(),
            phase: record.phase,
            wait: record.wait.to_string(),
            deadline: record.deadline,
            check: record.check,
            check_attempts: record.check_attempts,
            notify_attempts: record.notify_attempts,
            next_run_at: record.next_run_at(),
            notify_claimed_until: record.notify_claimed_until,
            last_error: record.last_error.clone(),
            halt: record.halt.clone(),
            notified_at: record.notified_at,
            completed_at: record.completed_at,
        }
    }
}

impl InvocationStatus {
    /// One-line explanation of where the invocation stands.
    pub fn explain(&self) -> String {
        if let Some(halt) = &self.halt {
            return format!("halted in {}: {}", self.phase, halt.last_error());
        }
        match (self.phase, self.next_run_at) {
            (Phase::Complete, _) => match self.notified_at {
                Some(at) => format!("complete; reminder sent at {}", at.to_rfc3339()),
                None => "complete; no reminder needed".to_string(),
            },
            (Phase::Waiting, Some(at)) if self.check_attempts > 0 => {
                format!("check failed {} time(s); retry at {}", self.check_attempts, at.to_rfc3339())
            }
            (Phase::Waiting, Some(at)) => format!("waiting until {}", at.to_rfc3339()),
            (Phase::Checked, Some(at)) if self.notify_claimed_until == Some(at) => {
                format!("reminder being sent; claim held until {}", at.to_rfc3339())
            }
            (Phase::Checked, Some(at)) if self.notify_attempts > 0 => {
                format!("reminder failed {} time(s); retry at {}", self.notify_attempts, at.to_rfc3339())
            }
            (phase, _) => format!("{phase}; ready to proceed"),
        }
    }
}
