//! State - check-in invocation の状態
//!
//! # 状態遷移
//! - Waiting → Checked → NotificationSent → Complete
//! - Waiting → Checked → Suppressed → Complete
//!
//! Complete は終端。Waiting へ戻る遷移もキャンセルも存在しません。

use serde::{Deserialize, Serialize};

/// Phase of a check-in invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Deadline persisted, waiting for it to pass (or retrying the check).
    Waiting,

    /// Task status read and recorded; the branch has not been taken yet.
    Checked,

    /// Reminder delivered.
    NotificationSent,

    /// Task was done (or gone); no reminder.
    Suppressed,

    /// Finished. No further transitions.
    Complete,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Checked => "checked",
            Phase::NotificationSent => "notification_sent",
            Phase::Suppressed => "suppressed",
            Phase::Complete => "complete",
        }
    }

    /// Is `next` a legal successor of `self`?
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Waiting, Phase::Checked)
                | (Phase::Checked, Phase::NotificationSent)
                | (Phase::Checked, Phase::Suppressed)
                | (Phase::NotificationSent, Phase::Complete)
                | (Phase::Suppressed, Phase::Complete)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Phase::Waiting),
            "checked" => Ok(Phase::Checked),
            "notification_sent" => Ok(Phase::NotificationSent),
            "suppressed" => Ok(Phase::Suppressed),
            "complete" => Ok(Phase::Complete),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

/// Recorded result of the completion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckResult {
    Done,
    NotDone,
    /// The store had no task with this id.
    Missing,
}

impl CheckResult {
    /// Whether this result obliges a reminder under `policy`.
    pub fn requires_reminder(self, policy: MissingTaskPolicy) -> bool {
        match self {
            CheckResult::NotDone => true,
            CheckResult::Done => false,
            CheckResult::Missing => policy == MissingTaskPolicy::Notify,
        }
    }
}

/// What to do when the task has disappeared from the store by check time.
///
/// `Suppress` (the default) treats a deleted task like a finished one: nobody
/// needs a reminder about it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTaskPolicy {
    #[default]
    Suppress,
    Notify,
}

/// Why an invocation stopped short of `Complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    /// Check step ran out of attempts against an unreachable store.
    WorkflowStalled { attempts: u32, last_error: String },

    /// Notify step ran out of attempts, or the transport rejected the message.
    NotificationFailed { attempts: u32, last_error: String },
}

impl HaltReason {
    pub fn last_error(&self) -> &str {
        match self {
            HaltReason::WorkflowStalled { last_error, .. }
            | HaltReason::NotificationFailed { last_error, .. } => last_error,
        }
    }
}
