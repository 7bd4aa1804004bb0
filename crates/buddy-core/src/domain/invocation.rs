//! Invocation record: the persisted state of one check-in workflow run.
//!
//! Design:
//! - This is the single source of truth for an invocation; the store keeps it
//!   whole and the runner holds nothing but task ids.
//! - All phase changes go through the methods here, which refuse illegal
//!   transitions.
//! - Every method takes `now` explicitly; nothing reads the clock on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::Decision;
use super::duration::{InvalidDurationError, WaitSpec};
use super::errors::IllegalTransition;
use super::signal::{IdempotencyKey, TaskCreated};
use super::state::{CheckResult, HaltReason, Phase};
use super::{InvocationId, TaskId};

/// The two side-effecting steps of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Check,
    Notify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub invocation_id: InvocationId,
    pub key: IdempotencyKey,
    pub task_id: TaskId,
    pub title: String,
    pub wait: WaitSpec,
    pub phase: Phase,

    pub started_at: DateTime<Utc>,

    /// Absolute deadline, fixed when the invocation is created.
    pub deadline: DateTime<Utc>,

    /// Result of the completion check, once recorded.
    pub check: Option<CheckResult>,

    /// Failed attempts of each step so far.
    pub check_attempts: u32,
    pub notify_attempts: u32,

    /// Backoff: earliest instant the pending step may be retried.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    /// Notify claim. A driver persists this before calling the notifier; until
    /// it expires no other driver may send for this invocation.
    #[serde(default)]
    pub notify_claimed_until: Option<DateTime<Utc>>,

    /// Set when a step gave up. The invocation stays where it was.
    pub halt: Option<HaltReason>,

    pub notified_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Bumped by the store on every successful update.
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl InvocationRecord {
    /// Create the `Waiting` record for a creation signal.
    ///
    /// The deadline is computed here, once.
    pub fn start(
        invocation_id: InvocationId,
        signal: &TaskCreated,
        now: DateTime<Utc>,
    ) -> Result<Self, InvalidDurationError> {
        let wait = WaitSpec::from_hours(signal.delay_hours)?;
        let deadline = now
            .checked_add_signed(wait.as_duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(Self {
            invocation_id,
            key: signal.idempotency_key(),
            task_id: signal.task_id,
            title: signal.title.clone(),
            wait,
            phase: Phase::Waiting,
            started_at: now,
            deadline,
            check: None,
            check_attempts: 0,
            notify_attempts: 0,
            next_attempt_at: None,
            last_error: None,
            notify_claimed_until: None,
            halt: None,
            notified_at: None,
            completed_at: None,
            revision: 0,
            updated_at: now,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    /// The step this invocation is blocked on, if any.
    pub fn pending_step(&self) -> Option<Step> {
        match self.phase {
            Phase::Waiting => Some(Step::Check),
            Phase::Checked => Some(Step::Notify),
            _ => None,
        }
    }

    /// Earliest wall-clock instant at which the workflow can make progress.
    ///
    /// `None` for complete or halted invocations.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        if self.is_complete() || self.is_halted() {
            return None;
        }
        let backoff = self.next_attempt_at;
        match self.phase {
            Phase::Waiting => Some(backoff.map_or(self.deadline, |at| at.max(self.deadline))),
            Phase::Checked => {
                let ready = backoff.unwrap_or(self.updated_at);
                Some(self.notify_claimed_until.map_or(ready, |until| until.max(ready)))
            }
            _ => Some(self.updated_at),
        }
    }

    /// Is another driver holding the notify claim at `now`?
    pub fn is_notify_claimed(&self, now: DateTime<Utc>) -> bool {
        self.notify_claimed_until.is_some_and(|until| until > now)
    }

    /// Take the notify claim until `until`. Only valid in `Checked`; the
    /// caller must persist it before sending.
    pub fn claim_notify(
        &mut self,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        if self.phase != Phase::Checked {
            return Err(IllegalTransition {
                from: self.phase,
                to: Phase::NotificationSent,
            });
        }
        self.notify_claimed_until = Some(until);
        self.updated_at = now;
        Ok(())
    }

    /// Can the workflow act on this record at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at().is_some_and(|at| at <= now)
    }

    fn transition(&mut self, next: Phase, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        if !self.phase.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.next_attempt_at = None;
        self.notify_claimed_until = None;
        self.updated_at = now;
        Ok(())
    }

    /// Waiting → Checked, recording the result of the read.
    pub fn record_check(
        &mut self,
        result: CheckResult,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalTransition> {
        self.transition(Phase::Checked, now)?;
        self.check = Some(result);
        self.last_error = None;
        Ok(())
    }

    /// Checked → NotificationSent.
    pub fn mark_notified(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(Phase::NotificationSent, now)?;
        self.notified_at = Some(now);
        self.last_error = None;
        Ok(())
    }

    /// Checked → Suppressed.
    pub fn mark_suppressed(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(Phase::Suppressed, now)
    }

    /// NotificationSent | Suppressed → Complete.
    pub fn mark_complete(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition(Phase::Complete, now)?;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Count a failed attempt of the pending step. The phase never moves.
    ///
    /// Returns the attempt count after the increment.
    pub fn record_failure(&mut self, step: Step, error: impl Into<String>, now: DateTime<Utc>) -> u32 {
        let attempts = match step {
            Step::Check => {
                self.check_attempts += 1;
                self.check_attempts
            }
            Step::Notify => {
                self.notify_claimed_until = None;
                self.notify_attempts += 1;
                self.notify_attempts
            }
        };
        self.last_error = Some(error.into());
        self.updated_at = now;
        attempts
    }

    /// Apply what the decider said about the last failure.
    pub fn apply_decision(&mut self, step: Step, decision: &Decision, now: DateTime<Utc>) {
        match decision {
            Decision::Retry { delay, .. } => {
                let delay = chrono::Duration::from_std(*delay).unwrap_or(chrono::Duration::MAX);
                self.next_attempt_at = Some(
                    now.checked_add_signed(delay)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                );
            }
            Decision::Halt { .. } => {
                let last_error = self.last_error.clone().unwrap_or_default();
                self.next_attempt_at = None;
                self.halt = Some(match step {
                    Step::Check => HaltReason::WorkflowStalled {
                        attempts: self.check_attempts,
                        last_error,
                    },
                    Step::Notify => HaltReason::NotificationFailed {
                        attempts: self.notify_attempts,
                        last_error,
                    },
                });
            }
        }
        self.updated_at = now;
    }

    /// Operator resume: forget the halt and give the stuck step a fresh budget.
    ///
    /// Returns false when there was nothing to resume.
    pub fn clear_halt(&mut self, now: DateTime<Utc>) -> bool {
        let Some(halt) = self.halt.take() else {
            return false;
        };
        match halt {
            HaltReason::WorkflowStalled { .. } => self.check_attempts = 0,
            HaltReason::NotificationFailed { .. } => self.notify_attempts = 0,
        }
        self.next_attempt_at = None;
        self.notify_claimed_until = None;
        self.updated_at = now;
        true
    }
}
