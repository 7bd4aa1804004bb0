//! Decision model: what to do after a step fails.
//!
//! Deciding is a pure function of the attempt count, the error class and the
//! retry policy. Applying the decision (updating the record, sleeping) is the
//! workflow's job.

use std::time::Duration;

use super::RetryPolicy;

/// The next action after a failed step.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Try the step again after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up on the step; the invocation is halted pre-`Complete`.
    Halt { reason: String },
}

/// Decide the next action for a step that has failed `attempts` times.
///
/// Non-transient failures halt immediately regardless of the budget.
pub fn decide(policy: &RetryPolicy, attempts: u32, transient: bool) -> Decision {
    if !transient {
        return Decision::Halt {
            reason: format!("Permanent failure after {attempts} attempt(s)"),
        };
    }
    if policy.is_exhausted(attempts) {
        Decision::Halt {
            reason: format!("Max attempts reached: {}/{}", attempts, policy.max_attempts),
        }
    } else {
        let delay = policy.next_delay(attempts);
        Decision::Retry {
            delay,
            reason: format!(
                "Retry attempt {}/{} after {:?}",
                attempts + 1,
                policy.max_attempts,
                delay
            ),
        }
    }
}
