use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;
use super::signal::TaskCreated;

/// A user's short-lived intention, as kept by the task store.
///
/// `done` only ever goes from `false` to `true`. The check-in workflow reads
/// it and never writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub done: bool,
    /// Delay chosen at creation, in fractional hours.
    pub check_in_hours: f64,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: TaskId,
        title: impl Into<String>,
        check_in_hours: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            done: false,
            check_in_hours,
            created_at,
        }
    }

    /// Mark as done. Idempotent; there is no way back.
    pub fn mark_done(&mut self) {
        self.done = true;
    }

    /// The creation signal that starts this task's check-in.
    pub fn created_signal(&self) -> TaskCreated {
        TaskCreated {
            task_id: self.id,
            title: self.title.clone(),
            delay_hours: self.check_in_hours,
        }
    }
}
