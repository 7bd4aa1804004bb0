use serde::{Deserialize, Serialize};

use crate::domain::{InvocationRecord, Phase};

/// How many invocations sit in each phase. Halted ones are also counted in
/// the phase they stopped in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub waiting: usize,
    pub checked: usize,
    pub notification_sent: usize,
    pub suppressed: usize,
    pub complete: usize,
    pub halted: usize,
}

impl PhaseCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a InvocationRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.phase {
                Phase::Waiting => counts.waiting += 1,
                Phase::Checked => counts.checked += 1,
                Phase::NotificationSent => counts.notification_sent += 1,
                Phase::Suppressed => counts.suppressed += 1,
                Phase::Complete => counts.complete += 1,
            }
            if record.is_halted() {
                counts.halted += 1;
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.waiting + self.checked + self.notification_sent + self.suppressed + self.complete
    }
}
