//! Check-in delay encoding.
//!
//! The user picks a delay as fractional hours (`0.033` is roughly two minutes).
//! The scheduler only deals in whole units: minutes below one hour, hours from
//! one hour up. Rounding is half-away-from-zero (`f64::round`), so a value
//! sitting exactly on a half unit such as `2.5h` rounds up.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unit of a canonical wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUnit {
    Minute,
    Hour,
}

impl WaitUnit {
    fn seconds(self) -> i64 {
        match self {
            WaitUnit::Minute => 60,
            WaitUnit::Hour => 3_600,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            WaitUnit::Minute => "m",
            WaitUnit::Hour => "h",
        }
    }
}

/// Negative, NaN or infinite hour counts.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("invalid check-in delay: {hours} hours (must be a finite, non-negative number)")]
pub struct InvalidDurationError {
    pub hours: f64,
}

/// Canonical wait: an integral count of a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaitSpec {
    pub unit: WaitUnit,
    pub count: u64,
}

impl WaitSpec {
    /// Encode a fractional-hour delay.
    ///
    /// ```
    /// use buddy_core::domain::{WaitSpec, WaitUnit};
    ///
    /// let wait = WaitSpec::from_hours(0.033).unwrap();
    /// assert_eq!((wait.unit, wait.count), (WaitUnit::Minute, 2));
    /// ```
    pub fn from_hours(hours: f64) -> Result<Self, InvalidDurationError> {
        if !hours.is_finite() || hours < 0.0 {
            return Err(InvalidDurationError { hours });
        }

        let wait = if hours < 1.0 {
            Self {
                unit: WaitUnit::Minute,
                count: (hours * 60.0).round() as u64,
            }
        } else {
            Self {
                unit: WaitUnit::Hour,
                count: hours.round() as u64,
            }
        };
        Ok(wait)
    }

    pub fn is_zero(&self) -> bool {
        self.count == 0
    }

    /// Wall-clock length of the wait.
    ///
    /// Saturates at `chrono::TimeDelta::MAX` for absurd hour counts instead of
    /// overflowing.
    pub fn as_duration(&self) -> chrono::Duration {
        let secs = i64::try_from(self.count)
            .ok()
            .and_then(|c| c.checked_mul(self.unit.seconds()));
        secs.and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl fmt::Display for WaitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}
