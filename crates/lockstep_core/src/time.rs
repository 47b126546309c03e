//! Monotonic log time.
//!
//! Recorded messages carry the publisher's monotonic clock in nanoseconds.
//! It is used only for ordering; wall clock time never enters replay.

use serde::{Deserialize, Serialize};

/// Monotonic timestamp of a log message, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonoTime(u64);

impl MonoTime {
    /// Time zero
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from raw nanoseconds
    #[must_use]
    pub const fn from_nanos(value: u64) -> Self {
        Self(value)
    }

    /// Get raw nanoseconds
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Nanoseconds elapsed since `earlier`, saturating at zero
    #[must_use]
    pub const fn saturating_since(&self, earlier: MonoTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Default for MonoTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for MonoTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

impl From<u64> for MonoTime {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
