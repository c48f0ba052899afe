// crates/calib-core/src/core/time.rs
// ============================================================================
// Module: Calibration Time Model
// Description: Canonical timestamp representation for run records.
// Purpose: Keep the state machine free of direct wall-clock reads.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The state machine never reads wall-clock time directly. Hosts supply time
//! through a [`crate::interfaces::Clock`], which keeps timeouts and retention
//! deterministic under test.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Values are explicitly provided by callers; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(value: i64) -> Self {
        Self(value)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the milliseconds elapsed since `earlier`, or zero when `earlier` is later.
    #[must_use]
    pub fn millis_since(self, earlier: Self) -> u64 {
        u64::try_from(self.0.saturating_sub(earlier.0)).unwrap_or(0)
    }
}
