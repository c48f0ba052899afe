// crates/calib-core/src/runtime/retry.rs
// ============================================================================
// Module: Submission Retry
// Description: Bounded exponential backoff around job submission.
// Purpose: Recover transient collaborator failures locally up to a cap.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! Transient [`SubmitError`]s are retried with delay `base * 2^attempt`,
//! capped at `max_delay_ms`, for at most `max_attempts` calls in total. Fatal
//! errors are returned immediately.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::interfaces::SubmitError;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Backoff policy for job submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total calls allowed (at least one).
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 100, max_delay_ms: 2_000 }
    }
}

impl RetryPolicy {
    /// Policy that never waits; used when the caller must not block.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay_ms: 0, max_delay_ms: 0 }
    }

    /// Delay before the retry following `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }

    /// Runs `call` until it succeeds, fails fatally, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last [`SubmitError`] when every attempt failed.
    pub fn run<T>(
        &self,
        mut call: impl FnMut(u32) -> Result<T, SubmitError>,
    ) -> Result<T, SubmitError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match call(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
