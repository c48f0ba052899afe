// crates/calib-core/src/interfaces/mod.rs
// ============================================================================
// Module: Calibration Interfaces
// Description: Collaborator contracts for job submission, storage, and time.
// Purpose: Keep the state machine independent of grid and storage backends.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The calibration runtime consumes three collaborators: a [`JobSubmitter`]
//! that starts and cancels worker jobs, a [`CampaignStore`] that persists
//! campaign records, and a [`Clock`] that supplies time. Implementations live
//! in host crates (server, `SQLite` store) or in [`crate::runtime`] for tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::identifiers::CampaignId;
use crate::core::identifiers::JobId;
use crate::core::phase::StepCursor;
use crate::core::state::CampaignState;
use crate::core::state::WorkerInputSpec;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Job Submission
// ============================================================================

/// Request to start one worker job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Campaign the job belongs to.
    pub campaign_id: CampaignId,
    /// Step the job serves.
    pub cursor: StepCursor,
    /// Slice assignment.
    pub input: WorkerInputSpec,
    /// Attempt number (one for the first submission).
    pub attempt: u32,
}

/// Job submission errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Recoverable failure; the call may be retried.
    #[error("transient job submission error: {0}")]
    Transient(String),
    /// Non-recoverable failure.
    #[error("fatal job submission error: {0}")]
    Fatal(String),
}

impl SubmitError {
    /// Returns true for retryable errors.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Job-submission and monitoring collaborator.
pub trait JobSubmitter: Send + Sync {
    /// Starts a worker job.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError`] when the job cannot be started.
    fn submit(&self, request: &JobRequest) -> Result<JobId, SubmitError>;

    /// Cancels a running job (best effort).
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError`] when the collaborator rejects the cancel.
    fn cancel(&self, job_id: &JobId) -> Result<(), SubmitError>;
}

// ============================================================================
// SECTION: Campaign Store
// ============================================================================

/// Campaign store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store I/O error.
    #[error("campaign store io error: {0}")]
    Io(String),
    /// Stored data failed integrity checks.
    #[error("campaign store corruption: {0}")]
    Corrupt(String),
    /// Stored schema version is unsupported.
    #[error("campaign store version mismatch: {0}")]
    VersionMismatch(String),
    /// Stored data is invalid.
    #[error("campaign store invalid data: {0}")]
    Invalid(String),
    /// Backend error.
    #[error("campaign store error: {0}")]
    Store(String),
}

/// Durable campaign storage.
pub trait CampaignStore: Send + Sync {
    /// Loads one campaign.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load(&self, campaign_id: CampaignId) -> Result<Option<CampaignState>, StoreError>;

    /// Saves a new version of a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save(&self, state: &CampaignState) -> Result<(), StoreError>;

    /// Lists stored campaign identifiers in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn list(&self) -> Result<Vec<CampaignId>, StoreError>;

    /// Removes a campaign and all its versions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn delete(&self, campaign_id: CampaignId) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Time source.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}
