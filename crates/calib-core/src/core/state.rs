// crates/calib-core/src/core/state.rs
// ============================================================================
// Module: Campaign State
// Description: Serializable record of one calibration campaign.
// Purpose: Hold everything needed to resume a campaign after restart.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`CampaignState`] is the root aggregate persisted by campaign stores. It
//! carries the settings snapshot, the phase plan chain, the step cursor, the
//! current step's jobs and results, queued results received while paused, and
//! the append-only phase history.
//!
//! Per-slice collections are vectors kept sorted by slice so the canonical
//! JSON form is independent of arrival order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::CampaignId;
use crate::core::identifiers::JobId;
use crate::core::identifiers::SliceIndex;
use crate::core::payload::Payload;
use crate::core::phase::PhaseId;
use crate::core::phase::StepCursor;
use crate::core::settings::DetectorSettings;
use crate::core::settings::SettingKey;
use crate::core::settings::SettingUpdate;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, first step not yet issued.
    Draft,
    /// Issuing steps and accepting results.
    Active,
    /// Operator hold; results are queued.
    Paused,
    /// Terminal failure.
    Failed,
    /// All phases converged.
    Finished,
}

impl RunStatus {
    /// Returns true for `Failed` and `Finished`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Finished)
    }

    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Finished => "finished",
        }
    }
}

/// Why a campaign failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Two consecutive high-failure steps.
    Numerical,
    /// Phase step budget exhausted without convergence.
    NonConverged,
    /// Operator abort.
    Aborted,
    /// Job submission failed for more than half the width.
    Transport,
    /// Invariant violation.
    Internal,
}

/// Terminal failure record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Failure classification.
    pub reason: FailureReason,
    /// Human-readable detail.
    pub message: String,
    /// Cursor at the time of failure.
    pub cursor: StepCursor,
    /// Failure time.
    pub at: Timestamp,
}

// ============================================================================
// SECTION: Tuning
// ============================================================================

/// Numerical and retry knobs for one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceTuning {
    /// Relative tolerance for a within-tolerance step.
    pub tolerance: f64,
    /// Failure ratio above which a step is high-failure.
    pub failure_threshold: f64,
    /// Step budget per phase.
    pub max_steps_per_phase: u32,
    /// Resubmissions allowed per slice per step.
    pub retry_cap: u32,
    /// Silence after which a worker job is considered timed out.
    pub job_timeout_ms: u64,
}

impl Default for ConvergenceTuning {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            failure_threshold: 0.5,
            max_steps_per_phase: 20,
            retry_cap: 2,
            job_timeout_ms: 600_000,
        }
    }
}

// ============================================================================
// SECTION: Plans
// ============================================================================

/// Cross-phase carry: writes `outcome * scale` to `target` when the phase closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedRule {
    /// Option receiving the carried value.
    pub target: SettingKey,
    /// Multiplier applied to the phase's final value.
    #[serde(default = "default_seed_scale")]
    pub scale: f64,
}

/// Default seed multiplier.
const fn default_seed_scale() -> f64 {
    1.0
}

/// One entry of a campaign's phase chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePlan {
    /// Phase closed by this entry.
    pub phase: PhaseId,
    /// Strategy registry name.
    pub strategy: String,
    /// Option calibrated by the phase.
    pub target: SettingKey,
    /// Reference value for scale strategies.
    #[serde(default)]
    pub reference_energy: Option<f64>,
    /// Optional carry into later phases.
    #[serde(default)]
    pub seed: Option<SeedRule>,
    /// Logical input file names shared across slices.
    #[serde(default)]
    pub input_files: Vec<String>,
    /// Events each slice should process (zero means "all").
    #[serde(default)]
    pub events_per_slice: u64,
}

/// What one worker processes for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInputSpec {
    /// Slice position.
    pub slice: SliceIndex,
    /// Logical input file names.
    pub files: Vec<String>,
    /// Events to process (zero means "all").
    pub events: u64,
    /// Events to skip before processing.
    pub skip_events: u64,
}

// ============================================================================
// SECTION: Step Records
// ============================================================================

/// Outstanding worker job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerJobRef {
    /// Collaborator job identifier.
    pub job_id: JobId,
    /// Slice the job processes.
    pub slice: SliceIndex,
    /// Submission time of the current attempt.
    pub submitted_at: Timestamp,
    /// Last contact from the worker.
    pub last_seen: Timestamp,
    /// Submissions so far (first submission counts as one).
    pub attempts: u32,
}

/// Result received for the current step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    /// Slice position.
    pub slice: SliceIndex,
    /// Cursor the worker tagged the result with.
    pub cursor: StepCursor,
    /// Worker payload.
    pub payload: Payload,
    /// Arrival time.
    pub received_at: Timestamp,
}

/// One slice's contribution to the step accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sample {
    /// Usable measurement with its weight.
    Value {
        /// Measured value.
        value: f64,
        /// Averaging weight.
        weight: f64,
    },
    /// Error payload.
    Failed {
        /// Failure description.
        message: String,
    },
}

/// Sample keyed by slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSample {
    /// Slice position.
    pub slice: SliceIndex,
    /// Contribution.
    pub sample: Sample,
}

/// Step-level accumulator.
///
/// # Invariants
/// - At most one sample per slice, sorted by slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepAccumulator {
    /// Samples sorted by slice.
    samples: Vec<SliceSample>,
}

impl StepAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self { samples: Vec::new() }
    }

    /// Inserts a sample; returns false when the slice was already present.
    pub fn insert(&mut self, slice: SliceIndex, sample: Sample) -> bool {
        match self.samples.binary_search_by_key(&slice, |entry| entry.slice) {
            Ok(_) => false,
            Err(position) => {
                self.samples.insert(position, SliceSample { slice, sample });
                true
            }
        }
    }

    /// Returns true when the slice has contributed.
    #[must_use]
    pub fn contains(&self, slice: SliceIndex) -> bool {
        self.samples.binary_search_by_key(&slice, |entry| entry.slice).is_ok()
    }

    /// Samples sorted by slice.
    #[must_use]
    pub fn samples(&self) -> &[SliceSample] {
        &self.samples
    }

    /// Number of contributing slices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true when no slice has contributed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of error samples.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.samples.iter().filter(|entry| matches!(entry.sample, Sample::Failed { .. })).count()
    }

    /// Usable `(value, weight)` pairs in slice order.
    pub fn values(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.samples.iter().filter_map(|entry| match entry.sample {
            Sample::Value { value, weight } => Some((value, weight)),
            Sample::Failed { .. } => None,
        })
    }
}

/// Outcome of a closed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Phase closed.
    pub phase: PhaseId,
    /// Option writes committed by the phase.
    pub updates: Vec<SettingUpdate>,
    /// Converged flag.
    pub converged: bool,
    /// Steps consumed.
    pub steps: u32,
    /// Final calibrated value.
    pub final_value: f64,
    /// Failure ratio of the closing step.
    pub failure_ratio: f64,
}

/// Summary of one decided step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step that was decided.
    pub cursor: StepCursor,
    /// Step value when one was computed.
    pub value: Option<f64>,
    /// `(errors + lost) / W`.
    pub failure_ratio: f64,
    /// Within-tolerance flag.
    pub within_tolerance: bool,
    /// High-failure flag.
    pub high_failure: bool,
}

/// Running counters reported by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCounters {
    /// Consecutive high-failure steps in the current phase.
    pub consecutive_high_failure: u32,
    /// Error payloads received.
    pub errors: u64,
    /// Slices marked lost.
    pub lost: u64,
    /// Job resubmissions after timeouts.
    pub resubmissions: u64,
    /// Results dropped as stale.
    pub stale_dropped: u64,
    /// Results dropped as duplicates.
    pub duplicate_dropped: u64,
    /// Results dropped as spurious.
    pub spurious_dropped: u64,
}

// ============================================================================
// SECTION: Campaign State
// ============================================================================

/// Persistent campaign aggregate.
///
/// # Invariants
/// - `jobs.len() + results.len() + lost.len() == width` while a step is open and Active.
/// - `history` only grows; one entry per closed phase.
/// - `status == Finished` implies `cursor.phase == Done` and `jobs` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignState {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Failure record for `Failed` runs.
    pub failure: Option<FailureRecord>,
    /// Settings snapshot.
    pub settings: DetectorSettings,
    /// Accessor registry name.
    pub accessor: String,
    /// Phase chain in order.
    pub phases: Vec<PhasePlan>,
    /// Fan-out width.
    pub width: u32,
    /// Numerical and retry knobs.
    pub tuning: ConvergenceTuning,
    /// Current position.
    pub cursor: StepCursor,
    /// Outstanding jobs sorted by slice.
    pub jobs: Vec<WorkerJobRef>,
    /// Slice plan of the current step.
    pub plan: Vec<WorkerInputSpec>,
    /// Results merged into the current step.
    pub results: Vec<PartialResult>,
    /// Slices given up on for the current step.
    pub lost: Vec<SliceIndex>,
    /// Step accumulator.
    pub accumulator: StepAccumulator,
    /// Slices in the order they were ingested for the current step.
    pub ingest_order: Vec<SliceIndex>,
    /// Results received while paused, in arrival order.
    pub queued: Vec<PartialResult>,
    /// Closed phases.
    pub history: Vec<PhaseOutcome>,
    /// Decided steps of the current phase.
    pub step_log: Vec<StepRecord>,
    /// Failure and drop counters.
    pub counters: FailureCounters,
    /// Consecutive within-tolerance steps in the current phase.
    pub streak: u32,
}

impl CampaignState {
    /// Returns the plan for the cursor's phase.
    #[must_use]
    pub fn current_plan(&self) -> Option<&PhasePlan> {
        self.phases.iter().find(|plan| plan.phase == self.cursor.phase)
    }

    /// Returns the plan following the cursor's phase.
    #[must_use]
    pub fn next_plan(&self) -> Option<&PhasePlan> {
        self.phases.iter().find(|plan| plan.phase > self.cursor.phase)
    }

    /// Returns the outstanding job for a slice.
    #[must_use]
    pub fn job_for(&self, slice: SliceIndex) -> Option<&WorkerJobRef> {
        self.jobs.iter().find(|job| job.slice == slice)
    }

    /// Returns the plan entry for a slice.
    #[must_use]
    pub fn input_for(&self, slice: SliceIndex) -> Option<&WorkerInputSpec> {
        self.plan.iter().find(|spec| spec.slice == slice)
    }

    /// Returns true when the slice has a merged result.
    #[must_use]
    pub fn has_result(&self, slice: SliceIndex) -> bool {
        self.results.iter().any(|result| result.slice == slice)
    }

    /// Returns true when the slice was given up on.
    #[must_use]
    pub fn is_lost(&self, slice: SliceIndex) -> bool {
        self.lost.contains(&slice)
    }

    /// Returns true when the slice has a queued result for the current cursor.
    #[must_use]
    pub fn is_queued(&self, slice: SliceIndex) -> bool {
        self.queued.iter().any(|result| result.slice == slice && result.cursor == self.cursor)
    }
}
