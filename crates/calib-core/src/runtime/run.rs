// crates/calib-core/src/runtime/run.rs
// ============================================================================
// Module: Calibration Run
// Description: Per-campaign state machine driving phases, steps, and jobs.
// Purpose: Merge worker results, decide steps, and advance the cursor.
// Dependencies: crate::core, crate::interfaces, crate::runtime::{audit, retry, strategy}
// ============================================================================

//! ## Overview
//! A [`CalibrationRun`] owns one [`CampaignState`] plus the live settings
//! accessor and the strategy of the current phase. States move
//! `Draft -> Active -> (Paused <-> Active)* -> {Finished, Failed}`.
//!
//! Result handling:
//! - results tagged below the cursor, or for a lost slice, are stale;
//! - results tagged above the cursor or outside the width are spurious;
//! - a second result for a slice is a duplicate and is never merged;
//! - while paused, results are pre-checked and queued in arrival order.
//!
//! # Invariants
//! - The cursor never decreases.
//! - While Active with an open step, `jobs + results + lost == width`.
//! - Finished implies cursor phase `Done` and no outstanding jobs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::core::CampaignId;
use crate::core::CampaignState;
use crate::core::ConvergenceTuning;
use crate::core::DetectorSettings;
use crate::core::FailureCounters;
use crate::core::FailureReason;
use crate::core::FailureRecord;
use crate::core::Histogram;
use crate::core::PartialResult;
use crate::core::Payload;
use crate::core::PhaseOutcome;
use crate::core::PhasePlan;
use crate::core::RunStatus;
use crate::core::ServiceError;
use crate::core::SettingsAccess;
use crate::core::SettingKey;
use crate::core::SettingsDelta;
use crate::core::SettingsStore;
use crate::core::SliceIndex;
use crate::core::StepAccumulator;
use crate::core::StepCursor;
use crate::core::StepRecord;
use crate::core::Timestamp;
use crate::core::WorkerInputSpec;
use crate::core::WorkerJobRef;
use crate::interfaces::JobRequest;
use crate::interfaces::JobSubmitter;
use crate::interfaces::SubmitError;
use crate::runtime::audit::AuditLevel;
use crate::runtime::audit::AuditSink;
use crate::runtime::audit::CalibrationAuditEvent;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::strategy::PhaseStrategy;
use crate::runtime::strategy::StepContext;
use crate::runtime::strategy::StepDecision;
use crate::runtime::strategy::StrategyError;
use crate::runtime::strategy::StrategyRegistry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Consecutive high-failure steps that fail a run.
pub const HIGH_FAILURE_LIMIT: u32 = 2;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Collaborators and time for one state-machine operation.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    /// Job-submission collaborator.
    pub submitter: &'a dyn JobSubmitter,
    /// Audit destination.
    pub audit: &'a dyn AuditSink,
    /// Submission backoff.
    pub retry: RetryPolicy,
    /// Current time.
    pub now: Timestamp,
}

/// Why a result was not merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Tagged with a closed step or a lost slice.
    Stale,
    /// Tagged with a future step or a slice outside the plan.
    Spurious,
    /// Slice already reported for this step.
    Duplicate,
    /// Payload could not be used.
    Malformed,
    /// Campaign has failed.
    RunFailed,
    /// Campaign has finished.
    RunFinished,
}

impl DropReason {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::Spurious => "spurious",
            Self::Duplicate => "duplicate",
            Self::Malformed => "malformed",
            Self::RunFailed => "run_failed",
            Self::RunFinished => "run_finished",
        }
    }
}

/// Answer to a result submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// True when the result was merged or queued.
    pub accepted: bool,
    /// True when the result was queued because the campaign is paused.
    #[serde(default)]
    pub queued: bool,
    /// Drop reason for rejected results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DropReason>,
}

impl SubmitOutcome {
    /// Merged result.
    #[must_use]
    pub const fn accepted() -> Self {
        Self { accepted: true, queued: false, reason: None }
    }

    /// Queued result.
    #[must_use]
    pub const fn queued() -> Self {
        Self { accepted: true, queued: true, reason: None }
    }

    /// Dropped result.
    #[must_use]
    pub const fn dropped(reason: DropReason) -> Self {
        Self { accepted: false, queued: false, reason: Some(reason) }
    }
}

/// Everything a worker needs for one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInput {
    /// Step the worker serves; echo it back with the result.
    pub cursor: StepCursor,
    /// Slice assignment.
    pub assignment: WorkerInputSpec,
    /// Immutable settings snapshot.
    pub settings: DetectorSettings,
}

/// Status report for one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignStatus {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Current cursor.
    pub cursor: StepCursor,
    /// Fan-out width.
    pub width: u32,
    /// Outstanding jobs.
    pub outstanding: u32,
    /// Results merged into the current step.
    pub received: u32,
    /// Slices lost in the current step.
    pub lost: u32,
    /// Results queued while paused.
    pub queued: u32,
    /// Closed phases.
    pub history: Vec<PhaseOutcome>,
    /// Decided steps of the current phase.
    pub steps: Vec<StepRecord>,
    /// Failure and drop counters.
    pub counters: FailureCounters,
    /// Failure record when failed.
    pub failure: Option<FailureRecord>,
}

/// One line of a campaign listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Current cursor.
    pub cursor: StepCursor,
    /// Closed phases.
    pub phases_closed: u32,
    /// Phases in the chain.
    pub phases_total: u32,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl CampaignStatus {
    /// Builds a report from a campaign record.
    #[must_use]
    pub fn from_state(state: &CampaignState) -> Self {
        Self {
            campaign_id: state.campaign_id,
            status: state.status,
            cursor: state.cursor,
            width: state.width,
            outstanding: count(state.jobs.len()),
            received: count(state.results.len()),
            lost: count(state.lost.len()),
            queued: count(state.queued.len()),
            history: state.history.clone(),
            steps: state.step_log.clone(),
            counters: state.counters,
            failure: state.failure.clone(),
        }
    }
}

impl CampaignSummary {
    /// Builds a listing entry from a campaign record.
    #[must_use]
    pub fn from_state(state: &CampaignState) -> Self {
        Self {
            campaign_id: state.campaign_id,
            status: state.status,
            cursor: state.cursor,
            phases_closed: count(state.history.len()),
            phases_total: count(state.phases.len()),
            updated_at: state.updated_at,
        }
    }
}

/// Inputs for a new run.
pub struct RunSetup {
    /// Campaign identifier.
    pub campaign_id: CampaignId,
    /// Initial settings.
    pub settings: DetectorSettings,
    /// Phase chain.
    pub phases: Vec<PhasePlan>,
    /// Fan-out width.
    pub width: u32,
    /// Accessor registry name.
    pub accessor: String,
    /// Tuning.
    pub tuning: ConvergenceTuning,
    /// Creation time.
    pub now: Timestamp,
}

// ============================================================================
// SECTION: Calibration Run
// ============================================================================

/// Live state machine for one campaign.
pub struct CalibrationRun {
    /// Persistent record.
    state: CampaignState,
    /// Settings accessor.
    access: Arc<dyn SettingsAccess>,
    /// Strategy of the current phase; `None` once Done.
    strategy: Option<Box<dyn PhaseStrategy>>,
    /// Strategy registry used when moving to later phases.
    strategies: Arc<StrategyRegistry>,
}

impl CalibrationRun {
    /// Creates a Draft run after validating the phase chain.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown strategies and `Operator` for an
    /// invalid chain, width, or plan, or when a phase's required inputs are
    /// neither set nor written by an earlier phase.
    pub fn draft(
        setup: RunSetup,
        access: Arc<dyn SettingsAccess>,
        strategies: Arc<StrategyRegistry>,
    ) -> Result<Self, ServiceError> {
        validate_chain(&setup.phases, setup.width)?;
        let mut settings = setup.settings;
        let mut written: Vec<SettingKey> = Vec::new();
        for plan in &setup.phases {
            let strategy = strategies.create(&plan.strategy, plan).map_err(strategy_error)?;
            let store = SettingsStore::new(&mut settings, access.as_ref());
            check_required_inputs(strategy.as_ref(), &store, &written)?;
            written.push(plan.target.clone());
            if let Some(seed) = &plan.seed {
                written.push(seed.target.clone());
            }
        }
        let first = setup
            .phases
            .first()
            .ok_or_else(|| ServiceError::operator("phase chain is empty"))?;
        let strategy = strategies.create(&first.strategy, first).map_err(strategy_error)?;
        let cursor = StepCursor::start_of(first.phase);
        let state = CampaignState {
            campaign_id: setup.campaign_id,
            created_at: setup.now,
            updated_at: setup.now,
            status: RunStatus::Draft,
            failure: None,
            settings,
            accessor: setup.accessor,
            phases: setup.phases,
            width: setup.width,
            tuning: setup.tuning,
            cursor,
            jobs: Vec::new(),
            plan: Vec::new(),
            results: Vec::new(),
            lost: Vec::new(),
            accumulator: StepAccumulator::new(),
            ingest_order: Vec::new(),
            queued: Vec::new(),
            history: Vec::new(),
            step_log: Vec::new(),
            counters: FailureCounters::default(),
            streak: 0,
        };
        Ok(Self { state, access, strategy: Some(strategy), strategies })
    }

    /// Rebuilds a run from a stored record; Active and Draft runs come back Paused.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the current phase's strategy is no longer registered.
    pub fn restore(
        mut state: CampaignState,
        access: Arc<dyn SettingsAccess>,
        strategies: Arc<StrategyRegistry>,
    ) -> Result<Self, ServiceError> {
        let strategy = if state.cursor.phase.is_terminal() {
            None
        } else {
            let plan = state.current_plan().ok_or_else(|| {
                ServiceError::internal(format!(
                    "campaign {} has no plan for phase {}",
                    state.campaign_id, state.cursor.phase
                ))
            })?;
            Some(strategies.create(&plan.strategy, plan).map_err(strategy_error)?)
        };
        if matches!(state.status, RunStatus::Active | RunStatus::Draft) {
            state.status = RunStatus::Paused;
        }
        Ok(Self { state, access, strategy, strategies })
    }

    /// Persistent record.
    #[must_use]
    pub const fn state(&self) -> &CampaignState {
        &self.state
    }

    /// Campaign identifier.
    #[must_use]
    pub const fn campaign_id(&self) -> CampaignId {
        self.state.campaign_id
    }

    /// Lifecycle status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.state.status
    }

    /// Settings view over the campaign snapshot.
    pub fn settings(&mut self) -> SettingsStore<'_> {
        SettingsStore::new(&mut self.state.settings, self.access.as_ref())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Draft to Active; issues the first step.
    ///
    /// # Errors
    ///
    /// Returns `Operator` when the run is not a Draft.
    pub fn start(&mut self, ctx: &RunContext<'_>) -> Result<(), ServiceError> {
        if self.state.status != RunStatus::Draft {
            return Err(self.sequence_error("start"));
        }
        self.state.status = RunStatus::Active;
        self.emit(ctx, "run_started", AuditLevel::Info, None, String::new());
        self.issue_step(ctx);
        self.settle(ctx);
        self.touch(ctx.now);
        Ok(())
    }

    /// Active to Paused.
    ///
    /// # Errors
    ///
    /// Returns `Operator` when the run is not Active.
    pub fn pause(&mut self, ctx: &RunContext<'_>) -> Result<RunStatus, ServiceError> {
        if self.state.status != RunStatus::Active {
            return Err(self.sequence_error("pause"));
        }
        self.state.status = RunStatus::Paused;
        self.emit(ctx, "run_paused", AuditLevel::Info, None, String::new());
        self.touch(ctx.now);
        Ok(self.state.status)
    }

    /// Paused to Active; drains queued results in arrival order.
    ///
    /// # Errors
    ///
    /// Returns `Operator` when the run is not Paused.
    pub fn resume(&mut self, ctx: &RunContext<'_>) -> Result<RunStatus, ServiceError> {
        if self.state.status != RunStatus::Paused {
            return Err(self.sequence_error("resume"));
        }
        self.state.status = RunStatus::Active;
        self.emit(ctx, "run_resumed", AuditLevel::Info, None, String::new());
        if self.state.plan.is_empty() && self.strategy.is_some() {
            self.issue_step(ctx);
        }
        let queued = std::mem::take(&mut self.state.queued);
        for result in queued {
            if self.state.status != RunStatus::Active {
                break;
            }
            if let Some(reason) = self.precheck(result.slice, result.cursor) {
                self.record_drop(ctx, result.slice, reason);
                continue;
            }
            self.merge(ctx, result);
            self.settle(ctx);
        }
        self.settle(ctx);
        self.touch(ctx.now);
        Ok(self.state.status)
    }

    /// Cancels outstanding jobs and fails the run with `Aborted`.
    ///
    /// # Errors
    ///
    /// Returns `Operator` when the run is already terminal.
    pub fn abort(&mut self, ctx: &RunContext<'_>) -> Result<RunStatus, ServiceError> {
        if self.state.status.is_terminal() {
            return Err(self.sequence_error("abort"));
        }
        self.fail(ctx, FailureReason::Aborted, "aborted by operator".to_string());
        self.touch(ctx.now);
        Ok(self.state.status)
    }

    // ------------------------------------------------------------------------
    // Worker Requests
    // ------------------------------------------------------------------------

    /// Returns the current input for a slice and refreshes its job's last contact.
    ///
    /// # Errors
    ///
    /// Returns `Stale` when the slice is not part of the open step.
    pub fn worker_input(
        &mut self,
        slice: SliceIndex,
        now: Timestamp,
    ) -> Result<WorkerInput, ServiceError> {
        if self.state.status.is_terminal() {
            return Err(ServiceError::stale(format!(
                "campaign {} is {}",
                self.state.campaign_id,
                self.state.status.as_str()
            )));
        }
        if self.state.has_result(slice)
            || self.state.is_lost(slice)
            || self.state.is_queued(slice)
        {
            return Err(ServiceError::stale(format!(
                "slice {slice} is closed for step {}",
                self.state.cursor
            )));
        }
        let assignment = self.state.input_for(slice).cloned().ok_or_else(|| {
            let cursor = self.state.cursor;
            ServiceError::stale(format!("slice {slice} is not in the plan for step {cursor}"))
        })?;
        if let Some(job) = self.state.jobs.iter_mut().find(|job| job.slice == slice) {
            job.last_seen = now;
        }
        let settings = self.settings().snapshot();
        Ok(WorkerInput { cursor: self.state.cursor, assignment, settings })
    }

    /// Handles a worker result.
    pub fn submit_result(
        &mut self,
        ctx: &RunContext<'_>,
        slice: SliceIndex,
        cursor: StepCursor,
        payload: Payload,
    ) -> SubmitOutcome {
        match self.state.status {
            RunStatus::Failed => return self.record_drop(ctx, slice, DropReason::RunFailed),
            RunStatus::Finished => return self.record_drop(ctx, slice, DropReason::RunFinished),
            RunStatus::Draft | RunStatus::Active | RunStatus::Paused => {}
        }
        if let Some(reason) = self.precheck(slice, cursor) {
            return self.record_drop(ctx, slice, reason);
        }
        if !payload_is_well_formed(&payload) {
            return self.record_drop(ctx, slice, DropReason::Malformed);
        }
        let result = PartialResult { slice, cursor, payload, received_at: ctx.now };
        self.touch(ctx.now);
        if self.state.status == RunStatus::Paused {
            self.state.queued.push(result);
            self.emit(ctx, "result_queued", AuditLevel::Info, Some(slice), String::new());
            return SubmitOutcome::queued();
        }
        let outcome = self.merge(ctx, result);
        self.settle(ctx);
        outcome
    }

    // ------------------------------------------------------------------------
    // Timeouts
    // ------------------------------------------------------------------------

    /// Resubmits or gives up on jobs silent for longer than the timeout.
    ///
    /// Only Active runs are reaped. Returns the number of jobs affected.
    pub fn expire_jobs(&mut self, ctx: &RunContext<'_>) -> usize {
        if self.state.status != RunStatus::Active {
            return 0;
        }
        let timeout = self.state.tuning.job_timeout_ms;
        let expired: Vec<WorkerJobRef> = self
            .state
            .jobs
            .iter()
            .filter(|job| ctx.now.millis_since(job.last_seen) >= timeout)
            .cloned()
            .collect();
        if expired.is_empty() {
            return 0;
        }
        let mut fatal = 0_u32;
        for job in &expired {
            if let Err(err) = ctx.submitter.cancel(&job.job_id) {
                let detail = err.to_string();
                self.emit(ctx, "job_cancel_failed", AuditLevel::Warn, Some(job.slice), detail);
            }
            if job.attempts <= self.state.tuning.retry_cap {
                if matches!(self.resubmit(ctx, job), Err(SubmitError::Fatal(_))) {
                    fatal += 1;
                }
            } else {
                self.mark_lost(ctx, job.slice, "retry cap reached");
            }
        }
        if self.fail_on_fatal_submissions(ctx, fatal) {
            self.touch(ctx.now);
            return expired.len();
        }
        self.settle(ctx);
        self.touch(ctx.now);
        expired.len()
    }

    // ------------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------------

    /// Status report.
    #[must_use]
    pub fn status_report(&self) -> CampaignStatus {
        CampaignStatus::from_state(&self.state)
    }

    /// Listing entry.
    #[must_use]
    pub fn summary(&self) -> CampaignSummary {
        CampaignSummary::from_state(&self.state)
    }

    /// Checks the structural invariants; a violation fails the run with `Internal`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` describing the violation.
    pub fn verify_invariants(&mut self, ctx: &RunContext<'_>) -> Result<(), ServiceError> {
        let Some(message) = self.invariant_violation() else {
            return Ok(());
        };
        if !self.state.status.is_terminal() {
            self.fail(ctx, FailureReason::Internal, message.clone());
        }
        Err(ServiceError::internal(message))
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Returns the drop reason for a result tag, if any.
    fn precheck(&self, slice: SliceIndex, cursor: StepCursor) -> Option<DropReason> {
        if cursor < self.state.cursor {
            return Some(DropReason::Stale);
        }
        if cursor > self.state.cursor
            || !slice.within(self.state.width)
            || self.state.input_for(slice).is_none()
        {
            return Some(DropReason::Spurious);
        }
        if self.state.is_lost(slice) {
            return Some(DropReason::Stale);
        }
        if self.state.has_result(slice) || self.state.is_queued(slice) {
            return Some(DropReason::Duplicate);
        }
        None
    }

    /// Folds a pre-checked result into the accumulator.
    fn merge(&mut self, ctx: &RunContext<'_>, result: PartialResult) -> SubmitOutcome {
        let Some(strategy) = self.strategy.as_ref() else {
            return self.record_drop(ctx, result.slice, DropReason::RunFinished);
        };
        if let Err(err) = strategy.ingest(&result, &mut self.state.accumulator) {
            let detail = err.to_string();
            self.emit(ctx, "result_malformed", AuditLevel::Warn, Some(result.slice), detail);
            return self.record_drop(ctx, result.slice, DropReason::Malformed);
        }
        let slice = result.slice;
        if result.payload.is_error() {
            self.state.counters.errors += 1;
        }
        self.state.jobs.retain(|job| job.slice != slice);
        let position = self.state.results.partition_point(|entry| entry.slice < slice);
        self.state.results.insert(position, result);
        self.state.ingest_order.push(slice);
        self.emit(ctx, "result_accepted", AuditLevel::Info, Some(slice), String::new());
        SubmitOutcome::accepted()
    }

    /// Decides steps until more results are needed or the run leaves Active.
    fn settle(&mut self, ctx: &RunContext<'_>) {
        while self.state.status == RunStatus::Active {
            let decision = {
                let Some(strategy) = self.strategy.as_ref() else {
                    return;
                };
                let prior = SettingsStore::new(&mut self.state.settings, self.access.as_ref())
                    .read_number(&strategy.plan().target);
                let context = self.step_context(prior);
                strategy.decide(&self.state.accumulator, &context)
            };
            match decision {
                StepDecision::NeedMore => return,
                StepDecision::RepeatStep {
                    delta,
                    value,
                    failure_ratio,
                    within_tolerance,
                    high_failure,
                } => {
                    self.record_step(value, failure_ratio, within_tolerance, high_failure);
                    if high_failure {
                        self.state.counters.consecutive_high_failure += 1;
                        self.state.streak = 0;
                        self.emit(
                            ctx,
                            "high_failure_step",
                            AuditLevel::Warn,
                            None,
                            format!("failure ratio {failure_ratio}"),
                        );
                        if self.state.counters.consecutive_high_failure >= HIGH_FAILURE_LIMIT {
                            self.fail(
                                ctx,
                                FailureReason::Numerical,
                                format!(
                                    "{HIGH_FAILURE_LIMIT} consecutive steps above failure threshold"
                                ),
                            );
                            return;
                        }
                    } else {
                        self.state.counters.consecutive_high_failure = 0;
                        self.state.streak =
                            if within_tolerance { self.state.streak + 1 } else { 0 };
                    }
                    self.settings().apply(&delta);
                    let next = self.state.cursor.next_step();
                    if next.step >= self.state.tuning.max_steps_per_phase {
                        self.fail(
                            ctx,
                            FailureReason::NonConverged,
                            format!(
                                "phase {} did not converge within {} steps",
                                next.phase, self.state.tuning.max_steps_per_phase
                            ),
                        );
                        return;
                    }
                    self.state.cursor = next;
                    self.issue_step(ctx);
                }
                StepDecision::Converged(outcome) => self.close_phase(ctx, outcome),
            }
        }
    }

    /// Commits a converged phase and moves to the next phase or finishes.
    fn close_phase(&mut self, ctx: &RunContext<'_>, outcome: PhaseOutcome) {
        self.record_step(Some(outcome.final_value), outcome.failure_ratio, true, false);
        let mut delta = SettingsDelta::new();
        for update in &outcome.updates {
            delta.push(update.key.clone(), update.value.clone());
        }
        if let Some(strategy) = self.strategy.as_ref() {
            for update in strategy.seed_next_phase(&outcome).updates() {
                delta.push(update.key.clone(), update.value.clone());
            }
        }
        self.settings().apply(&delta);
        self.emit(
            ctx,
            "phase_converged",
            AuditLevel::Info,
            None,
            format!("value {} after {} steps", outcome.final_value, outcome.steps),
        );
        self.state.history.push(outcome);
        self.state.streak = 0;
        self.state.counters.consecutive_high_failure = 0;
        self.state.step_log.clear();
        let Some(next_plan) = self.state.next_plan().cloned() else {
            self.finish(ctx);
            return;
        };
        match self.strategies.create(&next_plan.strategy, &next_plan) {
            Ok(strategy) => {
                self.strategy = Some(strategy);
                self.state.cursor = StepCursor::start_of(next_plan.phase);
                self.issue_step(ctx);
            }
            Err(err) => self.fail(ctx, FailureReason::Internal, err.to_string()),
        }
    }

    /// Moves to Done and clears the step.
    fn finish(&mut self, ctx: &RunContext<'_>) {
        self.strategy = None;
        self.state.cursor = StepCursor::done();
        self.clear_step();
        self.state.status = RunStatus::Finished;
        self.emit(ctx, "run_finished", AuditLevel::Info, None, String::new());
    }

    /// Fans out the step at the cursor.
    fn issue_step(&mut self, ctx: &RunContext<'_>) {
        let Some(strategy) = self.strategy.as_ref() else {
            return;
        };
        let plan = strategy.slice_plan(self.state.width, self.state.cursor);
        self.clear_step();
        self.state.plan = plan;
        let mut fatal = 0_u32;
        for spec in self.state.plan.clone() {
            let request = JobRequest {
                campaign_id: self.state.campaign_id,
                cursor: self.state.cursor,
                input: spec.clone(),
                attempt: 1,
            };
            match ctx.retry.run(|_| ctx.submitter.submit(&request)) {
                Ok(job_id) => self.state.jobs.push(WorkerJobRef {
                    job_id,
                    slice: spec.slice,
                    submitted_at: ctx.now,
                    last_seen: ctx.now,
                    attempts: 1,
                }),
                Err(err) => {
                    if matches!(err, SubmitError::Fatal(_)) {
                        fatal += 1;
                    }
                    self.mark_lost(ctx, spec.slice, &err.to_string());
                }
            }
        }
        self.emit(
            ctx,
            "step_issued",
            AuditLevel::Info,
            None,
            format!("{} jobs, {} lost", self.state.jobs.len(), self.state.lost.len()),
        );
        self.fail_on_fatal_submissions(ctx, fatal);
    }

    /// Fails the run with `Transport` once fatal submissions exceed half the width.
    fn fail_on_fatal_submissions(&mut self, ctx: &RunContext<'_>, fatal: u32) -> bool {
        if fatal.saturating_mul(2) <= self.state.width {
            return false;
        }
        self.fail(
            ctx,
            FailureReason::Transport,
            format!("job submission failed fatally for {fatal} of {} slices", self.state.width),
        );
        true
    }

    /// Replaces a timed-out job with a fresh submission; a failed slice is lost.
    fn resubmit(&mut self, ctx: &RunContext<'_>, job: &WorkerJobRef) -> Result<(), SubmitError> {
        let Some(input) = self.state.input_for(job.slice).cloned() else {
            self.mark_lost(ctx, job.slice, "slice missing from plan");
            return Ok(());
        };
        let request = JobRequest {
            campaign_id: self.state.campaign_id,
            cursor: self.state.cursor,
            input,
            attempt: job.attempts + 1,
        };
        match ctx.retry.run(|_| ctx.submitter.submit(&request)) {
            Ok(job_id) => {
                let entry = self.state.jobs.iter_mut().find(|entry| entry.slice == job.slice);
                if let Some(entry) = entry {
                    entry.job_id = job_id;
                    entry.submitted_at = ctx.now;
                    entry.last_seen = ctx.now;
                    entry.attempts = job.attempts + 1;
                }
                self.state.counters.resubmissions += 1;
                self.emit(
                    ctx,
                    "job_resubmitted",
                    AuditLevel::Warn,
                    Some(job.slice),
                    format!("attempt {}", job.attempts + 1),
                );
                Ok(())
            }
            Err(err) => {
                self.mark_lost(ctx, job.slice, &err.to_string());
                Err(err)
            }
        }
    }

    /// Gives up on a slice for the current step.
    fn mark_lost(&mut self, ctx: &RunContext<'_>, slice: SliceIndex, detail: &str) {
        self.state.jobs.retain(|job| job.slice != slice);
        if !self.state.lost.contains(&slice) {
            let position = self.state.lost.partition_point(|entry| *entry < slice);
            self.state.lost.insert(position, slice);
            self.state.counters.lost += 1;
        }
        self.emit(ctx, "slice_lost", AuditLevel::Warn, Some(slice), detail.to_string());
    }

    /// Terminal failure; cancels outstanding jobs best effort.
    fn fail(&mut self, ctx: &RunContext<'_>, reason: FailureReason, message: String) {
        for job in std::mem::take(&mut self.state.jobs) {
            if let Err(err) = ctx.submitter.cancel(&job.job_id) {
                let detail = err.to_string();
                self.emit(ctx, "job_cancel_failed", AuditLevel::Warn, Some(job.slice), detail);
            }
        }
        self.state.status = RunStatus::Failed;
        self.emit(ctx, "run_failed", AuditLevel::Error, None, message.clone());
        self.state.failure =
            Some(FailureRecord { reason, message, cursor: self.state.cursor, at: ctx.now });
    }

    /// Counts and audits a dropped result.
    fn record_drop(
        &mut self,
        ctx: &RunContext<'_>,
        slice: SliceIndex,
        reason: DropReason,
    ) -> SubmitOutcome {
        match reason {
            DropReason::Stale => self.state.counters.stale_dropped += 1,
            DropReason::Duplicate => self.state.counters.duplicate_dropped += 1,
            DropReason::Spurious => self.state.counters.spurious_dropped += 1,
            DropReason::Malformed | DropReason::RunFailed | DropReason::RunFinished => {}
        }
        let detail = reason.as_str().to_string();
        self.emit(ctx, "result_dropped", AuditLevel::Warn, Some(slice), detail);
        SubmitOutcome::dropped(reason)
    }

    /// Appends a decided step to the step log.
    fn record_step(
        &mut self,
        value: Option<f64>,
        failure_ratio: f64,
        within_tolerance: bool,
        high_failure: bool,
    ) {
        self.state.step_log.push(StepRecord {
            cursor: self.state.cursor,
            value,
            failure_ratio,
            within_tolerance,
            high_failure,
        });
    }

    /// Decision inputs for the current step.
    fn step_context(&self, prior: Option<f64>) -> StepContext {
        StepContext {
            cursor: self.state.cursor,
            width: self.state.width,
            lost: count(self.state.lost.len()),
            prior,
            streak: self.state.streak,
            tuning: self.state.tuning,
        }
    }

    /// Resets per-step collections.
    fn clear_step(&mut self) {
        self.state.jobs.clear();
        self.state.plan.clear();
        self.state.results.clear();
        self.state.lost.clear();
        self.state.accumulator = StepAccumulator::new();
        self.state.ingest_order.clear();
    }

    /// Describes the first broken invariant, if any.
    fn invariant_violation(&self) -> Option<String> {
        let state = &self.state;
        let open_step = !state.cursor.phase.is_terminal() || !state.jobs.is_empty();
        if state.status == RunStatus::Finished && open_step {
            return Some("finished campaign has an open step".to_string());
        }
        if state.status == RunStatus::Active && !state.plan.is_empty() {
            let accounted = state.jobs.len() + state.results.len() + state.lost.len();
            if accounted != usize::try_from(state.width).unwrap_or(usize::MAX) {
                return Some(format!(
                    "step {} accounts for {accounted} of {} slices",
                    state.cursor, state.width
                ));
            }
        }
        if state.jobs.len() > usize::try_from(state.width).unwrap_or(usize::MAX) {
            return Some("more outstanding jobs than the width".to_string());
        }
        None
    }

    /// Operator error for an invalid command sequence.
    fn sequence_error(&self, command: &str) -> ServiceError {
        ServiceError::operator(format!(
            "cannot {command} campaign {} in state {}",
            self.state.campaign_id,
            self.state.status.as_str()
        ))
    }

    /// Records the mutation time.
    const fn touch(&mut self, now: Timestamp) {
        self.state.updated_at = now;
    }

    /// Emits an audit event for this campaign.
    fn emit(
        &self,
        ctx: &RunContext<'_>,
        event: &'static str,
        level: AuditLevel,
        slice: Option<SliceIndex>,
        detail: String,
    ) {
        let mut record = CalibrationAuditEvent::new(event, level, ctx.now)
            .campaign(self.state.campaign_id)
            .cursor(self.state.cursor)
            .detail(detail);
        if let Some(slice) = slice {
            record = record.slice(slice);
        }
        ctx.audit.record(&record);
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates width and phase ordering.
fn validate_chain(phases: &[PhasePlan], width: u32) -> Result<(), ServiceError> {
    if width == 0 {
        return Err(ServiceError::operator("width must be at least 1"));
    }
    if phases.is_empty() {
        return Err(ServiceError::operator("phase chain is empty"));
    }
    for plan in phases {
        if plan.phase.is_terminal() {
            return Err(ServiceError::operator("phase chain must not contain done"));
        }
    }
    for pair in phases.windows(2) {
        if pair[0].phase >= pair[1].phase {
            return Err(ServiceError::operator(format!(
                "phase {} must come after {}",
                pair[1].phase, pair[0].phase
            )));
        }
    }
    Ok(())
}

/// Rejects a phase whose required settings are neither set nor written earlier.
fn check_required_inputs(
    strategy: &dyn PhaseStrategy,
    store: &SettingsStore<'_>,
    written: &[SettingKey],
) -> Result<(), ServiceError> {
    for key in strategy.required_inputs() {
        if written.contains(&key) {
            continue;
        }
        if !store.has(&key.subsystem, &key.option) {
            return Err(ServiceError::operator(format!(
                "{} for {} requires setting {key}",
                strategy.name(),
                strategy.plan().phase
            )));
        }
        if store.read_number(&key).is_none() {
            return Err(ServiceError::operator(format!(
                "{} for {} requires a numeric {key}",
                strategy.name(),
                strategy.plan().phase
            )));
        }
    }
    Ok(())
}

/// Maps strategy errors to service errors.
fn strategy_error(error: StrategyError) -> ServiceError {
    match error {
        StrategyError::NotFound(_) => ServiceError::not_found(error.to_string()),
        StrategyError::InvalidPlan(_) | StrategyError::Malformed(_) => {
            ServiceError::operator(error.to_string())
        }
    }
}

/// Structural payload checks shared by every strategy.
fn payload_is_well_formed(payload: &Payload) -> bool {
    match payload {
        Payload::Scalar { value, .. } => value.is_finite(),
        Payload::Histogram { data } => Histogram::decode(data).is_ok(),
        Payload::Error { .. } => true,
    }
}

/// Saturating `usize` to `u32`.
fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
