// crates/calib-core/src/runtime/service.rs
// ============================================================================
// Module: Calibration Service
// Description: Request router over the campaign registry.
// Purpose: Serialize work per campaign and write every mutation through to the store.
// Dependencies: crate::core, crate::interfaces, crate::runtime
// ============================================================================

//! ## Overview
//! [`CalibrationService`] owns the only shared mutable state: the mapping
//! from [`CampaignId`] to its [`CalibrationRun`]. The map sits behind a
//! read-write lock and every run behind its own mutex, so different campaigns
//! progress in parallel while one campaign's requests apply in arrival order.
//!
//! Every operation returns `Result<T, ServiceError>`. Unknown campaigns and
//! strategy names are `NotFound`; invalid command sequences are `Operator`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::core::AccessRegistry;
use crate::core::CampaignId;
use crate::core::CampaignState;
use crate::core::ConvergenceTuning;
use crate::core::DetectorSettings;
use crate::core::Payload;
use crate::core::PhasePlan;
use crate::core::RunStatus;
use crate::core::ServiceError;
use crate::core::SliceIndex;
use crate::core::StepCursor;
use crate::core::settings::FALLBACK_ACCESS;
use crate::interfaces::CampaignStore;
use crate::interfaces::Clock;
use crate::interfaces::JobSubmitter;
use crate::runtime::audit::AuditLevel;
use crate::runtime::audit::AuditSink;
use crate::runtime::audit::CalibrationAuditEvent;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::run::CalibrationRun;
use crate::runtime::run::CampaignStatus;
use crate::runtime::run::CampaignSummary;
use crate::runtime::run::RunContext;
use crate::runtime::run::RunSetup;
use crate::runtime::run::SubmitOutcome;
use crate::runtime::run::WorkerInput;
use crate::runtime::store::SharedCampaignStore;
use crate::runtime::strategy::CONVERGENCE_STREAK;
use crate::runtime::strategy::StrategyRegistry;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Service-wide defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Tuning used when a request carries none.
    pub default_tuning: ConvergenceTuning,
    /// Accessor used when a request names none.
    pub default_accessor: String,
    /// Job submission backoff.
    pub retry: RetryPolicy,
    /// Time a Finished campaign stays in memory.
    pub retention_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_tuning: ConvergenceTuning::default(),
            default_accessor: FALLBACK_ACCESS.to_string(),
            retry: RetryPolicy::default(),
            retention_ms: 3_600_000,
        }
    }
}

/// Collaborators wired into the service.
pub struct ServiceComponents {
    /// Job-submission collaborator.
    pub submitter: Arc<dyn JobSubmitter>,
    /// Durable store.
    pub store: SharedCampaignStore,
    /// Audit destination.
    pub audit: Arc<dyn AuditSink>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Phase strategies.
    pub strategies: StrategyRegistry,
    /// Settings accessors.
    pub accessors: AccessRegistry,
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Operator request to create a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRequest {
    /// Initial settings snapshot.
    pub settings: DetectorSettings,
    /// Phase chain in order.
    pub phases: Vec<PhasePlan>,
    /// Fan-out width.
    pub width: u32,
    /// Accessor name override.
    #[serde(default)]
    pub accessor: Option<String>,
    /// Tuning override.
    #[serde(default)]
    pub tuning: Option<ConvergenceTuning>,
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Shared handle to one run.
type RunHandle = Arc<Mutex<CalibrationRun>>;

/// Calibration request router.
pub struct CalibrationService {
    /// Campaign registry.
    runs: RwLock<BTreeMap<CampaignId, RunHandle>>,
    /// Next identifier to allocate.
    next_id: AtomicU64,
    /// Job-submission collaborator.
    submitter: Arc<dyn JobSubmitter>,
    /// Durable store.
    store: SharedCampaignStore,
    /// Audit destination.
    audit: Arc<dyn AuditSink>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Phase strategies.
    strategies: Arc<StrategyRegistry>,
    /// Settings accessors.
    accessors: AccessRegistry,
    /// Service defaults.
    config: ServiceConfig,
}

impl CalibrationService {
    /// Creates an empty service.
    #[must_use]
    pub fn new(components: ServiceComponents, config: ServiceConfig) -> Self {
        Self {
            runs: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            submitter: components.submitter,
            store: components.store,
            audit: components.audit,
            clock: components.clock,
            strategies: Arc::new(components.strategies),
            accessors: components.accessors,
            config,
        }
    }

    /// Service defaults.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Operator Requests
    // ------------------------------------------------------------------------

    /// Creates a campaign and issues its first step.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown strategies and `Operator` for invalid
    /// requests (unknown accessor, bad tuning, bad phase chain).
    pub fn create_run(&self, request: CampaignRequest) -> Result<CampaignId, ServiceError> {
        let tuning = request.tuning.unwrap_or(self.config.default_tuning);
        validate_tuning(&tuning)?;
        let accessor = request.accessor.unwrap_or_else(|| self.config.default_accessor.clone());
        let access = self
            .accessors
            .create(&accessor)
            .map_err(|err| ServiceError::operator(err.to_string()))?;
        let campaign_id = self.allocate_id()?;
        let setup = RunSetup {
            campaign_id,
            settings: request.settings,
            phases: request.phases,
            width: request.width,
            accessor,
            tuning,
            now: self.clock.now(),
        };
        let run = CalibrationRun::draft(setup, access, Arc::clone(&self.strategies))?;
        let handle = Arc::new(Mutex::new(run));
        self.runs
            .write()
            .map_err(|_| registry_poisoned())?
            .insert(campaign_id, Arc::clone(&handle));
        self.with_run_handle(&handle, |run, ctx| {
            run.start(ctx)?;
            Ok(campaign_id)
        })
    }

    /// Status of a campaign, including archived ones.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown campaigns.
    pub fn status(&self, campaign_id: CampaignId) -> Result<CampaignStatus, ServiceError> {
        if let Some(handle) = self.lookup(campaign_id)? {
            let run = handle.lock().map_err(|_| run_poisoned(campaign_id))?;
            return Ok(run.status_report());
        }
        self.load_archived(campaign_id).map(|state| CampaignStatus::from_state(&state))
    }

    /// Pauses an Active campaign.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Operator`.
    pub fn pause(&self, campaign_id: CampaignId) -> Result<RunStatus, ServiceError> {
        self.with_run(campaign_id, |run, ctx| run.pause(ctx))
    }

    /// Resumes a Paused campaign and drains its queued results.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Operator`.
    pub fn resume(&self, campaign_id: CampaignId) -> Result<RunStatus, ServiceError> {
        self.with_run(campaign_id, |run, ctx| run.resume(ctx))
    }

    /// Aborts a campaign; returns once the run is Failed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Operator`.
    pub fn abort(&self, campaign_id: CampaignId) -> Result<RunStatus, ServiceError> {
        self.with_run(campaign_id, |run, ctx| run.abort(ctx))
    }

    /// Lists live and archived campaigns in identifier order.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the registry or store cannot be read.
    pub fn list(&self) -> Result<Vec<CampaignSummary>, ServiceError> {
        let mut summaries = BTreeMap::new();
        for handle in self.handles()? {
            let run = handle.lock().map_err(|_| registry_poisoned())?;
            summaries.insert(run.campaign_id(), run.summary());
        }
        let stored = self.store.list().map_err(|err| ServiceError::internal(err.to_string()))?;
        for campaign_id in stored {
            if summaries.contains_key(&campaign_id) {
                continue;
            }
            if let Some(state) =
                self.store.load(campaign_id).map_err(|err| ServiceError::internal(err.to_string()))?
            {
                summaries.insert(campaign_id, CampaignSummary::from_state(&state));
            }
        }
        Ok(summaries.into_values().collect())
    }

    // ------------------------------------------------------------------------
    // Worker Requests
    // ------------------------------------------------------------------------

    /// Input for one worker slice.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown campaigns and `Stale` when the slice is
    /// not part of the open step.
    pub fn get_input_for_worker(
        &self,
        campaign_id: CampaignId,
        slice: SliceIndex,
    ) -> Result<WorkerInput, ServiceError> {
        let handle = self.require(campaign_id)?;
        let mut run = handle.lock().map_err(|_| run_poisoned(campaign_id))?;
        run.worker_input(slice, self.clock.now())
    }

    /// Merges (or queues, or drops) a worker result.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown campaigns and `Internal` on an
    /// invariant violation.
    pub fn submit_result(
        &self,
        campaign_id: CampaignId,
        slice: SliceIndex,
        cursor: StepCursor,
        payload: Payload,
    ) -> Result<SubmitOutcome, ServiceError> {
        self.with_run(campaign_id, |run, ctx| Ok(run.submit_result(ctx, slice, cursor, payload)))
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Reaps timed-out jobs across Active campaigns; returns jobs affected.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when a lock is poisoned.
    pub fn expire_jobs(&self) -> Result<usize, ServiceError> {
        let mut affected = 0;
        for handle in self.handles()? {
            affected += self.with_run_handle(&handle, |run, ctx| Ok(run.expire_jobs(ctx)))?;
        }
        Ok(affected)
    }

    /// Archives and evicts Finished campaigns past the retention window.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when a lock is poisoned or archiving fails.
    pub fn purge_finished(&self) -> Result<Vec<CampaignId>, ServiceError> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for handle in self.handles()? {
            let run = handle.lock().map_err(|_| registry_poisoned())?;
            let state = run.state();
            if state.status == RunStatus::Finished
                && now.millis_since(state.updated_at) >= self.config.retention_ms
            {
                self.store.save(state).map_err(|err| ServiceError::internal(err.to_string()))?;
                expired.push(state.campaign_id);
            }
        }
        if expired.is_empty() {
            return Ok(expired);
        }
        let mut runs = self.runs.write().map_err(|_| registry_poisoned())?;
        for campaign_id in &expired {
            runs.remove(campaign_id);
        }
        drop(runs);
        for campaign_id in &expired {
            let event = CalibrationAuditEvent::new("run_evicted", AuditLevel::Info, now)
                .campaign(*campaign_id);
            self.audit.record(&event);
        }
        Ok(expired)
    }

    /// Persists every non-Finished campaign; returns the number saved.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when a lock is poisoned or a save fails.
    pub fn shutdown(&self) -> Result<usize, ServiceError> {
        let mut saved = 0;
        for handle in self.handles()? {
            let run = handle.lock().map_err(|_| registry_poisoned())?;
            if run.status() == RunStatus::Finished {
                continue;
            }
            self.store.save(run.state()).map_err(|err| ServiceError::internal(err.to_string()))?;
            saved += 1;
        }
        self.audit.record(
            &CalibrationAuditEvent::new("service_shutdown", AuditLevel::Info, self.clock.now())
                .detail(format!("{saved} campaigns persisted")),
        );
        Ok(saved)
    }

    /// Reloads non-Finished campaigns from the store as Paused; returns the number restored.
    ///
    /// Identifier allocation continues after the highest stored identifier.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when the store cannot be read, or `NotFound` when a
    /// stored campaign references an unregistered strategy.
    pub fn restore(&self) -> Result<usize, ServiceError> {
        let stored = self.store.list().map_err(|err| ServiceError::internal(err.to_string()))?;
        let mut restored = 0;
        let mut highest = 0;
        for campaign_id in stored {
            highest = highest.max(campaign_id.get());
            let Some(state) =
                self.store.load(campaign_id).map_err(|err| ServiceError::internal(err.to_string()))?
            else {
                continue;
            };
            if state.status == RunStatus::Finished {
                continue;
            }
            let access = self
                .accessors
                .create(&state.accessor)
                .map_err(|err| ServiceError::operator(err.to_string()))?;
            let run = CalibrationRun::restore(state, access, Arc::clone(&self.strategies))?;
            self.store.save(run.state()).map_err(|err| ServiceError::internal(err.to_string()))?;
            self.runs
                .write()
                .map_err(|_| registry_poisoned())?
                .insert(campaign_id, Arc::new(Mutex::new(run)));
            restored += 1;
        }
        self.next_id.fetch_max(highest.saturating_add(1), Ordering::SeqCst);
        self.audit.record(
            &CalibrationAuditEvent::new("service_restored", AuditLevel::Info, self.clock.now())
                .detail(format!("{restored} campaigns restored")),
        );
        Ok(restored)
    }

    /// Copy of a live campaign record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for campaigns not held in memory.
    pub fn inspect(&self, campaign_id: CampaignId) -> Result<CampaignState, ServiceError> {
        let handle = self.require(campaign_id)?;
        let run = handle.lock().map_err(|_| run_poisoned(campaign_id))?;
        Ok(run.state().clone())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Allocates the next campaign identifier.
    fn allocate_id(&self) -> Result<CampaignId, ServiceError> {
        let raw = self.next_id.fetch_add(1, Ordering::SeqCst);
        CampaignId::from_raw(raw)
            .ok_or_else(|| ServiceError::internal("campaign id space exhausted"))
    }

    /// Returns the handle for a live campaign.
    fn lookup(&self, campaign_id: CampaignId) -> Result<Option<RunHandle>, ServiceError> {
        let runs = self.runs.read().map_err(|_| registry_poisoned())?;
        Ok(runs.get(&campaign_id).cloned())
    }

    /// Returns the handle for a live campaign or `NotFound`.
    fn require(&self, campaign_id: CampaignId) -> Result<RunHandle, ServiceError> {
        self.lookup(campaign_id)?
            .ok_or_else(|| ServiceError::not_found(format!("unknown campaign {campaign_id}")))
    }

    /// Loads an evicted campaign from the store or reports `NotFound`.
    fn load_archived(&self, campaign_id: CampaignId) -> Result<CampaignState, ServiceError> {
        self.store
            .load(campaign_id)
            .map_err(|err| ServiceError::internal(err.to_string()))?
            .ok_or_else(|| ServiceError::not_found(format!("unknown campaign {campaign_id}")))
    }

    /// Snapshot of every live handle.
    fn handles(&self) -> Result<Vec<RunHandle>, ServiceError> {
        let runs = self.runs.read().map_err(|_| registry_poisoned())?;
        Ok(runs.values().cloned().collect())
    }

    /// Runs `action` under the campaign lock, then checks invariants and persists.
    fn with_run<T>(
        &self,
        campaign_id: CampaignId,
        action: impl FnOnce(&mut CalibrationRun, &RunContext<'_>) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let handle = self.require(campaign_id)?;
        self.with_run_handle(&handle, action)
    }

    /// Runs `action` on a locked handle, then checks invariants and persists.
    fn with_run_handle<T>(
        &self,
        handle: &RunHandle,
        action: impl FnOnce(&mut CalibrationRun, &RunContext<'_>) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut run = handle.lock().map_err(|_| registry_poisoned())?;
        let ctx = RunContext {
            submitter: self.submitter.as_ref(),
            audit: self.audit.as_ref(),
            retry: self.config.retry,
            now: self.clock.now(),
        };
        let result = action(&mut *run, &ctx);
        let checked = run.verify_invariants(&ctx);
        self.persist(&run, &ctx);
        drop(run);
        checked?;
        result
    }

    /// Writes a run through to the store; failures are audited, not surfaced.
    fn persist(&self, run: &CalibrationRun, ctx: &RunContext<'_>) {
        if let Err(err) = self.store.save(run.state()) {
            self.audit.record(
                &CalibrationAuditEvent::new("store_write_failed", AuditLevel::Error, ctx.now)
                    .campaign(run.campaign_id())
                    .detail(err.to_string()),
            );
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rejects tuning values the state machine cannot honour.
fn validate_tuning(tuning: &ConvergenceTuning) -> Result<(), ServiceError> {
    if !tuning.tolerance.is_finite() || tuning.tolerance <= 0.0 {
        return Err(ServiceError::operator("tolerance must be a positive number"));
    }
    if !(0.0..=1.0).contains(&tuning.failure_threshold) {
        return Err(ServiceError::operator("failure_threshold must be within [0, 1]"));
    }
    if tuning.max_steps_per_phase < CONVERGENCE_STREAK {
        return Err(ServiceError::operator(format!(
            "max_steps_per_phase must be at least {CONVERGENCE_STREAK}"
        )));
    }
    if tuning.job_timeout_ms == 0 {
        return Err(ServiceError::operator("job_timeout_ms must be greater than zero"));
    }
    Ok(())
}

/// Error for a poisoned registry lock.
fn registry_poisoned() -> ServiceError {
    ServiceError::internal("campaign registry lock poisoned")
}

/// Error for a poisoned run lock.
fn run_poisoned(campaign_id: CampaignId) -> ServiceError {
    ServiceError::internal(format!("campaign {campaign_id} lock poisoned"))
}
