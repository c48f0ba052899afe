// crates/calib-core/tests/common/mod.rs
// ============================================================================
// Module: Test Harness
// Description: Shared fixtures for calibration service tests.
// Purpose: Build services with recording collaborators and a manual clock.
// Dependencies: calib-core
// ============================================================================

#![allow(dead_code, reason = "Not every test binary uses every helper.")]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use calib_core::AccessRegistry;
use calib_core::CalibrationService;
use calib_core::CampaignId;
use calib_core::CampaignRequest;
use calib_core::ConvergenceTuning;
use calib_core::DetectorSettings;
use calib_core::JobId;
use calib_core::JobRequest;
use calib_core::JobSubmitter;
use calib_core::Payload;
use calib_core::PhaseId;
use calib_core::PhasePlan;
use calib_core::RetryPolicy;
use calib_core::ServiceComponents;
use calib_core::ServiceConfig;
use calib_core::SettingKey;
use calib_core::SettingValue;
use calib_core::SharedCampaignStore;
use calib_core::SliceIndex;
use calib_core::StrategyRegistry;
use calib_core::SubmitError;
use calib_core::SubmitOutcome;
use calib_core::Timestamp;
use calib_core::runtime::InMemoryCampaignStore;
use calib_core::runtime::ManualClock;
use calib_core::runtime::MemoryAuditSink;

/// Submitter that records requests and can be told to fail.
#[derive(Default)]
pub struct RecordingSubmitter {
    next: AtomicU64,
    pub submitted: Mutex<Vec<JobRequest>>,
    pub cancelled: Mutex<Vec<JobId>>,
    pub fail_with: Mutex<Option<SubmitError>>,
    pub cancel_fails: AtomicBool,
}

impl RecordingSubmitter {
    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn cancellations(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }

    pub fn fail(&self, error: Option<SubmitError>) {
        *self.fail_with.lock().unwrap() = error;
    }
}

impl JobSubmitter for RecordingSubmitter {
    fn submit(&self, request: &JobRequest) -> Result<JobId, SubmitError> {
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        self.submitted.lock().unwrap().push(request.clone());
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(JobId::new(format!("job-{id}")))
    }

    fn cancel(&self, job_id: &JobId) -> Result<(), SubmitError> {
        if self.cancel_fails.load(Ordering::SeqCst) {
            return Err(SubmitError::Transient(format!("cannot reach scheduler for {job_id}")));
        }
        self.cancelled.lock().unwrap().push(job_id.clone());
        Ok(())
    }
}

pub struct Harness {
    pub service: CalibrationService,
    pub submitter: Arc<RecordingSubmitter>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditSink>,
    pub store: InMemoryCampaignStore,
}

pub const START: i64 = 1_700_000_000_000;

pub fn harness() -> Harness {
    harness_with(InMemoryCampaignStore::new(), ServiceConfig::default())
}

pub fn harness_with(store: InMemoryCampaignStore, config: ServiceConfig) -> Harness {
    let submitter = Arc::new(RecordingSubmitter::default());
    let clock = Arc::new(ManualClock::new(Timestamp::from_unix_millis(START)));
    let audit = Arc::new(MemoryAuditSink::new());
    let config = ServiceConfig { retry: RetryPolicy::immediate(3), ..config };
    let service = CalibrationService::new(
        ServiceComponents {
            submitter: submitter.clone(),
            store: SharedCampaignStore::from_store(store.clone()),
            audit: audit.clone(),
            clock: clock.clone(),
            strategies: StrategyRegistry::with_reference_strategies(),
            accessors: AccessRegistry::with_defaults(),
        },
        config,
    );
    Harness { service, submitter, clock, audit, store }
}

pub fn mip_plan(phase: PhaseId, subsystem: &str) -> PhasePlan {
    PhasePlan {
        phase,
        strategy: "mip_peak".to_string(),
        target: SettingKey::new(subsystem, "mip"),
        reference_energy: None,
        seed: None,
        input_files: vec!["/lfn/calib/muons_001.slcio".to_string()],
        events_per_slice: 1_000,
    }
}

pub fn energy_plan(phase: PhaseId, subsystem: &str, reference: f64) -> PhasePlan {
    PhasePlan {
        phase,
        strategy: "energy_scale".to_string(),
        target: SettingKey::new(subsystem, "scale"),
        reference_energy: Some(reference),
        seed: None,
        input_files: vec!["/lfn/calib/kaon0L_10GeV.slcio".to_string()],
        events_per_slice: 500,
    }
}

pub fn request(width: u32, phases: Vec<PhasePlan>, settings: DetectorSettings) -> CampaignRequest {
    CampaignRequest { settings, phases, width, accessor: None, tuning: None }
}

pub fn ecal_settings(mip: f64) -> DetectorSettings {
    DetectorSettings::new()
        .with("ecal", "mip", SettingValue::Number(mip))
        .with("global", "detector", SettingValue::Text("ILD_l5_v02".to_string()))
}

pub fn tuning(tolerance: f64, max_steps: u32) -> ConvergenceTuning {
    ConvergenceTuning { tolerance, max_steps_per_phase: max_steps, ..ConvergenceTuning::default() }
}

pub fn scalar(value: f64) -> Payload {
    Payload::Scalar { value, events: 100 }
}

pub fn error(message: &str) -> Payload {
    Payload::Error { message: message.to_string() }
}

pub fn slice(index: u32) -> SliceIndex {
    SliceIndex::new(index)
}

/// Submits one payload per slice at the campaign's current cursor.
pub fn submit_step(
    service: &CalibrationService,
    id: CampaignId,
    payloads: &[Payload],
) -> Vec<SubmitOutcome> {
    let cursor = service.status(id).unwrap().cursor;
    payloads
        .iter()
        .enumerate()
        .map(|(index, payload)| {
            service
                .submit_result(id, slice(u32::try_from(index).unwrap()), cursor, payload.clone())
                .unwrap()
        })
        .collect()
}
