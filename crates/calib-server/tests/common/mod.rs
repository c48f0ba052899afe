// crates/calib-server/tests/common/mod.rs
// =============================================================================
// Module: Server Test Helpers
// Description: Shared fixtures for server integration tests.
// Purpose: Build services and campaign requests without repeating setup.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::sync::Arc;

use calib_core::AccessRegistry;
use calib_core::CalibrationService;
use calib_core::CampaignRequest;
use calib_core::DetectorSettings;
use calib_core::PhaseId;
use calib_core::PhasePlan;
use calib_core::RetryPolicy;
use calib_core::ServiceComponents;
use calib_core::ServiceConfig;
use calib_core::SettingKey;
use calib_core::SettingValue;
use calib_core::SharedCampaignStore;
use calib_core::StrategyRegistry;
use calib_core::Timestamp;
use calib_core::runtime::InMemoryCampaignStore;
use calib_core::runtime::ManualClock;
use calib_core::runtime::MemoryAuditSink;
use calib_server::ManualJobSubmitter;

/// Service plus handles on its collaborators.
pub struct Fixture {
    /// Service under test.
    pub service: CalibrationService,
    /// Submitter wired into the service.
    pub submitter: Arc<ManualJobSubmitter>,
    /// Audit events.
    pub audit: Arc<MemoryAuditSink>,
    /// Store shared with the service.
    pub store: InMemoryCampaignStore,
}

/// Builds a service with the manual submitter and an in-memory store.
pub fn fixture() -> Fixture {
    let submitter = Arc::new(ManualJobSubmitter::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let store = InMemoryCampaignStore::new();
    let service = CalibrationService::new(
        ServiceComponents {
            submitter: submitter.clone(),
            store: SharedCampaignStore::from_store(store.clone()),
            audit: audit.clone(),
            clock: Arc::new(ManualClock::new(Timestamp::from_unix_millis(1_700_000_000_000))),
            strategies: StrategyRegistry::with_reference_strategies(),
            accessors: AccessRegistry::with_defaults(),
        },
        ServiceConfig { retry: RetryPolicy::immediate(2), ..ServiceConfig::default() },
    );
    Fixture { service, submitter, audit, store }
}

/// Single-phase ECAL digitisation request of the given width.
pub fn ecal_request(width: u32) -> CampaignRequest {
    CampaignRequest {
        settings: DetectorSettings::new()
            .with("ecal", "mip", SettingValue::Number(1.0))
            .with("global", "detector", SettingValue::Text("ILD_l5_v02".to_string())),
        phases: vec![PhasePlan {
            phase: PhaseId::EcalDigi,
            strategy: "mip_peak".to_string(),
            target: SettingKey::new("ecal", "mip"),
            reference_energy: None,
            seed: None,
            input_files: vec!["/lfn/calib/muons_001.slcio".to_string()],
            events_per_slice: 1_000,
        }],
        width,
        accessor: None,
        tuning: None,
    }
}
