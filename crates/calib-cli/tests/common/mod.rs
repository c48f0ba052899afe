// crates/calib-cli/tests/common/mod.rs
// =============================================================================
// Module: CLI Test Helpers
// Description: Live coordinator fixture for client and worker tests.
// Purpose: Start a server on an ephemeral loopback port and stop it cleanly.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::sync::Arc;

use calib_config::CalibrationConfig;
use calib_core::CampaignRequest;
use calib_core::DetectorSettings;
use calib_core::PhaseId;
use calib_core::PhasePlan;
use calib_core::SettingKey;
use calib_core::SettingValue;
use calib_core::SharedCampaignStore;
use calib_core::runtime::InMemoryCampaignStore;
use calib_core::runtime::MemoryAuditSink;
use calib_server::CalibrationServer;
use calib_server::ManualJobSubmitter;
use calib_server::ServerError;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Coordinator running on a loopback listener.
pub struct Coordinator {
    /// `POST /rpc` URL.
    pub url: String,
    /// Jobs issued by the coordinator.
    pub submitter: Arc<ManualJobSubmitter>,
    /// Audit events.
    pub audit: Arc<MemoryAuditSink>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl Coordinator {
    /// Starts a coordinator with default configuration and an in-memory store.
    pub async fn start() -> Self {
        let submitter = Arc::new(ManualJobSubmitter::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let server = CalibrationServer::with_components(
            CalibrationConfig::default(),
            submitter.clone(),
            SharedCampaignStore::from_store(InMemoryCampaignStore::new()),
            audit.clone(),
        )
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/rpc", listener.local_addr().unwrap());
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(listener, async {
            let _ = stopped.await;
        }));
        Self { url, submitter, audit, stop, handle }
    }

    /// Stops the coordinator and waits for its shutdown snapshot.
    pub async fn stop(self) {
        self.stop.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

/// Single-phase HCAL digitisation request of the given width.
pub fn hcal_request(width: u32) -> CampaignRequest {
    CampaignRequest {
        settings: DetectorSettings::new()
            .with("hcal", "mip", SettingValue::Number(1.0))
            .with("hcal", "layers", SettingValue::Integer(48))
            .with("global", "detector", SettingValue::Text("ILD_l5_v02".to_string())),
        phases: vec![PhasePlan {
            phase: PhaseId::HcalDigi,
            strategy: "mip_peak".to_string(),
            target: SettingKey::new("hcal", "mip"),
            reference_energy: None,
            seed: None,
            input_files: vec!["/lfn/calib/muons_hcal.slcio".to_string()],
            events_per_slice: 250,
        }],
        width,
        accessor: None,
        tuning: None,
    }
}
