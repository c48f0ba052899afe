//! Manual and command submitters.
// crates/calib-server/tests/submitters.rs
// ============================================================================
// Module: Job Submitter Tests
// Description: Manual and command submitters.
// Purpose: Pin job bookkeeping, placeholder expansion, and spawn failures.
// Dependencies: calib-server, calib-core
// ============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

use calib_core::CampaignId;
use calib_core::JobRequest;
use calib_core::JobSubmitter;
use calib_core::PhaseId;
use calib_core::SliceIndex;
use calib_core::StepCursor;
use calib_core::SubmitError;
use calib_core::WorkerInputSpec;
use calib_server::CommandJobSubmitter;
use calib_server::ManualJobSubmitter;

fn request(slice: u32) -> JobRequest {
    JobRequest {
        campaign_id: CampaignId::from_raw(12).unwrap(),
        cursor: StepCursor::new(PhaseId::HcalDigi, 3),
        input: WorkerInputSpec {
            slice: SliceIndex::new(slice),
            files: vec!["/lfn/calib/muons_hcal.slcio".to_string()],
            events: 250,
            skip_events: 250 * u64::from(slice),
        },
        attempt: 2,
    }
}

#[test]
fn manual_submitter_tracks_open_jobs() {
    let submitter = ManualJobSubmitter::new();
    let first = submitter.submit(&request(0)).unwrap();
    let second = submitter.submit(&request(1)).unwrap();
    assert_eq!(first.as_str(), "manual-c12-hcal_digi-3-s0-a2");
    assert_eq!(submitter.open_jobs(), vec![first.clone(), second.clone()]);
    submitter.cancel(&first).unwrap();
    submitter.cancel(&first).unwrap();
    assert_eq!(submitter.open_jobs(), vec![second]);
}

#[test]
fn command_submitter_expands_placeholders() {
    let submitter = CommandJobSubmitter::new(
        "calib",
        vec![
            "worker".to_string(),
            "run".to_string(),
            "--endpoint={endpoint}".to_string(),
            "--campaign".to_string(),
            "{campaign}".to_string(),
            "--slice".to_string(),
            "{slice}".to_string(),
            "--tag={phase}.{step}.{attempt}".to_string(),
        ],
        "http://127.0.0.1:9000/rpc",
    );
    assert_eq!(
        submitter.expand_args(&request(5)),
        vec![
            "worker",
            "run",
            "--endpoint=http://127.0.0.1:9000/rpc",
            "--campaign",
            "12",
            "--slice",
            "5",
            "--tag=hcal_digi.3.2",
        ]
    );
}

#[test]
fn missing_program_is_a_fatal_submission_error() {
    let submitter =
        CommandJobSubmitter::new("/nonexistent/calib-worker", Vec::new(), "http://127.0.0.1:1/rpc");
    let err = submitter.submit(&request(0)).unwrap_err();
    assert!(matches!(err, SubmitError::Fatal(_)));
    assert!(!err.is_transient());
}

#[cfg(unix)]
#[test]
fn cancel_kills_and_reaps_the_child() {
    let submitter = CommandJobSubmitter::new(
        "sh",
        vec!["-c".to_string(), "sleep 30".to_string()],
        "http://127.0.0.1:1/rpc",
    );
    let job = submitter.submit(&request(0)).unwrap();
    assert!(job.as_str().starts_with("pid-"));
    assert_eq!(submitter.running(), 1);
    submitter.cancel(&job).unwrap();
    assert_eq!(submitter.running(), 0);
    submitter.cancel(&job).unwrap();
}
