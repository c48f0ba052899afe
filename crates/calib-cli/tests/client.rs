// crates/calib-cli/tests/client.rs
// ============================================================================
// Module: RPC Client Tests
// Description: Drive a live coordinator through RpcClient.
// Purpose: Ensure typed calls, error classification, and limits behave.
// Dependencies: calib-cli, calib-core, calib-server, tokio
// ============================================================================

//! ## Overview
//! Operator lifecycle over HTTP, business errors versus transport errors,
//! and client configuration checks.

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

mod common;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use calib_cli::ClientError;
use calib_cli::RpcClient;
use calib_core::CampaignId;
use calib_core::ErrorKind;
use calib_core::Payload;
use calib_core::PhaseId;
use calib_core::RunStatus;
use calib_core::SliceIndex;
use calib_core::StepCursor;
use common::Coordinator;
use common::hcal_request;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn operator_lifecycle_over_http() {
    let coordinator = Coordinator::start().await;
    let client = RpcClient::new(coordinator.url.clone()).unwrap();

    let id = client.create_run(&hcal_request(2)).await.unwrap();
    assert_eq!(coordinator.submitter.open_jobs().len(), 2);

    let status = client.status(id).await.unwrap();
    assert_eq!(status.status, RunStatus::Active);
    assert_eq!(status.cursor, StepCursor::start_of(PhaseId::HcalDigi));
    assert_eq!(status.outstanding, 2);

    assert_eq!(client.pause(id).await.unwrap(), RunStatus::Paused);
    assert_eq!(client.resume(id).await.unwrap(), RunStatus::Active);

    let listing = client.list().await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].campaign_id, id);

    assert_eq!(client.abort(id).await.unwrap(), RunStatus::Failed);
    assert!(coordinator.submitter.open_jobs().is_empty());
    coordinator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_calls_round_trip_through_the_client() {
    let coordinator = Coordinator::start().await;
    let client = RpcClient::new(coordinator.url.clone()).unwrap();
    let id = client.create_run(&hcal_request(1)).await.unwrap();

    let input = client.get_input(id, SliceIndex::new(0)).await.unwrap();
    assert_eq!(input.assignment.events, 250);
    assert_eq!(input.assignment.files, vec!["/lfn/calib/muons_hcal.slcio".to_string()]);

    let payload = Payload::Scalar { value: 1.04, events: 250 };
    let outcome =
        client.submit_result(id, SliceIndex::new(0), input.cursor, payload).await.unwrap();
    assert!(outcome.accepted);
    let status = client.status(id).await.unwrap();
    assert_eq!(status.cursor, StepCursor::new(PhaseId::HcalDigi, 1));
    coordinator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn business_errors_keep_their_kind() {
    let coordinator = Coordinator::start().await;
    let client = RpcClient::new(coordinator.url.clone()).unwrap();
    let missing = CampaignId::from_raw(404).unwrap();

    let err = client.status(missing).await.unwrap_err();
    assert!(matches!(&err, ClientError::Service(error) if error.kind == ErrorKind::NotFound));
    assert!(!err.is_transport());

    let id = client.create_run(&hcal_request(1)).await.unwrap();
    let err = client.resume(id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operator);

    let err = client.call::<serde_json::Value>("launch", &serde_json::json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operator);
    coordinator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_coordinator_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = RpcClient::with_limits(
        format!("http://{addr}/rpc"),
        Duration::from_secs(2),
        1024,
    )
    .unwrap();
    let err = client.list().await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert!(err.is_transport());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_replies_are_refused() {
    let coordinator = Coordinator::start().await;
    let client = RpcClient::new(coordinator.url.clone()).unwrap();
    for _ in 0..4 {
        client.create_run(&hcal_request(1)).await.unwrap();
    }
    let small =
        RpcClient::with_limits(coordinator.url.clone(), Duration::from_secs(5), 64).unwrap();
    let err = small.list().await.unwrap_err();
    assert!(matches!(err, ClientError::ResponseTooLarge { limit: 64, .. }));
    coordinator.stop().await;
}

#[test]
fn endpoint_must_be_http() {
    let err = RpcClient::new("ftp://127.0.0.1/rpc").unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));
    assert_eq!(err.kind(), ErrorKind::Operator);
    let client = RpcClient::new(" http://127.0.0.1:8765/rpc ").unwrap();
    assert_eq!(client.endpoint(), "http://127.0.0.1:8765/rpc");
}
