//! `POST /rpc` against a live listener.
// crates/calib-server/tests/http_channel.rs
// ============================================================================
// Module: HTTP Channel Tests
// Description: `POST /rpc` against a live listener.
// Purpose: Ensure the envelope, body limit, and shutdown snapshot work end to end.
// Dependencies: calib-server, calib-config, calib-core, reqwest, tokio
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

mod common;

use std::sync::Arc;

use calib_config::CalibrationConfig;
use calib_core::CampaignId;
use calib_core::CampaignStore;
use calib_core::Reply;
use calib_core::RunStatus;
use calib_core::SharedCampaignStore;
use calib_core::runtime::InMemoryCampaignStore;
use calib_core::runtime::MemoryAuditSink;
use calib_server::CalibrationServer;
use calib_server::ManualJobSubmitter;
use calib_server::RpcRequest;
use common::ecal_request;
use serde_json::Value;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct Running {
    url: String,
    stop: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<Result<(), calib_server::ServerError>>,
}

async fn start(
    config: CalibrationConfig,
    store: InMemoryCampaignStore,
    audit: Arc<MemoryAuditSink>,
) -> Running {
    let server = CalibrationServer::with_components(
        config,
        Arc::new(ManualJobSubmitter::new()),
        SharedCampaignStore::from_store(store),
        audit,
    )
    .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/rpc", listener.local_addr().unwrap());
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve_with_shutdown(listener, async {
        let _ = stopped.await;
    }));
    Running { url, stop, handle }
}

async fn post(url: &str, body: &Value) -> (u16, Reply<Value>) {
    let response = reqwest::Client::new().post(url).json(body).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json::<Reply<Value>>().await.unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_and_query_over_http_then_snapshot_on_shutdown() {
    let store = InMemoryCampaignStore::new();
    let audit = Arc::new(MemoryAuditSink::new());
    let running = start(CalibrationConfig::default(), store.clone(), audit.clone()).await;

    let create = serde_json::to_value(RpcRequest::new("create_run", &ecal_request(3)).unwrap())
        .unwrap();
    let (status, reply) = post(&running.url, &create).await;
    assert_eq!(status, 200);
    let id: CampaignId = serde_json::from_value(reply.into_result().unwrap()).unwrap();

    let query = json!({"method": "status", "params": {"campaign_id": id}});
    let (_, reply) = post(&running.url, &query).await;
    let value = reply.into_result().unwrap();
    assert_eq!(value["status"], json!("active"));
    assert_eq!(value["outstanding"], json!(3));

    running.stop.send(()).unwrap();
    running.handle.await.unwrap().unwrap();
    let stored = store.load(id).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Active);
    assert_eq!(audit.named("service_shutdown").len(), 1);
    assert_eq!(audit.named("server_started").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn business_errors_are_tagged_replies_with_ok_status() {
    let running =
        start(CalibrationConfig::default(), InMemoryCampaignStore::new(), Arc::default()).await;
    let (status, reply) =
        post(&running.url, &json!({"method": "pause", "params": {"campaign_id": 77}})).await;
    assert_eq!(status, 200);
    assert!(!reply.ok);
    assert_eq!(reply.error_kind, Some(calib_core::ErrorKind::NotFound));
    running.stop.send(()).unwrap();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_and_oversized_bodies_are_rejected() {
    let mut config = CalibrationConfig::default();
    config.server.max_body_bytes = 256;
    let running = start(config, InMemoryCampaignStore::new(), Arc::default()).await;
    let client = reqwest::Client::new();

    let response = client.post(&running.url).body("not json").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let reply = response.json::<Reply<Value>>().await.unwrap();
    assert_eq!(reply.error_kind, Some(calib_core::ErrorKind::Operator));

    let padding = "x".repeat(1_024);
    let body = json!({"method": "list", "params": {"padding": padding}});
    let response = client.post(&running.url).json(&body).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 413);

    running.stop.send(()).unwrap();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_restores_open_campaigns_as_paused() {
    let store = InMemoryCampaignStore::new();
    let first = start(CalibrationConfig::default(), store.clone(), Arc::default()).await;
    let create = serde_json::to_value(RpcRequest::new("create_run", &ecal_request(2)).unwrap())
        .unwrap();
    let (_, reply) = post(&first.url, &create).await;
    let id: CampaignId = serde_json::from_value(reply.into_result().unwrap()).unwrap();
    first.stop.send(()).unwrap();
    first.handle.await.unwrap().unwrap();

    let second = start(CalibrationConfig::default(), store, Arc::default()).await;
    let (_, reply) =
        post(&second.url, &json!({"method": "status", "params": {"campaign_id": id}})).await;
    assert_eq!(reply.into_result().unwrap()["status"], json!("paused"));
    second.stop.send(()).unwrap();
    second.handle.await.unwrap().unwrap();
}
