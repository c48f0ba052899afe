// crates/calib-cli/src/lib.rs
// ============================================================================
// Module: Calibration CLI Library
// Description: Shared helpers for the `calib` command-line interface.
// Purpose: Provide the message catalog, RPC client, and worker runner.
// Dependencies: calib-core, calib-server, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The binary entry point (`src/main.rs`) is a thin clap front end over the
//! modules here. [`client::RpcClient`] talks to a running coordinator,
//! [`worker`] runs the application on a worker node, and [`i18n`] keeps all
//! user-facing output in one catalog.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Request-channel client.
pub mod client;
/// Message catalog and the `t!` macro.
pub mod i18n;
/// Worker-side workflow.
pub mod worker;

pub use client::ClientError;
pub use client::RpcClient;
pub use worker::ResultFormat;
pub use worker::WorkerOptions;
pub use worker::WorkerReport;
pub use worker::run_worker;
