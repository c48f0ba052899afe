// crates/calib-server/src/lib.rs
// ============================================================================
// Module: Calibration Server Library
// Description: Request channel and job submission for the coordinator.
// Purpose: Host a CalibrationService behind `POST /rpc`.
// Dependencies: calib-core, calib-config, calib-store-sqlite, axum, tokio
// ============================================================================

//! ## Overview
//! The server wires a [`calib_core::CalibrationService`] to its collaborators
//! from configuration, exposes it over a thin JSON envelope, and drives the
//! job-timeout and retention ticker. On shutdown every open campaign is
//! written to the store; on startup the store is read back.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod rpc;
pub mod server;
pub mod submitter;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use rpc::RpcRequest;
pub use rpc::dispatch;
pub use server::CalibrationServer;
pub use server::ServerError;
pub use submitter::CommandJobSubmitter;
pub use submitter::ManualJobSubmitter;
