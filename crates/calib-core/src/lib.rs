// crates/calib-core/src/lib.rs
// ============================================================================
// Module: Calibration Core Library
// Description: Public API surface for the calibration coordination core.
// Purpose: Expose core types, collaborator interfaces, and the runtime.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The calibration core drives iterative detector calibration across many
//! worker nodes. It fans each step out into slices, merges partial results
//! through a pluggable phase strategy, decides convergence, and advances a
//! monotonic (phase, step) cursor until every configured phase is closed.
//!
//! Transport, storage, and job submission are reached only through the
//! traits in [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::CampaignStore;
pub use interfaces::Clock;
pub use interfaces::JobRequest;
pub use interfaces::JobSubmitter;
pub use interfaces::StoreError;
pub use interfaces::SubmitError;
pub use runtime::AuditSink;
pub use runtime::CalibrationAuditEvent;
pub use runtime::CalibrationRun;
pub use runtime::CalibrationService;
pub use runtime::CampaignRequest;
pub use runtime::CampaignStatus;
pub use runtime::CampaignSummary;
pub use runtime::DropReason;
pub use runtime::InMemoryCampaignStore;
pub use runtime::PhaseStrategy;
pub use runtime::RetryPolicy;
pub use runtime::ServiceComponents;
pub use runtime::ServiceConfig;
pub use runtime::SharedCampaignStore;
pub use runtime::StrategyRegistry;
pub use runtime::SubmitOutcome;
pub use runtime::WorkerInput;
