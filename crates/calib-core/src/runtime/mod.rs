// crates/calib-core/src/runtime/mod.rs
// ============================================================================
// Module: Calibration Runtime
// Description: State machine, strategies, service, and supporting runtime pieces.
// Purpose: Drive calibration campaigns from creation to a terminal state.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The runtime layers, leaves first: phase strategies, the per-campaign
//! [`CalibrationRun`] state machine, and the [`CalibrationService`] router.
//! Audit sinks, clocks, retry policy, the in-memory store, and the worker
//! workflow engine support them.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod clock;
pub mod retry;
pub mod run;
pub mod service;
pub mod store;
pub mod strategies;
pub mod strategy;
pub mod workflow;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditLevel;
pub use audit::AuditSink;
pub use audit::CalibrationAuditEvent;
pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use retry::RetryPolicy;
pub use run::CalibrationRun;
pub use run::CampaignStatus;
pub use run::CampaignSummary;
pub use run::DropReason;
pub use run::HIGH_FAILURE_LIMIT;
pub use run::RunContext;
pub use run::SubmitOutcome;
pub use run::WorkerInput;
pub use service::CalibrationService;
pub use service::CampaignRequest;
pub use service::ServiceComponents;
pub use service::ServiceConfig;
pub use store::InMemoryCampaignStore;
pub use store::SharedCampaignStore;
pub use strategies::ENERGY_SCALE;
pub use strategies::EnergyScaleStrategy;
pub use strategies::MIP_PEAK;
pub use strategies::MipPeakStrategy;
pub use strategy::CONVERGENCE_EPSILON;
pub use strategy::CONVERGENCE_STREAK;
pub use strategy::PhaseStrategy;
pub use strategy::StepContext;
pub use strategy::StepDecision;
pub use strategy::StrategyError;
pub use strategy::StrategyRegistry;
pub use workflow::WorkDirGuard;
pub use workflow::WorkflowContext;
pub use workflow::WorkflowEngine;
pub use workflow::WorkflowModule;
pub use workflow::WorkflowReport;
