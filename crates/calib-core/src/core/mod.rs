// crates/calib-core/src/core/mod.rs
// ============================================================================
// Module: Calibration Core Types
// Description: Canonical calibration data model.
// Purpose: Provide stable, serializable types for campaigns, payloads, and settings.
// Dependencies: base64, serde, serde_jcs, sha2, thiserror
// ============================================================================

//! ## Overview
//! Core types describe detector settings, the phase chain, worker payloads,
//! and the persisted campaign record. They carry no behaviour beyond local
//! invariants; the state machine lives in [`crate::runtime`].

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod error;
pub mod hashing;
pub mod identifiers;
pub mod payload;
pub mod phase;
pub mod settings;
pub mod state;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::ErrorKind;
pub use error::Reply;
pub use error::ServiceError;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use identifiers::CampaignId;
pub use identifiers::JobId;
pub use identifiers::SliceIndex;
pub use payload::Histogram;
pub use payload::Payload;
pub use payload::PayloadError;
pub use payload::binary_to_string;
pub use payload::string_to_binary;
pub use phase::PhaseId;
pub use phase::StepCursor;
pub use settings::AccessRegistry;
pub use settings::DetectorSettings;
pub use settings::ExactAccess;
pub use settings::FallbackAccess;
pub use settings::SettingKey;
pub use settings::SettingUpdate;
pub use settings::SettingValue;
pub use settings::SettingsAccess;
pub use settings::SettingsDelta;
pub use settings::SettingsError;
pub use settings::SettingsStore;
pub use state::CampaignState;
pub use state::ConvergenceTuning;
pub use state::FailureCounters;
pub use state::FailureReason;
pub use state::FailureRecord;
pub use state::PartialResult;
pub use state::PhaseOutcome;
pub use state::PhasePlan;
pub use state::RunStatus;
pub use state::Sample;
pub use state::SeedRule;
pub use state::SliceSample;
pub use state::StepAccumulator;
pub use state::StepRecord;
pub use state::WorkerInputSpec;
pub use state::WorkerJobRef;
pub use time::Timestamp;
