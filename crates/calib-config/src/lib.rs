// crates/calib-config/src/lib.rs
// ============================================================================
// Module: Calibration Config Library
// Description: Configuration model, loading, and validation.
// Purpose: Single source of truth for calibration.toml semantics.
// Dependencies: calib-core, calib-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `calib-config` parses `calibration.toml`, validates it strictly, and maps
//! it onto the runtime types of `calib-core` and `calib-store-sqlite`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
