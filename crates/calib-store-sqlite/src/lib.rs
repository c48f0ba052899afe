// crates/calib-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Campaign Store
// Description: Durable CampaignStore backend using SQLite WAL.
// Purpose: Keep calibration campaigns across coordinator restarts.
// Dependencies: calib-core, rusqlite
// ============================================================================

//! ## Overview
//! A SQLite-backed [`CampaignStore`](calib_core::CampaignStore) that writes a
//! canonical JSON snapshot of every campaign mutation into a versioned
//! history table. Loads verify the stored digest and refuse corrupt rows.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_STATE_BYTES;
pub use store::SqliteCampaignStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
