//! Store config validation tests for calib-config.
// crates/calib-config/tests/storage_validation.rs
// =============================================================================
// Module: Store Config Validation Tests
// Description: Validate campaign store constraints and the sqlite mapping.
// Purpose: Ensure store configuration fails closed.
// =============================================================================

#![allow(
    clippy::use_debug,
    clippy::missing_docs_in_private_items,
    reason = "Failure messages include debug output."
)]

use std::path::PathBuf;

use calib_config::StoreType;
use calib_store_sqlite::SqliteStoreMode;
use calib_store_sqlite::SqliteSyncMode;

mod common;

use common::TestResult;
use common::assert_invalid;

#[test]
fn memory_store_rejects_path() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.store.path = Some(PathBuf::from("calibration.db"));
    assert_invalid(config.validate(), "memory store must not set path")
}

#[test]
fn sqlite_store_requires_path() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.store.store_type = StoreType::Sqlite;
    assert_invalid(config.validate(), "sqlite store requires path")
}

#[test]
fn sqlite_store_rejects_zero_max_versions() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.store.store_type = StoreType::Sqlite;
    config.store.path = Some(PathBuf::from("calibration.db"));
    config.store.max_versions = Some(0);
    assert_invalid(config.validate(), "store max_versions must be greater than zero")
}

#[test]
fn sqlite_store_rejects_overlong_path_component() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.store.store_type = StoreType::Sqlite;
    config.store.path = Some(PathBuf::from(format!("data/{}.db", "x".repeat(300))));
    assert_invalid(config.validate(), "store.path path component too long")
}

#[test]
fn sqlite_section_maps_onto_store_config() -> TestResult {
    let config = common::config_from_toml(
        r#"
[store]
type = "sqlite"
path = "/var/lib/calib/campaigns.db"
journal_mode = "delete"
sync_mode = "normal"
busy_timeout_ms = 250
max_versions = 8
"#,
    )
    .map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    let sqlite = config.sqlite_config().ok_or("expected sqlite config")?;
    if sqlite.path != PathBuf::from("/var/lib/calib/campaigns.db")
        || sqlite.journal_mode != SqliteStoreMode::Delete
        || sqlite.sync_mode != SqliteSyncMode::Normal
        || sqlite.busy_timeout_ms != 250
        || sqlite.max_versions != Some(8)
    {
        return Err(format!("unexpected sqlite mapping: {sqlite:?}"));
    }
    Ok(())
}

#[test]
fn memory_store_has_no_sqlite_mapping() -> TestResult {
    let config = common::minimal_config().map_err(|err| err.to_string())?;
    if config.sqlite_config().is_some() {
        return Err("memory store must not map to sqlite".to_string());
    }
    Ok(())
}
