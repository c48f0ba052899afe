//! Server, calibration, submission, and audit validation tests for calib-config.
// crates/calib-config/tests/section_validation.rs
// =============================================================================
// Module: Section Validation Tests
// Description: Validate per-section constraints.
// Purpose: Ensure every section rejects values the runtime cannot honour.
// =============================================================================

#![allow(
    clippy::missing_docs_in_private_items,
    reason = "Test functions are named for the behaviour they check."
)]

use calib_config::SubmissionMode;

mod common;

use common::TestResult;
use common::assert_invalid;

#[test]
fn server_rejects_unparseable_bind() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.bind = "localhost".to_string();
    assert_invalid(config.validate(), "invalid server.bind address")
}

#[test]
fn server_rejects_remote_bind_without_opt_in() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.bind = "0.0.0.0:8765".to_string();
    assert_invalid(config.validate(), "requires server.allow_remote")?;
    config.server.allow_remote = true;
    config.validate().map_err(|err| err.to_string())
}

#[test]
fn server_rejects_zero_body_limit_and_fast_tick() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.max_body_bytes = 0;
    assert_invalid(config.validate(), "server.max_body_bytes")?;
    config.server.max_body_bytes = 4096;
    config.server.tick_ms = 10;
    assert_invalid(config.validate(), "server.tick_ms must be at least")
}

#[test]
fn calibration_rejects_bad_tolerance() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.calibration.tolerance = 0.0;
    assert_invalid(config.validate(), "calibration.tolerance")?;
    config.calibration.tolerance = f64::NAN;
    assert_invalid(config.validate(), "calibration.tolerance")
}

#[test]
fn calibration_rejects_threshold_outside_unit_interval() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.calibration.failure_threshold = 1.5;
    assert_invalid(config.validate(), "calibration.failure_threshold")
}

#[test]
fn calibration_requires_room_for_a_convergence_streak() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.calibration.max_steps_per_phase = 1;
    assert_invalid(config.validate(), "calibration.max_steps_per_phase must be at least 2")
}

#[test]
fn calibration_rejects_zero_job_timeout() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.calibration.job_timeout_ms = 0;
    assert_invalid(config.validate(), "calibration.job_timeout_ms")
}

#[test]
fn calibration_rejects_unknown_accessor() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.calibration.settings_access = "nearest".to_string();
    assert_invalid(config.validate(), "unknown calibration.settings_access: nearest")
}

#[test]
fn command_submission_requires_command() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.submission.mode = SubmissionMode::Command;
    assert_invalid(config.validate(), "command submission requires command")
}

#[test]
fn manual_submission_rejects_command() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.submission.command = Some("calib".to_string());
    assert_invalid(config.validate(), "manual submission must not set command")
}

#[test]
fn submission_rejects_non_http_endpoint() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.submission.endpoint = "ftp://grid.example.org/rpc".to_string();
    assert_invalid(config.validate(), "submission.endpoint must be an http(s) url")
}

#[test]
fn submission_rejects_attempt_and_backoff_bounds() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.submission.max_attempts = 0;
    assert_invalid(config.validate(), "submission.max_attempts")?;
    config.submission.max_attempts = 3;
    config.submission.backoff_base_ms = 5_000;
    config.submission.backoff_max_ms = 100;
    assert_invalid(config.validate(), "submission.backoff_base_ms must not exceed")
}

#[test]
fn audit_rejects_blank_path() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.audit.path = Some("  ".to_string());
    assert_invalid(config.validate(), "audit.path must be non-empty")
}
