// crates/calib-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payloads.
// Purpose: Deterministic examples for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example `calibration.toml`. The CLI prints it and the config
//! tests load it, so it always parses and validates.

/// Returns a canonical example `calibration.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[server]
bind = "127.0.0.1:8765"
max_body_bytes = 1048576
tick_ms = 1000
allow_remote = false

[store]
type = "sqlite"
path = "calibration.db"
journal_mode = "wal"
sync_mode = "full"
busy_timeout_ms = 5000
max_versions = 100

[calibration]
tolerance = 0.001
failure_threshold = 0.5
max_steps_per_phase = 20
retry_cap = 2
job_timeout_ms = 600000
retention_ms = 3600000
settings_access = "fallback"

[submission]
mode = "command"
command = "calib"
args = [
    "worker", "run",
    "--endpoint", "{endpoint}",
    "--campaign", "{campaign}",
    "--slice", "{slice}",
]
endpoint = "http://127.0.0.1:8765/rpc"
max_attempts = 3
backoff_base_ms = 100
backoff_max_ms = 2000

[audit]
enabled = true
path = "calibration-audit.jsonl"
"#,
    )
}
