// crates/calib-config/src/config.rs
// ============================================================================
// Module: Calibration Configuration
// Description: Configuration loading and validation for the coordinator.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: calib-core, calib-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section has defaults, so an empty file is a valid local setup: a
//! loopback server, the in-memory store, the manual submitter, and audit
//! events on stderr. Anything invalid fails the load instead of being
//! silently corrected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use calib_core::AccessRegistry;
use calib_core::ConvergenceTuning;
use calib_core::RetryPolicy;
use calib_core::ServiceConfig;
use calib_core::core::settings::FALLBACK_ACCESS;
use calib_core::runtime::CONVERGENCE_STREAK;
use calib_store_sqlite::SqliteStoreConfig;
use calib_store_sqlite::SqliteStoreMode;
use calib_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "calibration.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "CALIB_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default bind address for the request channel.
pub const DEFAULT_BIND: &str = "127.0.0.1:8765";
/// Default request body limit.
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Largest request body limit accepted.
pub(crate) const MAX_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
/// Default maintenance tick interval.
pub(crate) const DEFAULT_TICK_MS: u64 = 1_000;
/// Smallest maintenance tick interval accepted.
pub(crate) const MIN_TICK_MS: u64 = 50;
/// Default endpoint handed to spawned workers.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8765/rpc";
/// Maximum number of arguments for the command submitter.
pub(crate) const MAX_COMMAND_ARGS: usize = 64;
/// Upper bound on submission attempts.
pub(crate) const MAX_SUBMIT_ATTEMPTS: u32 = 16;
/// Default busy timeout for the sqlite store.
const DEFAULT_STORE_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Calibration coordinator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationConfig {
    /// Request channel configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Campaign store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Convergence defaults and retention.
    #[serde(default)]
    pub calibration: CalibrationDefaults,
    /// Worker job submission.
    #[serde(default)]
    pub submission: SubmissionConfig,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl CalibrationConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.store.validate()?;
        self.calibration.validate()?;
        self.submission.validate()?;
        self.audit.validate()?;
        Ok(())
    }

    /// Service defaults derived from `[calibration]` and `[submission]`.
    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            default_tuning: self.calibration.tuning(),
            default_accessor: self.calibration.settings_access.clone(),
            retry: self.submission.retry_policy(),
            retention_ms: self.calibration.retention_ms,
        }
    }

    /// `SQLite` store settings when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        self.store.sqlite_config()
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Request channel configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Request body limit in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Interval of the timeout and retention ticker.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Allows binding to a non-loopback address.
    #[serde(default)]
    pub allow_remote: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            tick_ms: DEFAULT_TICK_MS,
            allow_remote: false,
        }
    }
}

impl ServerConfig {
    /// Parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(format!("invalid server.bind address: {}", self.bind))
            })
    }

    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let addr = self.bind_addr()?;
        if !addr.ip().is_loopback() && !self.allow_remote {
            return Err(ConfigError::Invalid(
                "non-loopback server.bind requires server.allow_remote".to_string(),
            ));
        }
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes must be between 1 and {MAX_MAX_BODY_BYTES}"
            )));
        }
        if self.tick_ms < MIN_TICK_MS {
            return Err(ConfigError::Invalid(format!(
                "server.tick_ms must be at least {MIN_TICK_MS}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Campaign store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Optional max versions to retain per campaign.
    #[serde(default)]
    pub max_versions: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_versions: None,
        }
    }
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path_string("store.path", &path.to_string_lossy())?;
                if self.max_versions == Some(0) {
                    return Err(ConfigError::Invalid(
                        "store max_versions must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Maps the section onto the sqlite store settings.
    fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        match (self.store_type, &self.path) {
            (StoreType::Sqlite, Some(path)) => Some(SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
                max_versions: self.max_versions,
            }),
            _ => None,
        }
    }
}

/// Campaign store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store (lost on restart).
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

// ============================================================================
// SECTION: Calibration Defaults
// ============================================================================

/// Convergence defaults applied when a campaign request carries no tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationDefaults {
    /// Relative tolerance for a within-tolerance step.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Failure ratio above which a step is high-failure.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    /// Step budget per phase.
    #[serde(default = "default_max_steps_per_phase")]
    pub max_steps_per_phase: u32,
    /// Resubmissions allowed per slice per step.
    #[serde(default = "default_retry_cap")]
    pub retry_cap: u32,
    /// Silence after which a worker job is considered timed out.
    #[serde(default = "default_job_timeout_ms")]
    pub job_timeout_ms: u64,
    /// Time a Finished campaign stays in memory.
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
    /// Settings accessor used when a request names none.
    #[serde(default = "default_settings_access")]
    pub settings_access: String,
}

impl Default for CalibrationDefaults {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            failure_threshold: default_failure_threshold(),
            max_steps_per_phase: default_max_steps_per_phase(),
            retry_cap: default_retry_cap(),
            job_timeout_ms: default_job_timeout_ms(),
            retention_ms: default_retention_ms(),
            settings_access: default_settings_access(),
        }
    }
}

impl CalibrationDefaults {
    /// Tuning carried by this section.
    #[must_use]
    pub const fn tuning(&self) -> ConvergenceTuning {
        ConvergenceTuning {
            tolerance: self.tolerance,
            failure_threshold: self.failure_threshold,
            max_steps_per_phase: self.max_steps_per_phase,
            retry_cap: self.retry_cap,
            job_timeout_ms: self.job_timeout_ms,
        }
    }

    /// Validates calibration defaults.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ConfigError::Invalid(
                "calibration.tolerance must be a positive number".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(ConfigError::Invalid(
                "calibration.failure_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.max_steps_per_phase < CONVERGENCE_STREAK {
            return Err(ConfigError::Invalid(format!(
                "calibration.max_steps_per_phase must be at least {CONVERGENCE_STREAK}"
            )));
        }
        if self.job_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "calibration.job_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !AccessRegistry::with_defaults().contains(&self.settings_access) {
            return Err(ConfigError::Invalid(format!(
                "unknown calibration.settings_access: {}",
                self.settings_access
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Submission
// ============================================================================

/// Worker job submission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    /// Record jobs only; grid workers are launched externally.
    #[default]
    Manual,
    /// Spawn one local process per slice.
    Command,
}

/// Worker job submission configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionConfig {
    /// Submission mode.
    #[serde(default)]
    pub mode: SubmissionMode,
    /// Program spawned per slice in command mode.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments; `{campaign}`, `{slice}`, and `{endpoint}` are substituted.
    #[serde(default)]
    pub args: Vec<String>,
    /// Request channel URL handed to workers.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Total submission attempts per job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff cap.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            mode: SubmissionMode::default(),
            command: None,
            args: Vec::new(),
            endpoint: default_endpoint(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl SubmissionConfig {
    /// Backoff policy for job submission.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.backoff_base_ms,
            max_delay_ms: self.backoff_max_ms,
        }
    }

    /// Validates submission configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            SubmissionMode::Manual => {
                if self.command.is_some() {
                    return Err(ConfigError::Invalid(
                        "manual submission must not set command".to_string(),
                    ));
                }
            }
            SubmissionMode::Command => {
                let command = self.command.as_deref().ok_or_else(|| {
                    ConfigError::Invalid("command submission requires command".to_string())
                })?;
                validate_path_string("submission.command", command)?;
            }
        }
        if self.args.len() > MAX_COMMAND_ARGS {
            return Err(ConfigError::Invalid(format!(
                "submission.args exceeds {MAX_COMMAND_ARGS} entries"
            )));
        }
        let endpoint = self.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(
                "submission.endpoint must be an http(s) url".to_string(),
            ));
        }
        if self.max_attempts == 0 || self.max_attempts > MAX_SUBMIT_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "submission.max_attempts must be between 1 and {MAX_SUBMIT_ATTEMPTS}"
            )));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "submission.backoff_base_ms must not exceed backoff_max_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Emits audit events when true.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// JSON-lines file; stderr when unset.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: default_audit_enabled(), path: None }
    }
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("audit.path", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Returns the default server bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Returns the default request body limit.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Returns the default timeout sweep interval.
const fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

/// Returns the default sqlite busy timeout.
const fn default_store_busy_timeout_ms() -> u64 {
    DEFAULT_STORE_BUSY_TIMEOUT_MS
}

/// Returns the default convergence tolerance.
fn default_tolerance() -> f64 {
    ConvergenceTuning::default().tolerance
}

/// Returns the default per-step failure threshold.
fn default_failure_threshold() -> f64 {
    ConvergenceTuning::default().failure_threshold
}

/// Returns the default step cap per phase.
fn default_max_steps_per_phase() -> u32 {
    ConvergenceTuning::default().max_steps_per_phase
}

/// Returns the default resubmission cap per slice.
fn default_retry_cap() -> u32 {
    ConvergenceTuning::default().retry_cap
}

/// Returns the default job timeout.
fn default_job_timeout_ms() -> u64 {
    ConvergenceTuning::default().job_timeout_ms
}

/// Returns the default retention window for finished runs.
fn default_retention_ms() -> u64 {
    ServiceConfig::default().retention_ms
}

/// Returns the default settings accessor name.
fn default_settings_access() -> String {
    FALLBACK_ACCESS.to_string()
}

/// Returns the default batch system endpoint.
fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

/// Returns the default submission attempt limit.
fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

/// Returns the default initial backoff.
fn default_backoff_base_ms() -> u64 {
    RetryPolicy::default().base_delay_ms
}

/// Returns the default backoff ceiling.
fn default_backoff_max_ms() -> u64 {
    RetryPolicy::default().max_delay_ms
}

/// Audit logging is on unless disabled.
const fn default_audit_enabled() -> bool {
    true
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::missing_docs_in_private_items,
        reason = "Test fixtures use explicit asserts and unwraps for clarity."
    )]

    use super::*;

    #[test]
    fn validate_path_string_rejects_whitespace_only() {
        let err = validate_path_string("audit.path", "   ").unwrap_err();
        assert!(err.to_string().contains("audit.path must be non-empty"));
    }

    #[test]
    fn validate_path_string_rejects_component_too_long() {
        let value = format!("logs/{}", "a".repeat(MAX_PATH_COMPONENT_LENGTH + 1));
        let err = validate_path_string("store.path", &value).unwrap_err();
        assert!(err.to_string().contains("path component too long"));
    }

    #[test]
    fn validate_path_string_accepts_component_at_max() {
        let value = format!("logs/{}", "a".repeat(MAX_PATH_COMPONENT_LENGTH));
        assert!(validate_path_string("store.path", &value).is_ok());
    }

    #[test]
    fn validate_path_rejects_overlong_path() {
        let path = PathBuf::from("a/".repeat(MAX_TOTAL_PATH_LENGTH));
        assert!(matches!(validate_path(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn resolve_path_prefers_explicit_argument() {
        let path = resolve_path(Some(Path::new("/etc/calib/site.toml"))).unwrap();
        assert_eq!(path, PathBuf::from("/etc/calib/site.toml"));
    }
}
