// crates/calib-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Campaign Store
// Description: Durable CampaignStore backed by SQLite WAL.
// Purpose: Persist campaign snapshots with deterministic serialization.
// Dependencies: calib-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each save writes the canonical JSON of a [`CampaignState`] as a new row in
//! an append-only version table and bumps the campaign's latest version.
//! Loads read the latest row, check its digest, and fail closed on mismatch.
//! Deleting a campaign removes its whole history.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use calib_core::CampaignId;
use calib_core::CampaignState;
use calib_core::CampaignStore;
use calib_core::DEFAULT_HASH_ALGORITHM;
use calib_core::HashAlgorithm;
use calib_core::StoreError;
use calib_core::core::hashing::canonical_json_bytes;
use calib_core::core::hashing::hash_bytes;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version written to `store_meta`.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Largest campaign snapshot the store accepts.
pub const MAX_STATE_BYTES: usize = 16 * 1024 * 1024;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// Write-ahead log.
    #[default]
    Wal,
    /// Rollback journal.
    Delete,
}

impl SqliteStoreMode {
    /// Pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` synchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Sync on every commit.
    #[default]
    Full,
    /// Sync at checkpoints.
    Normal,
}

impl SqliteSyncMode {
    /// Pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteStoreConfig {
    /// Database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// Synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Versions kept per campaign; older rows are pruned. `None` keeps all.
    #[serde(default)]
    pub max_versions: Option<u64>,
}

impl SqliteStoreConfig {
    /// Configuration with defaults for everything but the path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_versions: None,
        }
    }
}

/// Default busy timeout for serde.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Filesystem failure.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// Engine failure.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Digest mismatch or broken bookkeeping.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Unsupported schema version.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Undecodable or inconsistent data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Snapshot exceeds [`MAX_STATE_BYTES`].
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::TooLarge { max_bytes, actual_bytes } => Self::Invalid(format!(
                "state_json exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps a rusqlite error.
fn db(err: &rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed campaign store.
#[derive(Clone)]
pub struct SqliteCampaignStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteCampaignStore {
    /// Opens (or creates) the store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// its schema is unsupported.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if config.max_versions == Some(0) {
            return Err(SqliteStoreError::Invalid(
                "max_versions must be greater than zero".to_string(),
            ));
        }
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { config, connection: Arc::new(Mutex::new(connection)) })
    }

    /// Number of stored versions for a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Db`] on query failure.
    pub fn version_count(&self, campaign_id: CampaignId) -> Result<u64, SqliteStoreError> {
        let guard = self.lock()?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM campaign_state_versions WHERE campaign_id = ?1",
                params![key(campaign_id)?],
                |row| row.get(0),
            )
            .map_err(|err| db(&err))?;
        drop(guard);
        u64::try_from(count)
            .map_err(|_| SqliteStoreError::Corrupt("negative version count".to_string()))
    }

    /// Locks the shared connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    /// Loads the latest snapshot of a campaign.
    fn load_state(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Option<CampaignState>, SqliteStoreError> {
        let id = key(campaign_id)?;
        let row = {
            let mut guard = self.lock()?;
            let tx = guard.transaction().map_err(|err| db(&err))?;
            let latest = latest_version(&tx, id)?;
            let row = match latest {
                None => None,
                Some(version) => Some(read_version(&tx, id, version)?),
            };
            tx.commit().map_err(|err| db(&err))?;
            drop(guard);
            row
        };
        let Some((bytes, hash_value, hash_label)) = row else {
            return Ok(None);
        };
        let algorithm = HashAlgorithm::from_label(&hash_label).ok_or_else(|| {
            SqliteStoreError::Invalid(format!("unsupported hash algorithm: {hash_label}"))
        })?;
        if hash_bytes(algorithm, &bytes).value != hash_value {
            let message = format!("hash mismatch for campaign {campaign_id}");
            return Err(SqliteStoreError::Corrupt(message));
        }
        let state: CampaignState = serde_json::from_slice(&bytes)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        if state.campaign_id != campaign_id {
            return Err(SqliteStoreError::Invalid(
                "campaign_id mismatch between key and payload".to_string(),
            ));
        }
        Ok(Some(state))
    }

    /// Appends a snapshot.
    fn save_state(&self, state: &CampaignState) -> Result<(), SqliteStoreError> {
        let canonical =
            canonical_json_bytes(state).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        if canonical.len() > MAX_STATE_BYTES {
            return Err(SqliteStoreError::TooLarge {
                max_bytes: MAX_STATE_BYTES,
                actual_bytes: canonical.len(),
            });
        }
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &canonical);
        let id = key(state.campaign_id)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db(&err))?;
        let next_version = match latest_version(&tx, id)? {
            None => 1,
            Some(value) => value.checked_add(1).ok_or_else(|| {
                let message = format!("version overflow for campaign {}", state.campaign_id);
                SqliteStoreError::Corrupt(message)
            })?,
        };
        tx.execute(
            "INSERT INTO campaigns (campaign_id, latest_version, status) VALUES (?1, ?2, ?3) \
             ON CONFLICT(campaign_id) DO UPDATE SET latest_version = excluded.latest_version, \
             status = excluded.status",
            params![id, next_version, state.status.as_str()],
        )
        .map_err(|err| db(&err))?;
        tx.execute(
            "INSERT INTO campaign_state_versions (campaign_id, version, state_json, state_hash, \
             hash_algorithm, saved_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                next_version,
                canonical,
                digest.value,
                digest.algorithm.label(),
                unix_millis()
            ],
        )
        .map_err(|err| db(&err))?;
        enforce_retention(&tx, id, next_version, self.config.max_versions)?;
        tx.commit().map_err(|err| db(&err))?;
        drop(guard);
        Ok(())
    }

    /// Lists stored campaign identifiers in ascending order.
    fn list_ids(&self) -> Result<Vec<CampaignId>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare("SELECT campaign_id FROM campaigns ORDER BY campaign_id")
            .map_err(|err| db(&err))?;
        let raw: Vec<i64> = statement
            .query_map(params![], |row| row.get(0))
            .map_err(|err| db(&err))?
            .collect::<Result<_, _>>()
            .map_err(|err| db(&err))?;
        drop(statement);
        drop(guard);
        raw.into_iter()
            .map(|value| {
                u64::try_from(value).ok().and_then(CampaignId::from_raw).ok_or_else(|| {
                    SqliteStoreError::Corrupt(format!("invalid campaign id {value}"))
                })
            })
            .collect()
    }

    /// Removes a campaign and its history.
    fn delete_state(&self, campaign_id: CampaignId) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .execute("DELETE FROM campaigns WHERE campaign_id = ?1", params![key(campaign_id)?])
            .map_err(|err| db(&err))?;
        drop(guard);
        Ok(())
    }
}

impl CampaignStore for SqliteCampaignStore {
    fn load(&self, campaign_id: CampaignId) -> Result<Option<CampaignState>, StoreError> {
        self.load_state(campaign_id).map_err(StoreError::from)
    }

    fn save(&self, state: &CampaignState) -> Result<(), StoreError> {
        self.save_state(state).map_err(StoreError::from)
    }

    fn list(&self) -> Result<Vec<CampaignId>, StoreError> {
        self.list_ids().map_err(StoreError::from)
    }

    fn delete(&self, campaign_id: CampaignId) -> Result<(), StoreError> {
        self.delete_state(campaign_id).map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Converts a campaign identifier to its column value.
fn key(campaign_id: CampaignId) -> Result<i64, SqliteStoreError> {
    i64::try_from(campaign_id.get())
        .map_err(|_| SqliteStoreError::Invalid(format!("campaign id {campaign_id} out of range")))
}

/// Latest version for a campaign, validated.
fn latest_version(tx: &Transaction<'_>, id: i64) -> Result<Option<i64>, SqliteStoreError> {
    let latest: Option<i64> = tx
        .query_row(
            "SELECT latest_version FROM campaigns WHERE campaign_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| db(&err))?;
    match latest {
        Some(value) if value < 1 => {
            Err(SqliteStoreError::Corrupt(format!("invalid latest_version for campaign {id}")))
        }
        other => Ok(other),
    }
}

/// Reads one version row after checking its size.
fn read_version(
    tx: &Transaction<'_>,
    id: i64,
    version: i64,
) -> Result<(Vec<u8>, String, String), SqliteStoreError> {
    let metadata = tx
        .query_row(
            "SELECT length(state_json), state_hash, hash_algorithm FROM campaign_state_versions \
             WHERE campaign_id = ?1 AND version = ?2",
            params![id, version],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
        )
        .optional()
        .map_err(|err| db(&err))?;
    let Some((length, hash, algorithm)) = metadata else {
        return Err(SqliteStoreError::Corrupt(format!(
            "missing state version {version} for campaign {id}"
        )));
    };
    let length = usize::try_from(length).map_err(|_| {
        SqliteStoreError::Invalid(format!("negative state length for campaign {id}"))
    })?;
    if length > MAX_STATE_BYTES {
        return Err(SqliteStoreError::TooLarge { max_bytes: MAX_STATE_BYTES, actual_bytes: length });
    }
    let bytes: Vec<u8> = tx
        .query_row(
            "SELECT state_json FROM campaign_state_versions \
             WHERE campaign_id = ?1 AND version = ?2",
            params![id, version],
            |row| row.get(0),
        )
        .map_err(|err| db(&err))?;
    Ok((bytes, hash, algorithm))
}

/// Prunes versions beyond `max_versions`.
fn enforce_retention(
    tx: &Transaction<'_>,
    id: i64,
    latest: i64,
    max_versions: Option<u64>,
) -> Result<(), SqliteStoreError> {
    let Some(max_versions) = max_versions else {
        return Ok(());
    };
    let max_versions = i64::try_from(max_versions)
        .map_err(|_| SqliteStoreError::Invalid("max_versions too large".to_string()))?;
    if latest > max_versions {
        tx.execute(
            "DELETE FROM campaign_state_versions WHERE campaign_id = ?1 AND version < ?2",
            params![id, latest - max_versions + 1],
        )
        .map_err(|err| db(&err))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Setup
// ============================================================================

/// Creates the parent directory of the database file.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates path length limits and rejects directories.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.display().to_string().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens the connection and applies pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(|err| db(&err))?;
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(|err| db(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| db(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| db(&err))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db(&err))?;
    Ok(connection)
}

/// Creates the schema or checks the stored version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| db(&err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| db(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| db(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| db(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS campaigns (
                    campaign_id INTEGER PRIMARY KEY,
                    latest_version INTEGER NOT NULL,
                    status TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS campaign_state_versions (
                    campaign_id INTEGER NOT NULL,
                    version INTEGER NOT NULL,
                    state_json BLOB NOT NULL,
                    state_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL,
                    PRIMARY KEY (campaign_id, version),
                    FOREIGN KEY (campaign_id) REFERENCES campaigns(campaign_id) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_campaign_state_versions_campaign_id
                    ON campaign_state_versions (campaign_id);",
            )
            .map_err(|err| db(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| db(&err))?;
    Ok(())
}

/// Current unix time in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
