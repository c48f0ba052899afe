// crates/calib-core/src/core/settings.rs
// ============================================================================
// Module: Detector Settings
// Description: Per-subsystem option dictionaries and their access strategies.
// Purpose: Give phase strategies one typed surface for reading and updating options.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! [`DetectorSettings`] maps subsystem names to option dictionaries. Reads go
//! through a named [`SettingsAccess`] capability resolved from an
//! [`AccessRegistry`]; `exact` consults only the named subsystem while
//! `fallback` also consults the shared `global` subsystem.
//!
//! [`SettingsStore`] bundles a mutable settings snapshot with its access
//! capability for the duration of one state-machine operation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Subsystem consulted by the `fallback` accessor when the named subsystem lacks an option.
pub const GLOBAL_SUBSYSTEM: &str = "global";
/// Registry name of the exact accessor.
pub const EXACT_ACCESS: &str = "exact";
/// Registry name of the fallback accessor.
pub const FALLBACK_ACCESS: &str = "fallback";

// ============================================================================
// SECTION: Values
// ============================================================================

/// Raw option value.
///
/// Values are externally tagged (`{"number": 1.5}`) so numbers keep their
/// type across canonical JSON round trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer option.
    Integer(i64),
    /// Floating-point option.
    Number(f64),
    /// Free-form text option.
    Text(String),
}

impl SettingValue {
    /// Returns the numeric view of the value when it has one.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "Integer options are small calibration constants."
    )]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Number(value) => Some(*value),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => value.fmt(f),
            Self::Integer(value) => value.fmt(f),
            Self::Number(value) => value.fmt(f),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Fully qualified option address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettingKey {
    /// Subsystem name (for example `ecal`).
    pub subsystem: String,
    /// Option name inside the subsystem.
    pub option: String,
}

impl SettingKey {
    /// Creates a key.
    #[must_use]
    pub fn new(subsystem: impl Into<String>, option: impl Into<String>) -> Self {
        Self { subsystem: subsystem.into(), option: option.into() }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subsystem, self.option)
    }
}

/// One option write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingUpdate {
    /// Target option.
    pub key: SettingKey,
    /// New value.
    pub value: SettingValue,
}

/// Ordered list of option writes; later entries win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDelta(Vec<SettingUpdate>);

impl SettingsDelta {
    /// Creates an empty delta.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a write.
    pub fn push(&mut self, key: SettingKey, value: SettingValue) {
        self.0.push(SettingUpdate { key, value });
    }

    /// Returns a delta with one extra write.
    #[must_use]
    pub fn with(mut self, key: SettingKey, value: SettingValue) -> Self {
        self.push(key, value);
        self
    }

    /// Returns true when the delta carries no writes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the writes in application order.
    #[must_use]
    pub fn updates(&self) -> &[SettingUpdate] {
        &self.0
    }
}

// ============================================================================
// SECTION: Detector Settings
// ============================================================================

/// Subsystem to option dictionary snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectorSettings(BTreeMap<String, BTreeMap<String, SettingValue>>);

impl DetectorSettings {
    /// Creates an empty snapshot.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the value stored directly under `subsystem`.
    #[must_use]
    pub fn get(&self, subsystem: &str, option: &str) -> Option<&SettingValue> {
        self.0.get(subsystem).and_then(|options| options.get(option))
    }

    /// Stores a value and returns the previous one.
    pub fn insert(
        &mut self,
        subsystem: impl Into<String>,
        option: impl Into<String>,
        value: SettingValue,
    ) -> Option<SettingValue> {
        self.0.entry(subsystem.into()).or_default().insert(option.into(), value)
    }

    /// Returns a copy with one extra value.
    #[must_use]
    pub fn with(mut self, subsystem: &str, option: &str, value: SettingValue) -> Self {
        self.insert(subsystem, option, value);
        self
    }

    /// Iterates subsystem names.
    pub fn subsystems(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

// ============================================================================
// SECTION: Access Strategies
// ============================================================================

/// Capability used to look options up in a settings snapshot.
pub trait SettingsAccess: Send + Sync {
    /// Returns the registry name of this accessor.
    fn name(&self) -> &str;

    /// Reads an option, mapping unknown keys to `None`.
    fn read(&self, settings: &DetectorSettings, subsystem: &str, option: &str)
    -> Option<SettingValue>;

    /// Returns true when the option resolves.
    fn has(&self, settings: &DetectorSettings, subsystem: &str, option: &str) -> bool {
        self.read(settings, subsystem, option).is_some()
    }
}

/// Accessor that only consults the named subsystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactAccess;

impl SettingsAccess for ExactAccess {
    fn name(&self) -> &str {
        EXACT_ACCESS
    }

    fn read(
        &self,
        settings: &DetectorSettings,
        subsystem: &str,
        option: &str,
    ) -> Option<SettingValue> {
        settings.get(subsystem, option).cloned()
    }

    fn has(&self, settings: &DetectorSettings, subsystem: &str, option: &str) -> bool {
        settings.get(subsystem, option).is_some()
    }
}

/// Accessor that falls back to the `global` subsystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackAccess;

impl SettingsAccess for FallbackAccess {
    fn name(&self) -> &str {
        FALLBACK_ACCESS
    }

    fn read(
        &self,
        settings: &DetectorSettings,
        subsystem: &str,
        option: &str,
    ) -> Option<SettingValue> {
        settings
            .get(subsystem, option)
            .or_else(|| settings.get(GLOBAL_SUBSYSTEM, option))
            .cloned()
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Settings access errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// No accessor is registered under the requested name.
    #[error("unknown settings accessor: {0}")]
    UnknownAccess(String),
}

/// Constructor producing an accessor instance.
pub type AccessBuilder = Arc<dyn Fn() -> Arc<dyn SettingsAccess> + Send + Sync>;

/// Name to accessor constructor mapping.
#[derive(Clone)]
pub struct AccessRegistry {
    /// Registered constructors keyed by name.
    builders: BTreeMap<String, AccessBuilder>,
}

impl AccessRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self { builders: BTreeMap::new() }
    }

    /// Creates a registry with the `exact` and `fallback` accessors.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(
            EXACT_ACCESS,
            Arc::new(|| Arc::new(ExactAccess) as Arc<dyn SettingsAccess>),
        );
        registry.register(
            FALLBACK_ACCESS,
            Arc::new(|| Arc::new(FallbackAccess) as Arc<dyn SettingsAccess>),
        );
        registry
    }

    /// Registers (or replaces) a constructor.
    pub fn register(&mut self, name: impl Into<String>, builder: AccessBuilder) {
        self.builders.insert(name.into(), builder);
    }

    /// Returns true when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Builds the accessor registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::UnknownAccess`] when no accessor is registered.
    pub fn create(&self, name: &str) -> Result<Arc<dyn SettingsAccess>, SettingsError> {
        self.builders
            .get(name)
            .map(|builder| builder())
            .ok_or_else(|| SettingsError::UnknownAccess(name.to_string()))
    }
}

impl Default for AccessRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// SECTION: Settings Store
// ============================================================================

/// Mutable settings view bound to an access strategy.
pub struct SettingsStore<'a> {
    /// Settings being read and updated.
    values: &'a mut DetectorSettings,
    /// Lookup capability.
    access: &'a dyn SettingsAccess,
}

impl<'a> SettingsStore<'a> {
    /// Binds a snapshot to an accessor.
    pub fn new(values: &'a mut DetectorSettings, access: &'a dyn SettingsAccess) -> Self {
        Self { values, access }
    }

    /// Reads an option; never fails.
    #[must_use]
    pub fn read(&self, subsystem: &str, option: &str) -> Option<SettingValue> {
        self.access.read(self.values, subsystem, option)
    }

    /// Reads an option by key as a number.
    #[must_use]
    pub fn read_number(&self, key: &SettingKey) -> Option<f64> {
        self.read(&key.subsystem, &key.option).and_then(|value| value.as_f64())
    }

    /// Existence check.
    #[must_use]
    pub fn has(&self, subsystem: &str, option: &str) -> bool {
        self.access.has(self.values, subsystem, option)
    }

    /// Overwrites an option and returns the prior direct value.
    pub fn set(
        &mut self,
        subsystem: &str,
        option: &str,
        value: SettingValue,
    ) -> Option<SettingValue> {
        self.values.insert(subsystem, option, value)
    }

    /// Applies every write of a delta in order.
    pub fn apply(&mut self, delta: &SettingsDelta) {
        for update in delta.updates() {
            let key = &update.key;
            self.values.insert(key.subsystem.clone(), key.option.clone(), update.value.clone());
        }
    }

    /// Returns a deep copy of the current values.
    #[must_use]
    pub fn snapshot(&self) -> DetectorSettings {
        self.values.clone()
    }
}
