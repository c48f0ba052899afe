// crates/calib-core/src/runtime/audit.rs
// ============================================================================
// Module: Calibration Audit Logging
// Description: Structured audit events for campaign transitions and drops.
// Purpose: Emit JSON-line audit records to stderr, a file, or memory.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every state transition, dropped result, resubmission, and failure emits a
//! [`CalibrationAuditEvent`]. Sinks serialize events as one JSON object per
//! line; deployments route stderr or the audit file into their own pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::core::CampaignId;
use crate::core::SliceIndex;
use crate::core::StepCursor;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Normal transition.
    Info,
    /// Dropped input or recoverable problem.
    Warn,
    /// Run failure or invariant violation.
    Error,
}

/// Calibration audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationAuditEvent {
    /// Event identifier (for example `result_dropped`).
    pub event: &'static str,
    /// Severity.
    pub level: AuditLevel,
    /// Event time (unix milliseconds).
    pub timestamp_ms: i64,
    /// Campaign when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<CampaignId>,
    /// Cursor at the time of the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<StepCursor>,
    /// Slice concerned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice: Option<SliceIndex>,
    /// Free-form detail.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl CalibrationAuditEvent {
    /// Creates an event at the given time.
    #[must_use]
    pub const fn new(event: &'static str, level: AuditLevel, at: Timestamp) -> Self {
        Self {
            event,
            level,
            timestamp_ms: at.as_unix_millis(),
            campaign_id: None,
            cursor: None,
            slice: None,
            detail: String::new(),
        }
    }

    /// Attaches a campaign.
    #[must_use]
    pub const fn campaign(mut self, campaign_id: CampaignId) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    /// Attaches a cursor.
    #[must_use]
    pub const fn cursor(mut self, cursor: StepCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Attaches a slice.
    #[must_use]
    pub const fn slice(mut self, slice: SliceIndex) -> Self {
        self.slice = Some(slice);
        self
    }

    /// Attaches detail text.
    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Records one event.
    fn record(&self, event: &CalibrationAuditEvent);
}

/// Sink writing JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &CalibrationAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Sink appending JSON lines to a file.
pub struct FileAuditSink {
    /// Append-mode file handle.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &CalibrationAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Sink discarding every event.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &CalibrationAuditEvent) {}
}

/// Sink retaining events in memory.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events in order.
    events: Mutex<Vec<CalibrationAuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<CalibrationAuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the recorded events with the given identifier.
    #[must_use]
    pub fn named(&self, event: &str) -> Vec<CalibrationAuditEvent> {
        self.events().into_iter().filter(|entry| entry.event == event).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &CalibrationAuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
