// crates/calib-core/src/core/error.rs
// ============================================================================
// Module: Service Errors
// Description: Error kinds and the tagged reply carrier.
// Purpose: Give every public operation one tagged result shape on the wire.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Every service operation returns `Result<T, ServiceError>`. On the wire the
//! result becomes a [`Reply`] `{ok, value?, error_kind?, message?}` whose
//! `error_kind` is one of the stable [`ErrorKind`] labels.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Error Kind
// ============================================================================

/// Business-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown campaign or strategy name.
    NotFound,
    /// Slice or result references a closed step.
    Stale,
    /// External collaborator failure surfaced after retries.
    Transport,
    /// Run failed on repeated unacceptable steps.
    Numerical,
    /// Invalid command sequence or request.
    Operator,
    /// Invariant violation.
    Internal,
}

impl ErrorKind {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Stale => "stale",
            Self::Transport => "transport",
            Self::Numerical => "numerical",
            Self::Operator => "operator",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Service Error
// ============================================================================

/// Error returned by service operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    /// Classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl ServiceError {
    /// Creates an error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Unknown campaign or strategy.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Closed step.
    #[must_use]
    pub fn stale(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Stale, message)
    }

    /// Collaborator failure.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Invalid command sequence.
    #[must_use]
    pub fn operator(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Operator, message)
    }

    /// Invariant violation.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

// ============================================================================
// SECTION: Reply Carrier
// ============================================================================

/// Tagged wire result.
///
/// # Invariants
/// - `ok == true` carries `value`; `ok == false` carries `error_kind` and `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    /// Success flag.
    pub ok: bool,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    /// Error classification on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Reply<T> {
    /// Successful reply.
    pub const fn success(value: T) -> Self {
        Self { ok: true, value: Some(value), error_kind: None, message: None }
    }

    /// Failed reply.
    pub fn failure(error: ServiceError) -> Self {
        Self { ok: false, value: None, error_kind: Some(error.kind), message: Some(error.message) }
    }

    /// Converts the carrier back into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the carried [`ServiceError`]; a carrier missing its value or
    /// kind yields [`ErrorKind::Internal`].
    pub fn into_result(self) -> Result<T, ServiceError> {
        if self.ok {
            return self.value.ok_or_else(|| ServiceError::internal("reply missing value"));
        }
        let kind = self.error_kind.unwrap_or(ErrorKind::Internal);
        Err(ServiceError::new(kind, self.message.unwrap_or_default()))
    }
}

impl<T> From<Result<T, ServiceError>> for Reply<T> {
    fn from(result: Result<T, ServiceError>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(error) => Self::failure(error),
        }
    }
}
