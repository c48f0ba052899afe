// crates/calib-core/src/core/payload.rs
// ============================================================================
// Module: Worker Payloads
// Description: Partial-result payloads and the histogram byte channel.
// Purpose: Carry worker results with byte-exact histogram transport.
// Dependencies: base64, serde, thiserror
// ============================================================================

//! ## Overview
//! Workers return a scalar, a histogram blob, or an error message. Histogram
//! blobs travel as standard base64 text; [`binary_to_string`] and
//! [`string_to_binary`] preserve bytes exactly.
//!
//! Blob layout (little-endian): `f64` lower edge, `f64` upper edge, then one
//! `u32` count per bin. At least one bin is required and `upper > lower`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bytes taken by the two edge values in a histogram blob.
const HISTOGRAM_HEADER_BYTES: usize = 16;
/// Bytes per bin count.
const HISTOGRAM_BIN_BYTES: usize = 4;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Payload decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Base64 text could not be decoded.
    #[error("invalid base64 payload: {0}")]
    Encoding(String),
    /// Histogram blob is malformed.
    #[error("invalid histogram blob: {0}")]
    Histogram(String),
}

// ============================================================================
// SECTION: Byte Channel
// ============================================================================

/// Encodes raw bytes as base64 text.
#[must_use]
pub fn binary_to_string(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes base64 text back into the original bytes.
///
/// # Errors
///
/// Returns [`PayloadError::Encoding`] when the text is not valid base64.
pub fn string_to_binary(text: &str) -> Result<Vec<u8>, PayloadError> {
    STANDARD.decode(text).map_err(|err| PayloadError::Encoding(err.to_string()))
}

/// Serde adapter storing bytes as base64 text.
mod base64_bytes {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    /// Serializes bytes as base64.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::binary_to_string(bytes))
    }

    /// Deserializes base64 into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::string_to_binary(&text).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// SECTION: Payload
// ============================================================================

/// Result returned by one worker for one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Single measured value with the number of events behind it.
    Scalar {
        /// Measured value.
        value: f64,
        /// Events contributing to the value (used as the averaging weight).
        #[serde(default)]
        events: u64,
    },
    /// Histogram blob.
    Histogram {
        /// Raw blob bytes (base64 on the wire).
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Application failure reported by the worker.
    Error {
        /// Failure description.
        message: String,
    },
}

impl Payload {
    /// Returns true for error payloads.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns the stable payload kind label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Scalar { .. } => "scalar",
            Self::Histogram { .. } => "histogram",
            Self::Error { .. } => "error",
        }
    }
}

// ============================================================================
// SECTION: Histogram
// ============================================================================

/// Decoded fixed-width histogram.
///
/// # Invariants
/// - `bins` is non-empty and `upper > lower`, both finite.
/// - `upper - lower` is finite.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// Lower edge of the first bin.
    pub lower: f64,
    /// Upper edge of the last bin.
    pub upper: f64,
    /// Entry count per bin.
    pub bins: Vec<u32>,
}

impl Histogram {
    /// Decodes a histogram blob.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Histogram`] when the layout or edges are invalid.
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < HISTOGRAM_HEADER_BYTES + HISTOGRAM_BIN_BYTES {
            return Err(PayloadError::Histogram(format!("blob too short: {} bytes", bytes.len())));
        }
        let body = &bytes[HISTOGRAM_HEADER_BYTES..];
        if body.len() % HISTOGRAM_BIN_BYTES != 0 {
            let message = "bin section is not a whole number of u32".to_string();
            return Err(PayloadError::Histogram(message));
        }
        let lower = read_f64(&bytes[0..8])?;
        let upper = read_f64(&bytes[8..16])?;
        if !lower.is_finite() || !upper.is_finite() || upper <= lower {
            return Err(PayloadError::Histogram(format!("invalid edges [{lower}, {upper}]")));
        }
        if !(upper - lower).is_finite() {
            let message = format!("edge span [{lower}, {upper}] overflows");
            return Err(PayloadError::Histogram(message));
        }
        let mut bins = Vec::with_capacity(body.len() / HISTOGRAM_BIN_BYTES);
        for chunk in body.chunks_exact(HISTOGRAM_BIN_BYTES) {
            let raw: [u8; HISTOGRAM_BIN_BYTES] = chunk
                .try_into()
                .map_err(|_| PayloadError::Histogram("truncated bin count".to_string()))?;
            bins.push(u32::from_le_bytes(raw));
        }
        Ok(Self { lower, upper, bins })
    }

    /// Encodes the histogram into blob layout.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(HISTOGRAM_HEADER_BYTES + self.bins.len() * HISTOGRAM_BIN_BYTES);
        out.extend_from_slice(&self.lower.to_le_bytes());
        out.extend_from_slice(&self.upper.to_le_bytes());
        for count in &self.bins {
            out.extend_from_slice(&count.to_le_bytes());
        }
        out
    }

    /// Total number of entries.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.bins.iter().map(|count| u64::from(*count)).sum()
    }

    /// Width of one bin.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Bin counts are far below 2^52.")]
    pub fn bin_width(&self) -> f64 {
        (self.upper - self.lower) / self.bins.len() as f64
    }

    /// Centre of bin `index`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Bin indices are far below 2^52.")]
    pub fn bin_centre(&self, index: usize) -> f64 {
        self.lower + (index as f64 + 0.5) * self.bin_width()
    }

    /// Centre of the most populated bin; the lowest bin wins ties.
    #[must_use]
    pub fn peak_centre(&self) -> f64 {
        let mut best_index = 0;
        let mut best_count = 0;
        for (index, count) in self.bins.iter().enumerate() {
            if *count > best_count {
                best_index = index;
                best_count = *count;
            }
        }
        self.bin_centre(best_index)
    }

    /// Entry-weighted mean of bin centres, `None` for an empty histogram.
    ///
    /// Weights are normalised before summing, so the mean stays within the edges.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Entry counts are far below 2^52.")]
    pub fn mean(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let total = total as f64;
        Some(
            self.bins
                .iter()
                .enumerate()
                .map(|(index, count)| self.bin_centre(index) * (f64::from(*count) / total))
                .sum(),
        )
    }
}

/// Reads a little-endian `f64` from an 8-byte slice.
fn read_f64(bytes: &[u8]) -> Result<f64, PayloadError> {
    let raw: [u8; 8] =
        bytes.try_into().map_err(|_| PayloadError::Histogram("truncated edge".to_string()))?;
    Ok(f64::from_le_bytes(raw))
}
