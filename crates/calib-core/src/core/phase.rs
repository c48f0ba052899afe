// crates/calib-core/src/core/phase.rs
// ============================================================================
// Module: Calibration Phases
// Description: Phase identifiers and the (phase, step) cursor.
// Purpose: Define the ordered phase chain and the monotonic step cursor.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Calibration phases run in declaration order of [`PhaseId`]. A campaign
//! selects a strictly increasing subsequence of that order; once the last
//! selected phase converges the cursor moves to [`PhaseId::Done`].
//!
//! [`StepCursor`] orders lexicographically by (phase ordinal, step) and is
//! never moved backwards by the state machine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Phase Identifier
// ============================================================================

/// Calibration phase identifier.
///
/// # Invariants
/// - Variant declaration order is the authoritative phase order.
/// - `Done` is terminal and never carries a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    /// ECAL digitisation (MIP peak).
    EcalDigi,
    /// HCAL digitisation (MIP peak).
    HcalDigi,
    /// Muon system digitisation.
    MuonDigi,
    /// ECAL energy scale.
    EcalEnergy,
    /// HCAL energy scale.
    HcalEnergy,
    /// Pandora MIP scale.
    PandoraMip,
    /// Pandora ECAL to EM scale.
    PandoraEcalToEm,
    /// Pandora ECAL to hadronic scale.
    PandoraEcalToHad,
    /// Pandora HCAL to hadronic scale.
    PandoraHcalToHad,
    /// Terminal marker.
    Done,
}

impl PhaseId {
    /// Every phase in order, including the terminal marker.
    pub const ALL: [Self; 10] = [
        Self::EcalDigi,
        Self::HcalDigi,
        Self::MuonDigi,
        Self::EcalEnergy,
        Self::HcalEnergy,
        Self::PandoraMip,
        Self::PandoraEcalToEm,
        Self::PandoraEcalToHad,
        Self::PandoraHcalToHad,
        Self::Done,
    ];

    /// Returns the zero-based ordinal of the phase.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Returns true for the terminal marker.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EcalDigi => "ecal_digi",
            Self::HcalDigi => "hcal_digi",
            Self::MuonDigi => "muon_digi",
            Self::EcalEnergy => "ecal_energy",
            Self::HcalEnergy => "hcal_energy",
            Self::PandoraMip => "pandora_mip",
            Self::PandoraEcalToEm => "pandora_ecal_to_em",
            Self::PandoraEcalToHad => "pandora_ecal_to_had",
            Self::PandoraHcalToHad => "pandora_hcal_to_had",
            Self::Done => "done",
        }
    }

    /// Parses a wire label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.as_str() == label)
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Step Cursor
// ============================================================================

/// Position of a campaign in its phase/step sequence.
///
/// # Invariants
/// - Ordering is lexicographic over (phase ordinal, step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepCursor {
    /// Current phase.
    pub phase: PhaseId,
    /// Zero-based step within the phase.
    pub step: u32,
}

impl StepCursor {
    /// Creates a cursor.
    #[must_use]
    pub const fn new(phase: PhaseId, step: u32) -> Self {
        Self { phase, step }
    }

    /// Cursor for the first step of a phase.
    #[must_use]
    pub const fn start_of(phase: PhaseId) -> Self {
        Self { phase, step: 0 }
    }

    /// Terminal cursor.
    #[must_use]
    pub const fn done() -> Self {
        Self::start_of(PhaseId::Done)
    }

    /// Returns the cursor for the following step of the same phase.
    #[must_use]
    pub const fn next_step(self) -> Self {
        Self { phase: self.phase, step: self.step.saturating_add(1) }
    }
}

impl fmt::Display for StepCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.phase, self.step)
    }
}
