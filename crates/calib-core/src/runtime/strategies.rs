// crates/calib-core/src/runtime/strategies.rs
// ============================================================================
// Module: Reference Strategies
// Description: MIP-peak and energy-scale phase strategies.
// Purpose: Provide the two built-in calibration strategies.
// Dependencies: crate::core, crate::runtime::strategy
// ============================================================================

//! ## Overview
//! - `mip_peak`: slices report a most-probable value (scalar) or a histogram
//!   whose peak bin centre is used. The step value is the event-weighted mean
//!   and becomes the new target option. It reads no settings, so an unset
//!   target only means the first step cannot count toward convergence.
//! - `energy_scale`: slices report the mean reconstructed energy of a
//!   reference sample. The constant at the target option is rescaled by
//!   `reference_energy / measured`; a non-positive measurement makes the
//!   step unusable. The constant is a required input.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::Histogram;
use crate::core::PartialResult;
use crate::core::Payload;
use crate::core::PhasePlan;
use crate::core::Sample;
use crate::core::SettingKey;
use crate::core::StepAccumulator;
use crate::runtime::strategy::Measurement;
use crate::runtime::strategy::PhaseStrategy;
use crate::runtime::strategy::StepContext;
use crate::runtime::strategy::StepDecision;
use crate::runtime::strategy::StrategyError;
use crate::runtime::strategy::StrategyRegistry;
use crate::runtime::strategy::judge_step;
use crate::runtime::strategy::weighted_mean;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Registry name of the MIP-peak strategy.
pub const MIP_PEAK: &str = "mip_peak";
/// Registry name of the energy-scale strategy.
pub const ENERGY_SCALE: &str = "energy_scale";

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Converts a worker payload into a sample using `histogram_value` for blobs.
#[allow(clippy::cast_precision_loss, reason = "Event counts are far below 2^52.")]
fn sample_from(
    result: &PartialResult,
    histogram_value: impl Fn(&Histogram) -> Option<f64>,
) -> Result<Sample, StrategyError> {
    match &result.payload {
        Payload::Scalar { value, events } => {
            if !value.is_finite() {
                return Err(StrategyError::Malformed(format!(
                    "slice {} reported a non-finite value",
                    result.slice
                )));
            }
            Ok(Sample::Value { value: *value, weight: *events as f64 })
        }
        Payload::Histogram { data } => {
            let histogram =
                Histogram::decode(data).map_err(|err| StrategyError::Malformed(err.to_string()))?;
            let value = histogram_value(&histogram).ok_or_else(|| {
                let message = format!("slice {} reported an empty histogram", result.slice);
                StrategyError::Malformed(message)
            })?;
            if !value.is_finite() {
                return Err(StrategyError::Malformed(format!(
                    "slice {} histogram yields a non-finite value",
                    result.slice
                )));
            }
            Ok(Sample::Value { value, weight: histogram.total() as f64 })
        }
        Payload::Error { message } => Ok(Sample::Failed { message: message.clone() }),
    }
}

/// Inserts a sample, rejecting a second sample for the same slice.
fn insert_sample(
    accumulator: &mut StepAccumulator,
    result: &PartialResult,
    sample: Sample,
) -> Result<(), StrategyError> {
    if accumulator.insert(result.slice, sample) {
        Ok(())
    } else {
        Err(StrategyError::Malformed(format!("slice {} already ingested", result.slice)))
    }
}

// ============================================================================
// SECTION: MIP Peak
// ============================================================================

/// Most-probable-value strategy.
pub struct MipPeakStrategy {
    /// Phase plan.
    plan: PhasePlan,
}

impl MipPeakStrategy {
    /// Builds the strategy for a plan.
    #[must_use]
    pub const fn new(plan: PhasePlan) -> Self {
        Self { plan }
    }
}

impl PhaseStrategy for MipPeakStrategy {
    fn name(&self) -> &str {
        MIP_PEAK
    }

    fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    fn required_inputs(&self) -> Vec<SettingKey> {
        Vec::new()
    }

    fn ingest(
        &self,
        result: &PartialResult,
        accumulator: &mut StepAccumulator,
    ) -> Result<(), StrategyError> {
        let sample = sample_from(result, |histogram| {
            (histogram.total() > 0).then(|| histogram.peak_centre())
        })?;
        insert_sample(accumulator, result, sample)
    }

    fn decide(&self, accumulator: &StepAccumulator, context: &StepContext) -> StepDecision {
        judge_step(&self.plan.target, accumulator, context, |accumulator| {
            weighted_mean(accumulator).map_or(Measurement::Unusable, Measurement::Value)
        })
    }
}

// ============================================================================
// SECTION: Energy Scale
// ============================================================================

/// Reference-energy rescaling strategy.
pub struct EnergyScaleStrategy {
    /// Phase plan.
    plan: PhasePlan,
    /// Expected reconstructed energy.
    reference_energy: f64,
}

impl EnergyScaleStrategy {
    /// Builds the strategy for a plan.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::InvalidPlan`] when `reference_energy` is missing or not positive.
    pub fn new(plan: PhasePlan) -> Result<Self, StrategyError> {
        let reference_energy = plan
            .reference_energy
            .filter(|value| value.is_finite() && *value > 0.0)
            .ok_or_else(|| {
                StrategyError::InvalidPlan(format!(
                    "{ENERGY_SCALE} for {} requires a positive reference_energy",
                    plan.phase
                ))
            })?;
        Ok(Self { plan, reference_energy })
    }
}

impl PhaseStrategy for EnergyScaleStrategy {
    fn name(&self) -> &str {
        ENERGY_SCALE
    }

    fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    fn required_inputs(&self) -> Vec<SettingKey> {
        vec![self.plan.target.clone()]
    }

    fn ingest(
        &self,
        result: &PartialResult,
        accumulator: &mut StepAccumulator,
    ) -> Result<(), StrategyError> {
        let sample = sample_from(result, Histogram::mean)?;
        insert_sample(accumulator, result, sample)
    }

    fn decide(&self, accumulator: &StepAccumulator, context: &StepContext) -> StepDecision {
        let reference = self.reference_energy;
        judge_step(&self.plan.target, accumulator, context, |accumulator| {
            match (context.prior, weighted_mean(accumulator)) {
                (Some(constant), Some(measured)) if measured > 0.0 => {
                    Measurement::Value(constant * reference / measured)
                }
                _ => Measurement::Unusable,
            }
        })
    }
}

// ============================================================================
// SECTION: Registration
// ============================================================================

/// Registers `mip_peak` and `energy_scale`.
pub fn register_reference_strategies(registry: &mut StrategyRegistry) {
    registry.register(
        MIP_PEAK,
        Arc::new(|plan: &PhasePlan| {
            Ok(Box::new(MipPeakStrategy::new(plan.clone())) as Box<dyn PhaseStrategy>)
        }),
    );
    registry.register(
        ENERGY_SCALE,
        Arc::new(|plan: &PhasePlan| {
            EnergyScaleStrategy::new(plan.clone())
                .map(|strategy| Box::new(strategy) as Box<dyn PhaseStrategy>)
        }),
    );
}

impl StrategyRegistry {
    /// Registry holding the reference strategies.
    #[must_use]
    pub fn with_reference_strategies() -> Self {
        let mut registry = Self::new();
        register_reference_strategies(&mut registry);
        registry
    }
}
