// crates/calib-core/src/runtime/strategy.rs
// ============================================================================
// Module: Phase Strategies
// Description: Strategy capability, step decisions, and the strategy registry.
// Purpose: Encapsulate the numerical logic of one calibration phase.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! A [`PhaseStrategy`] fans one step out into slices, folds worker payloads
//! into a [`StepAccumulator`], and decides whether the step needs more
//! results, must be repeated, or closes the phase.
//!
//! The contractual numerics are shared by every strategy through
//! [`judge_step`]:
//! - the failure ratio is `(errors + lost) / W`; above the threshold the step
//!   repeats with unchanged settings and is flagged high-failure;
//! - a step is within tolerance when
//!   `|new - prior| / max(|prior|, CONVERGENCE_EPSILON) < tolerance`;
//! - a phase converges after [`CONVERGENCE_STREAK`] consecutive
//!   within-tolerance steps.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::core::ConvergenceTuning;
use crate::core::PartialResult;
use crate::core::PhaseOutcome;
use crate::core::PhasePlan;
use crate::core::SettingKey;
use crate::core::SettingUpdate;
use crate::core::SettingValue;
use crate::core::SettingsDelta;
use crate::core::SliceIndex;
use crate::core::StepAccumulator;
use crate::core::StepCursor;
use crate::core::WorkerInputSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Floor on the magnitude of the prior value in the relative-change test.
pub const CONVERGENCE_EPSILON: f64 = 1e-12;
/// Consecutive within-tolerance steps needed to converge.
pub const CONVERGENCE_STREAK: u32 = 2;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Strategy errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// No strategy is registered under the name.
    #[error("unknown phase strategy: {0}")]
    NotFound(String),
    /// Plan is unusable for the strategy.
    #[error("invalid phase plan: {0}")]
    InvalidPlan(String),
    /// Payload could not be ingested.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Inputs to a step decision beyond the accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepContext {
    /// Step being decided.
    pub cursor: StepCursor,
    /// Fan-out width.
    pub width: u32,
    /// Slices given up on.
    pub lost: u32,
    /// Current value of the calibrated option.
    pub prior: Option<f64>,
    /// Consecutive within-tolerance steps before this one.
    pub streak: u32,
    /// Campaign tuning.
    pub tuning: ConvergenceTuning,
}

impl StepContext {
    /// `(errors + lost) / W` for the accumulator.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Widths are far below 2^52.")]
    pub fn failure_ratio(&self, accumulator: &StepAccumulator) -> f64 {
        if self.width == 0 {
            return 1.0;
        }
        let failures = accumulator.error_count() as f64 + f64::from(self.lost);
        failures / f64::from(self.width)
    }

    /// Returns true once every slice has a sample or is lost.
    #[must_use]
    pub fn is_complete(&self, accumulator: &StepAccumulator) -> bool {
        let seen = u32::try_from(accumulator.len()).unwrap_or(u32::MAX);
        seen.saturating_add(self.lost) >= self.width
    }
}

/// Result of deciding a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDecision {
    /// Results are still outstanding.
    NeedMore,
    /// Run another step of the same phase after applying `delta`.
    RepeatStep {
        /// Settings writes for the next step (empty on high failure).
        delta: SettingsDelta,
        /// Step value when one was computed.
        value: Option<f64>,
        /// `(errors + lost) / W`.
        failure_ratio: f64,
        /// Within-tolerance flag.
        within_tolerance: bool,
        /// High-failure flag.
        high_failure: bool,
    },
    /// Phase closed.
    Converged(PhaseOutcome),
}

/// Strategy-specific step measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// New value for the calibrated option.
    Value(f64),
    /// Step is numerically unusable.
    Unusable,
}

/// Applies the shared convergence numerics to a strategy measurement.
#[must_use]
pub fn judge_step(
    target: &SettingKey,
    accumulator: &StepAccumulator,
    context: &StepContext,
    measure: impl FnOnce(&StepAccumulator) -> Measurement,
) -> StepDecision {
    if !context.is_complete(accumulator) {
        return StepDecision::NeedMore;
    }
    let failure_ratio = context.failure_ratio(accumulator);
    let high_failure = StepDecision::RepeatStep {
        delta: SettingsDelta::new(),
        value: None,
        failure_ratio,
        within_tolerance: false,
        high_failure: true,
    };
    if failure_ratio > context.tuning.failure_threshold {
        return high_failure;
    }
    let value = match measure(accumulator) {
        Measurement::Value(value) if value.is_finite() => value,
        Measurement::Value(_) | Measurement::Unusable => return high_failure,
    };
    let within_tolerance = context.prior.is_some_and(|prior| {
        (value - prior).abs() / prior.abs().max(CONVERGENCE_EPSILON) < context.tuning.tolerance
    });
    let streak = if within_tolerance { context.streak + 1 } else { 0 };
    if streak >= CONVERGENCE_STREAK {
        return StepDecision::Converged(PhaseOutcome {
            phase: context.cursor.phase,
            updates: vec![SettingUpdate {
                key: target.clone(),
                value: SettingValue::Number(value),
            }],
            converged: true,
            steps: context.cursor.step + 1,
            final_value: value,
            failure_ratio,
        });
    }
    StepDecision::RepeatStep {
        delta: SettingsDelta::new().with(target.clone(), SettingValue::Number(value)),
        value: Some(value),
        failure_ratio,
        within_tolerance,
        high_failure: false,
    }
}

/// Event-weighted mean of usable samples; equal weights when every weight is zero.
///
/// Weights are normalised first so finite samples always give a finite mean.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Sample counts are far below 2^52.")]
pub fn weighted_mean(accumulator: &StepAccumulator) -> Option<f64> {
    let (count, total_weight) = accumulator
        .values()
        .fold((0_usize, 0.0_f64), |(count, total), (_, weight)| (count + 1, total + weight));
    if count == 0 {
        return None;
    }
    let mean: f64 = if total_weight > 0.0 && total_weight.is_finite() {
        accumulator.values().map(|(value, weight)| value * (weight / total_weight)).sum()
    } else {
        let count = count as f64;
        accumulator.values().map(|(value, _)| value / count).sum()
    };
    Some(mean)
}

// ============================================================================
// SECTION: Strategy Capability
// ============================================================================

/// Numerical logic of one calibration phase.
pub trait PhaseStrategy: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Plan this instance was built for.
    fn plan(&self) -> &PhasePlan;

    /// Settings keys the strategy reads.
    fn required_inputs(&self) -> Vec<SettingKey>;

    /// Fans one step out into `width` slices.
    fn slice_plan(&self, width: u32, cursor: StepCursor) -> Vec<WorkerInputSpec> {
        default_slice_plan(self.plan(), width, cursor)
    }

    /// Folds one worker result into the accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Malformed`] when the payload is unusable.
    fn ingest(
        &self,
        result: &PartialResult,
        accumulator: &mut StepAccumulator,
    ) -> Result<(), StrategyError>;

    /// Decides the step.
    fn decide(&self, accumulator: &StepAccumulator, context: &StepContext) -> StepDecision;

    /// Carry into later phases; applies the plan's seed rule by default.
    fn seed_next_phase(&self, outcome: &PhaseOutcome) -> SettingsDelta {
        let mut delta = SettingsDelta::new();
        if let Some(seed) = &self.plan().seed {
            delta.push(seed.target.clone(), SettingValue::Number(outcome.final_value * seed.scale));
        }
        delta
    }
}

/// Splits the plan's files round-robin over slices and offsets events per slice.
#[must_use]
pub fn default_slice_plan(
    plan: &PhasePlan,
    width: u32,
    _cursor: StepCursor,
) -> Vec<WorkerInputSpec> {
    let lanes = usize::try_from(width).unwrap_or(usize::MAX).max(1);
    let share_all = plan.input_files.len() < lanes;
    (0..width)
        .map(|index| {
            let lane = usize::try_from(index).unwrap_or(usize::MAX);
            let files = plan
                .input_files
                .iter()
                .enumerate()
                .filter(|(position, _)| share_all || position % lanes == lane)
                .map(|(_, name)| name.clone())
                .collect();
            WorkerInputSpec {
                slice: SliceIndex::new(index),
                files,
                events: plan.events_per_slice,
                skip_events: plan.events_per_slice.saturating_mul(u64::from(index)),
            }
        })
        .collect()
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Constructor producing a strategy for a plan.
pub type StrategyBuilder =
    Arc<dyn Fn(&PhasePlan) -> Result<Box<dyn PhaseStrategy>, StrategyError> + Send + Sync>;

/// Name to strategy constructor mapping.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    /// Registered builders keyed by name.
    builders: BTreeMap<String, StrategyBuilder>,
}

impl StrategyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a builder.
    pub fn register(&mut self, name: impl Into<String>, builder: StrategyBuilder) {
        self.builders.insert(name.into(), builder);
    }

    /// Returns true when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// Builds the strategy for a plan.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::NotFound`] for unknown names and
    /// [`StrategyError::InvalidPlan`] when the builder rejects the plan.
    pub fn create(
        &self,
        name: &str,
        plan: &PhasePlan,
    ) -> Result<Box<dyn PhaseStrategy>, StrategyError> {
        let builder =
            self.builders.get(name).ok_or_else(|| StrategyError::NotFound(name.to_string()))?;
        builder(plan)
    }
}
