//! Decision engine: one strategy, one [`Decision`] per tick.
//!
//! Strategies share the [`SchedulingContext`] input and the [`Decision`]
//! output and differ only in how much of the forecast they look at. The
//! rule cascade reacts to the current tick while the dynamic-programming
//! and linear-programming planners optimize over the full horizon and map
//! the first step of their plan back onto a battery action.

mod context;
mod dp;
mod lp;
mod period;
mod rules;

pub use context::{ResolvedHorizon, SchedulingContext};
pub use dp::DynamicProgrammingScheduler;
pub use lp::LinearProgrammingScheduler;
pub use period::PeriodSummary;
pub use rules::RuleCascadeScheduler;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::domain::{BatteryAction, BatteryModel, Decision, TICKS_PER_HOUR};

/// Power commands smaller than this are noise and become idle.
pub const POWER_DEADBAND_KW: f64 = 0.1;

/// Why a planning strategy could not produce a plan.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("forecast too short")]
    ForecastTooShort,
    #[error("no feasible plan: {0}")]
    Infeasible(String),
    #[error("solver failure: {0}")]
    Solver(String),
}

/// A scheduling strategy: context in, decision out.
///
/// Implementations must be pure with respect to the context; two calls with
/// the same context yield the same decision. That keeps re-planning on every
/// tick safe.
pub trait DecisionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decide(&self, context: &SchedulingContext) -> Decision;
}

/// Which strategy the engine runs, as configured.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Rules,
    Dp,
    Lp,
}

/// The engine proper: owns the configured strategy and logs every decision.
pub struct SchedulingEngine {
    strategy: Box<dyn DecisionStrategy>,
}

impl SchedulingEngine {
    pub fn new(strategy: Box<dyn DecisionStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn decide(&self, context: &SchedulingContext) -> Decision {
        let decision = self.strategy.decide(context);
        tracing::debug!(
            strategy = self.strategy.name(),
            action = %decision.action,
            limit_kw = decision.power_limit_kw,
            reason = %decision.reason,
            "decision"
        );
        decision
    }
}

impl std::fmt::Debug for SchedulingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingEngine")
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Translate a planner's first-tick charge target into a battery action.
///
/// The charge delta is battery-side stored energy; the grid-side power limit
/// accounts for the conversion loss of the leg in question. Targets within
/// the deadband of the current charge become idle rather than a micro-move.
pub(crate) fn map_target_charge(
    battery: &BatteryModel,
    target_charge: f64,
    export_to_grid: bool,
    planner: &str,
) -> Decision {
    let power_kw = (target_charge - battery.charge) * battery.capacity_kwh * TICKS_PER_HOUR;
    let target_percent = target_charge.clamp(0.0, 1.0) * 100.0;

    if power_kw.abs() < POWER_DEADBAND_KW {
        return Decision::idle(format!("{planner} plan: optimal to idle"));
    }

    if power_kw > 0.0 {
        let limit = round2(
            (power_kw / battery.charge_efficiency).min(battery.charge_power_limit_kw),
        );
        return Decision::new(
            BatteryAction::ChargeGrid,
            limit,
            format!("{planner} plan: charge toward {target_percent:.1}% SoC"),
        );
    }

    let (action, verb) = if export_to_grid {
        (BatteryAction::DischargeGrid, "export")
    } else {
        (BatteryAction::DischargeHome, "discharge")
    };
    let limit = round2(
        (power_kw.abs() * battery.discharge_efficiency).min(battery.discharge_power_limit_kw),
    );
    Decision::new(
        action,
        limit,
        format!("{planner} plan: {verb} toward {target_percent:.1}% SoC"),
    )
}
