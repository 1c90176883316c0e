use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Canonical battery behaviors, one per tick.
///
/// `Preserve` is a deliberate hold (keep charge for a forecast peak) as
/// opposed to `Idle` which means "nothing worth doing". The executor decides
/// how each maps onto actual inverter commands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BatteryAction {
    Idle,
    ChargeGrid,
    ChargeSolar,
    DischargeHome,
    DischargeGrid,
    Preserve,
}

impl BatteryAction {
    pub fn is_charging(&self) -> bool {
        matches!(self, Self::ChargeGrid | Self::ChargeSolar)
    }

    pub fn is_discharging(&self) -> bool {
        matches!(self, Self::DischargeHome | Self::DischargeGrid)
    }
}

/// The engine's sole output: what the battery should do for the coming tick.
///
/// Constructed once per strategy invocation and never mutated afterwards.
/// `power_limit_kw` is always >= 0; direction is carried by `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: BatteryAction,
    pub power_limit_kw: f64,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_soc_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected_cost: Option<f64>,
}

impl Decision {
    pub fn new(action: BatteryAction, power_limit_kw: f64, reason: impl Into<String>) -> Self {
        Self {
            action,
            power_limit_kw: power_limit_kw.max(0.0),
            reason: reason.into(),
            target_soc_percent: None,
            projected_cost: None,
        }
    }

    /// Shorthand for the ubiquitous "do nothing" outcome.
    pub fn idle(reason: impl Into<String>) -> Self {
        Self::new(BatteryAction::Idle, 0.0, reason)
    }

    pub fn with_target_soc(mut self, percent: f64) -> Self {
        self.target_soc_percent = Some(percent);
        self
    }

    pub fn with_projected_cost(mut self, cost: f64) -> Self {
        self.projected_cost = Some(cost);
        self
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} @ {:.2} kW ({})",
            self.action, self.power_limit_kw, self.reason
        )
    }
}
