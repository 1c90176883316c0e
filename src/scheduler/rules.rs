//! Rule-cascade strategy
//!
//! Deterministic prioritized rules over the live readings and the price and
//! solar forecasts. No optimization, no lookahead beyond two hours, which
//! makes every decision cheap to compute and easy to explain. Priority
//! order:
//!
//! 1. negative price, always take free energy
//! 2. cheap window and the battery wants charge
//! 3. excess solar
//! 4. peak price, discharge to cover the house
//! 5. high load with no solar at a non-trivial price
//! 6. peak approaching, preserve charge
//! 7. idle

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::domain::{BatteryAction, Decision, PowerEntry};

use super::context::SchedulingContext;
use super::DecisionStrategy;

/// Load above this counts as heavy, kW.
const HIGH_LOAD_KW: f64 = 2.0;
/// Discharging for load alone only pays above this price.
const MODERATE_PRICE_FLOOR: f64 = 15.0;
/// One hour of 5-minute slots.
const SOLAR_LOOKAHEAD_SLOTS: usize = 12;
/// Two hours of 5-minute slots.
const PEAK_LOOKAHEAD_SLOTS: usize = 24;
/// SoC above which holding charge beats topping up.
const ADEQUATE_SOC: f64 = 50.0;

/// Threshold set for the cascade. Percentiles are evaluated against the
/// buy-price forecast on every call, so the notion of "cheap" follows the
/// market. The struct doubles as the `[rules]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCascadeScheduler {
    /// Bottom slice of the forecast counted as a cheap window, percent.
    pub cheap_percentile: f64,
    /// Top slice of the forecast counted as peak, percent.
    pub peak_percentile: f64,
    /// Absolute price that is always peak, regardless of the forecast.
    pub peak_price_ceiling: f64,
    /// Never discharge below this SoC.
    pub reserve_soc: f64,
    /// Consider the battery full above this SoC.
    pub full_soc: f64,
    /// Solar output below this is noise, kW.
    pub solar_meaningful_kw: f64,
}

impl Default for RuleCascadeScheduler {
    fn default() -> Self {
        Self {
            cheap_percentile: 25.0,
            peak_percentile: 75.0,
            peak_price_ceiling: 35.0,
            reserve_soc: 15.0,
            full_soc: 95.0,
            solar_meaningful_kw: 0.3,
        }
    }
}

impl RuleCascadeScheduler {
    /// Price at the cheap percentile of the forecast, or None without one.
    fn cheap_threshold(&self, prices: &[f64]) -> Option<f64> {
        if prices.is_empty() {
            return None;
        }
        let mut sorted = prices.to_vec();
        sorted.sort_by_key(|&p| OrderedFloat(p));
        let idx =
            ((sorted.len() as f64 * self.cheap_percentile / 100.0) as usize).saturating_sub(1);
        Some(sorted[idx])
    }

    fn is_peak(&self, price: f64, prices: &[f64]) -> bool {
        if price >= self.peak_price_ceiling {
            return true;
        }
        if prices.is_empty() {
            return false;
        }
        let mut sorted = prices.to_vec();
        sorted.sort_by_key(|&p| OrderedFloat(p));
        let idx =
            ((sorted.len() as f64 * self.peak_percentile / 100.0) as usize).min(sorted.len() - 1);
        price >= sorted[idx]
    }

    fn solar_coming_soon(&self, forecast: &[PowerEntry]) -> bool {
        forecast
            .iter()
            .take(SOLAR_LOOKAHEAD_SLOTS)
            .any(|slot| slot.kw >= self.solar_meaningful_kw)
    }

    fn peak_coming_soon(&self, prices: &[f64]) -> bool {
        prices
            .iter()
            .take(PEAK_LOOKAHEAD_SLOTS)
            .any(|&p| p >= self.peak_price_ceiling)
    }
}

impl DecisionStrategy for RuleCascadeScheduler {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn decide(&self, context: &SchedulingContext) -> Decision {
        let price = context.import_price;
        let soc = context.state_of_charge;
        let solar = context.solar_power_kw;
        let load = context.load_power_kw;
        let battery = context.battery();

        // 1. Negative price, always take free energy.
        if price < 0.0 {
            return Decision::new(
                BatteryAction::ChargeGrid,
                battery.charge_power_limit_kw,
                format!("Negative price ({price:.1} c/kWh), charging from grid"),
            );
        }

        let forecast_buy = context.forecast_buy_prices();
        let cheap_threshold = self.cheap_threshold(&forecast_buy);
        let is_cheap = cheap_threshold.is_some_and(|t| price <= t);
        let solar_coming = self.solar_coming_soon(&context.solar_forecast);

        // 2. Cheap window and the battery wants charge.
        if is_cheap && soc < self.full_soc {
            if solar_coming && soc > ADEQUATE_SOC {
                return Decision::idle(format!(
                    "Cheap price ({price:.1}) but solar arriving soon, SoC {soc:.0}% adequate"
                ));
            }
            let threshold = cheap_threshold.unwrap_or(price);
            return Decision::new(
                BatteryAction::ChargeGrid,
                battery.charge_power_limit_kw,
                format!("Cheap window ({price:.1} c/kWh, threshold {threshold:.1}), SoC {soc:.0}%"),
            );
        }

        // 3. Excess solar.
        let solar_excess = solar - load;
        if solar_excess > self.solar_meaningful_kw && soc < self.full_soc {
            return Decision::new(
                BatteryAction::ChargeSolar,
                solar_excess.min(battery.charge_power_limit_kw),
                format!("Excess solar {solar_excess:.1} kW, SoC {soc:.0}%"),
            );
        }

        // 4. Peak price, discharge to cover the house.
        let is_peak = self.is_peak(price, &forecast_buy);
        if is_peak && soc > self.reserve_soc {
            return Decision::new(
                BatteryAction::DischargeHome,
                load.min(battery.discharge_power_limit_kw),
                format!("Peak price ({price:.1} c/kWh), discharging to serve {load:.1} kW load"),
            );
        }

        // 5. High load with no solar at a non-trivial price.
        if load > HIGH_LOAD_KW
            && solar < self.solar_meaningful_kw
            && soc > self.reserve_soc
            && price > MODERATE_PRICE_FLOOR
        {
            return Decision::new(
                BatteryAction::DischargeHome,
                load.min(battery.discharge_power_limit_kw),
                format!("High load ({load:.1} kW), no solar, price {price:.1}, discharging"),
            );
        }

        // 6. Peak approaching, hold what we have.
        if self.peak_coming_soon(&forecast_buy) && soc > ADEQUATE_SOC && !is_cheap {
            return Decision::new(
                BatteryAction::Preserve,
                0.0,
                format!("Peak price approaching, preserving SoC {soc:.0}%"),
            );
        }

        // 7. Nothing to do.
        Decision::idle(format!(
            "Normal conditions: SoC {soc:.0}%, price {price:.1}, solar {solar:.1} kW"
        ))
    }
}
