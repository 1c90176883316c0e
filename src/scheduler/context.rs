//! Scheduling context and horizon resolution
//!
//! A `SchedulingContext` is the full snapshot a strategy needs to make one
//! decision: the live telemetry plus the forecast series.
//! `resolve_horizon` collapses the heterogeneous forecast entries into plain
//! per-tick vectors so the optimizers never touch price-field fallback rules
//! themselves.

use itertools::izip;
use serde::{Deserialize, Serialize};

use crate::domain::{BatteryLimits, BatteryModel, PowerEntry, PriceEntry, HORIZON_TICKS, TICK_HOURS};

use super::SolveError;

/// Snapshot of the house and market at a decision boundary.
///
/// Forecast vectors are aligned: index 0 is the tick containing "now",
/// index k is k ticks (5 minutes each) later. They may have different
/// lengths; resolution truncates to the shortest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingContext {
    /// Battery state of charge in percent (0..100).
    pub state_of_charge: f64,
    /// Solar production right now, kW.
    pub solar_power_kw: f64,
    /// Household consumption right now, kW.
    pub load_power_kw: f64,
    /// Current import price, used as fallback when a forecast entry
    /// carries no usable price field.
    pub import_price: f64,
    /// Current export price, same fallback role.
    pub export_price: f64,
    pub price_forecast: Vec<PriceEntry>,
    pub solar_forecast: Vec<PowerEntry>,
    pub load_forecast: Vec<PowerEntry>,
    pub limits: BatteryLimits,
    /// Average price paid for the energy already in the battery. Values the
    /// terminal charge level in the LP objective.
    pub acquisition_cost: f64,
}

impl Default for SchedulingContext {
    fn default() -> Self {
        Self {
            state_of_charge: 50.0,
            solar_power_kw: 0.0,
            load_power_kw: 0.0,
            import_price: 0.0,
            export_price: 0.0,
            price_forecast: Vec::new(),
            solar_forecast: Vec::new(),
            load_forecast: Vec::new(),
            limits: BatteryLimits::default(),
            acquisition_cost: 0.0,
        }
    }
}

impl SchedulingContext {
    /// Battery model at the current state of charge.
    pub fn battery(&self) -> BatteryModel {
        self.limits.model(self.state_of_charge)
    }

    /// Buy prices over the raw price forecast, resolved per entry with the
    /// current import price as fallback. Used by the rule cascade, which
    /// needs prices even when the power forecasts are missing.
    pub fn forecast_buy_prices(&self) -> Vec<f64> {
        self.price_forecast
            .iter()
            .map(|entry| entry.resolve_buy(self.import_price))
            .collect()
    }

    /// Resolve the forecast series into aligned per-tick vectors.
    ///
    /// The series are truncated to the shortest of the three and capped at
    /// [`HORIZON_TICKS`]. Slot 0 is overwritten with the instantaneous meter
    /// readings so the first tick reflects reality rather than a stale
    /// forecast value.
    pub fn resolve_horizon(&self) -> Result<ResolvedHorizon, SolveError> {
        let n = self
            .price_forecast
            .len()
            .min(self.solar_forecast.len())
            .min(self.load_forecast.len())
            .min(HORIZON_TICKS);
        if n == 0 {
            return Err(SolveError::ForecastTooShort);
        }

        let mut price_buy = Vec::with_capacity(n);
        let mut price_sell = Vec::with_capacity(n);
        let mut load_kwh = Vec::with_capacity(n);
        let mut pv_kwh = Vec::with_capacity(n);

        for (entry, solar, load) in izip!(
            &self.price_forecast[..n],
            &self.solar_forecast[..n],
            &self.load_forecast[..n]
        ) {
            let (buy, sell) = entry.resolve(self.import_price, self.export_price);
            price_buy.push(buy);
            price_sell.push(sell);
            load_kwh.push(load.kw * TICK_HOURS);
            pv_kwh.push(solar.kw * TICK_HOURS);
        }

        load_kwh[0] = self.load_power_kw * TICK_HOURS;
        pv_kwh[0] = self.solar_power_kw * TICK_HOURS;

        Ok(ResolvedHorizon {
            price_buy,
            price_sell,
            load_kwh,
            pv_kwh,
        })
    }
}

/// Forecast series reduced to aligned per-tick vectors of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHorizon {
    /// Import price per tick, currency subunits per kWh.
    pub price_buy: Vec<f64>,
    /// Export price per tick.
    pub price_sell: Vec<f64>,
    /// Household consumption per tick, kWh.
    pub load_kwh: Vec<f64>,
    /// Solar production per tick, kWh.
    pub pv_kwh: Vec<f64>,
}

impl ResolvedHorizon {
    pub fn len(&self) -> usize {
        self.price_buy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.price_buy.is_empty()
    }

    /// Net energy balance per tick in kWh. Positive means the house draws
    /// from the grid, negative means surplus production.
    pub fn net_balance_kwh(&self) -> Vec<f64> {
        self.load_kwh
            .iter()
            .zip(&self.pv_kwh)
            .map(|(load, pv)| load - pv)
            .collect()
    }
}
