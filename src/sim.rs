//! Synthetic day generation and closed-loop replay.
//!
//! Generates a plausible residential day at 5-minute resolution (duck-curve
//! prices with sinusoidal solar and noisy time-of-day load) and replays an
//! engine over it tick by tick, carrying the state of charge forward through
//! the battery model. The binary uses it for dry runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::domain::{
    BatteryAction, BatteryLimits, BatteryModel, Decision, PowerEntry, PriceEntry, HORIZON_TICKS,
    TICK_HOURS,
};
use crate::executor::DecisionSink;
use crate::scheduler::{SchedulingContext, SchedulingEngine};

/// Export compensation as a fraction of the import price.
const EXPORT_RATIO: f64 = 0.8;
/// Solar window, hours of day.
const SUNRISE_HOUR: f64 = 6.0;
const SUNSET_HOUR: f64 = 20.0;

/// Shape of the generated day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticDayConfig {
    /// First tick timestamp.
    pub start: DateTime<Utc>,
    /// Seed for the load noise.
    pub seed: u64,
    /// Flat component of the house load, kW.
    pub base_load_kw: f64,
    /// Standard deviation of the load noise, kW.
    pub load_noise_std: f64,
    /// Solar production at solar noon, kW.
    pub pv_peak_kw: f64,
}

impl Default for SyntheticDayConfig {
    fn default() -> Self {
        Self {
            start: Utc::now(),
            seed: 42,
            base_load_kw: 0.8,
            load_noise_std: 0.05,
            pv_peak_kw: 4.0,
        }
    }
}

/// A full day of aligned price, solar and load forecasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticDay {
    pub prices: Vec<PriceEntry>,
    pub solar: Vec<PowerEntry>,
    pub load: Vec<PowerEntry>,
}

/// Import price over the day, c/kWh. Cheap night, morning ramp, a midday
/// solar glut below the night level, an evening peak above the usual peak
/// ceiling, then easing off.
fn import_price(hour: f64) -> f64 {
    if hour < 6.0 {
        12.0
    } else if hour < 9.0 {
        28.0
    } else if hour < 16.0 {
        8.0
    } else if hour < 21.0 {
        42.0
    } else {
        18.0
    }
}

/// Load multiplier over the day: quiet night, breakfast bump, daytime base,
/// a cooking-hour evening peak.
fn load_multiplier(hour: f64) -> f64 {
    if hour < 6.0 {
        0.6
    } else if hour < 9.0 {
        1.8
    } else if hour < 16.0 {
        1.0
    } else if hour < 21.0 {
        2.4
    } else {
        1.4
    }
}

/// Solar output as a fraction of peak: half-sine between sunrise and sunset.
fn pv_fraction(hour: f64) -> f64 {
    if hour <= SUNRISE_HOUR || hour >= SUNSET_HOUR {
        return 0.0;
    }
    let phase = (hour - SUNRISE_HOUR) / (SUNSET_HOUR - SUNRISE_HOUR);
    (phase * std::f64::consts::PI).sin()
}

impl SyntheticDay {
    pub fn generate(config: &SyntheticDayConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let load_noise = Normal::new(0.0, config.load_noise_std.max(0.0)).ok();

        let mut prices = Vec::with_capacity(HORIZON_TICKS);
        let mut solar = Vec::with_capacity(HORIZON_TICKS);
        let mut load = Vec::with_capacity(HORIZON_TICKS);

        for tick in 0..HORIZON_TICKS {
            let start = config.start + Duration::minutes(5 * tick as i64);
            let hour = tick as f64 * TICK_HOURS;

            let buy = import_price(hour);
            prices.push(PriceEntry::paired(start, buy, buy * EXPORT_RATIO));

            solar.push(PowerEntry::new(start, config.pv_peak_kw * pv_fraction(hour)));

            let noise_kw = load_noise.map_or(0.0, |dist| dist.sample(&mut rng));
            let load_kw = (config.base_load_kw * load_multiplier(hour) + noise_kw).max(0.0);
            load.push(PowerEntry::new(start, load_kw));
        }

        Self {
            prices,
            solar,
            load,
        }
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Context as the engine would see it at `tick` (which must be within
    /// the day): live values from that tick, forecasts from there onward.
    pub fn context_at(
        &self,
        tick: usize,
        soc_percent: f64,
        limits: BatteryLimits,
        acquisition_cost: f64,
    ) -> SchedulingContext {
        let (import_price, export_price) = self.prices[tick].resolve(0.0, 0.0);
        SchedulingContext {
            state_of_charge: soc_percent,
            solar_power_kw: self.solar[tick].kw,
            load_power_kw: self.load[tick].kw,
            import_price,
            export_price,
            price_forecast: self.prices[tick..].to_vec(),
            solar_forecast: self.solar[tick..].to_vec(),
            load_forecast: self.load[tick..].to_vec(),
            limits,
            acquisition_cost,
        }
    }
}

/// One replayed tick: the decision taken and the state of charge after it.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayStep {
    pub tick: usize,
    pub soc_percent: f64,
    pub decision: Decision,
}

/// Advance the battery by one tick of the decided action at its power limit.
pub fn apply_decision(battery: &BatteryModel, decision: &Decision) -> BatteryModel {
    let signed_kw = match decision.action {
        BatteryAction::ChargeGrid | BatteryAction::ChargeSolar => decision.power_limit_kw,
        BatteryAction::DischargeHome | BatteryAction::DischargeGrid => -decision.power_limit_kw,
        BatteryAction::Idle | BatteryAction::Preserve => 0.0,
    };
    let delta = battery.energy_to_charge_delta(signed_kw * TICK_HOURS);
    battery.with_charge(battery.charge + delta)
}

/// Run the engine over the whole day, feeding each decision to the sink and
/// carrying the resulting state of charge into the next tick.
pub fn replay_day(
    engine: &SchedulingEngine,
    day: &SyntheticDay,
    limits: BatteryLimits,
    initial_soc_percent: f64,
    acquisition_cost: f64,
    sink: &mut dyn DecisionSink,
) -> Vec<ReplayStep> {
    let mut soc = initial_soc_percent;
    let mut steps = Vec::with_capacity(day.len());

    for tick in 0..day.len() {
        let context = day.context_at(tick, soc, limits, acquisition_cost);
        let decision = engine.decide(&context);
        sink.apply(&decision);

        soc = apply_decision(&limits.model(soc), &decision).soc_percent();
        steps.push(ReplayStep {
            tick,
            soc_percent: soc,
            decision,
        });
    }

    steps
}

/// Compact end-of-run report for logs and the binary's stdout.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub ticks: usize,
    pub final_soc_percent: f64,
    pub actions: BTreeMap<String, usize>,
}

impl ReplaySummary {
    pub fn from_steps(steps: &[ReplayStep]) -> Self {
        let mut actions = BTreeMap::new();
        for step in steps {
            *actions.entry(step.decision.action.to_string()).or_insert(0) += 1;
        }
        Self {
            ticks: steps.len(),
            final_soc_percent: steps.last().map_or(0.0, |step| step.soc_percent),
            actions,
        }
    }
}
