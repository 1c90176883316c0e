//! Horizon compression into price/balance blocks
//!
//! The dynamic program would be hopeless over 288 raw ticks, so the horizon
//! is first cut into blocks at every point where the buy price, the sell
//! price, or the sign of the net balance changes. Within a block prices are
//! constant and energy flows one way, which lets the optimizer treat it as a
//! single step.

use crate::domain::{BatteryModel, TICK_HOURS};

use super::context::ResolvedHorizon;

/// One compressed block of consecutive ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSummary {
    /// Net energy over the block in kWh, each tick clamped to what the
    /// battery could physically absorb or supply in 5 minutes before
    /// summing. Positive draws from the grid.
    pub balance_kwh: f64,
    /// Import price for the block, currency subunits per kWh.
    pub price_buy: f64,
    /// Export price for the block.
    pub price_sell: f64,
    /// Number of 5-minute ticks the block spans.
    pub ticks: usize,
}

impl PeriodSummary {
    pub fn hours(&self) -> f64 {
        self.ticks as f64 * TICK_HOURS
    }
}

fn balance_sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

fn summarize(
    horizon: &ResolvedHorizon,
    battery: &BatteryModel,
    balance: &[f64],
    start: usize,
    end: usize,
) -> PeriodSummary {
    let clamped: f64 = balance[start..end]
        .iter()
        .map(|&kwh| battery.clamp_interval_energy(kwh, TICK_HOURS))
        .sum();
    PeriodSummary {
        balance_kwh: clamped,
        price_buy: horizon.price_buy[start],
        price_sell: horizon.price_sell[start],
        ticks: end - start,
    }
}

/// Compress a resolved horizon into blocks.
///
/// Division points are placed wherever either price changes or the raw net
/// balance flips sign (zero counts as its own sign). Block prices are taken
/// from the first tick of the block; the tick counts of all blocks sum to
/// the horizon length.
pub fn compress(horizon: &ResolvedHorizon, battery: &BatteryModel) -> Vec<PeriodSummary> {
    let balance = horizon.net_balance_kwh();
    let n = balance.len();
    let mut blocks = Vec::new();
    if n == 0 {
        return blocks;
    }

    let mut start = 0;
    for i in 1..n {
        let cut = horizon.price_buy[i] != horizon.price_buy[i - 1]
            || horizon.price_sell[i] != horizon.price_sell[i - 1]
            || balance_sign(balance[i]) != balance_sign(balance[i - 1]);
        if cut {
            blocks.push(summarize(horizon, battery, &balance, start, i));
            start = i;
        }
    }
    blocks.push(summarize(horizon, battery, &balance, start, n));
    blocks
}
