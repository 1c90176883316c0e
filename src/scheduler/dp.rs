//! Dynamic-programming strategy
//!
//! Plans the day by compressing the horizon into price/balance blocks and
//! searching over a small set of candidate target charges per block with a
//! memoized backward recursion. The winning block plan is then refined back
//! to tick resolution, and only the very first tick is turned into a
//! decision. Every call replans from scratch, so forecast updates between
//! ticks are picked up for free.
//!
//! Candidate targets per block:
//! - match the block balance exactly (clamped to the physical swing)
//! - hold the current level
//! - when the block is cheaper than the next one, pre-position for the
//!   next block's exact match
//! - when the block is cheaper than any of the next three, charge flat out
//! - near the end of the horizon, optionally drain

use std::collections::HashMap;

use crate::domain::{BatteryModel, Decision, TICK_HOURS};

use super::context::SchedulingContext;
use super::period::{compress, PeriodSummary};
use super::{map_target_charge, DecisionStrategy, SolveError};

/// Cost of a branch with no candidates. High enough that any real plan wins.
const DEAD_END_COST: f64 = 999_999.0;

/// Charge fractions are rounded to five decimals before memo lookups so
/// float noise cannot split equivalent states.
const CHARGE_KEY_SCALE: f64 = 1e5;

fn round_charge(x: f64) -> f64 {
    (x * CHARGE_KEY_SCALE).round() / CHARGE_KEY_SCALE
}

fn charge_key(x: f64) -> i64 {
    (x * CHARGE_KEY_SCALE).round() as i64
}

#[derive(Debug, Default)]
pub struct DynamicProgrammingScheduler {
    /// Let the solver drain the battery over the last few blocks instead of
    /// holding reserve for a tomorrow it cannot see. Off by default, since a
    /// live controller replans continuously and an empty battery at midnight
    /// is rarely what anyone wants.
    pub allow_end_optimization: bool,
}

impl DynamicProgrammingScheduler {
    pub fn new(allow_end_optimization: bool) -> Self {
        Self {
            allow_end_optimization,
        }
    }

    fn plan(&self, context: &SchedulingContext) -> Result<DayPlan, SolveError> {
        let horizon = context.resolve_horizon()?;
        let battery = context.battery();
        let blocks = compress(&horizon, &battery);
        let tick_balances = horizon.net_balance_kwh();

        let mut optimizer = PeriodOptimizer::new(&blocks, &battery, self.allow_end_optimization);
        let (cost, targets) = optimizer.solve(battery.charge);

        Ok(DayPlan {
            battery,
            blocks,
            tick_balances,
            targets,
            cost,
        })
    }

    /// Per-tick charge trajectory over the whole horizon. Useful for replay
    /// analysis; live control only ever consumes the first tick.
    pub fn fine_grained_trajectory(
        &self,
        context: &SchedulingContext,
    ) -> Result<Vec<f64>, SolveError> {
        Ok(self.plan(context)?.trajectory())
    }
}

impl DecisionStrategy for DynamicProgrammingScheduler {
    fn name(&self) -> &'static str {
        "dp"
    }

    fn decide(&self, context: &SchedulingContext) -> Decision {
        let battery = context.battery();
        match self.plan(context) {
            Ok(plan) => {
                tracing::debug!(
                    cost = plan.cost,
                    blocks = plan.blocks.len(),
                    "day plan solved"
                );
                map_target_charge(&battery, plan.first_tick_target(), false, "DP")
            }
            Err(SolveError::ForecastTooShort) => Decision::idle("forecast too short"),
            Err(err) => {
                tracing::warn!(error = %err, "dynamic programming solve failed");
                Decision::idle(format!("solver error: {err}"))
            }
        }
    }
}

/// A solved day: one target charge per block, plus everything needed to
/// refine the plan back to tick resolution.
struct DayPlan {
    battery: BatteryModel,
    blocks: Vec<PeriodSummary>,
    /// Raw (unclamped) net balance per tick, kWh.
    tick_balances: Vec<f64>,
    /// Charge fraction to reach by the end of each block.
    targets: Vec<f64>,
    /// Projected grid cost of the whole plan.
    cost: f64,
}

impl DayPlan {
    /// Charge level to aim for by the end of the current tick.
    fn first_tick_target(&self) -> f64 {
        let initial = self.battery.charge;
        let Some(&target) = self.targets.first() else {
            return initial;
        };
        let block = &self.blocks[0];
        first_tick_target(
            &self.battery,
            initial,
            target,
            block.balance_kwh,
            block.ticks,
            self.tick_balances[0],
            initial,
        )
    }

    fn trajectory(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.tick_balances.len());
        let mut charge = self.battery.charge;
        let mut tick = 0;
        for (block, &target) in self.blocks.iter().zip(&self.targets) {
            let ticks = &self.tick_balances[tick..tick + block.ticks];
            out.extend(block_trajectory(
                &self.battery,
                charge,
                target,
                block.balance_kwh,
                ticks,
            ));
            charge = target;
            tick += block.ticks;
        }
        out
    }
}

struct PeriodOptimizer<'a> {
    battery: &'a BatteryModel,
    blocks: &'a [PeriodSummary],
    /// Physically possible (charge, discharge) swing per block; discharge
    /// entries are negative.
    max_swings: Vec<(f64, f64)>,
    /// Charge delta that would exactly absorb or cover each block balance,
    /// clamped to the swing.
    balance_matches: Vec<f64>,
    is_low_price: Vec<bool>,
    is_wait_condition: Vec<bool>,
    allow_end_optimization: bool,
    /// (rounded charge, block index) to (best cost from here, best target).
    memo: HashMap<(i64, usize), (f64, f64)>,
}

impl<'a> PeriodOptimizer<'a> {
    fn new(
        blocks: &'a [PeriodSummary],
        battery: &'a BatteryModel,
        allow_end_optimization: bool,
    ) -> Self {
        let max_swings: Vec<(f64, f64)> = blocks
            .iter()
            .map(|block| {
                (
                    battery.max_charge_delta(block.hours()),
                    battery.max_discharge_delta(block.hours()),
                )
            })
            .collect();
        let balance_matches = blocks
            .iter()
            .zip(&max_swings)
            .map(|(block, &(max_charge, max_discharge))| {
                let change = battery.energy_to_charge_delta(-block.balance_kwh);
                if change > 0.0 {
                    change.min(max_charge)
                } else {
                    change.max(max_discharge)
                }
            })
            .collect();

        Self {
            battery,
            blocks,
            max_swings,
            balance_matches,
            is_low_price: low_price_flags(blocks, 3),
            is_wait_condition: low_price_flags(blocks, 1),
            allow_end_optimization,
            memo: HashMap::new(),
        }
    }

    /// Best total cost from the initial charge, and the target per block.
    fn solve(&mut self, initial_charge: f64) -> (f64, Vec<f64>) {
        let cost = self.best_cost(initial_charge, 0);
        let mut targets = Vec::with_capacity(self.blocks.len());
        let mut charge = round_charge(initial_charge);
        for idx in 0..self.blocks.len() {
            let Some(&(_, target)) = self.memo.get(&(charge_key(charge), idx)) else {
                break;
            };
            targets.push(target);
            charge = target;
        }
        (cost, targets)
    }

    fn best_cost(&mut self, charge: f64, idx: usize) -> f64 {
        if idx == self.blocks.len() {
            return 0.0;
        }
        let charge = round_charge(charge);
        let key = (charge_key(charge), idx);
        if let Some(&(cost, _)) = self.memo.get(&key) {
            return cost;
        }

        let mut best: Option<(f64, f64)> = None;
        for target in self.candidates(charge, idx) {
            let cost = self.block_cost(charge, target, idx) + self.best_cost(target, idx + 1);
            let better = match best {
                Some((best_cost, _)) => cost < best_cost,
                None => true,
            };
            if better {
                best = Some((cost, target));
            }
        }

        let (cost, target) = best.unwrap_or((DEAD_END_COST, charge));
        self.memo.insert(key, (cost, target));
        cost
    }

    fn candidates(&self, current: f64, idx: usize) -> Vec<f64> {
        let (max_charge, max_discharge) = self.max_swings[idx];
        let balance_match = self.balance_matches[idx];
        let mut range = vec![current + balance_match, current];

        if balance_match <= 0.0
            && self.is_wait_condition[idx]
            && idx + 1 < self.blocks.len()
        {
            // Aim at the absolute level whose swing mirrors the next
            // block's exact match, so a cheap block can pre-position the
            // battery for an expensive one.
            let target = -self.balance_matches[idx + 1];
            let mut change = target - current;
            change = if change > 0.0 {
                change.min(max_charge)
            } else {
                change.max(max_discharge)
            };
            range.push(current + change);
        }

        if self.is_low_price[idx] {
            range.push(current + max_charge);
        }

        if self.allow_end_optimization && self.blocks.len() - idx < 4 {
            range.push(current + max_discharge);
            range.push(current);
        }

        let mut range: Vec<f64> = range
            .into_iter()
            .map(|x| round_charge(x.clamp(0.0, 1.0)))
            .collect();
        range.sort_by(|a, b| a.total_cmp(b));
        range.dedup();
        range
    }

    /// Grid cost of moving from one charge level to another over a block.
    /// Negative when the house exports on balance.
    fn block_cost(&self, current: f64, target: f64, idx: usize) -> f64 {
        let block = &self.blocks[idx];
        let battery_energy = self.battery.charge_delta_to_energy(target - current);
        let total = block.balance_kwh + battery_energy;
        let price = if total < 0.0 {
            block.price_sell
        } else {
            block.price_buy
        };
        total * price / 1000.0
    }
}

/// Marks blocks whose buy price undercuts at least one of the next `span`
/// blocks. Horizons with `span` blocks or fewer get no flags at all.
fn low_price_flags(blocks: &[PeriodSummary], span: usize) -> Vec<bool> {
    let n = blocks.len();
    let mut flags = vec![false; n];
    if n > span {
        for step in 1..=span {
            for j in 0..n - step {
                if blocks[j].price_buy < blocks[j + step].price_buy {
                    flags[j] = true;
                }
            }
        }
    }
    flags
}

/// Spread one block's charge move over its ticks.
///
/// When the battery works against the block balance (charging from surplus
/// or covering consumption), the move follows the per-tick balances
/// proportionally. Otherwise it is distributed evenly.
fn block_trajectory(
    battery: &BatteryModel,
    initial: f64,
    target: f64,
    block_balance: f64,
    tick_balances: &[f64],
) -> Vec<f64> {
    let change = target - initial;
    if change == 0.0 {
        return vec![initial; tick_balances.len()];
    }
    if block_balance * change < 0.0 {
        return synchronized_trajectory(battery, initial, target, block_balance, tick_balances);
    }
    distribute_evenly(tick_balances.len(), initial, target)
}

fn synchronized_trajectory(
    battery: &BatteryModel,
    initial: f64,
    target: f64,
    block_balance: f64,
    tick_balances: &[f64],
) -> Vec<f64> {
    if block_balance == 0.0 {
        return vec![initial; tick_balances.len()];
    }
    let ratio = battery.charge_delta_to_energy(target - initial) / block_balance;
    let lower = initial.min(target);
    let upper = initial.max(target);

    let mut out = Vec::with_capacity(tick_balances.len());
    let mut charge = initial;
    for &tick_balance in tick_balances {
        charge += proportional_tick_step(battery, tick_balance, ratio);
        out.push(charge.clamp(lower, upper));
    }
    out
}

fn proportional_tick_step(battery: &BatteryModel, tick_balance: f64, ratio: f64) -> f64 {
    let energy = battery.clamp_interval_energy(tick_balance * ratio, TICK_HOURS);
    battery.energy_to_charge_delta(energy)
}

fn distribute_evenly(ticks: usize, initial: f64, target: f64) -> Vec<f64> {
    let step = (target - initial) / ticks as f64;
    (1..=ticks).map(|k| initial + step * k as f64).collect()
}

/// Charge level after the first tick of the current block.
///
/// Holds when the tick balance opposes the block balance (a surplus tick
/// inside a consumption block, or vice versa); otherwise takes one
/// proportional or even step toward the block target.
fn first_tick_target(
    battery: &BatteryModel,
    initial: f64,
    target: f64,
    block_balance: f64,
    block_ticks: usize,
    tick_balance: f64,
    current: f64,
) -> f64 {
    if tick_balance != 0.0 && tick_balance * block_balance < 0.0 {
        return current;
    }
    let change = target - initial;
    if change == 0.0 {
        return current;
    }
    if block_balance * change < 0.0 {
        if block_balance == 0.0 {
            return current;
        }
        let ratio = battery.charge_delta_to_energy(change) / block_balance;
        let next = current + proportional_tick_step(battery, tick_balance, ratio);
        next.clamp(initial.min(target), initial.max(target))
    } else {
        current + (target - current) / block_ticks as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatteryAction, BatteryLimits, PowerEntry, PriceEntry};
    use approx::assert_relative_eq;
    use chrono::{Duration, Utc};

    // sqrt(0.9025) is exactly 0.95, which keeps the arithmetic here legible
    fn limits() -> BatteryLimits {
        BatteryLimits {
            capacity_kwh: 13.5,
            max_charge_kw: 5.0,
            max_discharge_kw: 5.0,
            round_trip_efficiency: 0.9025,
        }
    }

    fn context(
        soc: f64,
        buy_sell: &[(f64, f64)],
        load_kw: &[f64],
        solar_kw: &[f64],
    ) -> SchedulingContext {
        let start = Utc::now();
        SchedulingContext {
            state_of_charge: soc,
            solar_power_kw: solar_kw[0],
            load_power_kw: load_kw[0],
            import_price: buy_sell[0].0,
            export_price: buy_sell[0].1,
            price_forecast: buy_sell
                .iter()
                .enumerate()
                .map(|(i, &(buy, sell))| {
                    PriceEntry::paired(start + Duration::minutes(5 * i as i64), buy, sell)
                })
                .collect(),
            solar_forecast: solar_kw
                .iter()
                .enumerate()
                .map(|(i, &kw)| PowerEntry::new(start + Duration::minutes(5 * i as i64), kw))
                .collect(),
            load_forecast: load_kw
                .iter()
                .enumerate()
                .map(|(i, &kw)| PowerEntry::new(start + Duration::minutes(5 * i as i64), kw))
                .collect(),
            limits: limits(),
            ..Default::default()
        }
    }

    fn repeat_blocks(spec: &[((f64, f64), f64, f64, usize)]) -> (Vec<(f64, f64)>, Vec<f64>, Vec<f64>) {
        let mut prices = Vec::new();
        let mut load = Vec::new();
        let mut solar = Vec::new();
        for &(price, load_kw, solar_kw, ticks) in spec {
            for _ in 0..ticks {
                prices.push(price);
                load.push(load_kw);
                solar.push(solar_kw);
            }
        }
        (prices, load, solar)
    }

    #[test]
    fn test_empty_forecast_idles() {
        let scheduler = DynamicProgrammingScheduler::default();
        let decision = scheduler.decide(&SchedulingContext::default());
        assert_eq!(decision.action, BatteryAction::Idle);
        assert!(decision.reason.contains("forecast too short"));
    }

    #[test]
    fn test_flat_day_is_idle() {
        let (prices, load, solar) =
            repeat_blocks(&[((10.0, 8.0), 0.0, 0.0, 24)]);
        let scheduler = DynamicProgrammingScheduler::default();
        let decision = scheduler.decide(&context(50.0, &prices, &load, &solar));
        assert_eq!(decision.action, BatteryAction::Idle);
        assert!(decision.reason.contains("optimal to idle"));
    }

    #[test]
    fn test_charges_ahead_of_an_expensive_block() {
        // One cheap hour, one expensive hour with triple load, one cheap
        // hour. The cheap block must pre-position the battery so the peak
        // block can be covered without buying at 50.
        let (prices, load, solar) = repeat_blocks(&[
            ((10.0, 8.0), 1.0, 0.0, 12),
            ((50.0, 40.0), 3.0, 0.0, 12),
            ((10.0, 8.0), 1.0, 0.0, 12),
        ]);
        let scheduler = DynamicProgrammingScheduler::default();
        let decision = scheduler.decide(&context(20.0, &prices, &load, &solar));
        assert_eq!(decision.action, BatteryAction::ChargeGrid, "{}", decision.reason);
        assert!(decision.power_limit_kw > 0.0);
        assert!(decision.power_limit_kw <= limits().max_charge_kw);
    }

    #[test]
    fn test_absorbs_solar_surplus_ahead_of_consumption() {
        // An hour of free sun followed by an expensive loaded hour. The
        // solver should soak up the surplus instead of exporting at 8.
        let (prices, load, solar) = repeat_blocks(&[
            ((10.0, 8.0), 0.0, 6.0, 12),
            ((40.0, 32.0), 2.0, 0.0, 12),
        ]);
        let scheduler = DynamicProgrammingScheduler::new(false);
        let decision = scheduler.decide(&context(0.0, &prices, &load, &solar));
        assert_eq!(decision.action, BatteryAction::ChargeGrid, "{}", decision.reason);
        assert!(decision.power_limit_kw > 0.0);
    }

    #[test]
    fn test_end_optimization_drains_the_tail() {
        // Balances are all zero and prices fall, so without end
        // optimization there is nothing to do. With it, selling the stored
        // energy beats keeping it.
        let (prices, load, solar) = repeat_blocks(&[
            ((40.0, 32.0), 0.0, 0.0, 12),
            ((30.0, 24.0), 0.0, 0.0, 12),
        ]);
        let ctx = context(80.0, &prices, &load, &solar);

        let idle = DynamicProgrammingScheduler::new(false).decide(&ctx);
        assert_eq!(idle.action, BatteryAction::Idle);

        let drain = DynamicProgrammingScheduler::new(true).decide(&ctx);
        assert_eq!(drain.action, BatteryAction::DischargeHome, "{}", drain.reason);
        assert!(drain.power_limit_kw > 0.0);
        assert!(drain.power_limit_kw <= limits().max_discharge_kw);
    }

    #[test]
    fn test_trajectory_covers_every_tick() {
        let (prices, load, solar) = repeat_blocks(&[
            ((10.0, 8.0), 1.0, 0.0, 12),
            ((50.0, 40.0), 3.0, 0.0, 12),
            ((10.0, 8.0), 1.0, 0.0, 12),
        ]);
        let scheduler = DynamicProgrammingScheduler::default();
        let trajectory = scheduler
            .fine_grained_trajectory(&context(20.0, &prices, &load, &solar))
            .unwrap();
        assert_eq!(trajectory.len(), 36);
        for charge in &trajectory {
            assert!((0.0..=1.0).contains(charge));
        }
    }

    #[test]
    fn test_flat_plan_gives_flat_trajectory() {
        let (prices, load, solar) = repeat_blocks(&[((10.0, 8.0), 0.0, 0.0, 12)]);
        let scheduler = DynamicProgrammingScheduler::default();
        let trajectory = scheduler
            .fine_grained_trajectory(&context(50.0, &prices, &load, &solar))
            .unwrap();
        for charge in &trajectory {
            assert_relative_eq!(*charge, 0.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_proportional_charging_follows_the_surplus() {
        // Charging against a solar surplus tracks the per-tick balances and
        // never overshoots the block endpoints.
        let (prices, load, solar) = repeat_blocks(&[
            ((10.0, 8.0), 0.0, 6.0, 12),
            ((40.0, 32.0), 2.0, 0.0, 12),
        ]);
        let scheduler = DynamicProgrammingScheduler::default();
        let trajectory = scheduler
            .fine_grained_trajectory(&context(0.0, &prices, &load, &solar))
            .unwrap();
        let first_block = &trajectory[..12];
        for pair in first_block.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-12);
        }
        assert!(first_block[11] > 0.15);
    }

    #[test]
    fn test_low_price_flags_respect_the_span_guard() {
        let block = |price| PeriodSummary {
            balance_kwh: 0.0,
            price_buy: price,
            price_sell: price,
            ticks: 1,
        };
        let blocks = vec![block(10.0), block(20.0), block(30.0)];

        // Three blocks with a span of one: ascending prices flag all but
        // the last.
        assert_eq!(low_price_flags(&blocks, 1), vec![true, true, false]);
        // Span equal to the block count disables the scan entirely.
        assert_eq!(low_price_flags(&blocks, 3), vec![false, false, false]);
    }

    #[test]
    fn test_candidates_stay_within_charge_bounds() {
        let (prices, load, solar) = repeat_blocks(&[
            ((10.0, 8.0), 3.0, 0.0, 12),
            ((50.0, 40.0), 3.0, 0.0, 12),
        ]);
        let ctx = context(2.0, &prices, &load, &solar);
        let horizon = ctx.resolve_horizon().unwrap();
        let battery = ctx.battery();
        let blocks = compress(&horizon, &battery);
        let optimizer = PeriodOptimizer::new(&blocks, &battery, true);

        for idx in 0..blocks.len() {
            let candidates = optimizer.candidates(battery.charge, idx);
            assert!(!candidates.is_empty());
            for candidate in &candidates {
                assert!((0.0..=1.0).contains(candidate));
            }
            // The hold candidate is always offered.
            assert!(candidates
                .iter()
                .any(|c| (c - round_charge(battery.charge)).abs() < 1e-9));
        }
    }
}
