//! Linear-programming strategy
//!
//! Solves the whole horizon as one continuous linear program and keeps only
//! the first tick of the result. The formulation tracks, per tick:
//! - grid import (unbounded above, never negative)
//! - battery charging, bounded by the charge rate
//! - discharge split into a home share (bounded by the net load, anything
//!   beyond that would be export) and a grid share (bounded by the inverter
//!   capacity left over)
//! - the stored energy level, linked tick to tick through the one-way
//!   efficiencies
//!
//! Stored energy left at the end of the horizon is credited at the
//! acquisition cost so the solver does not dump the battery just because
//! the plan ends.

use good_lp::{
    constraint, default_solver, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};

use crate::domain::{Decision, TICK_HOURS};

use super::context::SchedulingContext;
use super::{map_target_charge, DecisionStrategy, SolveError};

/// Floor for the terminal energy credit. Keeps end-of-horizon energy worth
/// more than nothing even when no acquisition cost is known.
const MIN_TERMINAL_VALUE: f64 = 0.001;

#[derive(Debug, Default)]
pub struct LinearProgrammingScheduler;

struct LpPlan {
    /// Charge fraction the plan reaches after the first tick.
    target_charge: f64,
    /// Objective value of the solved program.
    projected_cost: f64,
    /// First-tick discharge routed into the house, kWh.
    home_discharge_kwh: f64,
    /// First-tick discharge routed into the grid, kWh.
    grid_discharge_kwh: f64,
}

impl LinearProgrammingScheduler {
    pub fn new() -> Self {
        Self
    }

    fn solve(&self, context: &SchedulingContext) -> Result<LpPlan, SolveError> {
        let horizon = context.resolve_horizon()?;
        let battery = context.battery();
        let n = horizon.len();

        let energy = horizon.net_balance_kwh();
        let capacity = battery.capacity_kwh;
        let charge_cap_kwh = battery.charge_power_limit_kw * TICK_HOURS;
        let discharge_cap_kwh = battery.discharge_power_limit_kw * TICK_HOURS;
        let initial_level = capacity * battery.charge;
        let inverse_discharge = 1.0 / battery.discharge_efficiency;
        let terminal_value = context.acquisition_cost.max(MIN_TERMINAL_VALUE);

        let mut vars = ProblemVariables::new();
        let charge: Vec<Variable> = vars.add_vector(variable().min(0.0).max(charge_cap_kwh), n);

        // Discharge variables are negative by convention. The home share is
        // capped by the net load of its tick; the grid share gets whatever
        // inverter capacity is left.
        let mut discharge_home: Vec<Variable> = Vec::with_capacity(n);
        let mut discharge_grid: Vec<Variable> = Vec::with_capacity(n);
        for &net in &energy {
            let home_bound = net.max(0.0);
            let grid_bound = (discharge_cap_kwh - home_bound).max(0.0);
            discharge_home.push(vars.add(variable().min(-home_bound).max(0.0)));
            discharge_grid.push(vars.add(variable().min(-grid_bound).max(0.0)));
        }

        let level: Vec<Variable> = vars.add_vector(variable().min(0.0).max(capacity), n + 1);
        let grid: Vec<Variable> = vars.add_vector(variable().min(0.0), n);

        // Import is charged the buy/sell spread, charging pays the export
        // opportunity plus a small wear term, and each discharge share is
        // valued at the price it displaces.
        let running_cost = (0..n)
            .map(|i| {
                grid[i] * (horizon.price_buy[i] - horizon.price_sell[i])
                    + charge[i] * (horizon.price_sell[i] + horizon.price_buy[i] / 1000.0)
                    + discharge_home[i] * horizon.price_buy[i]
                    + discharge_grid[i] * horizon.price_sell[i]
            })
            .sum::<Expression>();
        let objective = running_cost - level[n] * terminal_value;

        let mut model = vars.minimise(objective).using(default_solver);
        model = model.with(constraint!(level[0] == initial_level));
        for i in 0..n {
            let supplied = grid[i] - charge[i] - discharge_home[i] - discharge_grid[i];
            model = model.with(constraint!(supplied >= energy[i]));

            let stored = charge[i] * battery.charge_efficiency
                + discharge_home[i] * inverse_discharge
                + discharge_grid[i] * inverse_discharge;
            model = model.with(constraint!(level[i] + stored == level[i + 1]));
        }

        let solution = model.solve().map_err(|err| match err {
            ResolutionError::Infeasible => SolveError::Infeasible("no feasible dispatch".into()),
            ResolutionError::Unbounded => SolveError::Infeasible("objective unbounded".into()),
            other => SolveError::Solver(other.to_string()),
        })?;

        let mut projected_cost = 0.0;
        for i in 0..n {
            projected_cost +=
                solution.value(grid[i]) * (horizon.price_buy[i] - horizon.price_sell[i]);
            projected_cost += solution.value(charge[i])
                * (horizon.price_sell[i] + horizon.price_buy[i] / 1000.0);
            projected_cost += solution.value(discharge_home[i]) * horizon.price_buy[i];
            projected_cost += solution.value(discharge_grid[i]) * horizon.price_sell[i];
        }
        projected_cost -= solution.value(level[n]) * terminal_value;

        Ok(LpPlan {
            target_charge: solution.value(level[1]) / capacity,
            projected_cost,
            home_discharge_kwh: solution.value(discharge_home[0]).abs(),
            grid_discharge_kwh: solution.value(discharge_grid[0]).abs(),
        })
    }
}

impl DecisionStrategy for LinearProgrammingScheduler {
    fn name(&self) -> &'static str {
        "lp"
    }

    fn decide(&self, context: &SchedulingContext) -> Decision {
        let battery = context.battery();
        match self.solve(context) {
            Ok(plan) => {
                let export = plan.grid_discharge_kwh > plan.home_discharge_kwh;
                map_target_charge(&battery, plan.target_charge, export, "LP")
                    .with_target_soc(plan.target_charge * 100.0)
                    .with_projected_cost(plan.projected_cost)
            }
            Err(SolveError::ForecastTooShort) => Decision::idle("forecast too short"),
            Err(err) => {
                tracing::warn!(error = %err, "linear solve failed");
                Decision::idle(format!("solver error: {err}"))
            }
        }
    }
}
