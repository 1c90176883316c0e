use anyhow::Result;
use home_battery_scheduler::{config, executor, sim, telemetry};

use config::Config;
use executor::LogSink;
use sim::{replay_day, ReplaySummary, SyntheticDay, SyntheticDayConfig};
use telemetry::init_tracing;
use tracing::info;

const INITIAL_SOC_PERCENT: f64 = 50.0;

fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    info!(strategy = %cfg.strategy, "starting home battery scheduler dry run");

    let day = SyntheticDay::generate(&SyntheticDayConfig::default());
    let engine = cfg.engine();

    let steps = replay_day(
        &engine,
        &day,
        cfg.battery,
        INITIAL_SOC_PERCENT,
        cfg.optimizer.acquisition_cost,
        &mut LogSink,
    );

    let summary = ReplaySummary::from_steps(&steps);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
