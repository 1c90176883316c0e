use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::domain::BatteryLimits;
use crate::scheduler::{
    DecisionStrategy, DynamicProgrammingScheduler, LinearProgrammingScheduler,
    RuleCascadeScheduler, SchedulingEngine, StrategyKind,
};

/// Full engine configuration.
///
/// Every section has workable defaults; a missing `config/default.toml` is
/// not an error. Environment variables prefixed `HBS__` override file values
/// (`HBS__BATTERY__CAPACITY_KWH=13.5`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub strategy: StrategyKind,
    pub battery: BatteryLimits,
    pub rules: RuleCascadeScheduler,
    pub optimizer: OptimizerConfig,
}

/// Knobs for the planning strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Let the DP planner drain the battery near the end of the horizon.
    pub end_optimization: bool,
    /// What a kWh left in the battery at the end of the LP horizon is worth.
    pub acquisition_cost: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            end_optimization: false,
            acquisition_cost: 0.0,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("HBS__").split("__"));
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Err(err) = self.battery.validate() {
            bail!("battery config: {err}");
        }
        for (name, value) in [
            ("rules.cheap_percentile", self.rules.cheap_percentile),
            ("rules.peak_percentile", self.rules.peak_percentile),
        ] {
            if !(0.0..=100.0).contains(&value) {
                bail!("{name} must be within 0..=100, got {value}");
            }
        }
        if self.rules.reserve_soc >= self.rules.full_soc {
            bail!(
                "rules.reserve_soc ({}) must be below rules.full_soc ({})",
                self.rules.reserve_soc,
                self.rules.full_soc
            );
        }
        Ok(())
    }

    /// Build the engine for the configured strategy.
    pub fn engine(&self) -> SchedulingEngine {
        let strategy: Box<dyn DecisionStrategy> = match self.strategy {
            StrategyKind::Rules => Box::new(self.rules.clone()),
            StrategyKind::Dp => Box::new(DynamicProgrammingScheduler {
                allow_end_optimization: self.optimizer.end_optimization,
            }),
            StrategyKind::Lp => Box::new(LinearProgrammingScheduler::new()),
        };
        SchedulingEngine::new(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy, StrategyKind::Rules);
        assert_eq!(config.engine().strategy_name(), "rules");
    }

    #[test]
    fn test_each_strategy_kind_builds_its_engine() {
        for (kind, name) in [
            (StrategyKind::Rules, "rules"),
            (StrategyKind::Dp, "dp"),
            (StrategyKind::Lp, "lp"),
        ] {
            let config = Config {
                strategy: kind,
                ..Default::default()
            };
            assert_eq!(config.engine().strategy_name(), name);
        }
    }

    #[test]
    fn test_validation_rejects_inverted_soc_band() {
        let mut config = Config::default();
        config.rules.reserve_soc = 96.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_percentile() {
        let mut config = Config::default();
        config.rules.cheap_percentile = 140.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reads_file_and_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/default.toml",
                r#"
                    strategy = "dp"

                    [battery]
                    capacity_kwh = 13.5
                    max_charge_kw = 5.0
                    max_discharge_kw = 5.0
                    round_trip_efficiency = 0.9025

                    [optimizer]
                    end_optimization = true
                "#,
            )?;
            jail.set_env("HBS__BATTERY__MAX_CHARGE_KW", "4.2");

            let config = Config::load().expect("config loads");
            assert_eq!(config.strategy, StrategyKind::Dp);
            assert_eq!(config.battery.capacity_kwh, 13.5);
            assert_eq!(config.battery.max_charge_kw, 4.2);
            assert!(config.optimizer.end_optimization);
            Ok(())
        });
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load().expect("defaults load");
            assert_eq!(config.strategy, StrategyKind::Rules);
            assert_eq!(config.battery.capacity_kwh, 27.0);
            Ok(())
        });
    }
}
