use serde::{Deserialize, Serialize};

/// Length of one control tick in hours (5 minutes).
pub const TICK_HOURS: f64 = 5.0 / 60.0;
/// Ticks per hour at 5-minute resolution.
pub const TICKS_PER_HOUR: f64 = 12.0;
/// Planning horizon cap: 24 h of 5-minute ticks.
pub const HORIZON_TICKS: usize = 288;

/// Configured physical envelope of the battery system.
///
/// `round_trip_efficiency` covers a full charge-then-discharge cycle; the
/// per-leg efficiency used in cost arithmetic is its square root.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryLimits {
    pub capacity_kwh: f64,
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    pub round_trip_efficiency: f64,
}

impl Default for BatteryLimits {
    fn default() -> Self {
        Self {
            capacity_kwh: 27.0,
            max_charge_kw: 6.3,
            max_discharge_kw: 10.0,
            round_trip_efficiency: 0.90,
        }
    }
}

impl BatteryLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity_kwh <= 0.0 {
            return Err("capacity_kwh must be positive".to_string());
        }
        if self.max_charge_kw <= 0.0 {
            return Err("max_charge_kw must be positive".to_string());
        }
        if self.max_discharge_kw <= 0.0 {
            return Err("max_discharge_kw must be positive".to_string());
        }
        if self.round_trip_efficiency <= 0.0 || self.round_trip_efficiency > 1.0 {
            return Err("round_trip_efficiency must be in (0, 1]".to_string());
        }
        Ok(())
    }

    /// Build the working model for the current state of charge (percent).
    pub fn model(&self, soc_percent: f64) -> BatteryModel {
        BatteryModel::from_round_trip(
            self.capacity_kwh,
            soc_percent.clamp(0.0, 100.0) / 100.0,
            self.max_charge_kw,
            self.max_discharge_kw,
            self.round_trip_efficiency,
        )
    }
}

/// Battery physical model: pure unit arithmetic between grid-side energy,
/// stored energy and normalized charge. No failure modes; construction
/// guarantees capacity > 0 is the caller's responsibility (config validation
/// enforces it at the boundary).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryModel {
    pub capacity_kwh: f64,
    /// Charge as a fraction of capacity, always within [0, 1].
    pub charge: f64,
    pub charge_power_limit_kw: f64,
    pub discharge_power_limit_kw: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
}

impl BatteryModel {
    pub fn new(
        capacity_kwh: f64,
        charge: f64,
        charge_power_limit_kw: f64,
        discharge_power_limit_kw: f64,
        charge_efficiency: f64,
        discharge_efficiency: f64,
    ) -> Self {
        Self {
            capacity_kwh,
            charge: charge.clamp(0.0, 1.0),
            charge_power_limit_kw,
            discharge_power_limit_kw,
            charge_efficiency,
            discharge_efficiency,
        }
    }

    /// One configured round-trip fraction, split evenly across the two legs.
    pub fn from_round_trip(
        capacity_kwh: f64,
        charge: f64,
        charge_power_limit_kw: f64,
        discharge_power_limit_kw: f64,
        round_trip_efficiency: f64,
    ) -> Self {
        let one_way = round_trip_efficiency.max(0.0).sqrt().min(1.0);
        Self::new(
            capacity_kwh,
            charge,
            charge_power_limit_kw,
            discharge_power_limit_kw,
            one_way,
            one_way,
        )
    }

    pub fn soc_percent(&self) -> f64 {
        self.charge * 100.0
    }

    pub fn with_charge(&self, charge: f64) -> Self {
        Self {
            charge: charge.clamp(0.0, 1.0),
            ..*self
        }
    }

    /// Grid-side energy (kWh, + = into the battery) to charge-fraction delta.
    /// Charging loses through the charge leg; discharging draws more stored
    /// energy than the grid side receives.
    pub fn energy_to_charge_delta(&self, energy_kwh: f64) -> f64 {
        let stored = if energy_kwh > 0.0 {
            energy_kwh * self.charge_efficiency
        } else {
            energy_kwh / self.discharge_efficiency
        };
        stored / self.capacity_kwh
    }

    /// Inverse of [`Self::energy_to_charge_delta`]: the grid-side energy a
    /// charge-fraction move costs (charging) or yields (discharging).
    pub fn charge_delta_to_energy(&self, delta: f64) -> f64 {
        let stored = delta * self.capacity_kwh;
        if stored > 0.0 {
            stored / self.charge_efficiency
        } else {
            stored * self.discharge_efficiency
        }
    }

    /// Clamp a per-interval energy flow to what the power limits permit.
    pub fn clamp_interval_energy(&self, energy_kwh: f64, hours: f64) -> f64 {
        energy_kwh.clamp(
            -self.discharge_power_limit_kw * hours,
            self.charge_power_limit_kw * hours,
        )
    }

    /// Largest charge-fraction increase physically possible in a window.
    pub fn max_charge_delta(&self, hours: f64) -> f64 {
        hours * self.charge_power_limit_kw / self.capacity_kwh * self.charge_efficiency
    }

    /// Largest charge-fraction decrease physically possible in a window
    /// (returned negative).
    pub fn max_discharge_delta(&self, hours: f64) -> f64 {
        -(hours * self.discharge_power_limit_kw / self.capacity_kwh / self.discharge_efficiency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> BatteryModel {
        BatteryModel::from_round_trip(27.0, 0.5, 6.3, 10.0, 0.90)
    }

    #[test]
    fn test_round_trip_split_per_leg() {
        let battery = model();
        assert_relative_eq!(battery.charge_efficiency, 0.90_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(
            battery.charge_efficiency * battery.discharge_efficiency,
            0.90,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_charge_clamped_on_construction() {
        let battery = BatteryModel::from_round_trip(27.0, 1.4, 6.3, 10.0, 0.90);
        assert_eq!(battery.charge, 1.0);
        let battery = battery.with_charge(-0.2);
        assert_eq!(battery.charge, 0.0);
    }

    #[test]
    fn test_energy_conversion_round_trips() {
        let battery = model();
        for energy in [-4.0, -0.7, 0.3, 5.0] {
            let delta = battery.energy_to_charge_delta(energy);
            assert_relative_eq!(battery.charge_delta_to_energy(delta), energy, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_charging_stores_less_than_drawn() {
        let battery = model();
        // 1 kWh from the grid stores less than 1/27 of capacity.
        let delta = battery.energy_to_charge_delta(1.0);
        assert!(delta > 0.0);
        assert!(delta < 1.0 / 27.0);
    }

    #[test]
    fn test_discharging_drains_more_than_delivered() {
        let battery = model();
        // Delivering 1 kWh draws down more than 1/27 of capacity.
        let delta = battery.energy_to_charge_delta(-1.0);
        assert!(delta < 0.0);
        assert!(delta.abs() > 1.0 / 27.0);
    }

    #[test]
    fn test_interval_energy_clamp() {
        let battery = model();
        let hours = TICK_HOURS;
        assert_relative_eq!(
            battery.clamp_interval_energy(99.0, hours),
            6.3 * hours,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            battery.clamp_interval_energy(-99.0, hours),
            -10.0 * hours,
            epsilon = 1e-12
        );
        assert_relative_eq!(battery.clamp_interval_energy(0.1, hours), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_max_deltas_have_expected_signs() {
        let battery = model();
        assert!(battery.max_charge_delta(1.0) > 0.0);
        assert!(battery.max_discharge_delta(1.0) < 0.0);
    }

    #[test]
    fn test_limits_validate() {
        assert!(BatteryLimits::default().validate().is_ok());

        let bad = BatteryLimits {
            capacity_kwh: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = BatteryLimits {
            round_trip_efficiency: 1.2,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_limits_model_uses_percent_soc() {
        let limits = BatteryLimits::default();
        let battery = limits.model(42.0);
        assert_relative_eq!(battery.charge, 0.42, epsilon = 1e-12);
        assert_eq!(limits.model(240.0).charge, 1.0);
    }
}
