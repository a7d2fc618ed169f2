use serde::{Deserialize, Serialize};

/// Watt-seconds in one kilowatt-hour.
const WS_PER_KWH: f64 = 3_600_000.0;

/// Latest sample produced by the power meter.
///
/// Only `active_power_w` feeds the load guard. The remaining fields are
/// carried for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub active_power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub apparent_power_va: f64,
    pub reactive_power_var: f64,
    pub power_factor: f64,
    /// Cumulative energy since boot (watt-seconds)
    pub energy_ws: f64,
}

impl PowerReading {
    /// Reading carrying only an active power value.
    pub fn from_active_power(watts: f64) -> Self {
        Self {
            active_power_w: watts,
            ..Default::default()
        }
    }

    /// Cumulative energy in kWh.
    pub fn energy_kwh(&self) -> f64 {
        self.energy_ws / WS_PER_KWH
    }

    /// Active power with NaN and negative values collapsed to zero.
    ///
    /// A sensor fault is indistinguishable from an idle load.
    pub fn effective_power_w(&self) -> f64 {
        if self.active_power_w.is_finite() && self.active_power_w > 0.0 {
            self.active_power_w
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_kwh() {
        let reading = PowerReading {
            energy_ws: 7_200_000.0,
            ..Default::default()
        };
        assert_eq!(reading.energy_kwh(), 2.0);
    }

    #[test]
    fn test_effective_power_masks_invalid_values() {
        assert_eq!(PowerReading::from_active_power(f64::NAN).effective_power_w(), 0.0);
        assert_eq!(PowerReading::from_active_power(-3.0).effective_power_w(), 0.0);
        assert_eq!(PowerReading::from_active_power(120.5).effective_power_w(), 120.5);
    }
}
