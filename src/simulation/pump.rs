//! # Pump load model
//!
//! A float switch cycles a pump between pumping and resting. On a configured
//! cycle the switch sticks and the pump keeps running dry until the operator
//! clears the fault, which is exactly the situation the load guard exists for.
//!
//! The model also produces the CSE7766 frames a real metering chip would
//! stream for the current draw.

use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use validator::Validate;

use crate::hardware::cse7766::{Cse7766Frame, ADJ_CURRENT, ADJ_POWER, ADJ_VOLTAGE, HEADER_OK};

/// Calibration coefficients burnt into the simulated chip.
const VOLTAGE_COEF: u32 = 184_000;
const CURRENT_COEF: u32 = 16_000;
const POWER_COEF: u32 = 5_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PumpSimulationConfig {
    #[validate(range(min = 100.0, max = 260.0))]
    pub mains_voltage_v: f64,
    #[validate(range(exclusive_min = 0.0))]
    pub running_power_w: f64,
    /// Draw of the pump electronics while the motor is off
    #[validate(range(min = 0.0))]
    pub standby_power_w: f64,
    #[validate(range(min = 0.05, max = 1.0))]
    pub power_factor: f64,
    /// Standard deviation of the running draw
    #[validate(range(min = 0.0))]
    pub noise_w: f64,
    #[validate(range(min = 1))]
    pub run_secs: u64,
    #[validate(range(min = 1))]
    pub rest_secs: u64,
    /// Pumping cycle on which the float switch sticks; never when unset
    pub stuck_on_cycle: Option<u32>,
    /// Operator presses reset this long after the relay opened; never when unset
    pub operator_reset_after_secs: Option<u64>,
    #[validate(range(min = 10))]
    pub frame_interval_ms: u64,
    pub random_seed: Option<u64>,
}

impl Default for PumpSimulationConfig {
    fn default() -> Self {
        Self {
            mains_voltage_v: 230.0,
            running_power_w: 450.0,
            standby_power_w: 1.2,
            power_factor: 0.85,
            noise_w: 4.0,
            run_secs: 120,
            rest_secs: 300,
            stuck_on_cycle: Some(3),
            operator_reset_after_secs: Some(60),
            frame_interval_ms: 100,
            random_seed: None,
        }
    }
}

/// Electrical quantities at the relay output.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PumpSample {
    pub voltage_v: f64,
    pub current_a: f64,
    pub active_power_w: f64,
}

pub struct PumpSimulator {
    config: PumpSimulationConfig,
    rng: rand::rngs::StdRng,
    noise: Option<Normal<f64>>,
    pumping: bool,
    phase_elapsed: Duration,
    cycles: u32,
    stuck: bool,
    cf_pulses: u16,
    pulse_residual_ws: f64,
}

impl PumpSimulator {
    pub fn new(config: PumpSimulationConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, config.noise_w).ok();
        Self {
            config,
            rng,
            noise,
            pumping: false,
            phase_elapsed: Duration::ZERO,
            cycles: 0,
            stuck: false,
            cf_pulses: 0,
            pulse_residual_ws: 0.0,
        }
    }

    /// Whether the float switch currently demands pumping.
    pub fn is_pumping(&self) -> bool {
        self.pumping
    }

    /// Pumping cycles started so far.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }

    /// Operator service: frees the float switch and restarts the rest phase.
    pub fn clear_fault(&mut self) {
        if self.stuck {
            info!(cycle = self.cycles, "float switch freed");
        }
        self.stuck = false;
        self.pumping = false;
        self.phase_elapsed = Duration::ZERO;
    }

    /// Advance the model by `dt`. The motor only draws power while the relay
    /// is closed; the float switch keeps its own schedule either way.
    pub fn step(&mut self, dt: Duration, relay_closed: bool) -> PumpSample {
        self.advance_demand(dt);

        let voltage_v = self.config.mains_voltage_v;
        let demand_w = if self.pumping {
            self.config.running_power_w + self.sample_noise()
        } else {
            self.config.standby_power_w
        };
        let active_power_w = if relay_closed { demand_w.max(0.0) } else { 0.0 };
        let current_a = if active_power_w > 0.0 {
            active_power_w / (voltage_v * self.config.power_factor)
        } else {
            0.0
        };

        self.count_pulses(active_power_w, dt);

        PumpSample {
            voltage_v,
            current_a,
            active_power_w,
        }
    }

    /// Frame the metering chip would emit for `sample`.
    pub fn frame(&self, sample: &PumpSample) -> Cse7766Frame {
        let mut frame = Cse7766Frame {
            header: HEADER_OK,
            voltage_coef: VOLTAGE_COEF,
            current_coef: CURRENT_COEF,
            power_coef: POWER_COEF,
            cf_pulses: self.cf_pulses,
            ..Default::default()
        };
        if sample.voltage_v > 0.0 {
            frame.adjust |= ADJ_VOLTAGE;
            frame.voltage_cycle = (VOLTAGE_COEF as f64 / sample.voltage_v).round() as u32;
        }
        if sample.current_a > 0.0 {
            frame.adjust |= ADJ_CURRENT;
            frame.current_cycle = (CURRENT_COEF as f64 / sample.current_a).round() as u32;
        }
        if sample.active_power_w > 0.0 {
            let cycle = (POWER_COEF as f64 / sample.active_power_w).round();
            // Below the chip's resolution it reports no load
            if cycle <= 0x00FF_FFFF as f64 {
                frame.adjust |= ADJ_POWER;
                frame.power_cycle = cycle as u32;
            }
        }
        frame
    }

    fn advance_demand(&mut self, dt: Duration) {
        self.phase_elapsed += dt;
        if self.pumping && self.stuck {
            return;
        }
        let phase_len = if self.pumping {
            Duration::from_secs(self.config.run_secs)
        } else {
            Duration::from_secs(self.config.rest_secs)
        };
        if self.phase_elapsed < phase_len {
            return;
        }

        self.pumping = !self.pumping;
        self.phase_elapsed = Duration::ZERO;
        if self.pumping {
            self.cycles += 1;
            if self.config.stuck_on_cycle == Some(self.cycles) {
                self.stuck = true;
                warn!(cycle = self.cycles, "float switch stuck, pump will run dry");
            }
        }
    }

    fn sample_noise(&mut self) -> f64 {
        match &self.noise {
            Some(normal) => normal.sample(&mut self.rng),
            None => 0.0,
        }
    }

    fn count_pulses(&mut self, power_w: f64, dt: Duration) {
        let ws_per_pulse = POWER_COEF as f64 / 1_000_000.0;
        self.pulse_residual_ws += power_w * dt.as_secs_f64();
        let pulses = (self.pulse_residual_ws / ws_per_pulse).floor();
        self.pulse_residual_ws -= pulses * ws_per_pulse;
        self.cf_pulses = self.cf_pulses.wrapping_add(pulses as u16);
    }
}
