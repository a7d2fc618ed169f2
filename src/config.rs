use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

use crate::controller::{ConnectivityConfig, GuardConfig};
use crate::simulation::PumpSimulationConfig;
use crate::telemetry::TelemetryConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub device: DeviceConfig,
    #[validate(nested)]
    pub guard: GuardConfig,
    #[validate(nested)]
    pub connectivity: ConnectivityConfig,
    pub telemetry: TelemetryConfig,
    #[validate(nested)]
    pub simulation: PumpSimulationConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct DeviceConfig {
    #[validate(length(min = 1, max = 32))]
    pub hostname: String,
    /// Spacing of measurement ticks
    #[validate(range(min = 1))]
    pub tick_interval_ms: u32,
    /// Sleep between main loop passes
    #[validate(range(min = 1, max = 1000))]
    pub poll_interval_ms: u64,
    /// Pause before booting again after a restart
    pub restart_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hostname: "POWR316-Pump-Limiter".to_string(),
            tick_interval_ms: 1_000,
            poll_interval_ms: 10,
            restart_delay_ms: 1_000,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Defaults, then the TOML file, then `.env` and `PUMP__` variables
    /// (`PUMP__GUARD__MAX_RUN_MS=60000`).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        // A missing .env is fine
        let _ = dotenvy::dotenv();
        let figment = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PUMP__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("failed to read configuration")?;
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}
