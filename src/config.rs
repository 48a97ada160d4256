use anyhow::{Context, Result};
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

use crate::domain::RuntimeConfig;
use crate::simulation::EngineSettings;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub simulation: SimulationConfig,
    pub runtime: RuntimeConfig,
    #[validate(nested)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SimulationConfig {
    #[validate(range(min = 10, max = 10_000))]
    pub tick_ms: u64,
    #[validate(range(max = 60_000))]
    pub ov_transition_delay_ms: u64,
    #[validate(range(max = 60_000))]
    pub temp_transition_delay_ms: u64,
    /// Fixed seed for reproducible runs; entropy when unset
    pub random_seed: Option<u64>,
    #[validate(range(min = 1, max = 10_000))]
    pub event_history: usize,
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            tick_interval: self.tick_interval(),
            ov_transition_delay: Duration::from_millis(self.ov_transition_delay_ms),
            temp_transition_delay: Duration::from_millis(self.temp_transition_delay_ms),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            ov_transition_delay_ms: 800,
            temp_transition_delay_ms: 600,
            random_seed: None,
            event_history: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SessionConfig {
    #[validate(range(max = 4))]
    pub start_level: usize,
    /// Move on to the next level after a successful cycle
    pub auto_advance: bool,
    /// Give up on a level after this many ticks
    #[validate(range(min = 1))]
    pub max_ticks: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_level: 0,
            auto_advance: false,
            max_ticks: 20_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            runtime: RuntimeConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("BMS__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("failed to read configuration")?;
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}
