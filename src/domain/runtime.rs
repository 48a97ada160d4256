use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Operator-tunable BMS settings, read fresh on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Charge current (A)
    pub charge_current: f64,
    /// Balancer activation threshold above pack average (V)
    pub balance_threshold: f64,
    /// Over-voltage cutoff (V)
    pub ov_cutoff: f64,
    /// Under-voltage cutoff (V)
    pub uv_cutoff: f64,
    /// Temperature cutoff (°C)
    pub temp_limit: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            charge_current: 15.0,
            balance_threshold: 0.03,
            ov_cutoff: 4.15,
            uv_cutoff: 3.00,
            temp_limit: 45.0,
        }
    }
}

/// Accepted range for one setting, mirroring the console sliders.
#[derive(Debug, Clone, Copy)]
struct Range {
    name: &'static str,
    min: f64,
    max: f64,
}

const CHARGE_CURRENT: Range = Range {
    name: "charge_current",
    min: 0.0,
    max: 60.0,
};
const BALANCE_THRESHOLD: Range = Range {
    name: "balance_threshold",
    min: 0.0,
    max: 0.5,
};
const OV_CUTOFF: Range = Range {
    name: "ov_cutoff",
    min: 3.5,
    max: 4.5,
};
const UV_CUTOFF: Range = Range {
    name: "uv_cutoff",
    min: 2.5,
    max: 4.0,
};
const TEMP_LIMIT: Range = Range {
    name: "temp_limit",
    min: 20.0,
    max: 100.0,
};

impl Range {
    /// Clamp into range; non-finite values fall back to `fallback`.
    fn coerce(&self, value: f64, fallback: f64) -> f64 {
        let coerced = if value.is_finite() {
            value.clamp(self.min, self.max)
        } else {
            fallback
        };
        if coerced != value {
            warn!(
                setting = self.name,
                requested = value,
                applied = coerced,
                "runtime setting out of range, coerced"
            );
        }
        coerced
    }
}

impl RuntimeConfig {
    /// Copy with every field forced into its valid range.
    ///
    /// Bad operator input never stops the tick loop.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        Self {
            charge_current: CHARGE_CURRENT.coerce(self.charge_current, defaults.charge_current),
            balance_threshold: BALANCE_THRESHOLD
                .coerce(self.balance_threshold, defaults.balance_threshold),
            ov_cutoff: OV_CUTOFF.coerce(self.ov_cutoff, defaults.ov_cutoff),
            uv_cutoff: UV_CUTOFF.coerce(self.uv_cutoff, defaults.uv_cutoff),
            temp_limit: TEMP_LIMIT.coerce(self.temp_limit, defaults.temp_limit),
        }
    }

    /// `Settings: I=..` console line announced on start.
    pub fn settings_line(&self) -> String {
        format!(
            "Settings: I={}A, Bal_th={:.2}V, OV={:.2}V, UV={:.2}V, Tlim={}°C",
            self.charge_current,
            self.balance_threshold,
            self.ov_cutoff,
            self.uv_cutoff,
            self.temp_limit
        )
    }
}

/// Supplies the runtime settings for the next tick.
pub trait ConfigProvider: Send + Sync {
    fn runtime_config(&self) -> RuntimeConfig;
}

impl ConfigProvider for RuntimeConfig {
    fn runtime_config(&self) -> RuntimeConfig {
        *self
    }
}

/// Live settings shared between the operator and the tick loop.
#[derive(Debug, Clone, Default)]
pub struct SharedRuntimeConfig {
    inner: Arc<RwLock<RuntimeConfig>>,
}

impl SharedRuntimeConfig {
    pub fn new(initial: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn set(&self, config: RuntimeConfig) {
        *self.inner.write() = config;
    }

    /// Change a single setting in place.
    pub fn update(&self, f: impl FnOnce(&mut RuntimeConfig)) {
        f(&mut self.inner.write());
    }
}

impl ConfigProvider for SharedRuntimeConfig {
    fn runtime_config(&self) -> RuntimeConfig {
        *self.inner.read()
    }
}
