//! # Cell Model
//!
//! One lithium cell reduced to the two quantities the BMS watches: terminal
//! voltage and temperature. The update functions are pure; they take a cell by
//! value and return the next one, drawing any noise from the supplied
//! [`JitterSource`].
//!
//! ## Charge step
//!
//! v' = v + effect * imbalance * (1 + j),   j ∈ [0, 0.1)
//! T' = T + ((I / max(1, I_safe)) * 0.6 + |v' - 4.20| * 2) * 0.02
//!
//! ## Discharge step
//!
//! v' = v - rate * (1 + j),   j ∈ [0, 0.1)
//! T' = max(20, T - (0.05 + k)),   k ∈ [0, 0.02)

use serde::{Deserialize, Serialize};

use crate::simulation::JitterSource;

/// Voltage above which a cell is drawn as over-charged.
pub const SAFE_TRUE_OV: f64 = 4.20;
/// Voltage at which the pack explodes.
pub const EXPLOSION_OV: f64 = 4.30;
/// Temperature at which the pack explodes (°C).
pub const EXPLOSION_TEMP_C: f64 = 85.0;
/// Cells never cool below this (°C).
pub const AMBIENT_FLOOR_C: f64 = 20.0;
/// Empty-cell voltage used for percentage display.
pub const EMPTY_VOLTAGE: f64 = 2.5;
/// Full-cell voltage used for percentage display.
pub const FULL_VOLTAGE: f64 = 4.4;

/// Upper bound of the multiplicative rate jitter.
const RATE_JITTER: f64 = 0.1;
/// Upper bound of the additive cooling noise (°C per tick).
const COOLING_JITTER_C: f64 = 0.02;
const BASE_COOLING_C: f64 = 0.05;

/// Single battery cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Terminal voltage (V)
    pub voltage: f64,
    /// Cell temperature (°C)
    pub temperature: f64,
}

impl Cell {
    pub fn new(voltage: f64, temperature: f64) -> Self {
        Self {
            voltage,
            temperature,
        }
    }

    /// Fill level for display, 0-100. Not clamped at the bottom, matching the
    /// bar height the console draws.
    pub fn fill_percent(&self) -> f64 {
        (((self.voltage - EMPTY_VOLTAGE) / (FULL_VOLTAGE - EMPTY_VOLTAGE)) * 100.0).min(100.0)
    }

    /// Whether the cell sits above the true safe charge voltage.
    pub fn over_safe_voltage(&self) -> bool {
        self.voltage > SAFE_TRUE_OV
    }
}

/// Charge acceptance relative to the pack average.
///
/// Cells above the average charge slower; the reduction is capped at 80%.
/// Cells below the average get a factor above 1.
pub fn imbalance_factor(voltage: f64, average: f64) -> f64 {
    1.0 - ((voltage - average) * 0.3).min(0.8)
}

/// One charging step for a single cell.
pub fn apply_charge(
    cell: Cell,
    charge_effect: f64,
    imbalance_factor: f64,
    current_a: f64,
    safe_max_current_a: f64,
    jitter: &mut dyn JitterSource,
) -> Cell {
    let voltage = cell.voltage
        + charge_effect * imbalance_factor * (1.0 + jitter.uniform(0.0, RATE_JITTER));

    let temp_rise = (current_a / safe_max_current_a.max(1.0)) * 0.6
        + (voltage - SAFE_TRUE_OV).abs() * 2.0;
    let temperature = cell.temperature + temp_rise * 0.02;

    Cell {
        voltage,
        temperature,
    }
}

/// One discharge step for a single cell.
pub fn apply_discharge(cell: Cell, rate: f64, jitter: &mut dyn JitterSource) -> Cell {
    let voltage = cell.voltage - rate * (1.0 + jitter.uniform(0.0, RATE_JITTER));
    let cooling = BASE_COOLING_C + jitter.uniform(0.0, COOLING_JITTER_C);
    let temperature = (cell.temperature - cooling).max(AMBIENT_FLOOR_C);

    Cell {
        voltage,
        temperature,
    }
}
