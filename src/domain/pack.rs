//! # Pack State
//!
//! Ordered series string of [`Cell`]s. Position in the vector is the physical
//! position of the cell and never changes while a level is being played.
//! Aggregates (average voltage, pack percentage) are computed on demand.

use serde::{Deserialize, Serialize};

use super::cell::{Cell, EMPTY_VOLTAGE, FULL_VOLTAGE};
use super::level::LevelConfig;
use crate::error::SimError;
use crate::simulation::JitterSource;

const INITIAL_TEMP_C: f64 = 25.0;
const INITIAL_TEMP_SPREAD_C: f64 = 5.0;
const MIN_BLEED_V: f64 = 0.005;
const MAX_BLEED_V: f64 = 0.015;

/// Battery pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pack {
    cells: Vec<Cell>,
}

/// Result of one balancing pass that bled a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalancerActivity {
    /// Zero-based index of the bled cell
    pub cell: usize,
    /// Voltage removed from the cell (V)
    pub bled_v: f64,
}

impl Pack {
    pub fn new(cells: Vec<Cell>) -> Result<Self, SimError> {
        if cells.is_empty() {
            return Err(SimError::EmptyPack);
        }
        Ok(Self { cells })
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.cells.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always false; kept for the `len`/`is_empty` pair.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Arithmetic mean of the cell voltages.
    pub fn average_voltage(&self) -> f64 {
        self.cells.iter().map(|c| c.voltage).sum::<f64>() / self.cells.len() as f64
    }

    /// Pack state of charge for display, 0-100.
    pub fn percent_charge(&self) -> f64 {
        let avg = self.average_voltage();
        ((avg - EMPTY_VOLTAGE) / (FULL_VOLTAGE - EMPTY_VOLTAGE)).clamp(0.0, 1.0) * 100.0
    }

    pub fn max_voltage(&self) -> f64 {
        self.cells
            .iter()
            .map(|c| c.voltage)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn max_temperature(&self) -> f64 {
        self.cells
            .iter()
            .map(|c| c.temperature)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Index of the strictly highest cell; the first one wins ties.
    pub fn highest_cell(&self) -> usize {
        let mut highest_idx = 0;
        let mut highest_v = f64::NEG_INFINITY;
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.voltage > highest_v {
                highest_v = cell.voltage;
                highest_idx = i;
            }
        }
        highest_idx
    }

    /// Bleed the single highest cell when it sits more than `threshold` above
    /// the average. The cell never drops below the average.
    pub fn apply_balancing(
        &mut self,
        threshold: f64,
        jitter: &mut dyn JitterSource,
    ) -> Option<BalancerActivity> {
        let avg = self.average_voltage();
        let idx = self.highest_cell();
        let highest = self.cells[idx].voltage;

        if highest - avg <= threshold {
            return None;
        }

        let bleed = jitter.uniform(MIN_BLEED_V, MAX_BLEED_V);
        let next = (highest - bleed).max(avg);
        self.cells[idx].voltage = next;

        Some(BalancerActivity {
            cell: idx,
            bled_v: highest - next,
        })
    }
}

/// Build a fresh pack for a level.
///
/// Each cell starts at `start_voltage ± tolerance/2` (rounded to millivolts)
/// and 25-30 °C, drawn independently.
pub fn init_level(config: &LevelConfig, jitter: &mut dyn JitterSource) -> Result<Pack, SimError> {
    config.validate()?;

    let cells = (0..config.cell_count)
        .map(|_| {
            let v = config.start_voltage + (jitter.next_unit() - 0.5) * config.tolerance;
            let t = INITIAL_TEMP_C + jitter.next_unit() * INITIAL_TEMP_SPREAD_C;
            Cell::new(round_millivolts(v), t)
        })
        .collect();

    Pack::new(cells)
}

fn round_millivolts(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
