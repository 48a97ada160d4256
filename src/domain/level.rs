use serde::Serialize;

use crate::error::SimError;

/// Difficulty preset for one level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelConfig {
    /// Number of series cells in the pack
    pub cell_count: usize,
    /// Spread of initial cell voltages (V, full width)
    pub tolerance: f64,
    /// Nominal starting voltage of every cell (V)
    pub start_voltage: f64,
    pub difficulty: &'static str,
    /// Charge current the pack tolerates without extra heating (A)
    pub safe_max_current: f64,
}

impl LevelConfig {
    /// Reject presets that could not produce a valid pack.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.cell_count == 0 {
            return Err(SimError::EmptyPack);
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(SimError::InvalidLevel(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        if !self.start_voltage.is_finite() || self.start_voltage <= 0.0 {
            return Err(SimError::InvalidLevel(format!(
                "start voltage must be positive, got {}",
                self.start_voltage
            )));
        }
        if !self.safe_max_current.is_finite() || self.safe_max_current < 0.0 {
            return Err(SimError::InvalidLevel(format!(
                "safe max current must be non-negative, got {}",
                self.safe_max_current
            )));
        }
        Ok(())
    }
}

/// Fixed level table, easiest first.
pub const LEVELS: [LevelConfig; 5] = [
    LevelConfig {
        cell_count: 2,
        tolerance: 0.18,
        start_voltage: 3.80,
        difficulty: "Easy",
        safe_max_current: 30.0,
    },
    LevelConfig {
        cell_count: 4,
        tolerance: 0.12,
        start_voltage: 3.75,
        difficulty: "Easy+",
        safe_max_current: 20.0,
    },
    LevelConfig {
        cell_count: 6,
        tolerance: 0.09,
        start_voltage: 3.70,
        difficulty: "Medium",
        safe_max_current: 12.0,
    },
    LevelConfig {
        cell_count: 8,
        tolerance: 0.06,
        start_voltage: 3.65,
        difficulty: "Hard",
        safe_max_current: 8.0,
    },
    LevelConfig {
        cell_count: 12,
        tolerance: 0.04,
        start_voltage: 3.60,
        difficulty: "Very Hard",
        safe_max_current: 5.0,
    },
];

/// Look up a preset by index.
pub fn level(index: usize) -> Result<&'static LevelConfig, SimError> {
    LEVELS.get(index).ok_or(SimError::UnknownLevel {
        index,
        available: LEVELS.len(),
    })
}

/// Tracks which preset is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LevelSelector {
    index: usize,
}

impl LevelSelector {
    pub fn new(index: usize) -> Result<Self, SimError> {
        level(index)?;
        Ok(Self { index })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> &'static LevelConfig {
        &LEVELS[self.index]
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= LEVELS.len()
    }

    /// Move to the next level, staying on the last one.
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1).min(LEVELS.len() - 1);
        self.index
    }
}
