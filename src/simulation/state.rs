use serde::{Deserialize, Serialize};

use crate::domain::{LevelConfig, Pack};

/// Charge/discharge cycle phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Charging,
    Discharging,
    Finished,
    Exploded,
}

impl Phase {
    /// Phases in which ticks run physics.
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Charging | Phase::Discharging)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Finished | Phase::Exploded)
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(Phase::Idle),
            "charging" => Ok(Phase::Charging),
            "discharging" => Ok(Phase::Discharging),
            "finished" => Ok(Phase::Finished),
            "exploded" => Ok(Phase::Exploded),
            _ => Err(format!("Unknown phase: {}", s)),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Charging => write!(f, "charging"),
            Phase::Discharging => write!(f, "discharging"),
            Phase::Finished => write!(f, "finished"),
            Phase::Exploded => write!(f, "exploded"),
        }
    }
}

/// How a level ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Discharged back below the start voltage without tripping UV
    Success,
    /// A cell hit the UV cutoff before the cycle completed
    Undercharged,
    Exploded,
}

/// The single live simulation state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationState {
    pub phase: Phase,
    pub level_index: usize,
    pub level: LevelConfig,
    pub pack: Pack,
    pub outcome: Option<Outcome>,
    /// Ticks processed since level setup
    pub tick: u64,
}

impl SimulationState {
    pub fn new(level_index: usize, level: LevelConfig, pack: Pack) -> Self {
        Self {
            phase: Phase::Idle,
            level_index,
            level,
            pack,
            outcome: None,
            tick: 0,
        }
    }

    pub fn snapshot(&self) -> PackSnapshot {
        PackSnapshot {
            tick: self.tick,
            phase: self.phase,
            level_index: self.level_index,
            difficulty: self.level.difficulty.to_string(),
            average_voltage: self.pack.average_voltage(),
            percent_charge: self.pack.percent_charge(),
            outcome: self.outcome,
            cells: self
                .pack
                .cells()
                .iter()
                .enumerate()
                .map(|(index, cell)| CellSnapshot {
                    index,
                    voltage: cell.voltage,
                    temperature: cell.temperature,
                    fill_percent: cell.fill_percent(),
                    over_safe_voltage: cell.over_safe_voltage(),
                })
                .collect(),
        }
    }
}

/// Read-only view of one cell for rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub index: usize,
    pub voltage: f64,
    pub temperature: f64,
    pub fill_percent: f64,
    pub over_safe_voltage: bool,
}

/// Read-only view of the pack handed to event sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackSnapshot {
    pub tick: u64,
    pub phase: Phase,
    pub level_index: usize,
    pub difficulty: String,
    pub average_voltage: f64,
    pub percent_charge: f64,
    pub outcome: Option<Outcome>,
    pub cells: Vec<CellSnapshot>,
}
