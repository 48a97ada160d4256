use thiserror::Error;

/// Construction-time invariant violations.
///
/// Gameplay outcomes (under-voltage, explosion) are never errors; they are
/// terminal phases reported through events.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    #[error("Pack must contain at least one cell")]
    EmptyPack,
    #[error("Unknown level index {index} (table has {available} levels)")]
    UnknownLevel { index: usize, available: usize },
    #[error("Invalid level configuration: {0}")]
    InvalidLevel(String),
}
