//! Typed faults raised by the simulation and allocation core.

use thiserror::Error;

/// Errors from the sizing, selection and simulation engine.
///
/// Application edges wrap these in `anyhow` with context; inside the core
/// they stay typed so callers can tell configuration faults from data faults.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    /// Balance fell outside every configured tier. The tier table is broken.
    #[error("{table} tier table does not cover balance {balance}")]
    TierMiss { table: &'static str, balance: f64 },

    /// Tier table failed partition validation at construction.
    #[error("invalid tier table: {0}")]
    InvalidTiers(String),

    /// Not enough symbols to satisfy the requested selection size.
    #[error("universe has {available} symbols, {requested} requested")]
    InsufficientUniverse { available: usize, requested: usize },

    /// Decision size outside [0, 1] or not finite.
    #[error("decision size {0} outside [0, 1]")]
    InvalidDecision(f64),

    /// Bar sequence violates the simulator's preconditions.
    #[error("malformed bar at index {index}: {reason}")]
    MalformedBars { index: usize, reason: String },

    /// Training rows and labels disagree in count, width or label range.
    #[error("invalid training set: {0}")]
    InvalidTrainingSet(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
