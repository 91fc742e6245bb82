//! Error types for Stride Evolve

use thiserror::Error;

/// Errors that can occur at the engine boundary
#[derive(Debug, Error)]
pub enum EvolveError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid day key (expected YYYY-MM-DD): {0}")]
    InvalidDayKey(String),

    #[error("Invalid goal: {0} (must be greater than zero)")]
    InvalidGoal(i64),

    #[error("Invalid phase: {0} (must be 1-4)")]
    InvalidPhase(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot record a day in the future: {0}")]
    FutureDay(String),

    #[error("State error: {0}")]
    StateError(String),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, EvolveError>;
