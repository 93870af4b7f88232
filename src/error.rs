//! Error types for Trueno-Ensemble
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Per-candidate evaluation failures are not errors: they are recorded in the
//! sample log (see [`crate::problem::EvaluationFailure`]). Everything here is
//! fatal to the operation that raised it.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trueno-Ensemble error types
#[derive(Error, Debug)]
pub enum Error {
    /// Sample log is empty, absent, or the harvest left nothing to report
    #[error("No data: {0}")]
    NoData(String),

    /// Refusing to overwrite existing results without `force`
    #[error("Output already exists: {}\nPass force=true to overwrite it", .0.display())]
    ForceRequired(PathBuf),

    /// Persisted run fingerprint disagrees with the current inputs
    #[error("Configuration mismatch in {field}: run directory has {persisted}, current setup has {current}")]
    ConfigMismatch {
        /// Which part of the fingerprint differs
        field: String,
        /// Value recorded in the run directory
        persisted: String,
        /// Value derived from the current inputs
        current: String,
    },

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Forward engine kept failing transiently past the retry budget
    #[error("Evaluation engine stalled at sample {index} after {attempts} attempts: {reason}")]
    EngineStalled {
        /// Sample index being evaluated
        index: u64,
        /// Number of attempts made
        attempts: u32,
        /// Last failure reported by the engine
        reason: String,
    },

    /// Internal invariant broken (defect, not a user error)
    #[error("Internal invariant violated: {0}\nPlease report this issue.")]
    InvariantViolation(String),

    /// Malformed persisted data
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}
