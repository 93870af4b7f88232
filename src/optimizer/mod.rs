//! Optimizer: the sampling loop
//!
//! An [`Optimizer`] drives repeated evaluations of a [`Problem`] and persists
//! every one of them to a run directory. The sampling policy is pluggable
//! through [`Strategy`]; a strategy is fully described by its proposal
//! function and its termination predicate.
//!
//! Toyota Way principles:
//! - **Jidoka**: configuration or persistence inconsistencies stop the run
//!   immediately; infeasible models are recorded and the loop moves on
//! - **Genchi Genbutsu**: the sample log on disk is the only state a run
//!   resumes from
//! - **Heijunka**: batches of proposals are evaluated concurrently and
//!   committed in index order
//!
//! ## Resume
//!
//! Re-invoking [`Optimizer::optimize`] on a run directory continues the
//! numbering after checking that problem, bootstrap weights and sampling
//! configuration are unchanged. A run stopped after `k` samples and resumed
//! to `k + m` writes the same log as an uninterrupted run of `k + m`.

mod config;
mod highscore;
mod run;
mod strategy;

pub use config::{OptimizerConfig, OptimizerConfigBuilder, RunOptions};
pub use highscore::{HighScoreStrategy, SamplerPhase, StartingPoint, Termination};
pub use run::{BootstrapOptimizer, RunOutcome, RunProgress, StopReason};
pub use strategy::{ConvergenceStatus, ProposalContext, Strategy};

use std::path::Path;

use crate::problem::Problem;
use crate::Result;

/// A sampling loop over a [`Problem`], persisted to a run directory.
pub trait Optimizer {
    /// Run (or resume) sampling in `run_path` until the strategy terminates,
    /// the iteration limit is reached or a stop is requested.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::ForceRequired`] if `run_path` holds something that is not a run
    /// - [`crate::Error::ConfigMismatch`] if the run was created with different inputs
    /// - [`crate::Error::EngineStalled`] if the forward engine stays unavailable
    /// - [`crate::Error::Io`] / [`crate::Error::StorageError`] on persistence failures
    ///
    /// The log only ever holds complete records when an error is returned.
    fn optimize(&self, problem: &dyn Problem, run_path: &Path, options: &RunOptions) -> Result<RunOutcome>;

    /// Number of complete records in the log of the current (or last) run.
    fn niterations(&self) -> u64;
}
