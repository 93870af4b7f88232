//! # Trueno-Ensemble: Bootstrap Ensemble Optimizer
//!
//! **Version**: 0.1.0
//!
//! Trueno-Ensemble samples a bounded parameter space against an opaque
//! forward problem, keeps a best-of-N selection per bootstrap weighting of
//! the targets, and distills the result into best / mean / ensemble / stats
//! views with exactly specified statistics.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Genchi Genbutsu**: the append-only sample log is the single source of
//!   truth; chains, harvests and exports are replayed from it
//! - **Poka-Yoke safety**: resume, harvest and export refuse to run against a
//!   changed problem or configuration, and never overwrite without `force`
//! - **Jidoka**: infeasible models are recorded and skipped, engine stalls and
//!   storage failures stop the run with the log still consistent
//! - **Heijunka**: candidate batches are evaluated concurrently and committed
//!   in index order, so results do not depend on scheduling
//!
//! ## Pipeline
//!
//! ```text
//! Optimizer ──> samples.jsonl ──> harvest ──> HarvestEnsemble ──> export ──> views
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use trueno_ensemble::export::{export, ExportKind, HarvestedRun};
//! use trueno_ensemble::harvest::{harvest, HarvestOptions, WeedLevel};
//! use trueno_ensemble::optimizer::{
//!     BootstrapOptimizer, HighScoreStrategy, Optimizer, OptimizerConfig, RunOptions,
//! };
//! # fn run(problem: &dyn trueno_ensemble::problem::Problem) -> trueno_ensemble::Result<()> {
//! let config = OptimizerConfig::builder().nbootstrap(100).seed(42).build()?;
//! let optimizer = BootstrapOptimizer::new(config, HighScoreStrategy::default());
//! optimizer.optimize(problem, "runs/event-a".as_ref(), &RunOptions::default())?;
//!
//! let options = HarvestOptions { weed: WeedLevel::Chains, ..HarvestOptions::default() };
//! harvest("runs/event-a", &options)?;
//!
//! let runs = vec![HarvestedRun::load("runs/event-a")?];
//! for view in export(ExportKind::Stats, &runs, None)? {
//!     println!("{}", view.to_json()?);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod bootstrap;
pub mod chain;
pub mod error;
pub mod export;
pub mod harvest;
pub mod optimizer;
pub mod problem;
pub mod rundir;
pub mod sample;
pub mod stats;

pub use error::{Error, Result};
