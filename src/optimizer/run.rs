//! Run loop: propose, evaluate, persist, update chains
//!
//! One loop per run directory, one writer per log. Within a batch,
//! evaluations run concurrently (with the `rayon` feature) and are appended
//! in index order once the whole batch is back. Chains only advance at batch
//! boundaries, so every proposal of a batch sees the chain state as of
//! `floor(index / batch_size) * batch_size`, whether the run was interrupted
//! in between or not.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::{OptimizerConfig, RunOptions};
use super::highscore::HighScoreStrategy;
use super::strategy::{ConvergenceStatus, ProposalContext, Strategy};
use super::Optimizer;
use crate::bootstrap::BootstrapWeights;
use crate::chain::ChainSet;
use crate::problem::{fingerprint_of, EvaluationFailure, Problem, ProblemIdentity};
use crate::rundir::{RunDirectory, RunMeta, SampleLog};
use crate::sample::{Evaluation, SampleRecord};
use crate::{Error, Result};

/// Live counters of a run, shareable with other threads.
///
/// `niterations` is published only after the corresponding record has been
/// written and flushed, so an observer reading `k` can rely on `k` complete
/// records in the log.
#[derive(Debug, Default)]
pub struct RunProgress {
    niterations: AtomicU64,
    phase: AtomicUsize,
    stop: AtomicBool,
}

impl RunProgress {
    /// Number of complete records in the log.
    #[must_use]
    pub fn niterations(&self) -> u64 {
        self.niterations.load(Ordering::Acquire)
    }

    /// Position of the sampling phase currently drawn from.
    #[must_use]
    pub fn phase(&self) -> usize {
        self.phase.load(Ordering::Relaxed)
    }

    /// Ask the loop to stop at the next batch boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every phase drew its samples
    Completed,
    /// The strategy's plateau criterion fired
    Plateau,
    /// An external stop was requested
    Stopped,
    /// `RunOptions::max_iterations` was reached
    IterationLimit,
}

/// Summary of one `optimize` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Records in the log at return
    pub niterations: u64,
    /// Records appended by this invocation
    pub new_samples: u64,
    /// Failed evaluations appended by this invocation
    pub failures: u64,
    /// Why the loop stopped
    pub stop_reason: StopReason,
    /// Index and global misfit of the best sample in the log
    pub best: Option<(u64, f64)>,
}

/// Bootstrap ensemble optimizer.
///
/// Drives a [`Strategy`] over a [`Problem`], persisting every evaluation to
/// the run directory and keeping one bounded best-of chain per bootstrap
/// weighting.
///
/// # Example
///
/// ```rust,no_run
/// use trueno_ensemble::optimizer::{
///     BootstrapOptimizer, HighScoreStrategy, Optimizer, OptimizerConfig, RunOptions,
/// };
/// # fn run(problem: &dyn trueno_ensemble::problem::Problem) -> trueno_ensemble::Result<()> {
/// let config = OptimizerConfig::builder().nbootstrap(50).seed(1).build()?;
/// let optimizer = BootstrapOptimizer::new(config, HighScoreStrategy::default());
/// let outcome = optimizer.optimize(problem, "runs/event-a".as_ref(), &RunOptions::default())?;
/// println!("{} samples, best {:?}", outcome.niterations, outcome.best);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BootstrapOptimizer<S = HighScoreStrategy> {
    config: OptimizerConfig,
    strategy: S,
    weights: Option<BootstrapWeights>,
    progress: Arc<RunProgress>,
}

impl<S: Strategy> BootstrapOptimizer<S> {
    /// Create an optimizer using classic bootstrap weights.
    #[must_use]
    pub fn new(config: OptimizerConfig, strategy: S) -> Self {
        Self {
            config,
            strategy,
            weights: None,
            progress: Arc::new(RunProgress::default()),
        }
    }

    /// Use externally supplied bootstrap weights instead of the classic scheme.
    #[must_use]
    pub fn with_bootstrap_weights(mut self, weights: BootstrapWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Sampling strategy.
    #[must_use]
    pub const fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Shared progress handle.
    #[must_use]
    pub fn progress(&self) -> Arc<RunProgress> {
        Arc::clone(&self.progress)
    }

    fn fingerprint(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "sampling": self.config.fingerprint_value(),
            "strategy": self.strategy.describe()?,
        }))
    }

    fn bootstrap_weights(&self, identity: &ProblemIdentity) -> Result<BootstrapWeights> {
        let Some(weights) = &self.weights else {
            return Ok(BootstrapWeights::classic(
                identity.ntargets(),
                self.config.nbootstrap(),
                self.config.bootstrap_seed(),
            ));
        };
        if weights.ntargets() != identity.ntargets() {
            return Err(Error::InvalidInput(format!(
                "bootstrap weights cover {} targets, problem has {}",
                weights.ntargets(),
                identity.ntargets()
            )));
        }
        if weights.nbootstrap() != self.config.nbootstrap() {
            return Err(Error::InvalidInput(format!(
                "bootstrap weights define {} chains, configuration asks for {}",
                weights.nbootstrap(),
                self.config.nbootstrap()
            )));
        }
        Ok(weights.clone())
    }

    fn rng_for(&self, index: u64) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed());
        rng.set_stream(index);
        rng
    }

    /// Prepare the run directory: start fresh, restart under `force`, or
    /// resume after checking that nothing changed.
    fn open_run(
        &self,
        run: &RunDirectory,
        meta: &RunMeta,
        weights: &BootstrapWeights,
        force: bool,
    ) -> Result<(SampleLog, Vec<SampleRecord>)> {
        let sync = self.config.sync_every_record();
        if run.has_content()? {
            if force {
                warn!(run = %run.path().display(), "discarding existing run");
                run.clear()?;
            } else {
                if !run.meta_path().exists() {
                    return Err(Error::ForceRequired(run.path().to_path_buf()));
                }
                run.read_meta()?.ensure_compatible(meta)?;
                let persisted = run.read_bootstrap()?;
                if persisted != *weights {
                    return Err(Error::ConfigMismatch {
                        field: "bootstrap weights".to_string(),
                        persisted: fingerprint_of(&persisted)?,
                        current: fingerprint_of(weights)?,
                    });
                }
                if !run.log_path().exists() {
                    return Ok((SampleLog::create(run.log_path(), sync)?, Vec::new()));
                }
                return SampleLog::open_append(run.log_path(), sync);
            }
        }

        fs::create_dir_all(run.path())?;
        run.write_meta(meta)?;
        run.write_bootstrap(weights)?;
        Ok((SampleLog::create(run.log_path(), sync)?, Vec::new()))
    }
}

impl<S: Strategy> Optimizer for BootstrapOptimizer<S> {
    fn optimize(
        &self,
        problem: &dyn Problem,
        run_path: &Path,
        options: &RunOptions,
    ) -> Result<RunOutcome> {
        let identity = ProblemIdentity::of(problem)?;
        let weights = self.bootstrap_weights(&identity)?;
        let meta = RunMeta::new(
            identity.clone(),
            self.config.nbootstrap(),
            self.config.chain_size(),
            self.fingerprint()?,
        )?;
        let run = RunDirectory::new(run_path);
        let (mut log, mut records) = self.open_run(&run, &meta, &weights, options.force)?;

        let batch_size = self.config.batch_size();
        let batch = batch_size as u64;
        let total = self.strategy.max_iterations();
        let limit = options.max_iterations.map_or(total, |n| n.min(total));

        // Records of an unfinished batch are not in the chains yet.
        let aligned = records.len() - records.len() % batch_size;
        let mut chains = ChainSet::replay(&records[..aligned], weights.nchains(), self.config.chain_size())?;
        let mut status = ConvergenceStatus::default();
        for record in &records[..aligned] {
            status.observe(record);
        }
        let mut offered = aligned;

        let start = log.len();
        self.progress.niterations.store(start, Ordering::Release);
        self.progress.stop.store(false, Ordering::Release);
        info!(
            run = %run.path().display(),
            problem = identity.name(),
            resume_from = start,
            limit,
            "optimizer started"
        );

        let mut failures = 0u64;
        let mut phase = None;
        let stop_reason = loop {
            let next = log.len();
            if offered == records.len() && self.strategy.is_converged(&status) {
                break StopReason::Plateau;
            }
            if next >= total {
                break StopReason::Completed;
            }
            if next >= limit {
                break StopReason::IterationLimit;
            }
            if self.progress.is_stop_requested()
                || options
                    .stop
                    .as_ref()
                    .is_some_and(|stop| stop.load(Ordering::Acquire))
            {
                break StopReason::Stopped;
            }

            let (position, label) = self.strategy.phase(next);
            if phase != Some(position) {
                info!(phase = label, index = next, "sampling phase");
                self.progress.phase.store(position, Ordering::Relaxed);
                phase = Some(position);
            }

            let batch_end = (next / batch * batch + batch).min(limit);
            let context = ProposalContext::new(identity.parameters(), &records, &chains);
            let proposals: Vec<(u64, Vec<f64>)> = (next..batch_end)
                .map(|index| {
                    let mut rng = self.rng_for(index);
                    (index, self.strategy.propose(index, &context, &mut rng))
                })
                .collect();

            for result in evaluate_batch(problem, &weights, proposals, self.config.max_retries()) {
                let record = result?;
                log.append(&record)?;
                if let Evaluation::Failed { reason } = record.evaluation() {
                    failures += 1;
                    warn!(index = record.index(), %reason, "evaluation failed");
                }
                records.push(record);
                self.progress.niterations.store(log.len(), Ordering::Release);
            }

            if log.len() % batch == 0 {
                for record in &records[offered..] {
                    chains.offer(record)?;
                    status.observe(record);
                }
                offered = records.len();
                debug!(
                    niterations = log.len(),
                    best = ?status.best(),
                    "batch complete"
                );
            }
        };

        for record in &records[offered..] {
            status.observe(record);
        }
        let outcome = RunOutcome {
            niterations: log.len(),
            new_samples: log.len() - start,
            failures,
            stop_reason,
            best: status.best(),
        };
        info!(
            niterations = outcome.niterations,
            new_samples = outcome.new_samples,
            failures,
            reason = ?stop_reason,
            "optimizer stopped"
        );
        Ok(outcome)
    }

    fn niterations(&self) -> u64 {
        self.progress.niterations()
    }
}

#[cfg(feature = "rayon")]
fn evaluate_batch(
    problem: &dyn Problem,
    weights: &BootstrapWeights,
    proposals: Vec<(u64, Vec<f64>)>,
    max_retries: u32,
) -> Vec<Result<SampleRecord>> {
    use rayon::prelude::*;
    proposals
        .into_par_iter()
        .map(|(index, model)| evaluate_one(problem, weights, index, model, max_retries))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn evaluate_batch(
    problem: &dyn Problem,
    weights: &BootstrapWeights,
    proposals: Vec<(u64, Vec<f64>)>,
    max_retries: u32,
) -> Vec<Result<SampleRecord>> {
    proposals
        .into_iter()
        .map(|(index, model)| evaluate_one(problem, weights, index, model, max_retries))
        .collect()
}

/// Evaluate one model, retrying while the engine reports itself unavailable.
fn evaluate_one(
    problem: &dyn Problem,
    weights: &BootstrapWeights,
    index: u64,
    model: Vec<f64>,
    max_retries: u32,
) -> Result<SampleRecord> {
    let mut attempts = 0u32;
    let contributions = loop {
        attempts += 1;
        match problem.evaluate(&model) {
            Ok(contributions) => break contributions,
            Err(EvaluationFailure::Infeasible(reason)) => {
                return Ok(SampleRecord::failed(index, model, reason));
            }
            Err(EvaluationFailure::Unavailable(reason)) => {
                if attempts > max_retries {
                    return Err(Error::EngineStalled {
                        index,
                        attempts,
                        reason,
                    });
                }
                debug!(index, attempts, %reason, "engine unavailable, retrying");
            }
        }
    };

    if contributions.len() != weights.ntargets() {
        return Err(Error::ConfigMismatch {
            field: "number of targets".to_string(),
            persisted: weights.ntargets().to_string(),
            current: contributions.len().to_string(),
        });
    }
    let misfits = match weights.combine(&contributions) {
        Ok(misfits) => misfits,
        Err(failure) => return Ok(SampleRecord::failed(index, model, failure.to_string())),
    };

    let derived = problem.derive(&model);
    let declared = problem.derived_parameters();
    if derived.len() != declared.len() {
        return Err(Error::InvalidInput(format!(
            "problem derived {} values but declares {} derived parameters",
            derived.len(),
            declared.len()
        )));
    }
    if let Some((p, _)) = declared.iter().zip(&derived).find(|(_, v)| !v.is_finite()) {
        return Ok(SampleRecord::failed(
            index,
            model,
            format!("derived parameter {} is not finite", p.name()),
        ));
    }
    Ok(SampleRecord::evaluated(index, model, misfits, derived))
}
