//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use trueno_ensemble::optimizer::{
    BootstrapOptimizer, HighScoreStrategy, OptimizerConfig, SamplerPhase, StartingPoint, Termination,
};
use trueno_ensemble::problem::{EvaluationFailure, Parameter, Problem, TargetMisfit};

/// Station positions the quadratic targets pull towards.
const TARGETS: [(f64, f64); 4] = [(1.0, -1.0), (1.5, -0.5), (0.5, -1.5), (1.2, -1.2)];

/// Two-parameter quadratic misfit with a derived radius.
///
/// Models with `x > infeasible_above` are rejected as infeasible.
pub struct Quadratic {
    params: Vec<Parameter>,
    derived: Vec<Parameter>,
    infeasible_above: f64,
    calls: AtomicU64,
    /// Set once this many evaluations have happened
    stop_after: Option<(u64, Arc<AtomicBool>)>,
    /// Every call from this one on reports the engine as unavailable
    unavailable_from: Option<u64>,
}

impl Quadratic {
    pub fn new() -> Self {
        Self {
            params: vec![Parameter::new("x", -5.0, 5.0), Parameter::new("y", -5.0, 5.0)],
            derived: vec![Parameter::new("radius", 0.0, 10.0)],
            infeasible_above: f64::INFINITY,
            calls: AtomicU64::new(0),
            stop_after: None,
            unavailable_from: None,
        }
    }

    pub fn infeasible_above(mut self, x: f64) -> Self {
        self.infeasible_above = x;
        self
    }

    pub fn stop_after(mut self, calls: u64, flag: Arc<AtomicBool>) -> Self {
        self.stop_after = Some((calls, flag));
        self
    }

    pub fn unavailable_from(mut self, calls: u64) -> Self {
        self.unavailable_from = Some(calls);
        self
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.params = vec![Parameter::new("x", min, max), Parameter::new("y", min, max)];
        self
    }
}

impl Problem for Quadratic {
    fn name(&self) -> &str {
        "quadratic"
    }

    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn ntargets(&self) -> usize {
        TARGETS.len()
    }

    fn evaluate(&self, model: &[f64]) -> Result<Vec<TargetMisfit>, EvaluationFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((after, flag)) = &self.stop_after {
            if call + 1 >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if self.unavailable_from.is_some_and(|from| call >= from) {
            return Err(EvaluationFailure::Unavailable("engine busy".to_string()));
        }

        let (x, y) = (model[0], model[1]);
        if x > self.infeasible_above {
            return Err(EvaluationFailure::Infeasible(format!("x = {x} is outside the feasible region")));
        }
        Ok(TARGETS
            .iter()
            .map(|(tx, ty)| TargetMisfit::new(((x - tx).powi(2) + (y - ty).powi(2)).sqrt(), 5.0))
            .collect())
    }

    fn derived_parameters(&self) -> &[Parameter] {
        &self.derived
    }

    fn derive(&self, model: &[f64]) -> Vec<f64> {
        vec![model[0].hypot(model[1])]
    }
}

pub fn strategy(nuniform: u64, ndirected: u64) -> HighScoreStrategy {
    HighScoreStrategy::new(
        vec![
            SamplerPhase::Uniform { niterations: nuniform },
            SamplerPhase::Directed {
                niterations: ndirected,
                scatter_scale_begin: 2.0,
                scatter_scale_end: 0.5,
                starting_point: StartingPoint::Excentricity,
                ntries_preconstrain: 20,
            },
        ],
        Termination::Iterations,
    )
    .unwrap()
}

pub fn config(seed: u64, batch_size: usize) -> OptimizerConfig {
    OptimizerConfig::builder()
        .nbootstrap(6)
        .chain_size(5)
        .seed(seed)
        .batch_size(batch_size)
        .sync_every_record(false)
        .build()
        .unwrap()
}

pub fn optimizer(seed: u64, batch_size: usize) -> BootstrapOptimizer {
    BootstrapOptimizer::new(config(seed, batch_size), strategy(30, 60))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
