//! High-score sampling
//!
//! A sequence of phases, each drawing a fixed number of samples:
//!
//! - **uniform**: independent uniform draws within the parameter bounds
//! - **directed**: pick one chain at random, take a center among its current
//!   best models and draw from a normal distribution around it. The
//!   per-parameter deviation is the spread of the chain's best models times a
//!   scatter scale that shrinks geometrically across the phase. Out-of-bounds
//!   draws are retried `ntries_preconstrain` times, then clipped.
//!
//! Proposals only read the chain state handed in by the run loop, so a
//! strategy instance carries no state between samples.

use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use super::strategy::{ConvergenceStatus, ProposalContext, Strategy};
use crate::problem::Parameter;
use crate::stats::{mean, std_dev};
use crate::{Error, Result};

/// Floor on the spread of a chain, as a fraction of the parameter width.
const MIN_SCATTER_FRACTION: f64 = 1e-3;

/// How a directed draw picks its center among a chain's best models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartingPoint {
    /// Prefer isolated models: weight `1 / (1 + neighbours within one deviation)`
    Excentricity,
    /// Any of the chain's best models, uniformly
    Random,
    /// Per-parameter mean of the chain's best models
    Mean,
}

/// One sampling phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplerPhase {
    /// Uniform draws within bounds
    Uniform {
        /// Samples drawn in this phase
        niterations: u64,
    },
    /// Normal draws around the best models of a random chain
    Directed {
        /// Samples drawn in this phase
        niterations: u64,
        /// Scatter scale at the start of the phase
        scatter_scale_begin: f64,
        /// Scatter scale at the end of the phase
        scatter_scale_end: f64,
        /// Center selection rule
        starting_point: StartingPoint,
        /// Draws attempted before clipping into bounds
        ntries_preconstrain: u32,
    },
}

impl SamplerPhase {
    /// Samples drawn in this phase.
    #[must_use]
    pub const fn niterations(&self) -> u64 {
        match self {
            Self::Uniform { niterations } | Self::Directed { niterations, .. } => *niterations,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Uniform { .. } => "uniform",
            Self::Directed { .. } => "directed",
        }
    }

    fn validate(&self) -> Result<()> {
        if self.niterations() == 0 {
            return Err(Error::InvalidInput(format!(
                "{} phase must draw at least one sample",
                self.label()
            )));
        }
        if let Self::Directed {
            scatter_scale_begin,
            scatter_scale_end,
            ntries_preconstrain,
            ..
        } = self
        {
            for scale in [scatter_scale_begin, scatter_scale_end] {
                if !scale.is_finite() || *scale <= 0.0 {
                    return Err(Error::InvalidInput(format!(
                        "scatter scale must be positive and finite, got {scale}"
                    )));
                }
            }
            if *ntries_preconstrain == 0 {
                return Err(Error::InvalidInput(
                    "ntries_preconstrain must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// When sampling stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// After every phase has drawn its samples
    Iterations,
    /// Early, once the global best has not improved by more than
    /// `min_improvement` during the last `patience` samples
    Plateau {
        /// Samples without significant improvement before stopping
        patience: u64,
        /// Smallest decrease of the global best that counts as improvement
        min_improvement: f64,
    },
}

/// Phased uniform-then-directed sampler.
///
/// # Example
///
/// ```rust
/// use trueno_ensemble::optimizer::{HighScoreStrategy, SamplerPhase, Strategy, Termination};
///
/// let strategy = HighScoreStrategy::new(
///     vec![SamplerPhase::Uniform { niterations: 100 }],
///     Termination::Iterations,
/// )?;
/// assert_eq!(strategy.max_iterations(), 100);
/// # Ok::<(), trueno_ensemble::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighScoreStrategy {
    phases: Vec<SamplerPhase>,
    termination: Termination,
}

impl Default for HighScoreStrategy {
    fn default() -> Self {
        Self {
            phases: vec![
                SamplerPhase::Uniform { niterations: 1000 },
                SamplerPhase::Directed {
                    niterations: 20_000,
                    scatter_scale_begin: 2.0,
                    scatter_scale_end: 0.5,
                    starting_point: StartingPoint::Excentricity,
                    ntries_preconstrain: 1000,
                },
            ],
            termination: Termination::Iterations,
        }
    }
}

impl HighScoreStrategy {
    /// Create a strategy from its phases.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if there are no phases, the first phase
    /// is not uniform, a phase draws no samples, a scatter scale is not
    /// positive, or the plateau settings are unusable.
    pub fn new(phases: Vec<SamplerPhase>, termination: Termination) -> Result<Self> {
        match phases.first() {
            None => {
                return Err(Error::InvalidInput(
                    "at least one sampling phase is required".to_string(),
                ))
            }
            Some(SamplerPhase::Directed { .. }) => {
                return Err(Error::InvalidInput(
                    "the first sampling phase must be uniform".to_string(),
                ))
            }
            Some(SamplerPhase::Uniform { .. }) => {}
        }
        for phase in &phases {
            phase.validate()?;
        }
        if let Termination::Plateau {
            patience,
            min_improvement,
        } = termination
        {
            if patience == 0 || !min_improvement.is_finite() || min_improvement < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "plateau termination needs patience > 0 and min_improvement >= 0, \
                     got {patience} and {min_improvement}"
                )));
            }
        }
        Ok(Self {
            phases,
            termination,
        })
    }

    /// Sampling phases in order.
    #[must_use]
    pub fn phases(&self) -> &[SamplerPhase] {
        &self.phases
    }

    /// Termination rule.
    #[must_use]
    pub const fn termination(&self) -> Termination {
        self.termination
    }

    /// Phase position, phase and offset within it for sample `index`.
    ///
    /// Indices past the end belong to the last phase.
    fn locate(&self, index: u64) -> (usize, &SamplerPhase, u64) {
        let mut start = 0;
        for (i, phase) in self.phases.iter().enumerate() {
            let end = start + phase.niterations();
            if index < end {
                return (i, phase, index - start);
            }
            start = end;
        }
        let last = self.phases.len() - 1;
        let phase = &self.phases[last];
        (last, phase, phase.niterations().saturating_sub(1))
    }
}

impl Strategy for HighScoreStrategy {
    fn describe(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn max_iterations(&self) -> u64 {
        self.phases.iter().map(SamplerPhase::niterations).sum()
    }

    fn propose(&self, index: u64, context: &ProposalContext<'_>, rng: &mut ChaCha8Rng) -> Vec<f64> {
        match self.locate(index) {
            (_, SamplerPhase::Uniform { .. }, _) => uniform(context.parameters(), rng),
            (
                _,
                SamplerPhase::Directed {
                    niterations,
                    scatter_scale_begin,
                    scatter_scale_end,
                    starting_point,
                    ntries_preconstrain,
                },
                offset,
            ) => {
                let scale = interpolate_scale(*scatter_scale_begin, *scatter_scale_end, offset, *niterations);
                directed(context, scale, *starting_point, *ntries_preconstrain, rng)
            }
        }
    }

    fn phase(&self, index: u64) -> (usize, &'static str) {
        let (position, phase, _) = self.locate(index);
        (position, phase.label())
    }

    fn is_converged(&self, status: &ConvergenceStatus) -> bool {
        let Termination::Plateau {
            patience,
            min_improvement,
        } = self.termination
        else {
            return false;
        };
        if status.niterations() < self.phases[0].niterations() {
            return false;
        }
        last_significant_improvement(status, min_improvement)
            .is_some_and(|last| status.niterations() - (last + 1) >= patience)
    }
}

/// Index of the last sample that lowered the global best by more than
/// `min_improvement` relative to the previous significant best.
fn last_significant_improvement(status: &ConvergenceStatus, min_improvement: f64) -> Option<u64> {
    let mut reference = f64::INFINITY;
    let mut last = None;
    for &(index, gm) in status.improvements() {
        if reference.is_infinite() || reference - gm > min_improvement {
            reference = gm;
            last = Some(index);
        }
    }
    last
}

/// Geometric interpolation from `begin` at offset 0 to `end` at the last sample.
#[allow(clippy::cast_precision_loss)]
fn interpolate_scale(begin: f64, end: f64, offset: u64, niterations: u64) -> f64 {
    if niterations <= 1 {
        return begin;
    }
    let t = offset as f64 / (niterations - 1) as f64;
    begin * (end / begin).powf(t)
}

fn uniform(parameters: &[Parameter], rng: &mut ChaCha8Rng) -> Vec<f64> {
    parameters
        .iter()
        .map(|p| rng.gen_range(p.min()..=p.max()))
        .collect()
}

fn directed(
    context: &ProposalContext<'_>,
    scale: f64,
    starting_point: StartingPoint,
    ntries: u32,
    rng: &mut ChaCha8Rng,
) -> Vec<f64> {
    let parameters = context.parameters();
    let chains = context.chains();
    let picked = rng.gen_range(0..chains.nchains());
    let chain = chains
        .chain(picked)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| chains.global());

    let models: Vec<&[f64]> = chain
        .indices()
        .into_iter()
        .filter_map(|i| context.model(i))
        .collect();
    if models.is_empty() {
        return uniform(parameters, rng);
    }

    let spread: Vec<f64> = parameters
        .iter()
        .enumerate()
        .map(|(j, p)| {
            let column: Vec<f64> = models.iter().map(|m| m[j]).collect();
            std_dev(&column)
                .unwrap_or(0.0)
                .max(p.width() * MIN_SCATTER_FRACTION)
        })
        .collect();

    let center: Vec<f64> = match starting_point {
        StartingPoint::Mean => (0..parameters.len())
            .map(|j| {
                let column: Vec<f64> = models.iter().map(|m| m[j]).collect();
                mean(&column).unwrap_or(0.0)
            })
            .collect(),
        StartingPoint::Random => models[rng.gen_range(0..models.len())].to_vec(),
        StartingPoint::Excentricity => models[pick_excentric(&models, &spread, rng)].to_vec(),
    };

    parameters
        .iter()
        .zip(center.iter().zip(&spread))
        .map(|(p, (c, s))| draw_within(p, *c, s * scale, ntries, rng))
        .collect()
}

/// Pick a model, favouring those with few neighbours within one deviation.
fn pick_excentric(models: &[&[f64]], spread: &[f64], rng: &mut ChaCha8Rng) -> usize {
    let weights: Vec<f64> = models
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let neighbours = models
                .iter()
                .enumerate()
                .filter(|(k, b)| {
                    *k != i
                        && a.iter()
                            .zip(b.iter())
                            .zip(spread)
                            .map(|((x, y), s)| ((x - y) / s).powi(2))
                            .sum::<f64>()
                            < 1.0
                })
                .count();
            1.0 / (1.0 + f64::from(u32::try_from(neighbours).unwrap_or(u32::MAX)))
        })
        .collect();
    WeightedIndex::new(&weights).map_or(0, |dist| dist.sample(rng))
}

fn draw_within(parameter: &Parameter, center: f64, sigma: f64, ntries: u32, rng: &mut ChaCha8Rng) -> f64 {
    let mut value = center;
    for _ in 0..ntries {
        let z: f64 = StandardNormal.sample(rng);
        value = center + sigma * z;
        if parameter.contains(value) {
            return value;
        }
    }
    parameter.clip(value)
}
