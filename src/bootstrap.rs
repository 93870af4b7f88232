//! Bootstrap weighting of per-target misfits
//!
//! Chain 0 is the global chain (unit weights). Chains `1..=nbootstrap` each
//! carry a fixed weight vector over targets. The classic scheme draws
//! `ntargets` targets with replacement and weights every target by how often
//! it was drawn; callers with their own scheme pass a matrix instead.
//!
//! Chain misfits are L2 norm-normalized:
//!
//! ```text
//! m_b = sqrt( Σ_t w_bt · misfit_t² / Σ_t w_bt · norm_t² )
//! ```

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::problem::{EvaluationFailure, TargetMisfit};
use crate::sample::MisfitVector;
use crate::{Error, Result};

/// Fixed per-chain target weights for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapWeights {
    ntargets: usize,
    seed: Option<u64>,
    weights: Vec<Vec<f64>>,
}

impl BootstrapWeights {
    /// Classic bootstrap: resample targets with replacement, seeded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn classic(ntargets: usize, nbootstrap: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let weights = (0..nbootstrap)
            .map(|_| {
                let mut counts = vec![0.0; ntargets];
                for _ in 0..ntargets {
                    counts[rng.gen_range(0..ntargets)] += 1.0;
                }
                counts
            })
            .collect();

        Self {
            ntargets,
            seed: Some(seed),
            weights,
        }
    }

    /// Use an externally supplied weight matrix (`nbootstrap` rows of `ntargets`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a row has the wrong length or a
    /// weight is negative or not finite.
    pub fn from_matrix(ntargets: usize, weights: Vec<Vec<f64>>) -> Result<Self> {
        for (row, chain_weights) in weights.iter().enumerate() {
            if chain_weights.len() != ntargets {
                return Err(Error::InvalidInput(format!(
                    "bootstrap chain {} has {} weights, expected {ntargets}",
                    row + 1,
                    chain_weights.len()
                )));
            }
            if chain_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(Error::InvalidInput(format!(
                    "bootstrap chain {} has a negative or non-finite weight",
                    row + 1
                )));
            }
        }

        Ok(Self {
            ntargets,
            seed: None,
            weights,
        })
    }

    /// Number of bootstrap chains (excluding the global chain).
    #[must_use]
    pub fn nbootstrap(&self) -> usize {
        self.weights.len()
    }

    /// Number of chains including the global chain.
    #[must_use]
    pub fn nchains(&self) -> usize {
        self.weights.len() + 1
    }

    /// Number of targets each weight vector covers.
    #[must_use]
    pub const fn ntargets(&self) -> usize {
        self.ntargets
    }

    /// Seed used by [`BootstrapWeights::classic`], if any.
    #[must_use]
    pub const fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Weights of bootstrap chain `chain` (1-based; chain 0 has unit weights).
    #[must_use]
    pub fn chain_weights(&self, chain: usize) -> Option<&[f64]> {
        chain
            .checked_sub(1)
            .and_then(|row| self.weights.get(row))
            .map(Vec::as_slice)
    }

    /// Combine per-target contributions into the misfit of every chain.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluationFailure::Infeasible`] if any contribution is not
    /// finite. The caller must have checked that `contributions` has
    /// [`BootstrapWeights::ntargets`] entries.
    pub fn combine(
        &self,
        contributions: &[TargetMisfit],
    ) -> std::result::Result<MisfitVector, EvaluationFailure> {
        if let Some(t) = contributions
            .iter()
            .position(|c| !c.misfit.is_finite() || !c.norm.is_finite())
        {
            return Err(EvaluationFailure::Infeasible(format!(
                "target {t} returned a non-finite misfit or norm"
            )));
        }

        let mut values = Vec::with_capacity(self.nchains());
        values.push(normalized(contributions.iter().map(|c| (1.0, c)))); // global
        for chain_weights in &self.weights {
            values.push(normalized(chain_weights.iter().copied().zip(contributions)));
        }
        Ok(MisfitVector::new(values))
    }
}

fn normalized<'a>(weighted: impl Iterator<Item = (f64, &'a TargetMisfit)>) -> f64 {
    let (num, den) = weighted.fold((0.0, 0.0), |(num, den), (w, c)| {
        (num + w * c.misfit * c.misfit, den + w * c.norm * c.norm)
    });
    if den > 0.0 {
        (num / den).sqrt()
    } else {
        f64::INFINITY
    }
}
