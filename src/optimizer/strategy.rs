//! Strategy seam: what a sampling strategy sees and decides

use rand_chacha::ChaCha8Rng;

use crate::chain::ChainSet;
use crate::problem::Parameter;
use crate::sample::SampleRecord;
use crate::Result;

/// Read-only state handed to [`Strategy::propose`].
///
/// Every proposal in a batch sees the same context: the chains as of the
/// start of the batch, and the log records they were built from.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext<'a> {
    parameters: &'a [Parameter],
    records: &'a [SampleRecord],
    chains: &'a ChainSet,
}

impl<'a> ProposalContext<'a> {
    pub(crate) const fn new(
        parameters: &'a [Parameter],
        records: &'a [SampleRecord],
        chains: &'a ChainSet,
    ) -> Self {
        Self {
            parameters,
            records,
            chains,
        }
    }

    /// Free parameters of the problem, in model order.
    #[must_use]
    pub const fn parameters(&self) -> &'a [Parameter] {
        self.parameters
    }

    /// Live chains (global first).
    #[must_use]
    pub const fn chains(&self) -> &'a ChainSet {
        self.chains
    }

    /// Model vector of sample `index`, if it is in the log.
    #[must_use]
    pub fn model(&self, index: u64) -> Option<&'a [f64]> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.records.get(i))
            .map(SampleRecord::model)
    }
}

/// History of the global best, maintained by the run loop.
///
/// An entry is recorded every time a sample lowers the best global misfit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvergenceStatus {
    niterations: u64,
    improvements: Vec<(u64, f64)>,
}

impl ConvergenceStatus {
    /// Account for the next record in log order.
    pub fn observe(&mut self, record: &SampleRecord) {
        self.niterations = record.index() + 1;
        if let Some(gm) = record.global_misfit() {
            if self.best().map_or(true, |(_, best)| gm < best) {
                self.improvements.push((record.index(), gm));
            }
        }
    }

    /// Number of samples observed.
    #[must_use]
    pub const fn niterations(&self) -> u64 {
        self.niterations
    }

    /// Index and global misfit of the best sample so far.
    #[must_use]
    pub fn best(&self) -> Option<(u64, f64)> {
        self.improvements.last().copied()
    }

    /// Every `(index, global misfit)` that improved on its predecessors.
    #[must_use]
    pub fn improvements(&self) -> &[(u64, f64)] {
        &self.improvements
    }
}

/// A sampling strategy.
///
/// Proposals must be a pure function of `(index, context, rng)`: the run
/// loop hands each index its own random stream, which is what makes an
/// interrupted and resumed run identical to an uninterrupted one.
pub trait Strategy: Send + Sync {
    /// Serializable description, hashed into the run fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the strategy cannot be serialized.
    fn describe(&self) -> Result<serde_json::Value>;

    /// Total number of samples this strategy draws.
    fn max_iterations(&self) -> u64;

    /// Propose the model for sample `index`.
    fn propose(&self, index: u64, context: &ProposalContext<'_>, rng: &mut ChaCha8Rng) -> Vec<f64>;

    /// Position and label of the sampling phase `index` belongs to.
    fn phase(&self, _index: u64) -> (usize, &'static str) {
        (0, "sampling")
    }

    /// Whether sampling should stop early. Checked between batches.
    fn is_converged(&self, _status: &ConvergenceStatus) -> bool {
        false
    }
}
