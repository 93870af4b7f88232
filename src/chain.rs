//! Bounded best-of-N chains
//!
//! **Problem**: every evaluated model must be ranked in `nbootstrap + 1`
//! independent orderings, but only the `nbest` lowest misfits of each
//! ordering are ever reported.
//!
//! **Solution**: one bounded max-heap per chain. The heap top is the worst
//! kept entry, so a candidate is admitted in O(log nbest) by comparing it
//! against the top and evicting it.
//!
//! Ordering is total: misfit first (`f64::total_cmp`), then sample index.
//! Equal misfits therefore keep the earliest index, independent of the
//! order in which concurrent evaluations finished.
//!
//! Chains hold sample indices, never model copies; the sample log is the
//! arena they index into.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::sample::SampleRecord;
use crate::{Error, Result};

/// A (sample index, misfit) pair kept by a chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainEntry {
    /// Sample index in the run log
    pub index: u64,
    /// Misfit of that sample under the chain's weighting
    pub misfit: f64,
}

impl PartialEq for ChainEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ChainEntry {}

impl Ord for ChainEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Normal comparison for max-heap (worst at top)
        self.misfit
            .total_cmp(&other.misfit)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for ChainEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Best-of-`nbest` register for one chain weighting.
#[derive(Debug, Clone)]
pub struct Chain {
    nbest: usize,
    heap: BinaryHeap<ChainEntry>,
    last_offered: Option<u64>,
}

impl Chain {
    /// Create an empty chain keeping at most `nbest` entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `nbest` is zero.
    pub fn new(nbest: usize) -> Result<Self> {
        if nbest == 0 {
            return Err(Error::InvalidInput("nbest must be greater than 0".to_string()));
        }
        Ok(Self {
            nbest,
            heap: BinaryHeap::with_capacity(nbest),
            last_offered: None,
        })
    }

    /// Offer a sample. Returns whether it was admitted.
    ///
    /// Samples must be offered in strictly increasing index order. NaN
    /// misfits are never admitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if `index` does not increase
    /// or the bound would be exceeded.
    pub fn offer(&mut self, index: u64, misfit: f64) -> Result<bool> {
        if self.last_offered.is_some_and(|last| index <= last) {
            return Err(Error::InvariantViolation(format!(
                "sample {index} offered to a chain after sample {}",
                self.last_offered.unwrap_or_default()
            )));
        }
        self.last_offered = Some(index);

        if misfit.is_nan() {
            return Ok(false);
        }

        let entry = ChainEntry { index, misfit };
        let admitted = if self.heap.len() < self.nbest {
            self.heap.push(entry);
            true
        } else if self.heap.peek().is_some_and(|worst| entry < *worst) {
            self.heap.pop();
            self.heap.push(entry);
            true
        } else {
            false
        };

        if self.heap.len() > self.nbest {
            return Err(Error::InvariantViolation(format!(
                "chain holds {} entries, bound is {}",
                self.heap.len(),
                self.nbest
            )));
        }
        Ok(admitted)
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn nbest(&self) -> usize {
        self.nbest
    }

    /// Number of entries kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no entry is kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether the chain holds `nbest` entries.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.heap.len() == self.nbest
    }

    /// Worst kept entry (the admission threshold once full).
    #[must_use]
    pub fn worst(&self) -> Option<ChainEntry> {
        self.heap.peek().copied()
    }

    /// Best kept entry.
    #[must_use]
    pub fn best(&self) -> Option<ChainEntry> {
        self.heap.iter().min().copied()
    }

    /// Kept entries in ascending misfit order.
    #[must_use]
    pub fn entries(&self) -> Vec<ChainEntry> {
        let mut entries = self.heap.clone().into_vec();
        entries.sort_unstable();
        entries
    }

    /// Kept sample indices in ascending misfit order.
    #[must_use]
    pub fn indices(&self) -> Vec<u64> {
        self.entries().into_iter().map(|e| e.index).collect()
    }
}

/// One chain per weighting: index 0 global, `1..=nbootstrap` bootstrap.
#[derive(Debug, Clone)]
pub struct ChainSet {
    chains: Vec<Chain>,
}

impl ChainSet {
    /// Create `nchains` empty chains of size `nbest`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `nchains` or `nbest` is zero.
    pub fn new(nchains: usize, nbest: usize) -> Result<Self> {
        if nchains == 0 {
            return Err(Error::InvalidInput(
                "at least the global chain is required".to_string(),
            ));
        }
        let chains = (0..nchains)
            .map(|_| Chain::new(nbest))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { chains })
    }

    /// Rebuild chains by replaying records in log order.
    ///
    /// # Errors
    ///
    /// See [`ChainSet::offer`].
    pub fn replay<'a>(
        records: impl IntoIterator<Item = &'a SampleRecord>,
        nchains: usize,
        nbest: usize,
    ) -> Result<Self> {
        let mut set = Self::new(nchains, nbest)?;
        for record in records {
            set.offer(record)?;
        }
        Ok(set)
    }

    /// Offer a record to every chain. Failed evaluations are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageError`] if the record carries the wrong number
    /// of chain misfits, or propagates [`Chain::offer`] errors.
    pub fn offer(&mut self, record: &SampleRecord) -> Result<()> {
        let Some(misfits) = record.misfits() else {
            return Ok(());
        };
        if misfits.len() != self.chains.len() {
            return Err(Error::StorageError(format!(
                "sample {} has {} chain misfits, expected {}",
                record.index(),
                misfits.len(),
                self.chains.len()
            )));
        }
        for (chain, misfit) in self.chains.iter_mut().zip(misfits.as_slice()) {
            chain.offer(record.index(), *misfit)?;
        }
        Ok(())
    }

    /// Number of chains.
    #[must_use]
    pub fn nchains(&self) -> usize {
        self.chains.len()
    }

    /// Chain `chain`, if it exists.
    #[must_use]
    pub fn chain(&self, chain: usize) -> Option<&Chain> {
        self.chains.get(chain)
    }

    /// The global chain.
    #[must_use]
    pub fn global(&self) -> &Chain {
        &self.chains[0]
    }

    /// Iterate over all chains, global first.
    pub fn iter(&self) -> impl Iterator<Item = &Chain> {
        self.chains.iter()
    }
}
