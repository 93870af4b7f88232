//! Harvesting: from the sample log to the reported ensemble
//!
//! A harvest is a pure function of the sample log and `(nbest, weed)`:
//! chains are rebuilt from scratch by replaying the log in index order, so no
//! live optimizer state, scan order, seed or clock can leak into the result.
//! Running it twice over an unchanged log gives identical ensembles.
//!
//! ## Example
//!
//! ```rust
//! use trueno_ensemble::harvest::{harvest_records, WeedLevel};
//! use trueno_ensemble::sample::{MisfitVector, SampleRecord};
//!
//! let records: Vec<SampleRecord> = (0..6u32)
//!     .map(|i| {
//!         let x = f64::from(i);
//!         SampleRecord::evaluated(u64::from(i), vec![x], MisfitVector::new(vec![x, 6.0 - x]), vec![])
//!     })
//!     .collect();
//!
//! let ensemble = harvest_records(&records, 2, 2, WeedLevel::None)?;
//! assert_eq!(ensemble.global().indices(), &[0, 1]);
//! assert_eq!(ensemble.chain(1).unwrap().indices(), &[5, 4]);
//! # Ok::<(), trueno_ensemble::Error>(())
//! ```

mod weed;

pub use weed::{WeedLevel, WeedThreshold};

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chain::ChainSet;
use crate::rundir::{has_content, read_json, write_json_atomic, RunDirectory};
use crate::sample::SampleRecord;
use crate::{Error, Result};

const ENSEMBLE_FILE: &str = "ensemble.json";
const HARVEST_META_FILE: &str = "meta.json";

/// Harvest invocation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestOptions {
    /// Number of best samples taken from each chain
    pub nbest: usize,
    /// Weeding level
    pub weed: WeedLevel,
    /// Overwrite an existing harvest
    pub force: bool,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            nbest: 10,
            weed: WeedLevel::None,
            force: false,
        }
    }
}

/// Surviving samples of one chain, in ascending chain-misfit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestChain {
    chain: usize,
    indices: Vec<u64>,
}

impl HarvestChain {
    /// Chain id (0 = global).
    #[must_use]
    pub const fn chain(&self) -> usize {
        self.chain
    }

    /// Surviving sample indices.
    #[must_use]
    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    /// Number of surviving samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing survived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Per-chain selection of surviving sample indices.
///
/// The global chain is always first. Bootstrap chains follow in ascending
/// chain id; weeded chains (and chains left empty) are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestEnsemble {
    nbest: usize,
    weed: WeedLevel,
    nrecords: u64,
    threshold: Option<WeedThreshold>,
    chains: Vec<HarvestChain>,
}

impl HarvestEnsemble {
    /// Best-of size used.
    #[must_use]
    pub const fn nbest(&self) -> usize {
        self.nbest
    }

    /// Weed level applied.
    #[must_use]
    pub const fn weed(&self) -> WeedLevel {
        self.weed
    }

    /// Number of log records the harvest scanned.
    #[must_use]
    pub const fn nrecords(&self) -> u64 {
        self.nrecords
    }

    /// Pooled statistics used for weeding (levels 1 and 2).
    #[must_use]
    pub const fn threshold(&self) -> Option<WeedThreshold> {
        self.threshold
    }

    /// Retained chains, global first.
    #[must_use]
    pub fn chains(&self) -> &[HarvestChain] {
        &self.chains
    }

    /// The global chain selection.
    #[must_use]
    pub fn global(&self) -> &HarvestChain {
        &self.chains[0]
    }

    /// Selection of chain `chain`, if retained.
    #[must_use]
    pub fn chain(&self, chain: usize) -> Option<&HarvestChain> {
        self.chains.iter().find(|c| c.chain == chain)
    }

    /// Pooled population: every retained chain's indices, concatenated.
    ///
    /// A sample selected by several chains appears once per chain, so each
    /// chain contributes its survivors with equal per-sample weight.
    #[must_use]
    pub fn pooled_indices(&self) -> Vec<u64> {
        self.chains.iter().flat_map(|c| c.indices.iter().copied()).collect()
    }

    /// Size of the pooled population.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.iter().map(HarvestChain::len).sum()
    }

    /// Whether the pooled population is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the best sample (lowest global misfit).
    #[must_use]
    pub fn best_index(&self) -> u64 {
        self.global().indices[0]
    }

    /// Load a previously written harvest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoData`] if the run has not been harvested, or
    /// [`Error::StorageError`] if the stored ensemble lacks a global chain.
    pub fn load(run: &RunDirectory) -> Result<Self> {
        let path = run.harvest_dir().join(ENSEMBLE_FILE);
        let ensemble: Self = read_json(&path)?;
        match ensemble.chains.first() {
            Some(global) if global.chain == 0 && !global.is_empty() => Ok(ensemble),
            _ => Err(Error::StorageError(format!(
                "{} has no global chain selection",
                path.display()
            ))),
        }
    }
}

/// Provenance written next to the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestMeta {
    /// Best-of size used
    pub nbest: usize,
    /// Weed level applied
    pub weed: WeedLevel,
    /// Number of log records scanned
    pub nrecords: u64,
    /// Problem fingerprint of the run
    pub problem_hash: String,
    /// Configuration fingerprint of the run
    pub config_hash: String,
    /// When the harvest was written
    pub harvested_at: DateTime<Utc>,
}

/// Harvest a run directory and write `<run>/harvest/`.
///
/// # Errors
///
/// - [`Error::NoData`] if the log is absent, empty or has no successful sample
/// - [`Error::ForceRequired`] if a harvest exists and `options.force` is false
/// - [`Error::InvalidInput`] if `options.nbest` is zero
pub fn harvest(run_path: impl AsRef<Path>, options: &HarvestOptions) -> Result<HarvestEnsemble> {
    let run = RunDirectory::new(run_path.as_ref());
    let records = run.read_records()?;
    let meta = run.read_meta()?;

    let out_dir = run.harvest_dir();
    if has_content(&out_dir)? && !options.force {
        return Err(Error::ForceRequired(out_dir));
    }

    let ensemble = harvest_records(&records, meta.nchains(), options.nbest, options.weed)?;

    if out_dir.exists() {
        fs::remove_dir_all(&out_dir)?;
    }
    fs::create_dir_all(&out_dir)?;
    write_json_atomic(&out_dir.join(ENSEMBLE_FILE), &ensemble)?;
    write_json_atomic(
        &out_dir.join(HARVEST_META_FILE),
        &HarvestMeta {
            nbest: options.nbest,
            weed: options.weed,
            nrecords: ensemble.nrecords,
            problem_hash: meta.problem_hash().to_string(),
            config_hash: meta.config_hash().to_string(),
            harvested_at: Utc::now(),
        },
    )?;

    info!(
        run = %run.path().display(),
        nbest = options.nbest,
        weed = %options.weed,
        chains = ensemble.chains.len(),
        samples = ensemble.len(),
        "harvest written"
    );
    Ok(ensemble)
}

/// Harvest an in-memory log snapshot (`records[i].index() == i`).
///
/// # Errors
///
/// - [`Error::NoData`] if no sample was evaluated successfully
/// - [`Error::InvalidInput`] if `nbest` is zero
/// - [`Error::StorageError`] if a record has the wrong number of chain misfits
pub fn harvest_records(
    records: &[SampleRecord],
    nchains: usize,
    nbest: usize,
    weed: WeedLevel,
) -> Result<HarvestEnsemble> {
    let chains = ChainSet::replay(records, nchains, nbest)?;
    let global = HarvestChain {
        chain: 0,
        indices: chains.global().indices(),
    };
    if global.is_empty() {
        return Err(Error::NoData(format!(
            "none of {} samples was evaluated successfully",
            records.len()
        )));
    }

    let global_misfit = |index: u64| -> f64 {
        usize::try_from(index)
            .ok()
            .and_then(|i| records.get(i))
            .and_then(SampleRecord::global_misfit)
            .unwrap_or(f64::INFINITY)
    };

    let mut bootstrap: Vec<HarvestChain> = if weed == WeedLevel::GlobalOnly {
        Vec::new()
    } else {
        chains
            .iter()
            .enumerate()
            .skip(1)
            .map(|(chain, c)| HarvestChain {
                chain,
                indices: c.indices(),
            })
            .collect()
    };

    let mut threshold = None;
    if matches!(weed, WeedLevel::Chains | WeedLevel::ChainsAndSamples) {
        let chain_gms: Vec<Vec<f64>> = bootstrap
            .iter()
            .map(|c| c.indices.iter().map(|i| global_misfit(*i)).collect())
            .collect();
        threshold = WeedThreshold::pooled(&chain_gms);

        if let Some(t) = threshold {
            let before = bootstrap.len();
            bootstrap = bootstrap
                .into_iter()
                .zip(&chain_gms)
                .filter(|(_, gms)| t.retains_chain(gms))
                .map(|(c, _)| c)
                .collect();
            debug!(
                average = t.average,
                std = t.std,
                dropped = before - bootstrap.len(),
                "chain weeding"
            );

            if weed == WeedLevel::ChainsAndSamples {
                for c in &mut bootstrap {
                    c.indices.retain(|i| t.retains_sample(global_misfit(*i)));
                }
            }
        }
    }
    bootstrap.retain(|c| !c.is_empty());

    let mut selected = Vec::with_capacity(bootstrap.len() + 1);
    selected.push(global);
    selected.extend(bootstrap);

    Ok(HarvestEnsemble {
        nbest,
        weed,
        nrecords: records.len() as u64,
        threshold,
        chains: selected,
    })
}
