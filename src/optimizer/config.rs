//! Optimizer configuration and per-invocation run control

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sampling configuration shared by every strategy.
///
/// Every field except `max_retries` and `sync_every_record` changes which
/// samples a run produces, so they are part of the run fingerprint and a
/// run directory refuses to resume under different values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    nbootstrap: usize,
    chain_size: usize,
    seed: u64,
    bootstrap_seed: u64,
    batch_size: usize,
    max_retries: u32,
    sync_every_record: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            nbootstrap: 100,
            chain_size: 10,
            seed: 0,
            bootstrap_seed: 23,
            batch_size: 1,
            max_retries: 3,
            sync_every_record: true,
        }
    }
}

impl OptimizerConfig {
    /// Start from the defaults.
    #[must_use]
    pub fn builder() -> OptimizerConfigBuilder {
        OptimizerConfigBuilder::default()
    }

    /// Number of bootstrap chains (the global chain comes on top).
    #[must_use]
    pub const fn nbootstrap(&self) -> usize {
        self.nbootstrap
    }

    /// Number of chains including the global chain.
    #[must_use]
    pub const fn nchains(&self) -> usize {
        self.nbootstrap + 1
    }

    /// Size of the live best-of set kept per chain while sampling.
    #[must_use]
    pub const fn chain_size(&self) -> usize {
        self.chain_size
    }

    /// Seed of the proposal random streams.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed of the classic bootstrap weights.
    #[must_use]
    pub const fn bootstrap_seed(&self) -> u64 {
        self.bootstrap_seed
    }

    /// Candidates proposed against the same chain state and evaluated concurrently.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Retries granted to a transiently unavailable forward engine.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether every appended record is synced to disk.
    #[must_use]
    pub const fn sync_every_record(&self) -> bool {
        self.sync_every_record
    }

    /// The fields that determine the sample sequence.
    pub(crate) fn fingerprint_value(&self) -> serde_json::Value {
        serde_json::json!({
            "nbootstrap": self.nbootstrap,
            "chain_size": self.chain_size,
            "seed": self.seed,
            "bootstrap_seed": self.bootstrap_seed,
            "batch_size": self.batch_size,
        })
    }
}

/// Builder for [`OptimizerConfig`].
#[derive(Debug, Default)]
pub struct OptimizerConfigBuilder {
    config: OptimizerConfig,
}

impl OptimizerConfigBuilder {
    /// Set the number of bootstrap chains.
    #[must_use]
    pub const fn nbootstrap(mut self, nbootstrap: usize) -> Self {
        self.config.nbootstrap = nbootstrap;
        self
    }

    /// Set the live best-of size per chain.
    #[must_use]
    pub const fn chain_size(mut self, chain_size: usize) -> Self {
        self.config.chain_size = chain_size;
        self
    }

    /// Set the proposal seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set the bootstrap weight seed.
    #[must_use]
    pub const fn bootstrap_seed(mut self, seed: u64) -> Self {
        self.config.bootstrap_seed = seed;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the retry budget for unavailable engines.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Sync every record to disk (slower, survives power loss).
    #[must_use]
    pub const fn sync_every_record(mut self, sync: bool) -> Self {
        self.config.sync_every_record = sync;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `chain_size` or `batch_size` is zero.
    pub fn build(self) -> Result<OptimizerConfig> {
        if self.config.chain_size == 0 {
            return Err(Error::InvalidInput(
                "chain_size must be greater than 0".to_string(),
            ));
        }
        if self.config.batch_size == 0 {
            return Err(Error::InvalidInput(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(self.config)
    }
}

/// Per-invocation run control. Not part of the run fingerprint.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Discard an existing run directory and start over
    pub force: bool,
    /// Stop once the log holds this many samples (resumable)
    pub max_iterations: Option<u64>,
    /// External stop signal, checked between batches
    pub stop: Option<Arc<AtomicBool>>,
}

impl RunOptions {
    /// Start over, discarding any previous run in the directory.
    #[must_use]
    pub const fn force() -> Self {
        Self {
            force: true,
            max_iterations: None,
            stop: None,
        }
    }

    /// Stop once the log holds `n` samples.
    #[must_use]
    pub const fn until(n: u64) -> Self {
        Self {
            force: false,
            max_iterations: Some(n),
            stop: None,
        }
    }

    /// Attach an external stop signal.
    #[must_use]
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OptimizerConfig::builder().build().unwrap();
        assert_eq!(config.nbootstrap(), 100);
        assert_eq!(config.nchains(), 101);
        assert_eq!(config.chain_size(), 10);
        assert_eq!(config.batch_size(), 1);
        assert!(config.sync_every_record());
    }

    #[test]
    fn test_config_builder_validates() {
        assert!(OptimizerConfig::builder().chain_size(0).build().is_err());
        assert!(OptimizerConfig::builder().batch_size(0).build().is_err());
        assert!(OptimizerConfig::builder().nbootstrap(0).build().is_ok());
    }

    #[test]
    fn test_fingerprint_ignores_run_control() {
        let a = OptimizerConfig::builder().max_retries(1).build().unwrap();
        let b = OptimizerConfig::builder()
            .max_retries(9)
            .sync_every_record(false)
            .build()
            .unwrap();
        assert_eq!(a.fingerprint_value(), b.fingerprint_value());

        let c = OptimizerConfig::builder().seed(5).build().unwrap();
        assert_ne!(a.fingerprint_value(), c.fingerprint_value());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = OptimizerConfig::builder().nbootstrap(8).seed(3).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: OptimizerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
