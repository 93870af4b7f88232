//! Run Meta - fingerprint of the inputs a run directory was created with

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::problem::{fingerprint_of, ProblemIdentity};
use crate::{Error, Result};

/// Current on-disk layout version.
pub const FORMAT_VERSION: u32 = 1;

/// Run metadata persisted as `meta.json`.
///
/// Resume, harvest and export compare the persisted fingerprint against the
/// current inputs and refuse to proceed on any difference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMeta {
    format_version: u32,
    problem: ProblemIdentity,
    problem_hash: String,
    nbootstrap: usize,
    chain_size: usize,
    config_hash: String,
    config: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl RunMeta {
    /// Describe a run about to be started.
    ///
    /// `config` is the serialized sampling configuration (strategy included);
    /// its hash is what resume compares.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a fingerprint cannot be computed.
    pub fn new(
        problem: ProblemIdentity,
        nbootstrap: usize,
        chain_size: usize,
        config: serde_json::Value,
    ) -> Result<Self> {
        Ok(Self {
            format_version: FORMAT_VERSION,
            problem_hash: problem.fingerprint()?,
            problem,
            nbootstrap,
            chain_size,
            config_hash: fingerprint_of(&config)?,
            config,
            created_at: Utc::now(),
        })
    }

    /// Problem identity.
    #[must_use]
    pub const fn problem(&self) -> &ProblemIdentity {
        &self.problem
    }

    /// Problem fingerprint.
    #[must_use]
    pub fn problem_hash(&self) -> &str {
        &self.problem_hash
    }

    /// Number of bootstrap chains.
    #[must_use]
    pub const fn nbootstrap(&self) -> usize {
        self.nbootstrap
    }

    /// Number of chains including the global one.
    #[must_use]
    pub const fn nchains(&self) -> usize {
        self.nbootstrap + 1
    }

    /// Live best-of size the optimizer ran with.
    #[must_use]
    pub const fn chain_size(&self) -> usize {
        self.chain_size
    }

    /// Configuration fingerprint.
    #[must_use]
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Serialized configuration.
    #[must_use]
    pub const fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Check that `current` may continue the run described by `self`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMismatch`] for the first differing field.
    pub fn ensure_compatible(&self, current: &Self) -> Result<()> {
        if self.format_version != current.format_version {
            return Err(mismatch(
                "format version",
                self.format_version,
                current.format_version,
            ));
        }
        self.problem.ensure_matches(&current.problem)?;
        if self.nbootstrap != current.nbootstrap {
            return Err(mismatch("nbootstrap", self.nbootstrap, current.nbootstrap));
        }
        if self.chain_size != current.chain_size {
            return Err(mismatch("chain size", self.chain_size, current.chain_size));
        }
        if self.config_hash != current.config_hash {
            return Err(mismatch("configuration", &self.config, &current.config));
        }
        Ok(())
    }
}

fn mismatch(field: &str, persisted: impl ToString, current: impl ToString) -> Error {
    Error::ConfigMismatch {
        field: field.to_string(),
        persisted: persisted.to_string(),
        current: current.to_string(),
    }
}
