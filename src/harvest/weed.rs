//! Weeding policy
//!
//! | Level | Effect |
//! |-------|--------|
//! | 0 | nothing removed |
//! | 1 | drop bootstrap chains whose best samples are not all below `avg + std` |
//! | 2 | level 1, then drop samples above `avg` inside retained bootstrap chains |
//! | 3 | global chain only |
//!
//! `avg` and `std` (population) are taken over the global misfits of the
//! best samples of every bootstrap chain, pooled. The global chain is never
//! weeded.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::stats::{mean, std_dev};
use crate::Error;

/// How aggressively to remove outlying chains and samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum WeedLevel {
    /// Level 0: keep everything
    #[default]
    None,
    /// Level 1: drop outlying bootstrap chains
    Chains,
    /// Level 2: level 1 plus outlying samples inside retained chains
    ChainsAndSamples,
    /// Level 3: global chain only
    GlobalOnly,
}

impl TryFrom<u8> for WeedLevel {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::None),
            1 => Ok(Self::Chains),
            2 => Ok(Self::ChainsAndSamples),
            3 => Ok(Self::GlobalOnly),
            other => Err(Error::InvalidInput(format!(
                "weed level must be 0, 1, 2 or 3, got {other}"
            ))),
        }
    }
}

impl From<WeedLevel> for u8 {
    fn from(level: WeedLevel) -> Self {
        match level {
            WeedLevel::None => 0,
            WeedLevel::Chains => 1,
            WeedLevel::ChainsAndSamples => 2,
            WeedLevel::GlobalOnly => 3,
        }
    }
}

impl fmt::Display for WeedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Pooled global-misfit statistics of the bootstrap chains' best samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeedThreshold {
    /// Pooled average global misfit
    pub average: f64,
    /// Pooled population standard deviation
    pub std: f64,
}

impl WeedThreshold {
    /// Pool the global misfits of every bootstrap chain's selection.
    ///
    /// Returns `None` when there are no bootstrap samples at all.
    #[must_use]
    pub fn pooled(chain_global_misfits: &[Vec<f64>]) -> Option<Self> {
        let pooled: Vec<f64> = chain_global_misfits.iter().flatten().copied().collect();
        Some(Self {
            average: mean(&pooled)?,
            std: std_dev(&pooled)?,
        })
    }

    /// Chain retention rule: every global misfit strictly below `average + std`.
    #[must_use]
    pub fn retains_chain(&self, global_misfits: &[f64]) -> bool {
        let limit = self.average + self.std;
        global_misfits.iter().all(|gm| *gm < limit)
    }

    /// Sample retention rule: global misfit not above `average`.
    #[must_use]
    pub fn retains_sample(&self, global_misfit: f64) -> bool {
        global_misfit <= self.average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weed_level_from_u8() {
        assert_eq!(WeedLevel::try_from(0).unwrap(), WeedLevel::None);
        assert_eq!(WeedLevel::try_from(2).unwrap(), WeedLevel::ChainsAndSamples);
        assert_eq!(WeedLevel::try_from(3).unwrap(), WeedLevel::GlobalOnly);
        assert!(matches!(WeedLevel::try_from(4), Err(Error::InvalidInput(_))));
        assert_eq!(WeedLevel::default(), WeedLevel::None);
    }

    #[test]
    fn test_weed_level_serializes_as_number() {
        assert_eq!(serde_json::to_string(&WeedLevel::Chains).unwrap(), "1");
        let level: WeedLevel = serde_json::from_str("3").unwrap();
        assert_eq!(level, WeedLevel::GlobalOnly);
        assert!(serde_json::from_str::<WeedLevel>("7").is_err());
    }

    #[test]
    fn test_threshold_three_chains() {
        let chains = vec![vec![0.10, 0.12], vec![0.50, 0.55], vec![0.11, 0.13]];
        let t = WeedThreshold::pooled(&chains).unwrap();
        assert!((t.average - 1.51 / 6.0).abs() < 1e-12);
        assert!((t.std - 0.194_029).abs() < 1e-6);
        assert!(t.retains_chain(&chains[0]));
        assert!(!t.retains_chain(&chains[1]));
        assert!(t.retains_chain(&chains[2]));
        assert!(t.retains_sample(0.13));
        assert!(!t.retains_sample(0.26));
    }

    #[test]
    fn test_threshold_empty() {
        assert!(WeedThreshold::pooled(&[]).is_none());
        assert!(WeedThreshold::pooled(&[vec![]]).is_none());
    }
}
