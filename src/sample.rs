//! Sample records - the append-only unit of the run log

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One misfit per chain: index 0 is the global misfit, `1..=nbootstrap` the
/// bootstrap chains.
///
/// A chain whose weighted normalization vanished has an infinite misfit;
/// it is persisted as JSON `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct MisfitVector(Vec<f64>);

impl MisfitVector {
    /// Wrap per-chain misfits.
    #[must_use]
    pub const fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Global (unweighted) misfit.
    #[must_use]
    pub fn global(&self) -> f64 {
        self.0[0]
    }

    /// Misfit of chain `chain`.
    #[must_use]
    pub fn chain(&self, chain: usize) -> Option<f64> {
        self.0.get(chain).copied()
    }

    /// Number of chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no chains at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All chain misfits.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl Serialize for MisfitVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|m| m.is_finite().then_some(*m)))
    }
}

impl<'de> Deserialize<'de> for MisfitVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(Self(
            values
                .into_iter()
                .map(|m| m.unwrap_or(f64::INFINITY))
                .collect(),
        ))
    }
}

/// Outcome of evaluating one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    /// Misfits for every chain, plus derived parameter values.
    Ok {
        /// Per-chain misfits
        misfits: MisfitVector,
        /// Values of the problem's derived parameters
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        derived: Vec<f64>,
    },
    /// The model could not be scored; never enters a chain.
    Failed {
        /// Reason reported by the problem
        reason: String,
    },
}

/// One evaluated model, addressed by its sample index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    index: u64,
    model: Vec<f64>,
    evaluation: Evaluation,
}

impl SampleRecord {
    /// Record a successful evaluation.
    #[must_use]
    pub const fn evaluated(index: u64, model: Vec<f64>, misfits: MisfitVector, derived: Vec<f64>) -> Self {
        Self {
            index,
            model,
            evaluation: Evaluation::Ok { misfits, derived },
        }
    }

    /// Record a failed evaluation.
    #[must_use]
    pub fn failed(index: u64, model: Vec<f64>, reason: impl Into<String>) -> Self {
        Self {
            index,
            model,
            evaluation: Evaluation::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Sample index within the run.
    #[must_use]
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// Model parameter values.
    #[must_use]
    pub fn model(&self) -> &[f64] {
        &self.model
    }

    /// Evaluation outcome.
    #[must_use]
    pub const fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    /// Per-chain misfits, if the evaluation succeeded.
    #[must_use]
    pub const fn misfits(&self) -> Option<&MisfitVector> {
        match &self.evaluation {
            Evaluation::Ok { misfits, .. } => Some(misfits),
            Evaluation::Failed { .. } => None,
        }
    }

    /// Global misfit, if the evaluation succeeded.
    #[must_use]
    pub fn global_misfit(&self) -> Option<f64> {
        self.misfits().map(MisfitVector::global)
    }

    /// Derived parameter values (empty for failed evaluations).
    #[must_use]
    pub fn derived(&self) -> &[f64] {
        match &self.evaluation {
            Evaluation::Ok { derived, .. } => derived,
            Evaluation::Failed { .. } => &[],
        }
    }

    /// Value of column `column`: model parameters first, then derived ones.
    #[must_use]
    pub fn value(&self, column: usize) -> Option<f64> {
        self.model
            .get(column)
            .or_else(|| self.derived().get(column - self.model.len()))
            .copied()
    }

    /// Whether the evaluation succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.evaluation, Evaluation::Ok { .. })
    }
}
