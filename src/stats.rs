//! Scalar reductions over an ensemble population
//!
//! Definitions (all testable by hand):
//! - `mean`: arithmetic mean
//! - `std`: population standard deviation (divide by `n`)
//! - `percentile(p)`: with the values sorted ascending and `r = p/100 · (n-1)`,
//!   linear interpolation between the order statistics at `floor(r)` and
//!   `ceil(r)`. `percentile(0)` is the minimum, `percentile(100)` the maximum
//!   and `percentile(50)` the median.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Arithmetic mean, `None` for an empty slice.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation, `None` for an empty slice.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let var = values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Percentile `p ∈ [0, 100]` of values already sorted ascending.
///
/// Returns `None` for an empty slice or `p` outside `[0, 100]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=100.0).contains(&p) {
        return None;
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Percentile `p ∈ [0, 100]` of unsorted values.
#[must_use]
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    percentile_sorted(&sorted(values), p)
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// A named reduction of one parameter's population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    /// Value in the best (lowest global misfit) model
    Best,
    /// Arithmetic mean
    Mean,
    /// Population standard deviation
    Std,
    /// Smallest value
    Minimum,
    /// 16th percentile
    Percentile16,
    /// 50th percentile
    Median,
    /// 84th percentile
    Percentile84,
    /// Largest value
    Maximum,
}

impl Measure {
    /// Every measure, in report order.
    pub const ALL: [Self; 8] = [
        Self::Best,
        Self::Mean,
        Self::Std,
        Self::Minimum,
        Self::Percentile16,
        Self::Median,
        Self::Percentile84,
        Self::Maximum,
    ];

    /// Name used in parameter selections and serialized views.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Mean => "mean",
            Self::Std => "std",
            Self::Minimum => "minimum",
            Self::Percentile16 => "percentile16",
            Self::Median => "median",
            Self::Percentile84 => "percentile84",
            Self::Maximum => "maximum",
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Measure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "unknown measure {s:?} (choose from {})",
                    Self::ALL.map(Self::as_str).join(", ")
                ))
            })
    }
}

/// Summary of one parameter over the pooled ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterStats {
    /// Value in the best model
    pub best: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    /// Smallest value
    pub minimum: f64,
    /// 16th percentile
    pub percentile16: f64,
    /// Median
    pub median: f64,
    /// 84th percentile
    pub percentile84: f64,
    /// Largest value
    pub maximum: f64,
}

impl ParameterStats {
    /// Summarize `values`, with `best` taken from the best model.
    ///
    /// Returns `None` for an empty population.
    #[must_use]
    pub fn compute(values: &[f64], best: f64) -> Option<Self> {
        let sorted = sorted(values);
        Some(Self {
            best,
            mean: mean(values)?,
            std: std_dev(values)?,
            minimum: *sorted.first()?,
            percentile16: percentile_sorted(&sorted, 16.0)?,
            median: percentile_sorted(&sorted, 50.0)?,
            percentile84: percentile_sorted(&sorted, 84.0)?,
            maximum: *sorted.last()?,
        })
    }

    /// Value of a single measure.
    #[must_use]
    pub const fn get(&self, measure: Measure) -> f64 {
        match measure {
            Measure::Best => self.best,
            Measure::Mean => self.mean,
            Measure::Std => self.std,
            Measure::Minimum => self.minimum,
            Measure::Percentile16 => self.percentile16,
            Measure::Median => self.median,
            Measure::Percentile84 => self.percentile84,
            Measure::Maximum => self.maximum,
        }
    }
}
