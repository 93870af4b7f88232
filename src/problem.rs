//! Problem contract consumed by the optimizer
//!
//! The forward model is opaque: a [`Problem`] exposes bounded parameters and
//! an `evaluate` operation returning one misfit contribution per target. The
//! optimizer combines those contributions into the global misfit and the
//! bootstrap family (see [`crate::bootstrap`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Error, Result};

/// A bounded model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    min: f64,
    max: f64,
}

impl Parameter {
    /// Create a parameter with inclusive bounds `[min, max]`.
    #[must_use]
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower bound.
    #[must_use]
    pub const fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound.
    #[must_use]
    pub const fn max(&self) -> f64 {
        self.max
    }

    /// Width of the admissible range.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Whether `value` lies within the bounds.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp `value` into the bounds.
    #[must_use]
    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Check that the name is usable and the bounds are finite and ordered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['.', ',']) {
            return Err(Error::InvalidInput(format!(
                "parameter name {:?} must be non-empty and free of '.' and ','",
                self.name
            )));
        }
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(Error::InvalidInput(format!(
                "parameter {} has invalid bounds [{}, {}]",
                self.name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Misfit contribution of a single target.
///
/// `norm` is the contribution of the same target for a null model; misfits
/// are normalized by it when combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetMisfit {
    /// Misfit between modeled and observed data
    pub misfit: f64,
    /// Normalization (misfit of the null model)
    pub norm: f64,
}

impl TargetMisfit {
    /// Create a target contribution.
    #[must_use]
    pub const fn new(misfit: f64, norm: f64) -> Self {
        Self { misfit, norm }
    }
}

/// Why a single candidate could not be evaluated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationFailure {
    /// The model is physically infeasible; recorded and skipped.
    #[error("infeasible model: {0}")]
    Infeasible(String),

    /// The forward engine could not answer right now; retried with a budget.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// Forward problem evaluated by the optimizer.
///
/// Implementations must be referentially stable for the lifetime of a run:
/// the same model always yields the same contributions, and the parameter
/// layout never changes. The run directory records a [`ProblemIdentity`] and
/// refuses to resume against a different one.
pub trait Problem: Sync {
    /// Name used in run metadata and logs.
    fn name(&self) -> &str;

    /// Bounded model parameters, in model vector order.
    fn parameters(&self) -> &[Parameter];

    /// Number of targets `evaluate` reports contributions for.
    fn ntargets(&self) -> usize;

    /// Evaluate a model, returning one contribution per target.
    ///
    /// # Errors
    ///
    /// Returns an [`EvaluationFailure`] when this candidate cannot be scored.
    fn evaluate(&self, model: &[f64]) -> std::result::Result<Vec<TargetMisfit>, EvaluationFailure>;

    /// Model dimensionality.
    fn dimension(&self) -> usize {
        self.parameters().len()
    }

    /// Parameter names in model vector order.
    fn parameter_names(&self) -> Vec<&str> {
        self.parameters().iter().map(Parameter::name).collect()
    }

    /// Quantities derived from a model (e.g. magnitude from a moment tensor).
    fn derived_parameters(&self) -> &[Parameter] {
        &[]
    }

    /// Values of [`Problem::derived_parameters`] for `model`.
    fn derive(&self, _model: &[f64]) -> Vec<f64> {
        Vec::new()
    }
}

/// Persisted description of a problem, used to validate resume and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemIdentity {
    name: String,
    parameters: Vec<Parameter>,
    derived: Vec<Parameter>,
    ntargets: usize,
}

impl ProblemIdentity {
    /// Capture the identity of `problem`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the problem has no parameters, no
    /// targets, an invalid parameter, or duplicate parameter names.
    pub fn of<P: Problem + ?Sized>(problem: &P) -> Result<Self> {
        let identity = Self {
            name: problem.name().to_string(),
            parameters: problem.parameters().to_vec(),
            derived: problem.derived_parameters().to_vec(),
            ntargets: problem.ntargets(),
        };
        identity.validate()?;
        Ok(identity)
    }

    fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() {
            return Err(Error::InvalidInput(format!(
                "problem {} declares no parameters",
                self.name
            )));
        }
        if self.ntargets == 0 {
            return Err(Error::InvalidInput(format!(
                "problem {} declares no targets",
                self.name
            )));
        }
        let mut seen = rustc_hash::FxHashSet::default();
        for parameter in self.parameters.iter().chain(&self.derived) {
            parameter.validate()?;
            if !seen.insert(parameter.name()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate parameter name {}",
                    parameter.name()
                )));
            }
        }
        Ok(())
    }

    /// Problem name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model parameters.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Derived parameters.
    #[must_use]
    pub fn derived(&self) -> &[Parameter] {
        &self.derived
    }

    /// Number of targets.
    #[must_use]
    pub const fn ntargets(&self) -> usize {
        self.ntargets
    }

    /// Model dimensionality.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.parameters.len()
    }

    /// Stable fingerprint of this identity (hex string).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the identity cannot be serialized.
    pub fn fingerprint(&self) -> Result<String> {
        fingerprint_of(self)
    }

    /// Check that `current` describes the same problem as this (persisted) identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMismatch`] naming the first differing field.
    pub fn ensure_matches(&self, current: &Self) -> Result<()> {
        let mismatch = |field: &str, persisted: String, current: String| Error::ConfigMismatch {
            field: field.to_string(),
            persisted,
            current,
        };
        if self.name != current.name {
            return Err(mismatch(
                "problem name",
                self.name.clone(),
                current.name.clone(),
            ));
        }
        if self.ntargets != current.ntargets {
            return Err(mismatch(
                "number of targets",
                self.ntargets.to_string(),
                current.ntargets.to_string(),
            ));
        }
        if self.parameters != current.parameters {
            return Err(mismatch(
                "parameters",
                describe(&self.parameters),
                describe(&current.parameters),
            ));
        }
        if self.derived != current.derived {
            return Err(mismatch(
                "derived parameters",
                describe(&self.derived),
                describe(&current.derived),
            ));
        }
        Ok(())
    }
}

fn describe(parameters: &[Parameter]) -> String {
    parameters
        .iter()
        .map(|p| format!("{}[{}, {}]", p.name, p.min, p.max))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Hash the canonical JSON form of `value` with trueno's SIMD key hash.
pub(crate) fn fingerprint_of<T: Serialize>(value: &T) -> Result<String> {
    let canonical = serde_json::to_string(value)?;
    Ok(format!("{:016x}", trueno::hash_key(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Line {
        parameters: Vec<Parameter>,
    }

    impl Problem for Line {
        fn name(&self) -> &str {
            "line"
        }

        fn parameters(&self) -> &[Parameter] {
            &self.parameters
        }

        fn ntargets(&self) -> usize {
            1
        }

        fn evaluate(
            &self,
            model: &[f64],
        ) -> std::result::Result<Vec<TargetMisfit>, EvaluationFailure> {
            Ok(vec![TargetMisfit::new(model[0].abs(), 1.0)])
        }
    }

    fn line() -> Line {
        Line {
            parameters: vec![Parameter::new("x", -1.0, 1.0), Parameter::new("y", 0.0, 2.0)],
        }
    }

    #[test]
    fn test_parameter_bounds() {
        let p = Parameter::new("x", -1.0, 3.0);
        assert!(p.contains(-1.0));
        assert!(p.contains(3.0));
        assert!(!p.contains(3.5));
        assert!((p.clip(7.0) - 3.0).abs() < f64::EPSILON);
        assert!((p.width() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parameter_validate_rejects_inverted_bounds() {
        assert!(Parameter::new("x", 2.0, 1.0).validate().is_err());
        assert!(Parameter::new("x", 0.0, f64::NAN).validate().is_err());
        assert!(Parameter::new("a.b", 0.0, 1.0).validate().is_err());
        assert!(Parameter::new("x", 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_identity_of_problem() {
        let identity = ProblemIdentity::of(&line()).unwrap();
        assert_eq!(identity.name(), "line");
        assert_eq!(identity.dimension(), 2);
        assert_eq!(identity.ntargets(), 1);
        assert!(identity.derived().is_empty());
    }

    #[test]
    fn test_identity_rejects_duplicate_names() {
        let problem = Line {
            parameters: vec![Parameter::new("x", 0.0, 1.0), Parameter::new("x", 0.0, 1.0)],
        };
        let err = ProblemIdentity::of(&problem).unwrap_err();
        assert!(err.to_string().contains("duplicate parameter name"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = ProblemIdentity::of(&line()).unwrap();
        let b = ProblemIdentity::of(&line()).unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let mut other = line();
        other.parameters[1] = Parameter::new("y", 0.0, 3.0);
        let c = ProblemIdentity::of(&other).unwrap();
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_ensure_matches_names_field() {
        let a = ProblemIdentity::of(&line()).unwrap();
        let mut other = line();
        other.parameters[0] = Parameter::new("x", -2.0, 1.0);
        let b = ProblemIdentity::of(&other).unwrap();

        assert!(a.ensure_matches(&a.clone()).is_ok());
        match a.ensure_matches(&b) {
            Err(Error::ConfigMismatch { field, .. }) => assert_eq!(field, "parameters"),
            other => panic!("expected ConfigMismatch, got {other:?}"),
        }
    }
}
