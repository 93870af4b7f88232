//! Parameter selection: `<parameter>[.<measure>]`

use rustc_hash::{FxHashMap, FxHashSet};

use super::ExportKind;
use crate::problem::ProblemIdentity;
use crate::stats::Measure;
use crate::{Error, Result};

/// One selected column, optionally narrowed to a single measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedParameter {
    /// Parameter name
    pub name: String,
    /// Column in the record value space (free parameters, then derived)
    pub column: usize,
    /// Requested measure (`stats` only)
    pub measure: Option<Measure>,
}

/// Validated, ordered list of parameters to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSelection {
    entries: Vec<SelectedParameter>,
}

impl ParameterSelection {
    /// Every free and derived parameter of `problem`, in column order.
    #[must_use]
    pub fn all(problem: &ProblemIdentity) -> Self {
        let entries = column_names(problem)
            .into_iter()
            .enumerate()
            .map(|(column, name)| SelectedParameter {
                name: name.to_string(),
                column,
                measure: None,
            })
            .collect();
        Self { entries }
    }

    /// Resolve `pnames` against `problem`.
    ///
    /// `None` selects every parameter. Each name may carry a `.<measure>`
    /// suffix when exporting `stats`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty list, an unknown
    /// parameter or measure, a measure suffix outside `stats`, or a name
    /// listed twice.
    pub fn parse(problem: &ProblemIdentity, kind: ExportKind, pnames: Option<&[&str]>) -> Result<Self> {
        let Some(pnames) = pnames else {
            return Ok(Self::all(problem));
        };
        if pnames.is_empty() {
            return Err(Error::InvalidInput(
                "parameter selection is empty".to_string(),
            ));
        }

        let names = column_names(problem);
        let columns: FxHashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let mut seen = FxHashSet::default();
        let mut entries = Vec::with_capacity(pnames.len());

        for pname in pnames {
            if !seen.insert(*pname) {
                return Err(Error::InvalidInput(format!(
                    "parameter {pname:?} is listed twice"
                )));
            }
            let (name, measure) = match pname.split_once('.') {
                Some((name, measure)) => (name, Some(measure.parse::<Measure>()?)),
                None => (*pname, None),
            };
            if measure.is_some() && kind != ExportKind::Stats {
                return Err(Error::InvalidInput(format!(
                    "{pname:?}: a measure can only be selected for stats, not {kind}"
                )));
            }
            let Some(&column) = columns.get(name) else {
                return Err(Error::InvalidInput(format!(
                    "unknown parameter {name:?} (available: {})",
                    names.join(", ")
                )));
            };
            entries.push(SelectedParameter {
                name: name.to_string(),
                column,
                measure,
            });
        }
        Ok(Self { entries })
    }

    /// Selected parameters in request order.
    #[must_use]
    pub fn entries(&self) -> &[SelectedParameter] {
        &self.entries
    }

    /// Selected names in request order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }
}

fn column_names(problem: &ProblemIdentity) -> Vec<&str> {
    problem
        .parameters()
        .iter()
        .chain(problem.derived())
        .map(|p| p.name())
        .collect()
}
