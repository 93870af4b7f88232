//! Aggregation and export views
//!
//! Four views over a harvested run:
//!
//! | Kind | Content |
//! |------|---------|
//! | `best` | the lowest global misfit model of the global chain |
//! | `mean` | per-parameter mean over the pooled ensemble |
//! | `ensemble` | every pooled `(index, misfit, values)` member, unreduced |
//! | `stats` | per-parameter `best, mean, std, minimum, percentile16, median, percentile84, maximum` |
//!
//! The pooled ensemble is the concatenation of the surviving chain
//! selections, global chain first. Every member carries the same weight, so
//! a model picked by several chains counts once per chain.
//!
//! ## Example
//!
//! ```rust,no_run
//! use trueno_ensemble::export::{export, ExportKind, HarvestedRun};
//!
//! let runs = vec![HarvestedRun::load("runs/event-a")?];
//! for view in export(ExportKind::Stats, &runs, Some(&["depth.median", "magnitude"]))? {
//!     println!("{}", view.to_json()?);
//! }
//! # Ok::<(), trueno_ensemble::Error>(())
//! ```

mod columnar;
mod selection;

pub use columnar::{to_record_batch, write_parquet};
pub use selection::{ParameterSelection, SelectedParameter};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::harvest::HarvestEnsemble;
use crate::problem::{Problem, ProblemIdentity};
use crate::rundir::RunDirectory;
use crate::sample::SampleRecord;
use crate::stats::{mean, Measure, ParameterStats};
use crate::{Error, Result};

/// Which view to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    /// Best model
    Best,
    /// Ensemble mean
    Mean,
    /// Raw ensemble
    Ensemble,
    /// Per-parameter statistics
    Stats,
}

impl ExportKind {
    /// Every kind.
    pub const ALL: [Self; 4] = [Self::Best, Self::Mean, Self::Ensemble, Self::Stats];

    /// Name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Mean => "mean",
            Self::Ensemble => "ensemble",
            Self::Stats => "stats",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "unknown export kind {s:?} (choose from best, mean, ensemble, stats)"
                ))
            })
    }
}

/// A run directory together with its harvest and log snapshot.
#[derive(Debug, Clone)]
pub struct HarvestedRun {
    name: String,
    problem: ProblemIdentity,
    ensemble: HarvestEnsemble,
    records: Vec<SampleRecord>,
}

impl HarvestedRun {
    /// Load the harvest and sample log of a run directory.
    ///
    /// # Errors
    ///
    /// - [`Error::NoData`] if the run has no metadata, log or harvest
    /// - [`Error::StorageError`] if the harvest refers to samples missing from the log
    pub fn load(run_path: impl AsRef<Path>) -> Result<Self> {
        let run = RunDirectory::new(run_path.as_ref());
        let meta = run.read_meta()?;
        let ensemble = HarvestEnsemble::load(&run)?;
        let records = run.read_records()?;
        let name = run.path().file_name().map_or_else(
            || run.path().display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        Self::from_parts(name, meta.problem().clone(), ensemble, records)
    }

    /// Assemble from in-memory parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageError`] if the global chain selection is
    /// missing or an ensemble member is not a successfully evaluated record
    /// of `records`.
    pub fn from_parts(
        name: impl Into<String>,
        problem: ProblemIdentity,
        ensemble: HarvestEnsemble,
        records: Vec<SampleRecord>,
    ) -> Result<Self> {
        let name = name.into();
        if !ensemble.chains().first().is_some_and(|g| g.chain() == 0 && !g.is_empty()) {
            return Err(Error::StorageError(format!(
                "harvest of {name} has no global chain selection"
            )));
        }
        for index in ensemble.pooled_indices() {
            let ok = usize::try_from(index)
                .ok()
                .and_then(|i| records.get(i))
                .is_some_and(SampleRecord::is_ok);
            if !ok {
                return Err(Error::StorageError(format!(
                    "harvest of {name} refers to sample {index}, which is not an evaluated record"
                )));
            }
        }
        Ok(Self {
            name,
            problem,
            ensemble,
            records,
        })
    }

    /// Run name (directory name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Problem identity the run was created with.
    #[must_use]
    pub const fn problem(&self) -> &ProblemIdentity {
        &self.problem
    }

    /// Harvested ensemble.
    #[must_use]
    pub const fn ensemble(&self) -> &HarvestEnsemble {
        &self.ensemble
    }

    /// Check that `problem` is the one this run was created with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMismatch`] naming the first differing field.
    pub fn verify_problem(&self, problem: &dyn Problem) -> Result<()> {
        self.problem.ensure_matches(&ProblemIdentity::of(problem)?)
    }

    fn record(&self, index: u64) -> &SampleRecord {
        // from_parts checked every pooled index
        &self.records[usize::try_from(index).unwrap_or(usize::MAX)]
    }

    fn value(&self, index: u64, column: usize) -> Result<f64> {
        self.record(index).value(column).ok_or_else(|| {
            Error::StorageError(format!(
                "sample {index} of {} has no value in column {column}",
                self.name
            ))
        })
    }

    fn column(&self, indices: &[u64], column: usize) -> Result<Vec<f64>> {
        indices.iter().map(|i| self.value(*i, column)).collect()
    }
}

/// `name = value` pair of a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    /// Parameter or measure name
    pub name: String,
    /// Value
    pub value: f64,
}

/// The best model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestView {
    /// Run name
    pub run: String,
    /// Sample index of the best model
    pub index: u64,
    /// Its global misfit
    pub misfit: f64,
    /// Selected parameter values
    pub values: Vec<NamedValue>,
}

/// Per-parameter ensemble mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanView {
    /// Run name
    pub run: String,
    /// Size of the pooled ensemble
    pub nsamples: usize,
    /// Selected parameter means
    pub values: Vec<NamedValue>,
}

/// One member of the pooled ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMember {
    /// Chain that selected the sample (0 = global)
    pub chain: usize,
    /// Sample index
    pub index: u64,
    /// Global misfit
    pub misfit: f64,
    /// Selected parameter values, in `EnsembleView::names` order
    pub values: Vec<f64>,
}

/// The raw pooled ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleView {
    /// Run name
    pub run: String,
    /// Selected parameter names
    pub names: Vec<String>,
    /// Pooled members, chain by chain, best first within a chain
    pub members: Vec<EnsembleMember>,
}

/// Statistics of one selected parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsEntry {
    /// Parameter name
    pub name: String,
    /// `measure = value` pairs
    pub measures: Vec<NamedValue>,
}

/// Per-parameter statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsView {
    /// Run name
    pub run: String,
    /// Size of the pooled ensemble
    pub nsamples: usize,
    /// One entry per selected parameter
    pub parameters: Vec<StatsEntry>,
}

/// A self-describing export view of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExportView {
    /// Best model
    Best(BestView),
    /// Ensemble mean
    Mean(MeanView),
    /// Raw ensemble
    Ensemble(EnsembleView),
    /// Statistics
    Stats(StatsView),
}

impl ExportView {
    /// Kind of the view.
    #[must_use]
    pub const fn kind(&self) -> ExportKind {
        match self {
            Self::Best(_) => ExportKind::Best,
            Self::Mean(_) => ExportKind::Mean,
            Self::Ensemble(_) => ExportKind::Ensemble,
            Self::Stats(_) => ExportKind::Stats,
        }
    }

    /// Run the view was computed from.
    #[must_use]
    pub fn run(&self) -> &str {
        match self {
            Self::Best(v) => &v.run,
            Self::Mean(v) => &v.run,
            Self::Ensemble(v) => &v.run,
            Self::Stats(v) => &v.run,
        }
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] on serialization failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Produce one view of `kind` per run, in input order.
///
/// # Errors
///
/// - [`Error::NoData`] if `runs` is empty
/// - [`Error::InvalidInput`] if `pnames` names an unknown parameter or measure
///   in any run
pub fn export(kind: ExportKind, runs: &[HarvestedRun], pnames: Option<&[&str]>) -> Result<Vec<ExportView>> {
    if runs.is_empty() {
        return Err(Error::NoData("no harvested runs to export".to_string()));
    }
    // Validate every run before computing anything.
    let selections = runs
        .iter()
        .map(|run| ParameterSelection::parse(run.problem(), kind, pnames))
        .collect::<Result<Vec<_>>>()?;

    runs.iter()
        .zip(&selections)
        .map(|(run, selection)| {
            debug!(run = run.name(), %kind, parameters = selection.entries().len(), "export");
            match kind {
                ExportKind::Best => best_view(run, selection).map(ExportView::Best),
                ExportKind::Mean => mean_view(run, selection).map(ExportView::Mean),
                ExportKind::Ensemble => ensemble_view(run, selection).map(ExportView::Ensemble),
                ExportKind::Stats => stats_view(run, selection).map(ExportView::Stats),
            }
        })
        .collect()
}

fn best_view(run: &HarvestedRun, selection: &ParameterSelection) -> Result<BestView> {
    let index = run.ensemble.best_index();
    let values = selection
        .entries()
        .iter()
        .map(|e| {
            Ok(NamedValue {
                name: e.name.clone(),
                value: run.value(index, e.column)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(BestView {
        run: run.name.clone(),
        index,
        misfit: run.record(index).global_misfit().unwrap_or(f64::INFINITY),
        values,
    })
}

fn mean_view(run: &HarvestedRun, selection: &ParameterSelection) -> Result<MeanView> {
    let pooled = run.ensemble.pooled_indices();
    let values = selection
        .entries()
        .iter()
        .map(|e| {
            let column = run.column(&pooled, e.column)?;
            Ok(NamedValue {
                name: e.name.clone(),
                value: mean(&column).unwrap_or(f64::NAN),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(MeanView {
        run: run.name.clone(),
        nsamples: pooled.len(),
        values,
    })
}

fn ensemble_view(run: &HarvestedRun, selection: &ParameterSelection) -> Result<EnsembleView> {
    let mut members = Vec::with_capacity(run.ensemble.len());
    for chain in run.ensemble.chains() {
        for &index in chain.indices() {
            let values = selection
                .entries()
                .iter()
                .map(|e| run.value(index, e.column))
                .collect::<Result<Vec<_>>>()?;
            members.push(EnsembleMember {
                chain: chain.chain(),
                index,
                misfit: run.record(index).global_misfit().unwrap_or(f64::INFINITY),
                values,
            });
        }
    }
    Ok(EnsembleView {
        run: run.name.clone(),
        names: selection.names(),
        members,
    })
}

fn stats_view(run: &HarvestedRun, selection: &ParameterSelection) -> Result<StatsView> {
    let pooled = run.ensemble.pooled_indices();
    let best = run.ensemble.best_index();
    let parameters = selection
        .entries()
        .iter()
        .map(|e| {
            let column = run.column(&pooled, e.column)?;
            let stats = ParameterStats::compute(&column, run.value(best, e.column)?)
                .ok_or_else(|| Error::NoData(format!("{} has an empty ensemble", run.name)))?;
            let measures: Vec<Measure> = e.measure.map_or_else(|| Measure::ALL.to_vec(), |m| vec![m]);
            Ok(StatsEntry {
                name: e.name.clone(),
                measures: measures
                    .into_iter()
                    .map(|m| NamedValue {
                        name: m.as_str().to_string(),
                        value: stats.get(m),
                    })
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(StatsView {
        run: run.name.clone(),
        nsamples: pooled.len(),
        parameters,
    })
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::harvest::{harvest_records, WeedLevel};
    use crate::problem::{EvaluationFailure, Parameter, TargetMisfit};
    use crate::sample::MisfitVector;

    struct Plane {
        params: Vec<Parameter>,
    }

    impl Problem for Plane {
        fn name(&self) -> &str {
            "plane"
        }

        fn parameters(&self) -> &[Parameter] {
            &self.params
        }

        fn ntargets(&self) -> usize {
            1
        }

        fn evaluate(&self, _model: &[f64]) -> std::result::Result<Vec<TargetMisfit>, EvaluationFailure> {
            Ok(vec![TargetMisfit::new(0.0, 1.0)])
        }
    }

    fn plane() -> Plane {
        Plane {
            params: vec![Parameter::new("a", 0.0, 10.0), Parameter::new("b", 0.0, 10.0)],
        }
    }

    /// Seven samples with global misfit = index; one bootstrap chain reversed.
    fn run() -> HarvestedRun {
        let a = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0];
        let records: Vec<SampleRecord> = (0u32..7)
            .map(|i| {
                let x = f64::from(i);
                SampleRecord::evaluated(
                    u64::from(i),
                    vec![a[i as usize], 2.0 * x],
                    MisfitVector::new(vec![x, 10.0 - x]),
                    vec![],
                )
            })
            .collect();
        let ensemble = harvest_records(&records, 2, 4, WeedLevel::None).unwrap();
        HarvestedRun::from_parts("event-a", ProblemIdentity::of(&plane()).unwrap(), ensemble, records).unwrap()
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("ensemble".parse::<ExportKind>().unwrap(), ExportKind::Ensemble);
        assert!(matches!("summary".parse::<ExportKind>(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_best_view() {
        let views = export(ExportKind::Best, &[run()], None).unwrap();
        let ExportView::Best(best) = &views[0] else {
            panic!("expected best view");
        };
        assert_eq!(best.index, 0);
        assert_eq!(best.misfit, 0.0);
        assert_eq!(best.values[0].name, "a");
        assert_eq!(best.values[0].value, 3.0);
    }

    #[test]
    fn test_mean_pools_chains_with_duplicates() {
        // global chain: 0 1 2 3, bootstrap chain: 6 5 4 3
        let views = export(ExportKind::Mean, &[run()], Some(&["a"])).unwrap();
        let ExportView::Mean(mean) = &views[0] else {
            panic!("expected mean view");
        };
        assert_eq!(mean.nsamples, 8);
        let expected = (3.0 + 1.0 + 4.0 + 1.0 + 2.0 + 9.0 + 5.0 + 1.0) / 8.0;
        assert!((mean.values[0].value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_ensemble_members_in_chain_order() {
        let views = export(ExportKind::Ensemble, &[run()], Some(&["b"])).unwrap();
        let ExportView::Ensemble(ens) = &views[0] else {
            panic!("expected ensemble view");
        };
        let order: Vec<(usize, u64)> = ens.members.iter().map(|m| (m.chain, m.index)).collect();
        assert_eq!(
            order,
            vec![(0, 0), (0, 1), (0, 2), (0, 3), (1, 6), (1, 5), (1, 4), (1, 3)]
        );
        assert_eq!(ens.members[4].values, vec![12.0]);
        assert_eq!(ens.names, vec!["b"]);
    }

    #[test]
    fn test_stats_single_measure_and_full() {
        let views = export(ExportKind::Stats, &[run()], Some(&["a.maximum", "b"])).unwrap();
        let ExportView::Stats(stats) = &views[0] else {
            panic!("expected stats view");
        };
        assert_eq!(stats.parameters[0].measures.len(), 1);
        assert_eq!(stats.parameters[0].measures[0].name, "maximum");
        assert_eq!(stats.parameters[0].measures[0].value, 9.0);
        assert_eq!(stats.parameters[1].measures.len(), 8);
        assert_eq!(stats.parameters[1].measures[0].name, "best");
        assert_eq!(stats.parameters[1].measures[0].value, 0.0);
    }

    #[test]
    fn test_stats_unknown_name_fails() {
        let err = export(ExportKind::Stats, &[run()], Some(&["nonexistent"])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_one_view_per_run_in_order() {
        let mut second = run();
        second.name = "event-b".to_string();
        let views = export(ExportKind::Best, &[run(), second], None).unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].run(), "event-a");
        assert_eq!(views[1].run(), "event-b");
        assert!(export(ExportKind::Best, &[], None).is_err());
    }

    #[test]
    fn test_view_json_is_tagged() {
        let views = export(ExportKind::Mean, &[run()], None).unwrap();
        let json: serde_json::Value = serde_json::from_str(&views[0].to_json().unwrap()).unwrap();
        assert_eq!(json["kind"], "mean");
        assert_eq!(json["values"][1]["name"], "b");
    }

    #[test]
    fn test_from_parts_rejects_failed_member() {
        let mut records = vec![SampleRecord::evaluated(0, vec![1.0, 1.0], MisfitVector::new(vec![0.1, 0.1]), vec![])];
        let ensemble = harvest_records(&records, 2, 1, WeedLevel::None).unwrap();
        records[0] = SampleRecord::failed(0, vec![1.0, 1.0], "gone");
        let identity = ProblemIdentity::of(&plane()).unwrap();
        assert!(matches!(
            HarvestedRun::from_parts("x", identity, ensemble, records),
            Err(Error::StorageError(_))
        ));
    }

    #[test]
    fn test_verify_problem() {
        let run = run();
        assert!(run.verify_problem(&plane()).is_ok());
        let other = Plane {
            params: vec![Parameter::new("a", 0.0, 1.0), Parameter::new("b", 0.0, 10.0)],
        };
        assert!(matches!(run.verify_problem(&other), Err(Error::ConfigMismatch { .. })));
    }
}
