//! Integration tests for the optimizer run loop
//!
//! Run directories live in temp dirs; every test reads the log back from
//! disk rather than trusting in-memory state.

mod common;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{config, init_tracing, optimizer, strategy, Quadratic};
use tempfile::TempDir;
use trueno_ensemble::chain::ChainSet;
use trueno_ensemble::optimizer::{
    BootstrapOptimizer, HighScoreStrategy, Optimizer, RunOptions, SamplerPhase, StopReason, Termination,
};
use trueno_ensemble::rundir::RunDirectory;
use trueno_ensemble::sample::Evaluation;
use trueno_ensemble::Error;

// ============================================================================
// Fresh runs
// ============================================================================

#[test]
fn test_run_writes_complete_log() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let problem = Quadratic::new();
    let opt = optimizer(1, 4);

    let outcome = opt.optimize(&problem, dir.path(), &RunOptions::default()).unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.niterations, 90);
    assert_eq!(outcome.new_samples, 90);
    assert_eq!(outcome.failures, 0);
    assert_eq!(opt.niterations(), 90);

    let run = RunDirectory::new(dir.path());
    let records = run.read_records().unwrap();
    assert_eq!(records.len(), 90);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.index(), i as u64);
        assert_eq!(record.misfits().unwrap().len(), 7);
        let radius = record.derived()[0];
        assert!((radius - record.model()[0].hypot(record.model()[1])).abs() < 1e-12);
    }

    let meta = run.read_meta().unwrap();
    assert_eq!(meta.nbootstrap(), 6);
    assert_eq!(meta.nchains(), 7);
    assert_eq!(run.read_bootstrap().unwrap().seed(), Some(23));
}

#[test]
fn test_outcome_best_matches_log() {
    let dir = TempDir::new().unwrap();
    let outcome = optimizer(3, 1)
        .optimize(&Quadratic::new(), dir.path(), &RunOptions::default())
        .unwrap();

    let records = RunDirectory::new(dir.path()).read_records().unwrap();
    let chains = ChainSet::replay(&records, 7, 5).unwrap();
    let best = chains.global().best().unwrap();
    assert_eq!(outcome.best, Some((best.index, best.misfit)));
}

#[test]
fn test_directed_phase_improves_on_uniform() {
    let dir = TempDir::new().unwrap();
    optimizer(5, 1)
        .optimize(&Quadratic::new(), dir.path(), &RunOptions::default())
        .unwrap();
    let records = RunDirectory::new(dir.path()).read_records().unwrap();

    let mean_of = |range: std::ops::Range<usize>| {
        let misfits: Vec<f64> = records[range].iter().filter_map(|r| r.global_misfit()).collect();
        misfits.iter().sum::<f64>() / misfits.len() as f64
    };
    assert!(mean_of(30..90) < mean_of(0..30));
}

// ============================================================================
// Resume
// ============================================================================

fn log_bytes(dir: &TempDir) -> Vec<u8> {
    fs::read(RunDirectory::new(dir.path()).log_path()).unwrap()
}

#[test]
fn test_resume_equals_uninterrupted_run() {
    let problem = Quadratic::new();
    for batch_size in [1, 3, 4] {
        let whole = TempDir::new().unwrap();
        optimizer(11, batch_size)
            .optimize(&problem, whole.path(), &RunOptions::default())
            .unwrap();

        for stop in [1, 7, 30, 45] {
            let split = TempDir::new().unwrap();
            let first = optimizer(11, batch_size)
                .optimize(&problem, split.path(), &RunOptions::until(stop))
                .unwrap();
            assert_eq!(first.stop_reason, StopReason::IterationLimit);
            assert_eq!(first.niterations, stop);

            let second = optimizer(11, batch_size)
                .optimize(&problem, split.path(), &RunOptions::default())
                .unwrap();
            assert_eq!(second.niterations, 90);
            assert_eq!(second.new_samples, 90 - stop);

            assert_eq!(
                log_bytes(&split),
                log_bytes(&whole),
                "batch {batch_size}, stopped at {stop}"
            );
        }
    }
}

#[test]
fn test_resume_of_completed_run_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let problem = Quadratic::new();
    optimizer(2, 2).optimize(&problem, dir.path(), &RunOptions::default()).unwrap();
    let before = log_bytes(&dir);

    let again = optimizer(2, 2).optimize(&problem, dir.path(), &RunOptions::default()).unwrap();
    assert_eq!(again.stop_reason, StopReason::Completed);
    assert_eq!(again.new_samples, 0);
    assert_eq!(log_bytes(&dir), before);
}

#[test]
fn test_resume_truncates_torn_tail() {
    let problem = Quadratic::new();
    let whole = TempDir::new().unwrap();
    optimizer(4, 1).optimize(&problem, whole.path(), &RunOptions::default()).unwrap();

    let torn = TempDir::new().unwrap();
    optimizer(4, 1).optimize(&problem, torn.path(), &RunOptions::until(10)).unwrap();
    let log_path = RunDirectory::new(torn.path()).log_path();
    let mut bytes = fs::read(&log_path).unwrap();
    bytes.extend_from_slice(b"{\"index\":10,\"model\":[0.1");
    fs::write(&log_path, bytes).unwrap();

    assert_eq!(RunDirectory::new(torn.path()).read_records().unwrap().len(), 10);
    optimizer(4, 1).optimize(&problem, torn.path(), &RunOptions::default()).unwrap();
    assert_eq!(log_bytes(&torn), log_bytes(&whole));
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn test_resume_with_changed_seed_is_refused() {
    let dir = TempDir::new().unwrap();
    let problem = Quadratic::new();
    optimizer(1, 1).optimize(&problem, dir.path(), &RunOptions::until(5)).unwrap();
    let before = log_bytes(&dir);

    let err = optimizer(2, 1)
        .optimize(&problem, dir.path(), &RunOptions::default())
        .unwrap_err();
    match err {
        Error::ConfigMismatch { field, .. } => assert_eq!(field, "configuration"),
        other => panic!("expected ConfigMismatch, got {other:?}"),
    }
    assert_eq!(log_bytes(&dir), before);
}

#[test]
fn test_resume_with_changed_problem_is_refused() {
    let dir = TempDir::new().unwrap();
    optimizer(1, 1)
        .optimize(&Quadratic::new(), dir.path(), &RunOptions::until(5))
        .unwrap();

    let err = optimizer(1, 1)
        .optimize(&Quadratic::new().with_bounds(-1.0, 1.0), dir.path(), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::ConfigMismatch { ref field, .. } if field == "parameters"));
}

#[test]
fn test_resume_with_changed_strategy_is_refused() {
    let dir = TempDir::new().unwrap();
    let problem = Quadratic::new();
    optimizer(1, 1).optimize(&problem, dir.path(), &RunOptions::until(5)).unwrap();

    let other = BootstrapOptimizer::new(config(1, 1), strategy(30, 61));
    assert!(matches!(
        other.optimize(&problem, dir.path(), &RunOptions::default()),
        Err(Error::ConfigMismatch { .. })
    ));
}

#[test]
fn test_foreign_directory_requires_force() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("notes.txt"), "not a run").unwrap();
    let problem = Quadratic::new();

    let err = optimizer(1, 1)
        .optimize(&problem, dir.path(), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::ForceRequired(_)));
    assert!(dir.path().join("notes.txt").exists());

    optimizer(1, 1).optimize(&problem, dir.path(), &RunOptions::force()).unwrap();
    assert!(!dir.path().join("notes.txt").exists());
}

#[test]
fn test_force_restarts_valid_run() {
    let dir = TempDir::new().unwrap();
    let problem = Quadratic::new();
    optimizer(1, 1).optimize(&problem, dir.path(), &RunOptions::default()).unwrap();

    let options = RunOptions {
        force: true,
        max_iterations: Some(4),
        stop: None,
    };
    let outcome = optimizer(9, 1).optimize(&problem, dir.path(), &options).unwrap();
    assert_eq!(outcome.niterations, 4);
    assert_eq!(RunDirectory::new(dir.path()).read_records().unwrap().len(), 4);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_infeasible_models_are_recorded_not_ranked() {
    let dir = TempDir::new().unwrap();
    let problem = Quadratic::new().infeasible_above(0.0);
    let outcome = optimizer(8, 2)
        .optimize(&problem, dir.path(), &RunOptions::default())
        .unwrap();
    assert_eq!(outcome.niterations, 90);
    assert!(outcome.failures > 0);

    let records = RunDirectory::new(dir.path()).read_records().unwrap();
    let failed = records
        .iter()
        .filter(|r| matches!(r.evaluation(), Evaluation::Failed { .. }))
        .count() as u64;
    assert_eq!(failed, outcome.failures);

    let chains = ChainSet::replay(&records, 7, 5).unwrap();
    for chain in chains.iter() {
        for index in chain.indices() {
            assert!(records[index as usize].is_ok());
        }
    }
}

#[test]
fn test_stalled_engine_is_fatal_and_log_stays_consistent() {
    let dir = TempDir::new().unwrap();
    let problem = Quadratic::new().unavailable_from(12);
    let err = optimizer(1, 1)
        .optimize(&problem, dir.path(), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::EngineStalled { index: 12, attempts: 4, .. }));

    let records = RunDirectory::new(dir.path()).read_records().unwrap();
    assert_eq!(records.len(), 12);

    // the engine is back: resume picks up at sample 12
    let outcome = optimizer(1, 1)
        .optimize(&Quadratic::new(), dir.path(), &RunOptions::default())
        .unwrap();
    assert_eq!(outcome.new_samples, 78);
}

// ============================================================================
// Cooperative stop and early termination
// ============================================================================

#[test]
fn test_external_stop_between_batches() {
    let dir = TempDir::new().unwrap();
    let flag = Arc::new(AtomicBool::new(false));
    let problem = Quadratic::new().stop_after(6, Arc::clone(&flag));

    let outcome = optimizer(1, 1)
        .optimize(&problem, dir.path(), &RunOptions::default().with_stop(Arc::clone(&flag)))
        .unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Stopped);
    assert_eq!(outcome.niterations, 6);
    assert!(flag.load(Ordering::SeqCst));
    assert_eq!(RunDirectory::new(dir.path()).read_records().unwrap().len(), 6);
}

#[test]
fn test_progress_handle_stop_request() {
    let dir = TempDir::new().unwrap();
    let opt = optimizer(1, 1);
    let progress = opt.progress();
    progress.request_stop();
    // a fresh invocation clears earlier requests
    let outcome = opt.optimize(&Quadratic::new(), dir.path(), &RunOptions::until(3)).unwrap();
    assert_eq!(outcome.stop_reason, StopReason::IterationLimit);
    assert_eq!(progress.niterations(), 3);
    assert_eq!(progress.phase(), 0);
}

#[test]
fn test_plateau_stops_after_patience() {
    let dir = TempDir::new().unwrap();
    let strategy = HighScoreStrategy::new(
        vec![
            SamplerPhase::Uniform { niterations: 20 },
            SamplerPhase::Uniform { niterations: 1000 },
        ],
        Termination::Plateau {
            patience: 30,
            min_improvement: 1e9,
        },
    )
    .unwrap();
    let opt = BootstrapOptimizer::new(config(1, 1), strategy);
    let outcome = opt.optimize(&Quadratic::new(), dir.path(), &RunOptions::default()).unwrap();

    // only the first sample counts as a significant improvement
    assert_eq!(outcome.stop_reason, StopReason::Plateau);
    assert_eq!(outcome.niterations, 31);
}
