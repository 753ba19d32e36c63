//! End-to-end pipeline tests: candidate scoring, tuning and the search loop.

use std::io::Write;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use dkeval_data::{DataError, DataPackage, PatientFoldGenerator, SubjectId};
use dkeval_model::Measure;
use dkeval_optim::{Budget, NelderMead};
use dkeval_search::{
    EvaluationOptions, Exploration, ModelSpec, PipelineCandidate, PipelineError, Search, SearchConfig, StopReason,
};
use dkeval_stages::{ComponentSelection, PcaConfig, Stage, StageKind, UndersamplingConfig};

// ---------------------------------------------------------------------------
// Helper: balanced cohort, 2 rows per subject, features 0 and 1 informative
// ---------------------------------------------------------------------------

fn make_cohort(n_subjects: usize, seed: u64) -> DataPackage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let mut subjects = Vec::new();
    for s in 0..n_subjects {
        let label = s % 2;
        for _ in 0..2 {
            let base = label as f64 * 2.5;
            rows.push(vec![
                base + rng.gen_range(-1.0..1.0),
                -base + rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(0.0..2.0),
            ]);
            labels.push(label);
            subjects.push(SubjectId::new(format!("subject-{s}")));
        }
    }
    DataPackage::from_names(&["f0", "f1", "f2", "f3"], rows, labels, subjects).unwrap()
}

fn small_forest() -> ModelSpec {
    ModelSpec::random_forest(10).unwrap()
}

// ---------------------------------------------------------------------------
// Candidate evaluation
// ---------------------------------------------------------------------------

#[test]
fn pca_undersampling_forest_scores_every_fold() {
    let data = make_cohort(100, 1);
    let folds = PatientFoldGenerator::new(5).unwrap().with_seed(3);
    let mut candidate = PipelineCandidate::new(
        vec![
            Stage::Pca(PcaConfig::new(ComponentSelection::Fixed(2)).unwrap()),
            Stage::Undersampling(UndersamplingConfig::default()),
        ],
        small_forest(),
    );

    let evaluation = candidate
        .evaluate(&data, &folds, &EvaluationOptions::new(Measure::RocDistance))
        .unwrap();

    assert!((0.0..=1.0).contains(&evaluation.fitness), "fitness {}", evaluation.fitness);
    assert_eq!(evaluation.folds.len(), 5);
    assert_eq!(evaluation.failed_folds(), 0);
    assert!(evaluation.folds.iter().all(|f| f.warnings.is_empty()));
    assert!(evaluation.mean > 0.7, "mean {}", evaluation.mean);
    assert_eq!(candidate.fitness(), Some(evaluation.fitness));
}

#[test]
fn same_seed_same_evaluation() {
    let data = make_cohort(40, 2);
    let folds = PatientFoldGenerator::new(4).unwrap();
    let options = EvaluationOptions::new(Measure::Accuracy).with_seed(9);
    let mut a = PipelineCandidate::new(vec![Stage::default_for(StageKind::Oversampling, 4)], small_forest());
    let mut b = a.clone();
    assert_eq!(
        a.evaluate(&data, &folds, &options).unwrap(),
        b.evaluate(&data, &folds, &options).unwrap()
    );
}

#[test]
fn degenerate_stage_is_skipped_with_warning() {
    let rows = vec![vec![1.0, 1.0, 1.0]; 40];
    let labels = (0..40).map(|i| (i / 2) % 2).collect();
    let subjects = (0..40).map(|i| SubjectId::new(format!("s{}", i / 2))).collect();
    let data = DataPackage::from_names(&["c0", "c1", "c2"], rows, labels, subjects).unwrap();

    let folds = PatientFoldGenerator::new(4).unwrap();
    let mut candidate = PipelineCandidate::new(vec![Stage::default_for(StageKind::Pca, 3)], small_forest());
    let evaluation = candidate
        .evaluate(&data, &folds, &EvaluationOptions::new(Measure::Accuracy))
        .unwrap();

    assert_eq!(evaluation.failed_folds(), 0);
    assert!(evaluation.folds.iter().all(|f| f.warnings.len() == 1), "{:?}", evaluation.folds);
    assert!(evaluation.folds[0].warnings[0].starts_with("pca"));
}

#[test]
fn too_few_subjects_is_fatal() {
    let data = make_cohort(3, 5);
    let folds = PatientFoldGenerator::new(5).unwrap();
    let mut candidate = PipelineCandidate::new(Vec::new(), small_forest());
    let err = candidate
        .evaluate(&data, &folds, &EvaluationOptions::new(Measure::Accuracy))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Data(DataError::InsufficientSubjects { .. })), "{err}");
}

#[test]
fn tuning_never_lowers_the_baseline() {
    let data = make_cohort(40, 6);
    let folds = PatientFoldGenerator::new(4).unwrap();
    let options = EvaluationOptions::new(Measure::Accuracy);
    let stages = vec![Stage::default_for(StageKind::FeatureSelection, 4)];

    let mut baseline = PipelineCandidate::new(stages.clone(), small_forest());
    let before = baseline.evaluate(&data, &folds, &options).unwrap().fitness;

    let optimizer = NelderMead::new(1e-4)
        .unwrap()
        .with_initial_step(0.25)
        .with_budget(Budget::new(8).unwrap());
    let mut tuned = PipelineCandidate::new(stages, small_forest());
    let outcome = tuned.tune(&data, &folds, &options, &optimizer).unwrap();

    assert!(outcome.evaluation.fitness >= before);
    let record = outcome.optimizer.unwrap();
    assert!(record.evaluations >= 2);
    assert_eq!(tuned.fitness(), Some(outcome.evaluation.fitness));
}

// ---------------------------------------------------------------------------
// Search loop
// ---------------------------------------------------------------------------

fn search_config() -> SearchConfig {
    SearchConfig::new()
        .with_n_folds(3)
        .with_max_candidates(7)
        .with_batch_size(3)
        .with_models(vec![small_forest(), ModelSpec::Kde(dkeval_model::KdeConfig::new())])
        .with_exploration(Exploration::Uniform)
        .with_seed(11)
}

#[test]
fn search_evaluates_the_candidate_budget() {
    let data = make_cohort(30, 7);
    let report = Search::new(search_config()).unwrap().run(&data).unwrap();

    assert_eq!(report.history.len(), 7);
    assert_eq!(report.stop_reason, StopReason::CandidateBudget);
    for (i, record) in report.history.iter().enumerate() {
        assert_eq!(record.index, i);
        let kinds: Vec<StageKind> = record.candidate.stages().iter().map(Stage::kind).collect();
        assert!(kinds.len() <= 3);
        assert!(kinds.windows(2).all(|w| !(w[0] == StageKind::Oversampling && w[1] == StageKind::Oversampling)));
        assert!(!(kinds.contains(&StageKind::Pca) && kinds.contains(&StageKind::FeatureSelection)));
    }

    let best = report.best_record().unwrap();
    let max = report
        .history
        .iter()
        .map(|r| r.evaluation.fitness)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!((best.evaluation.fitness - max).abs() < f64::EPSILON);
    let first_max = report.history.iter().position(|r| r.evaluation.fitness == max).unwrap();
    assert_eq!(report.best, Some(first_max));
}

#[test]
fn search_is_reproducible() {
    let data = make_cohort(30, 8);
    let a = Search::new(search_config()).unwrap().run(&data).unwrap();
    let b = Search::new(search_config()).unwrap().run(&data).unwrap();
    assert_eq!(a.history, b.history);
    assert_eq!(a.best, b.best);
}

#[test]
fn search_rejects_too_few_subjects_up_front() {
    let data = make_cohort(2, 9);
    let err = Search::new(search_config()).unwrap().run(&data).unwrap_err();
    assert!(matches!(err, PipelineError::Data(DataError::InsufficientSubjects { .. })));
}

#[test]
fn search_report_serializes() {
    let data = make_cohort(30, 10);
    let report = Search::new(search_config().with_max_candidates(2)).unwrap().run(&data).unwrap();
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"stop_reason\":\"candidate-budget\""), "{json}");
}

// ---------------------------------------------------------------------------
// Config files
// ---------------------------------------------------------------------------

#[test]
fn config_loads_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"n_folds": 4, "max_candidates": 12, "measure": "mcc", "stages": ["pca", "undersampling"]}}"#
    )
    .unwrap();

    let config = SearchConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.n_folds(), 4);
    assert_eq!(config.max_candidates(), 12);
    assert_eq!(config.measure(), Measure::Mcc);
    assert_eq!(config.stages(), &[StageKind::Pca, StageKind::Undersampling]);
    assert_eq!(config.seed(), 42);
}

#[test]
fn malformed_config_file_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{\"n_folds\": \"five\"}}").unwrap();
    assert!(matches!(
        SearchConfig::from_json_file(file.path()),
        Err(PipelineError::ParseConfig { .. })
    ));
    assert!(matches!(
        SearchConfig::from_json_file(std::path::Path::new("/nonexistent/dkeval.json")),
        Err(PipelineError::ReadConfig { .. })
    ));
}
