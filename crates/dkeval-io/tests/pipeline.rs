//! End-to-end integration tests: CSV -> search/evaluate -> JSON -> read back.

use std::fmt::Write as _;
use std::fs;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

use dkeval_data::PatientFoldGenerator;
use dkeval_io::{ColumnRoles, CsvReader, ExperimentName, ReportWriter};
use dkeval_model::Measure;
use dkeval_search::{EvaluationOptions, ModelSpec, PipelineCandidate, Search, SearchConfig};
use dkeval_stages::{DataOptimizer, Stage, StageKind};

// ---------------------------------------------------------------------------
// Helper: write a cohort CSV with string labels and repeated subjects
// ---------------------------------------------------------------------------

fn write_cohort_csv(dir: &TempDir, n_subjects: usize, seed: u64) -> std::path::PathBuf {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut csv = String::from("subject,marker_a,diagnosis,marker_b,marker_a_copy,noise\n");
    for s in 0..n_subjects {
        let sick = s % 2 == 1;
        for _ in 0..2 {
            let shift = if sick { 2.0 } else { 0.0 };
            let a: f64 = shift + rng.gen_range(-1.0..1.0);
            let b: f64 = -shift + rng.gen_range(-1.0..1.0);
            let noise: f64 = rng.gen_range(0.0..1.0);
            let label = if sick { "sick" } else { "control" };
            writeln!(csv, "S{s:03},{a:.6},{label},{b:.6},{:.6},{noise:.6}", a * 2.0).unwrap();
        }
    }
    let path = dir.path().join("cohort.csv");
    fs::write(&path, csv).unwrap();
    path
}

fn roles() -> ColumnRoles {
    ColumnRoles::new("diagnosis").with_subject("subject")
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn csv_schema_round_trip() {
    let dir = TempDir::new().unwrap();
    let data = CsvReader::new(&write_cohort_csv(&dir, 20, 1), roles()).read().unwrap();

    assert_eq!(data.feature_names(), vec!["marker_a", "marker_b", "marker_a_copy", "noise"]);
    assert_eq!(data.row_count(), 40);
    assert_eq!(data.distinct_subjects(), 20);
    assert_eq!(data.class_names(), &["control".to_string(), "sick".to_string()]);
    assert_eq!(data.class_counts(), vec![20, 20]);
}

#[test]
fn search_round_trip() {
    let dir = TempDir::new().unwrap();
    let data = CsvReader::new(&write_cohort_csv(&dir, 30, 2), roles()).read().unwrap();

    let config = SearchConfig::new()
        .with_n_folds(3)
        .with_max_candidates(4)
        .with_batch_size(2)
        .with_models(vec![ModelSpec::random_forest(10).unwrap()]);
    let report = Search::new(config).unwrap().run(&data).unwrap();

    let writer = ReportWriter::new(&dir.path().join("out"), ExperimentName::new("search_rt").unwrap()).unwrap();
    let path = writer.write_search(&report).unwrap();
    let content: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(content["experiment"], "search_rt");
    assert_eq!(content["candidates_evaluated"], 4);
    let history = content["history"].as_array().unwrap();
    assert_eq!(history.len(), 4);
    let best = content["best"]["fitness"].as_f64().unwrap();
    for entry in history {
        assert!(entry["fitness"].as_f64().unwrap() <= best + 1e-12);
    }
    let folds = content["best"]["folds"].as_array().unwrap();
    assert_eq!(folds.len(), 3);
    assert!(folds.iter().all(|f| f["confusion"].is_array()));
}

#[test]
fn evaluate_round_trip() {
    let dir = TempDir::new().unwrap();
    let data = CsvReader::new(&write_cohort_csv(&dir, 30, 3), roles()).read().unwrap();

    let mut candidate = PipelineCandidate::new(
        vec![
            Stage::default_for(StageKind::Pca, data.feature_count()),
            Stage::default_for(StageKind::Undersampling, data.feature_count()),
        ],
        ModelSpec::random_forest(10).unwrap(),
    );
    let folds = PatientFoldGenerator::new(5).unwrap();
    let evaluation = candidate
        .evaluate(&data, &folds, &EvaluationOptions::new(Measure::Accuracy))
        .unwrap();

    let writer = ReportWriter::new(dir.path(), ExperimentName::new("eval_rt").unwrap()).unwrap();
    let path = writer.write_evaluation(&candidate, &evaluation).unwrap();
    let content: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(content["candidate"]["pipeline"], "pca > undersampling > random-forest");
    assert_eq!(content["candidate"]["folds"].as_array().unwrap().len(), 5);
    assert!(content["candidate"]["fitness"].as_f64().unwrap() > 0.8);
}

#[test]
fn redundant_round_trip() {
    let dir = TempDir::new().unwrap();
    let data = CsvReader::new(&write_cohort_csv(&dir, 20, 4), roles()).read().unwrap();
    let redundant = DataOptimizer::default().redundant_features(&data);

    let writer = ReportWriter::new(dir.path(), ExperimentName::new("red_rt").unwrap()).unwrap();
    let path = writer.write_redundant(data.feature_count(), &redundant).unwrap();
    let content: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(content["redundant"], serde_json::json!(["marker_a_copy"]));
    assert_eq!(content["n_features"], 4);
}
