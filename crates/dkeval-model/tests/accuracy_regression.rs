//! Accuracy regression tests for the dkeval classifiers.
//!
//! These tests verify that algorithmic changes do not degrade classification
//! quality on a deterministic synthetic cohort.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use dkeval_data::{DataPackage, PatientFoldGenerator, SubjectId};
use dkeval_model::{
    Bagging, Classifier, ConfusionMatrixAnalytics, DecisionTreeConfig, KdeConfig, KernelDensityExtractor,
    Measure, OobMode, RandomForestConfig, Trainer, TreeSelection,
};

// ---------------------------------------------------------------------------
// Helper: deterministic synthetic classification cohort
// ---------------------------------------------------------------------------

/// Generate a 300-row, 10-feature, 3-class cohort with two rows per subject.
///
/// Features 0-2 are informative (class * 3.0 + noise in [0, 0.5]).
/// Features 3-9 are pure noise in [0, 0.5].
fn make_classification() -> DataPackage {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let n_samples = 300;
    let n_features = 10;
    let n_classes = 3;

    let mut rows = Vec::with_capacity(n_samples);
    let mut labels = Vec::with_capacity(n_samples);
    let mut subjects = Vec::with_capacity(n_samples);
    for i in 0..n_samples {
        let class = (i / 2) % n_classes;
        labels.push(class);
        subjects.push(SubjectId::new(format!("patient-{}", i / 2)));
        let row: Vec<f64> = (0..n_features)
            .map(|f| {
                let base = if f < 3 { class as f64 * 3.0 } else { 0.0 };
                base + rng.r#gen::<f64>() * 0.5
            })
            .collect();
        rows.push(row);
    }
    let names: Vec<String> = (0..n_features).map(|f| format!("f{f}")).collect();
    DataPackage::from_names(&names, rows, labels, subjects).unwrap()
}

fn validation_accuracy(model: &dyn Classifier, data: &DataPackage) -> f64 {
    ConfusionMatrixAnalytics::evaluate(model, data)
        .unwrap()
        .value(Measure::Accuracy)
}

// ---------------------------------------------------------------------------
// a) grouped_cv_accuracy_above_threshold
// ---------------------------------------------------------------------------

/// Subject-grouped 5-fold mean accuracy must exceed 0.85.
#[test]
fn grouped_cv_accuracy_above_threshold() {
    let data = make_classification();
    let rf_config = RandomForestConfig::new(50).unwrap().with_seed(42);
    let folds = PatientFoldGenerator::new(5).unwrap().folds(&data).unwrap();

    let mut accuracies = Vec::new();
    for fold in folds {
        let train = data.select_rows(fold.train()).unwrap();
        let validation = data.select_rows(fold.validation()).unwrap();
        let model = rf_config.train(&train).unwrap();
        accuracies.push(validation_accuracy(&model, &validation));
    }
    let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    assert!(mean > 0.85, "grouped cv mean accuracy {mean} <= 0.85");
}

// ---------------------------------------------------------------------------
// b) oob_accuracy_above_threshold
// ---------------------------------------------------------------------------

/// OOB accuracy with 100 trees must exceed 0.80.
#[test]
fn oob_accuracy_above_threshold() {
    let data = make_classification();
    let rf_config = RandomForestConfig::new(100)
        .unwrap()
        .with_seed(42)
        .with_oob_mode(OobMode::Enabled);
    let result = rf_config.fit(&data).unwrap();

    let oob = result.oob_score().expect("OOB score must be computed when OobMode::Enabled");
    assert!(oob.accuracy > 0.80, "oob_accuracy {} <= 0.80", oob.accuracy);
}

// ---------------------------------------------------------------------------
// c) top_features_are_informative
// ---------------------------------------------------------------------------

/// The top 3 features by importance must include at least 2 of f0, f1, f2.
#[test]
fn top_features_are_informative() {
    let data = make_classification();
    let rf_config = RandomForestConfig::new(100).unwrap().with_seed(42);
    let result = rf_config.fit(&data).unwrap();

    let informative: std::collections::HashSet<&str> = ["f0", "f1", "f2"].iter().copied().collect();
    let top3_names: Vec<String> = result.importances().into_iter().take(3).map(|f| f.name).collect();
    let informative_in_top3 = top3_names.iter().filter(|n| informative.contains(n.as_str())).count();

    assert!(
        informative_in_top3 >= 2,
        "only {informative_in_top3}/3 of top-3 features are informative; top-3: {top3_names:?}"
    );
}

/// KDE overlap ranking must put the informative features ahead of the noise.
#[test]
fn kde_ranks_informative_features_first() {
    let data = make_classification();
    let extractor = KernelDensityExtractor::new(&data).unwrap();
    let mut top3 = extractor.top_features(3);
    top3.sort();
    assert_eq!(top3, vec!["f0", "f1", "f2"]);
}

// ---------------------------------------------------------------------------
// d) deterministic_predictions
// ---------------------------------------------------------------------------

/// Same config and seed must produce identical predictions across two runs.
#[test]
fn deterministic_predictions() {
    let data = make_classification();
    let rf_config = RandomForestConfig::new(50)
        .unwrap()
        .with_seed(42)
        .with_bagging(Bagging::Equalized)
        .with_tree_selection(TreeSelection::Oob { keep: 20 });

    let first = rf_config.fit(&data).unwrap();
    let second = rf_config.fit(&data).unwrap();
    assert_eq!(first.model().n_trees(), 20);

    let preds1 = first.model().predict_batch(data.feature_database()).unwrap();
    let preds2 = second.model().predict_batch(data.feature_database()).unwrap();
    assert_eq!(preds1, preds2, "predictions differ across runs with the same seed");
}

// ---------------------------------------------------------------------------
// e) training accuracy
// ---------------------------------------------------------------------------

/// A forest should memorize its training cohort.
#[test]
fn forest_training_accuracy() {
    let data = make_classification();
    let model = RandomForestConfig::new(100).unwrap().with_seed(42).train(&data).unwrap();
    let accuracy = validation_accuracy(&model, &data);
    assert!(accuracy > 0.95, "training accuracy {accuracy} <= 0.95");
}

/// A single unrestricted tree separates the well-separated cohort perfectly.
#[test]
fn tree_training_accuracy() {
    let data = make_classification();
    let model = DecisionTreeConfig::new().train(&data).unwrap();
    assert!((validation_accuracy(&model, &data) - 1.0).abs() < f64::EPSILON);
}

/// The kernel density classifier reaches forest-level accuracy here.
#[test]
fn kde_training_accuracy() {
    let data = make_classification();
    let model = KdeConfig::new().train(&data).unwrap();
    let accuracy = validation_accuracy(&model, &data);
    assert!(accuracy > 0.95, "kde accuracy {accuracy} <= 0.95");
}
