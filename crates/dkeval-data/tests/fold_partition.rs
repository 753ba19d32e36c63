//! Partition properties of patient-grouped folds and copy-on-subset.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use dkeval_data::{DataPackage, PatientFoldGenerator, SubjectId};

// ---------------------------------------------------------------------------
// Helper: subjects with a variable number of rows each
// ---------------------------------------------------------------------------

/// 40 subjects with 1-4 rows each, 3 features, binary labels per subject.
fn make_cohort() -> DataPackage {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let mut subjects = Vec::new();
    for s in 0..40 {
        let label = s % 2;
        let n_rows = rng.gen_range(1..=4);
        for _ in 0..n_rows {
            rows.push(
                (0..3)
                    .map(|_| label as f64 + rng.r#gen::<f64>())
                    .collect::<Vec<f64>>(),
            );
            labels.push(label);
            subjects.push(SubjectId::new(format!("patient-{s:03}")));
        }
    }
    DataPackage::from_names(&["a", "b", "c"], rows, labels, subjects).unwrap()
}

// ---------------------------------------------------------------------------
// a) k-fold validation sets cover every row exactly once
// ---------------------------------------------------------------------------

#[test]
fn validation_sets_partition_rows_and_subjects() {
    let data = make_cohort();
    for k in [2, 3, 5, 7, 10] {
        for stratify in [true, false] {
            let folds: Vec<_> = PatientFoldGenerator::new(k)
                .unwrap()
                .with_stratification(stratify)
                .folds(&data)
                .unwrap()
                .collect();
            assert_eq!(folds.len(), k);

            let mut seen_rows = vec![0usize; data.row_count()];
            let mut subject_fold: HashMap<&SubjectId, usize> = HashMap::new();
            for (i, fold) in folds.iter().enumerate() {
                assert!(!fold.validation().is_empty(), "k={k}: empty fold {i}");
                assert_eq!(fold.train().len() + fold.validation().len(), data.row_count());
                for &r in fold.validation() {
                    seen_rows[r] += 1;
                    let subject = &data.subject_ids()[r];
                    let previous = subject_fold.insert(subject, i);
                    assert!(previous.is_none() || previous == Some(i));
                }
                let train_subjects: HashSet<_> =
                    fold.train().iter().map(|&r| &data.subject_ids()[r]).collect();
                let val_subjects: HashSet<_> =
                    fold.validation().iter().map(|&r| &data.subject_ids()[r]).collect();
                assert!(train_subjects.is_disjoint(&val_subjects), "k={k}: subject leak");
            }
            assert!(seen_rows.iter().all(|&c| c == 1), "k={k}: row not covered once");
            assert_eq!(subject_fold.len(), data.distinct_subjects());
        }
    }
}

// ---------------------------------------------------------------------------
// b) different seeds give different partitions
// ---------------------------------------------------------------------------

#[test]
fn seed_changes_partition() {
    let data = make_cohort();
    let a: Vec<_> = PatientFoldGenerator::new(5).unwrap().with_seed(1).folds(&data).unwrap().collect();
    let b: Vec<_> = PatientFoldGenerator::new(5).unwrap().with_seed(2).folds(&data).unwrap().collect();
    assert_ne!(a, b);
}

// ---------------------------------------------------------------------------
// c) subsetting by name twice yields identical copies
// ---------------------------------------------------------------------------

#[test]
fn subset_twice_is_identical_and_source_untouched() {
    let data = make_cohort();
    let before = data.clone();
    let first = data.feature_database_subset(&["c", "a"]).unwrap();
    let second = data.feature_database_subset(&["c", "a"]).unwrap();
    assert_eq!(first, second);
    assert_eq!(data, before);

    let mut edited = first.clone();
    for row in edited.feature_database_mut() {
        row[0] = -1.0;
    }
    assert_eq!(data, before);
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// d) fold rows select into independent packages
// ---------------------------------------------------------------------------

#[test]
fn fold_selection_preserves_labels() {
    let data = make_cohort();
    let fold = PatientFoldGenerator::new(4).unwrap().folds(&data).unwrap().next().unwrap();
    let train = data.select_rows(fold.train()).unwrap();
    let validation = data.select_rows(fold.validation()).unwrap();
    assert_eq!(train.row_count() + validation.row_count(), data.row_count());
    for (i, &r) in fold.validation().iter().enumerate() {
        assert_eq!(validation.labels()[i], data.labels()[r]);
        assert_eq!(validation.feature_database()[i], data.feature_database()[r]);
    }
}
