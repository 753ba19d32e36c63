//! Patient-grouped fold generation.
//!
//! Rows are grouped by [`SubjectId`](crate::SubjectId) so that no patient ever
//! contributes to both the training and the validation side of a fold.

use std::collections::BTreeSet;
use std::collections::HashSet;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, instrument, warn};

use crate::error::DataError;
use crate::package::DataPackage;

/// One train/validation split of row indices. Both sides are sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    train: Vec<usize>,
    validation: Vec<usize>,
}

impl Fold {
    /// Return the training row indices.
    #[must_use]
    pub fn train(&self) -> &[usize] {
        &self.train
    }

    /// Return the validation row indices.
    #[must_use]
    pub fn validation(&self) -> &[usize] {
        &self.validation
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Scheme {
    KFold,
    MonteCarlo { fraction: f64 },
}

/// Generates subject-grouped folds over a [`DataPackage`].
///
/// # Defaults
///
/// | Field          | Default |
/// |----------------|---------|
/// | `seed`         | 42      |
/// | `stratify`     | `true`  |
///
/// # Examples
///
/// ```
/// use dkeval_data::PatientFoldGenerator;
///
/// let generator = PatientFoldGenerator::new(5).unwrap().with_seed(7);
/// assert_eq!(generator.n_folds(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct PatientFoldGenerator {
    n_folds: usize,
    seed: u64,
    stratify: bool,
    scheme: Scheme,
}

impl PatientFoldGenerator {
    /// Create a k-fold generator.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::InvalidFoldCount`] if `n_folds` < 2.
    pub fn new(n_folds: usize) -> Result<Self, DataError> {
        if n_folds < 2 {
            return Err(DataError::InvalidFoldCount { n_folds });
        }
        Ok(Self {
            n_folds,
            seed: 42,
            stratify: true,
            scheme: Scheme::KFold,
        })
    }

    /// Create a Monte Carlo generator of `rounds` stratified subject hold-outs.
    ///
    /// Each round validates on `max(1, fraction * minority_subjects)` subjects
    /// of every class. Repeated validation sets are skipped; generation stops
    /// early after `rounds` consecutive repeats.
    ///
    /// # Errors
    ///
    /// | Variant                                    | When                    |
    /// |--------------------------------------------|-------------------------|
    /// | [`DataError::InvalidFoldCount`]            | `rounds` < 2            |
    /// | [`DataError::InvalidValidationFraction`]   | `fraction` not in (0,1) |
    pub fn monte_carlo(rounds: usize, fraction: f64) -> Result<Self, DataError> {
        if rounds < 2 {
            return Err(DataError::InvalidFoldCount { n_folds: rounds });
        }
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(DataError::InvalidValidationFraction { fraction });
        }
        Ok(Self {
            n_folds: rounds,
            seed: 42,
            stratify: true,
            scheme: Scheme::MonteCarlo { fraction },
        })
    }

    // --- Setters ---

    /// Set the shuffling seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enable or disable label-aware bucket assignment (k-fold only).
    #[must_use]
    pub fn with_stratification(mut self, stratify: bool) -> Self {
        self.stratify = stratify;
        self
    }

    // --- Getters ---

    /// Return the requested number of folds (or rounds).
    #[must_use]
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Return the shuffling seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return whether assignment is label-aware.
    #[must_use]
    pub fn stratify(&self) -> bool {
        self.stratify
    }

    /// Partition `data` and return an iterator over its folds.
    ///
    /// The same seed on the same package always yields the same folds.
    ///
    /// # Errors
    ///
    /// | Variant                              | When                                          |
    /// |--------------------------------------|-----------------------------------------------|
    /// | [`DataError::InsufficientSubjects`]  | k-fold with more folds than distinct subjects |
    /// | [`DataError::TooFewClasses`]         | Monte Carlo with fewer than 2 labelled classes|
    #[instrument(skip_all, fields(n_folds = self.n_folds, n_rows = data.row_count()))]
    pub fn folds(&self, data: &DataPackage) -> Result<Folds, DataError> {
        let validation_sets = match self.scheme {
            Scheme::KFold => self.k_fold_buckets(data)?,
            Scheme::MonteCarlo { fraction } => self.monte_carlo_sets(data, fraction)?,
        };
        debug!(folds = validation_sets.len(), "folds generated");
        Ok(Folds {
            validation_sets,
            n_rows: data.row_count(),
            position: 0,
        })
    }

    fn k_fold_buckets(&self, data: &DataPackage) -> Result<Vec<Vec<usize>>, DataError> {
        let mut groups = data.subject_groups();
        let n_subjects = groups.len();
        if self.n_folds > n_subjects {
            return Err(DataError::InsufficientSubjects {
                n_folds: self.n_folds,
                n_subjects,
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        groups.shuffle(&mut rng);
        // Stable: equal-sized groups keep their shuffled order.
        groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        let labels = data.labels();
        let n_classes = data.n_classes().max(1);
        let mut bucket_rows = vec![0usize; self.n_folds];
        let mut bucket_label_rows = vec![vec![0usize; n_classes]; self.n_folds];
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); self.n_folds];

        for (_, rows) in &groups {
            let label = group_label(rows, labels, n_classes);
            // Ascending by (rows of this group's label, total rows, index).
            // The label term is 0 without stratification.
            let target = (0..self.n_folds)
                .min_by_key(|&b| {
                    let label_rows = if self.stratify {
                        bucket_label_rows[b][label]
                    } else {
                        0
                    };
                    (label_rows, bucket_rows[b], b)
                })
                .unwrap_or(0);

            bucket_rows[target] += rows.len();
            for &r in rows {
                bucket_label_rows[target][labels[r]] += 1;
            }
            buckets[target].extend_from_slice(rows);
        }

        for bucket in &mut buckets {
            bucket.sort_unstable();
        }
        Ok(buckets)
    }

    fn monte_carlo_sets(
        &self,
        data: &DataPackage,
        fraction: f64,
    ) -> Result<Vec<Vec<usize>>, DataError> {
        let groups = data.subject_groups();
        let labels = data.labels();
        let n_classes = data.n_classes().max(1);

        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
        for (g, (_, rows)) in groups.iter().enumerate() {
            by_class[group_label(rows, labels, n_classes)].push(g);
        }
        by_class.retain(|c| !c.is_empty());
        if by_class.len() < 2 {
            return Err(DataError::TooFewClasses {
                n_classes: by_class.len(),
            });
        }

        let minority_subjects = by_class.iter().map(Vec::len).min().unwrap_or(1);
        let per_class = ((fraction * minority_subjects as f64) as usize).max(1);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut seen: HashSet<BTreeSet<usize>> = HashSet::new();
        let mut sets = Vec::with_capacity(self.n_folds);
        let mut consecutive_repeats = 0usize;

        while sets.len() < self.n_folds {
            let mut chosen = BTreeSet::new();
            for class_groups in &by_class {
                let mut pool = class_groups.clone();
                pool.shuffle(&mut rng);
                chosen.extend(pool.into_iter().take(per_class));
            }

            if !seen.insert(chosen.clone()) {
                consecutive_repeats += 1;
                if consecutive_repeats >= self.n_folds {
                    warn!(
                        produced = sets.len(),
                        requested = self.n_folds,
                        "monte carlo hold-outs exhausted"
                    );
                    break;
                }
                continue;
            }
            consecutive_repeats = 0;

            let mut rows: Vec<usize> = chosen
                .iter()
                .flat_map(|&g| groups[g].1.iter().copied())
                .collect();
            rows.sort_unstable();
            sets.push(rows);
        }
        Ok(sets)
    }
}

/// Majority label of a subject's rows; lowest class index wins ties.
fn group_label(rows: &[usize], labels: &[usize], n_classes: usize) -> usize {
    let mut counts = vec![0usize; n_classes];
    for &r in rows {
        counts[labels[r]] += 1;
    }
    counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map_or(0, |(class, _)| class)
}

/// Iterator over the folds of one partition.
///
/// Folds are materialized on demand. Cloning or calling [`Folds::restart`]
/// replays the identical sequence.
#[derive(Debug, Clone)]
pub struct Folds {
    validation_sets: Vec<Vec<usize>>,
    n_rows: usize,
    position: usize,
}

impl Folds {
    /// Rewind to the first fold.
    pub fn restart(&mut self) {
        self.position = 0;
    }

    /// Return the total number of folds in the partition.
    #[must_use]
    pub fn fold_count(&self) -> usize {
        self.validation_sets.len()
    }
}

impl Iterator for Folds {
    type Item = Fold;

    fn next(&mut self) -> Option<Fold> {
        let validation = self.validation_sets.get(self.position)?.clone();
        self.position += 1;

        let mut held_out = vec![false; self.n_rows];
        for &r in &validation {
            held_out[r] = true;
        }
        let train = (0..self.n_rows).filter(|&r| !held_out[r]).collect();
        Some(Fold { train, validation })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.validation_sets.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Folds {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SubjectId;

    fn package(subjects: &[&str], labels: &[usize]) -> DataPackage {
        let rows = (0..subjects.len()).map(|i| vec![i as f64]).collect();
        let ids = subjects.iter().map(|s| SubjectId::from(*s)).collect();
        DataPackage::from_names(&["x"], rows, labels.to_vec(), ids).unwrap()
    }

    #[test]
    fn rejects_single_fold() {
        assert!(matches!(
            PatientFoldGenerator::new(1).unwrap_err(),
            DataError::InvalidFoldCount { n_folds: 1 }
        ));
    }

    #[test]
    fn rejects_more_folds_than_subjects() {
        let p = package(&["a", "a", "b", "b"], &[0, 0, 1, 1]);
        let err = PatientFoldGenerator::new(3).unwrap().folds(&p).unwrap_err();
        assert!(matches!(
            err,
            DataError::InsufficientSubjects { n_folds: 3, n_subjects: 2 }
        ));
    }

    #[test]
    fn subject_rows_stay_together() {
        let p = package(&["a", "a", "b", "c", "c", "c", "d"], &[0, 0, 1, 0, 0, 0, 1]);
        let folds: Vec<Fold> = PatientFoldGenerator::new(2).unwrap().folds(&p).unwrap().collect();
        assert_eq!(folds.len(), 2);
        for fold in &folds {
            let v: HashSet<_> = fold.validation().iter().map(|&r| &p.subject_ids()[r]).collect();
            let t: HashSet<_> = fold.train().iter().map(|&r| &p.subject_ids()[r]).collect();
            assert!(v.is_disjoint(&t));
        }
    }

    #[test]
    fn same_seed_same_partition() {
        let p = package(&["a", "b", "c", "d", "e", "f"], &[0, 1, 0, 1, 0, 1]);
        let g = PatientFoldGenerator::new(3).unwrap().with_seed(9);
        let first: Vec<Fold> = g.folds(&p).unwrap().collect();
        let second: Vec<Fold> = g.folds(&p).unwrap().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn restart_replays() {
        let p = package(&["a", "b", "c", "d"], &[0, 1, 0, 1]);
        let mut folds = PatientFoldGenerator::new(2).unwrap().folds(&p).unwrap();
        assert_eq!(folds.len(), 2);
        let first = folds.next().unwrap();
        folds.next();
        assert!(folds.next().is_none());
        folds.restart();
        assert_eq!(folds.next().unwrap(), first);
    }

    #[test]
    fn stratified_buckets_mix_labels() {
        let p = package(&["a", "b", "c", "d"], &[0, 0, 1, 1]);
        let folds: Vec<Fold> = PatientFoldGenerator::new(2).unwrap().folds(&p).unwrap().collect();
        for fold in &folds {
            let mut labels: Vec<usize> = fold.validation().iter().map(|&r| p.labels()[r]).collect();
            labels.sort_unstable();
            assert_eq!(labels, vec![0, 1]);
        }
    }

    #[test]
    fn label_balance_outranks_bucket_size() {
        // "a" fills bucket 0 first; "b" and "c" then tie on size with each other.
        let p = package(&["a", "a", "a", "b", "c"], &[0, 0, 0, 1, 1]);
        let positives = |stratify: bool| -> Vec<usize> {
            let mut counts: Vec<usize> = PatientFoldGenerator::new(2)
                .unwrap()
                .with_stratification(stratify)
                .folds(&p)
                .unwrap()
                .map(|f| f.validation().iter().filter(|&&r| p.labels()[r] == 1).count())
                .collect();
            counts.sort_unstable();
            counts
        };
        assert_eq!(positives(true), vec![1, 1]);
        assert_eq!(positives(false), vec![0, 2]);
    }

    #[test]
    fn monte_carlo_validates_both_classes() {
        let subjects: Vec<String> = (0..20).map(|i| format!("s{i}")).collect();
        let refs: Vec<&str> = subjects.iter().map(String::as_str).collect();
        let labels: Vec<usize> = (0..20).map(|i| usize::from(i >= 12)).collect();
        let p = package(&refs, &labels);

        let folds: Vec<Fold> = PatientFoldGenerator::monte_carlo(5, 0.25)
            .unwrap()
            .folds(&p)
            .unwrap()
            .collect();
        assert_eq!(folds.len(), 5);
        for fold in &folds {
            // 25% of 8 minority subjects, from each class.
            assert_eq!(fold.validation().len(), 4);
            let positives = fold.validation().iter().filter(|&&r| p.labels()[r] == 1).count();
            assert_eq!(positives, 2);
        }
        let distinct: HashSet<_> = folds.iter().map(|f| f.validation().to_vec()).collect();
        assert_eq!(distinct.len(), folds.len());
    }

    #[test]
    fn monte_carlo_stops_when_exhausted() {
        // Two subjects per class and one held out per class: only 4 distinct sets.
        let p = package(&["a", "b", "c", "d"], &[0, 0, 1, 1]);
        let folds = PatientFoldGenerator::monte_carlo(10, 0.5).unwrap().folds(&p).unwrap();
        assert!(folds.len() <= 4);
    }

    #[test]
    fn monte_carlo_needs_two_classes() {
        let p = package(&["a", "b", "c"], &[0, 0, 0]);
        let err = PatientFoldGenerator::monte_carlo(3, 0.2).unwrap().folds(&p).unwrap_err();
        assert!(matches!(err, DataError::TooFewClasses { n_classes: 1 }));
    }

    #[test]
    fn monte_carlo_rejects_bad_fraction() {
        assert!(matches!(
            PatientFoldGenerator::monte_carlo(3, 1.0).unwrap_err(),
            DataError::InvalidValidationFraction { .. }
        ));
    }
}
