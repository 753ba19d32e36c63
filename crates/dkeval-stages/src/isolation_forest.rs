//! Isolation forest outlier removal on training rows.

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use dkeval_data::DataPackage;

use crate::error::StageError;
use crate::stage::{Preprocessor, StageOutput};

const STAGE: &str = "isolation-forest";

/// Average path length of an unsuccessful binary search tree lookup over
/// `n` items.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + 0.577_215_664_9) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug)]
enum IsolationTree {
    Internal {
        feature: usize,
        threshold: f64,
        left: Box<IsolationTree>,
        right: Box<IsolationTree>,
    },
    External {
        size: usize,
    },
}

impl IsolationTree {
    fn build(rows: &[Vec<f64>], indices: &[usize], height: usize, max_height: usize, rng: &mut ChaCha8Rng) -> Self {
        if height >= max_height || indices.len() <= 1 {
            return IsolationTree::External { size: indices.len() };
        }
        let feature = rng.gen_range(0..rows[0].len());
        let (min, max) = indices
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                (lo.min(rows[i][feature]), hi.max(rows[i][feature]))
            });
        if max - min < 1e-10 {
            return IsolationTree::External { size: indices.len() };
        }
        let threshold = rng.gen_range(min..max);
        let (left, right): (Vec<usize>, Vec<usize>) = indices.iter().partition(|&&i| rows[i][feature] < threshold);
        if left.is_empty() || right.is_empty() {
            return IsolationTree::External { size: indices.len() };
        }
        IsolationTree::Internal {
            feature,
            threshold,
            left: Box::new(Self::build(rows, &left, height + 1, max_height, rng)),
            right: Box::new(Self::build(rows, &right, height + 1, max_height, rng)),
        }
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationTree::External { size } => return depth + average_path_length(*size),
                IsolationTree::Internal {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { left.as_ref() } else { right.as_ref() };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Configuration for the isolation forest stage.
///
/// # Defaults
///
/// | Parameter     | Default |
/// |---------------|---------|
/// | `n_trees`     | 100     |
/// | `max_samples` | 256     |
/// | `threshold`   | 0.6     |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestConfig {
    n_trees: usize,
    max_samples: usize,
    threshold: f64,
}

impl IsolationForestConfig {
    /// Create a config with `n_trees` trees.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidParameter`] when `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, StageError> {
        if n_trees == 0 {
            return Err(StageError::InvalidParameter {
                stage: STAGE,
                parameter: "n_trees",
                value: "0".to_string(),
            });
        }
        Ok(Self {
            n_trees,
            max_samples: 256,
            threshold: 0.6,
        })
    }

    /// Ten trees per feature column.
    #[must_use]
    pub fn default_for(n_features: usize) -> Self {
        Self {
            n_trees: (10 * n_features).max(1),
            max_samples: 256,
            threshold: 0.6,
        }
    }

    /// Set the subsample size cap per tree.
    #[must_use]
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples.max(2);
        self
    }

    /// Set the anomaly score at or above which a row is dropped.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Return the tree count.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the subsample cap.
    #[must_use]
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Return the drop threshold.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Anomaly score `2^(-E[h] / c(psi))` of every row of `data`, in `(0, 1]`.
    #[must_use]
    pub fn scores(&self, data: &DataPackage, seed: u64) -> Vec<f64> {
        let rows = data.feature_database();
        let psi = self.max_samples.min(rows.len());
        if psi < 2 || data.feature_count() == 0 {
            return vec![0.0; rows.len()];
        }
        let max_height = (psi as f64).log2().ceil() as usize;
        let trees: Vec<IsolationTree> = (0..self.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(t as u64));
                let sample = index::sample(&mut rng, rows.len(), psi).into_vec();
                IsolationTree::build(rows, &sample, 0, max_height, &mut rng)
            })
            .collect();
        let normalizer = average_path_length(psi);
        rows.par_iter()
            .map(|row| {
                let mean = trees.iter().map(|t| t.path_length(row)).sum::<f64>() / trees.len() as f64;
                2f64.powf(-mean / normalizer)
            })
            .collect()
    }
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            threshold: 0.6,
        }
    }
}

impl Preprocessor for IsolationForestConfig {
    fn name(&self) -> &'static str {
        STAGE
    }

    #[instrument(skip_all, fields(n_trees = self.n_trees, n_rows = train.row_count()))]
    fn run(&self, train: &DataPackage, seed: u64) -> Result<StageOutput, StageError> {
        let scores = self.scores(train, seed);
        let keep: Vec<usize> = (0..scores.len()).filter(|&i| scores[i] < self.threshold).collect();
        if keep.is_empty() {
            warn!(threshold = self.threshold, "every row scored as outlier, keeping input");
            return Ok(StageOutput::resampled(train.clone()));
        }
        if keep.len() == train.row_count() {
            return Ok(StageOutput::resampled(train.clone()));
        }
        debug!(dropped = train.row_count() - keep.len(), "outliers removed");
        Ok(StageOutput::resampled(train.select_rows(&keep)?))
    }
}
