//! Hyperparameter search for a random forest, optionally restricted to the
//! most discriminative features by kernel-density overlap.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use dkeval_data::DataPackage;
use dkeval_model::{KernelDensityExtractor, MaxFeatures, Measure, RandomForestConfig, RandomForestModel, Trainer};

use crate::budget::Budget;
use crate::discrete::{self, Axis, SearchStrategy};
use crate::error::OptimError;
use crate::fitness::{cross_validated_fitness, inner_folds};
use crate::result::TunedModel;
use crate::tree_optimizer::{decode_depth, encode_depth};

/// Search over tree count, depth, leaf size and per-split feature count.
///
/// The parameter vector of the result is `[n_trees, max_depth (0 =
/// unlimited), min_samples_leaf, max_features index]`, the last indexing
/// into [`RandomForestOptimizer::max_features`].
///
/// # Defaults
///
/// | Parameter          | Default                       |
/// |--------------------|-------------------------------|
/// | `strategy`         | `Greedy`                      |
/// | `tree_counts`      | 10, 25, 50, 100               |
/// | `max_depths`       | unlimited, 4, 8               |
/// | `min_samples_leaf` | 1, 2, 4                       |
/// | `max_features`     | `Sqrt`, `Log2PlusOne`, `All`  |
/// | `kde_top_k`        | `None` (every feature)        |
/// | `inner_folds`      | 3                             |
/// | `measure`          | `Accuracy`                    |
/// | `seed`             | 42                            |
/// | `budget`           | [`Budget::default`]           |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestOptimizer {
    strategy: SearchStrategy,
    tree_counts: Vec<usize>,
    max_depths: Vec<Option<usize>>,
    min_samples_leaf: Vec<usize>,
    max_features: Vec<MaxFeatures>,
    kde_top_k: Option<usize>,
    inner_folds: usize,
    measure: Measure,
    seed: u64,
    budget: Budget,
}

impl RandomForestOptimizer {
    /// Create an optimizer with the default axes.
    #[must_use]
    pub fn new(strategy: SearchStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Set the candidate tree counts.
    #[must_use]
    pub fn with_tree_counts(mut self, tree_counts: Vec<usize>) -> Self {
        self.tree_counts = tree_counts;
        self
    }

    /// Set the candidate depths.
    #[must_use]
    pub fn with_max_depths(mut self, max_depths: Vec<Option<usize>>) -> Self {
        self.max_depths = max_depths;
        self
    }

    /// Set the candidate leaf sizes.
    #[must_use]
    pub fn with_min_samples_leaf(mut self, min_samples_leaf: Vec<usize>) -> Self {
        self.min_samples_leaf = min_samples_leaf;
        self
    }

    /// Set the candidate per-split feature counts.
    #[must_use]
    pub fn with_max_features(mut self, max_features: Vec<MaxFeatures>) -> Self {
        self.max_features = max_features;
        self
    }

    /// Train only on the `k` features with the lowest class-density overlap.
    #[must_use]
    pub fn with_kde_top_k(mut self, k: usize) -> Self {
        self.kde_top_k = Some(k.max(1));
        self
    }

    /// Set the inner fold count.
    #[must_use]
    pub fn with_inner_folds(mut self, inner_folds: usize) -> Self {
        self.inner_folds = inner_folds;
        self
    }

    /// Set the measure being maximized.
    #[must_use]
    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measure = measure;
        self
    }

    /// Set the seed for inner folds and forest training.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the evaluation budget.
    #[must_use]
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Return the strategy.
    #[must_use]
    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    /// Return the per-split feature count candidates.
    #[must_use]
    pub fn max_features(&self) -> &[MaxFeatures] {
        &self.max_features
    }

    /// Return the KDE feature cap.
    #[must_use]
    pub fn kde_top_k(&self) -> Option<usize> {
        self.kde_top_k
    }

    /// Decode a parameter vector into a forest configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OptimError::Model`] when the tree count decodes to zero.
    pub fn decode(&self, parameters: &[f64]) -> Result<RandomForestConfig, OptimError> {
        let n_trees = parameters.first().map_or(0, |v| v.round().max(0.0) as usize);
        let leaf = parameters.get(2).map_or(1, |v| (v.round() as usize).max(1));
        let max_features = parameters
            .get(3)
            .and_then(|v| self.max_features.get(v.round().max(0.0) as usize))
            .copied()
            .unwrap_or(MaxFeatures::Sqrt);
        Ok(RandomForestConfig::new(n_trees)?
            .with_max_depth(parameters.get(1).copied().and_then(decode_depth))
            .with_min_samples_leaf(leaf)
            .with_max_features(max_features)
            .with_seed(self.seed))
    }

    /// Narrow `data` to its KDE top-k features when a cap is set.
    fn restrict(&self, data: &DataPackage) -> Result<DataPackage, OptimError> {
        let Some(k) = self.kde_top_k else {
            return Ok(data.clone());
        };
        if k >= data.feature_count() {
            return Ok(data.clone());
        }
        let names = KernelDensityExtractor::new(data)?.top_features(k);
        debug!(?names, "forest restricted to kde-ranked features");
        Ok(data.feature_database_subset(&names)?)
    }

    /// Search the axes and fit the winning forest on all of `data`.
    ///
    /// # Errors
    ///
    /// | Variant                           | When                                        |
    /// |-----------------------------------|---------------------------------------------|
    /// | [`OptimError::EmptyAxis`]         | an axis has no candidates                   |
    /// | [`OptimError::InvalidInnerFolds`] | `inner_folds` is below 2                    |
    /// | [`OptimError::Data`]              | inner folds cannot be generated             |
    /// | [`OptimError::Model`]             | KDE ranking or the final fit fails          |
    #[instrument(skip_all, fields(strategy = ?self.strategy, n_rows = data.row_count()))]
    pub fn run(&self, data: &DataPackage) -> Result<TunedModel<RandomForestConfig, RandomForestModel>, OptimError> {
        let data = self.restrict(data)?;
        let folds = inner_folds(&data, self.inner_folds, self.seed)?;
        let axes = [
            Axis::new("n_trees", self.tree_counts.iter().map(|&n| n as f64).collect()),
            Axis::new("max_depth", self.max_depths.iter().map(|&d| encode_depth(d)).collect()),
            Axis::new("min_samples_leaf", self.min_samples_leaf.iter().map(|&l| l as f64).collect()),
            Axis::new("max_features", (0..self.max_features.len()).map(|i| i as f64).collect()),
        ];
        let result = discrete::maximize(&axes, self.strategy, &self.budget, |point| {
            // Invalid combinations (zero trees, too many features) score 0.
            match self.decode(point) {
                Ok(config) => cross_validated_fitness(&config, &data, &folds, self.measure),
                Err(_) => Ok(0.0),
            }
        })?;
        let config = self.decode(&result.best_parameters)?;
        let model = config.train(&data)?;
        info!(
            fitness = result.best_fitness,
            evaluations = result.evaluations,
            n_trees = config.n_trees(),
            "random forest tuned"
        );
        Ok(TunedModel {
            config,
            model,
            features: data.feature_names(),
            result,
        })
    }
}

impl Default for RandomForestOptimizer {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Greedy,
            tree_counts: vec![10, 25, 50, 100],
            max_depths: vec![None, Some(4), Some(8)],
            min_samples_leaf: vec![1, 2, 4],
            max_features: vec![MaxFeatures::Sqrt, MaxFeatures::Log2PlusOne, MaxFeatures::All],
            kde_top_k: None,
            inner_folds: 3,
            measure: Measure::Accuracy,
            seed: 42,
            budget: Budget::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_indexes_max_features() {
        let optimizer = RandomForestOptimizer::default();
        let config = optimizer.decode(&[25.0, 0.0, 2.0, 2.0]).unwrap();
        assert_eq!(config.n_trees(), 25);
        assert_eq!(config.max_depth(), None);
        assert_eq!(config.min_samples_leaf(), 2);
        assert_eq!(config.max_features(), MaxFeatures::All);
    }

    #[test]
    fn zero_trees_do_not_decode() {
        assert!(RandomForestOptimizer::default().decode(&[0.0, 0.0, 1.0, 0.0]).is_err());
    }
}
