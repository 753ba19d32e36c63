//! Hyperparameter search for a single decision tree.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use dkeval_data::DataPackage;
use dkeval_model::{DecisionTreeConfig, DecisionTreeModel, MaxFeatures, Measure, SplitCriterion, Trainer};

use crate::budget::Budget;
use crate::discrete::{self, Axis, SearchStrategy};
use crate::error::OptimError;
use crate::fitness::{cross_validated_fitness, inner_folds};
use crate::result::TunedModel;

/// `0.0` encodes an unlimited depth.
pub(crate) fn encode_depth(depth: Option<usize>) -> f64 {
    depth.map_or(0.0, |d| d as f64)
}

pub(crate) fn decode_depth(value: f64) -> Option<usize> {
    let d = value.round() as usize;
    (d > 0).then_some(d)
}

pub(crate) fn encode_criterion(criterion: SplitCriterion) -> f64 {
    match criterion {
        SplitCriterion::Gain => 0.0,
        SplitCriterion::Gini => 1.0,
    }
}

pub(crate) fn decode_criterion(value: f64) -> SplitCriterion {
    if value.round() as i64 == 0 { SplitCriterion::Gain } else { SplitCriterion::Gini }
}

/// Search over depth, leaf size and split criterion for a decision tree that
/// samples `log2(n) + 1` features per split.
///
/// The parameter vector of the result is `[max_depth (0 = unlimited),
/// min_samples_leaf, criterion (0 = gain, 1 = gini)]`.
///
/// # Defaults
///
/// | Parameter          | Default                      |
/// |--------------------|------------------------------|
/// | `strategy`         | `Greedy`                     |
/// | `max_depths`       | 3, 5, 8, unlimited           |
/// | `min_samples_leaf` | 1, 2, 5                      |
/// | `criteria`         | gain, gini                   |
/// | `inner_folds`      | 3                            |
/// | `measure`          | `Accuracy`                   |
/// | `seed`             | 42                           |
/// | `budget`           | [`Budget::default`]          |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeOptimizer {
    strategy: SearchStrategy,
    max_depths: Vec<Option<usize>>,
    min_samples_leaf: Vec<usize>,
    criteria: Vec<SplitCriterion>,
    inner_folds: usize,
    measure: Measure,
    seed: u64,
    budget: Budget,
}

impl DecisionTreeOptimizer {
    /// Create an optimizer with the default axes.
    #[must_use]
    pub fn new(strategy: SearchStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
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

    /// Set the candidate criteria.
    #[must_use]
    pub fn with_criteria(mut self, criteria: Vec<SplitCriterion>) -> Self {
        self.criteria = criteria;
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

    /// Set the seed for inner folds and feature sampling.
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

    /// Return the measure.
    #[must_use]
    pub fn measure(&self) -> Measure {
        self.measure
    }

    /// Decode a parameter vector into a tree configuration.
    #[must_use]
    pub fn decode(&self, parameters: &[f64]) -> DecisionTreeConfig {
        let leaf = parameters.get(1).map_or(1, |v| (v.round() as usize).max(1));
        DecisionTreeConfig::new()
            .with_max_depth(parameters.first().copied().and_then(decode_depth))
            .with_min_samples_leaf(leaf)
            .with_criterion(parameters.get(2).copied().map_or(SplitCriterion::Gain, decode_criterion))
            .with_max_features(MaxFeatures::Log2PlusOne)
            .with_seed(self.seed)
    }

    /// Search the axes and fit the winning tree on all of `data`.
    ///
    /// # Errors
    ///
    /// | Variant                           | When                                  |
    /// |-----------------------------------|---------------------------------------|
    /// | [`OptimError::EmptyAxis`]         | an axis has no candidates             |
    /// | [`OptimError::InvalidInnerFolds`] | `inner_folds` is below 2              |
    /// | [`OptimError::Data`]              | inner folds cannot be generated       |
    /// | [`OptimError::Model`]             | the final fit fails                   |
    #[instrument(skip_all, fields(strategy = ?self.strategy, n_rows = data.row_count()))]
    pub fn run(&self, data: &DataPackage) -> Result<TunedModel<DecisionTreeConfig, DecisionTreeModel>, OptimError> {
        let folds = inner_folds(data, self.inner_folds, self.seed)?;
        let axes = [
            Axis::new("max_depth", self.max_depths.iter().map(|&d| encode_depth(d)).collect()),
            Axis::new("min_samples_leaf", self.min_samples_leaf.iter().map(|&l| l as f64).collect()),
            Axis::new("criterion", self.criteria.iter().map(|&c| encode_criterion(c)).collect()),
        ];
        let result = discrete::maximize(&axes, self.strategy, &self.budget, |point| {
            cross_validated_fitness(&self.decode(point), data, &folds, self.measure)
        })?;
        let config = self.decode(&result.best_parameters);
        let model = config.train(data)?;
        info!(
            fitness = result.best_fitness,
            evaluations = result.evaluations,
            termination = ?result.termination,
            "decision tree tuned"
        );
        Ok(TunedModel {
            config,
            model,
            features: data.feature_names(),
            result,
        })
    }
}

impl Default for DecisionTreeOptimizer {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Greedy,
            max_depths: vec![Some(3), Some(5), Some(8), None],
            min_samples_leaf: vec![1, 2, 5],
            criteria: vec![SplitCriterion::Gain, SplitCriterion::Gini],
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
    fn depth_encoding() {
        assert_eq!(decode_depth(encode_depth(None)), None);
        assert_eq!(decode_depth(encode_depth(Some(7))), Some(7));
        assert_eq!(decode_criterion(encode_criterion(SplitCriterion::Gini)), SplitCriterion::Gini);
    }

    #[test]
    fn decode_builds_log2_feature_trees() {
        let config = DecisionTreeOptimizer::default().decode(&[4.0, 2.0, 1.0]);
        assert_eq!(config.max_depth(), Some(4));
        assert_eq!(config.min_samples_leaf(), 2);
        assert_eq!(config.criterion(), SplitCriterion::Gini);
        assert_eq!(config.max_features(), MaxFeatures::Log2PlusOne);
    }
}
