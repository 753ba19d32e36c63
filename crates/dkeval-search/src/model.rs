//! Model descriptors: plain trainer configs or hyperparameter optimizers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dkeval_data::DataPackage;
use dkeval_model::{Classifier, DecisionTreeConfig, KdeConfig, Measure, RandomForestConfig, Trainer};
use dkeval_optim::{DecisionTreeOptimizer, OptimizerResult, RandomForestOptimizer, SearchStrategy};

use crate::error::PipelineError;

/// The terminal step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "kebab-case")]
pub enum ModelSpec {
    /// A single decision tree with fixed hyperparameters.
    DecisionTree(DecisionTreeConfig),
    /// A random forest with fixed hyperparameters.
    RandomForest(RandomForestConfig),
    /// Per-class kernel density classifier.
    Kde(KdeConfig),
    /// A decision tree tuned by [`DecisionTreeOptimizer`] on each training fold.
    TunedDecisionTree(DecisionTreeOptimizer),
    /// A random forest tuned by [`RandomForestOptimizer`] on each training fold.
    TunedRandomForest(RandomForestOptimizer),
}

/// A model fitted on one training package.
pub struct FittedModel {
    /// The classifier.
    pub model: Box<dyn Classifier>,
    /// Features the classifier reads, in column order.
    pub features: Vec<String>,
    /// Optimizer record for tuned models.
    pub optimizer: Option<OptimizerResult>,
}

impl fmt::Debug for FittedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FittedModel")
            .field("features", &self.features)
            .field("optimizer", &self.optimizer)
            .finish_non_exhaustive()
    }
}

impl ModelSpec {
    /// Every model name accepted by [`ModelSpec::from_str`].
    pub const NAMES: [&'static str; 5] = [
        "decision-tree",
        "random-forest",
        "kde",
        "tuned-decision-tree",
        "tuned-random-forest",
    ];

    /// Stable kebab-case name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::DecisionTree(_) => Self::NAMES[0],
            ModelSpec::RandomForest(_) => Self::NAMES[1],
            ModelSpec::Kde(_) => Self::NAMES[2],
            ModelSpec::TunedDecisionTree(_) => Self::NAMES[3],
            ModelSpec::TunedRandomForest(_) => Self::NAMES[4],
        }
    }

    /// Random forest with `n_trees` trees and default settings.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Model`] when `n_trees` is zero.
    pub fn random_forest(n_trees: usize) -> Result<Self, PipelineError> {
        Ok(ModelSpec::RandomForest(RandomForestConfig::new(n_trees)?))
    }

    /// Fit on `train`. Seeds are replaced by `seed`; optimizers maximize
    /// `measure`.
    ///
    /// # Errors
    ///
    /// | Variant                   | When                              |
    /// |---------------------------|-----------------------------------|
    /// | [`PipelineError::Model`]  | training fails                    |
    /// | [`PipelineError::Optim`]  | the optimizer cannot run          |
    pub fn fit(&self, train: &DataPackage, seed: u64, measure: Measure) -> Result<FittedModel, PipelineError> {
        let plain = |model: Box<dyn Classifier>| FittedModel {
            model,
            features: train.feature_names(),
            optimizer: None,
        };
        Ok(match self {
            ModelSpec::DecisionTree(config) => plain(Box::new(config.clone().with_seed(seed).train(train)?)),
            ModelSpec::RandomForest(config) => plain(Box::new(config.clone().with_seed(seed).train(train)?)),
            ModelSpec::Kde(config) => plain(Box::new(config.train(train)?)),
            ModelSpec::TunedDecisionTree(optimizer) => {
                let tuned = optimizer.clone().with_seed(seed).with_measure(measure).run(train)?;
                FittedModel {
                    model: Box::new(tuned.model),
                    features: tuned.features,
                    optimizer: Some(tuned.result),
                }
            }
            ModelSpec::TunedRandomForest(optimizer) => {
                let tuned = optimizer.clone().with_seed(seed).with_measure(measure).run(train)?;
                FittedModel {
                    model: Box::new(tuned.model),
                    features: tuned.features,
                    optimizer: Some(tuned.result),
                }
            }
        })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelSpec {
    type Err = PipelineError;

    /// Default configuration for a model name. The plain forest grows 50
    /// trees.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision-tree" => Ok(ModelSpec::DecisionTree(DecisionTreeConfig::new())),
            "random-forest" => ModelSpec::random_forest(50),
            "kde" => Ok(ModelSpec::Kde(KdeConfig::new())),
            "tuned-decision-tree" => Ok(ModelSpec::TunedDecisionTree(DecisionTreeOptimizer::new(SearchStrategy::Greedy))),
            "tuned-random-forest" => Ok(ModelSpec::TunedRandomForest(RandomForestOptimizer::new(SearchStrategy::Greedy))),
            _ => Err(PipelineError::UnknownModel { name: s.to_string() }),
        }
    }
}
