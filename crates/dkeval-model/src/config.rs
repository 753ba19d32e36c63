//! Configuration builder for random forest training.

use serde::{Deserialize, Serialize};

use dkeval_data::DataPackage;

use crate::error::ModelError;
use crate::result::ForestFit;
use crate::split::SplitCriterion;

/// Number of features examined at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaxFeatures {
    /// `ceil(sqrt(n))`.
    Sqrt,
    /// `ceil(log2(n))`, at least 1.
    Log2,
    /// `floor(log2(n)) + 1`.
    Log2PlusOne,
    /// `ceil(n * fraction)`, fraction in (0.0, 1.0].
    Fraction(f64),
    /// A fixed count.
    Fixed(usize),
    /// Every feature.
    All,
}

impl MaxFeatures {
    /// Resolve to a concrete count for `n_features` columns.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidMaxFeatures`] when the count falls outside
    /// `[1, n_features]`.
    pub fn resolve(self, n_features: usize) -> Result<usize, ModelError> {
        let n = n_features as f64;
        let resolved = match self {
            MaxFeatures::Sqrt => n.sqrt().ceil() as usize,
            MaxFeatures::Log2 => n.log2().ceil().max(1.0) as usize,
            MaxFeatures::Log2PlusOne => (n.log2().floor() as usize + 1).min(n_features),
            MaxFeatures::Fraction(f) => (n * f).ceil() as usize,
            MaxFeatures::Fixed(k) => k,
            MaxFeatures::All => n_features,
        };
        if resolved == 0 || resolved > n_features {
            return Err(ModelError::InvalidMaxFeatures {
                max_features: resolved,
                n_features,
            });
        }
        Ok(resolved)
    }
}

/// How each tree's training rows are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bagging {
    /// Bootstrap of `ceil(bag_fraction * n)` rows with replacement.
    Normal,
    /// `ceil(bag_fraction * minority_count)` rows with replacement from every class.
    Equalized,
}

/// Which trained trees are kept in the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreeSelection {
    /// Keep every tree.
    All,
    /// Keep the `keep` trees with the best out-of-bag accuracy.
    Oob {
        /// Number of trees retained.
        keep: usize,
    },
}

/// How tree outputs combine into one prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    /// One vote per tree; ties go to the lower class index.
    #[default]
    MajorityVote,
    /// Mean of the leaf distributions.
    AverageProbability,
}

/// Whether an out-of-bag score of the final ensemble is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OobMode {
    /// Compute the OOB accuracy.
    Enabled,
    /// Skip it.
    Disabled,
}

/// Configuration for random forest training.
///
/// Construct via [`RandomForestConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter            | Default        |
/// |----------------------|----------------|
/// | `max_features`       | `Sqrt`         |
/// | `max_depth`          | `None`         |
/// | `min_samples_split`  | 2              |
/// | `min_samples_leaf`   | 1              |
/// | `criterion`          | `Gini`         |
/// | `bagging`            | `Normal`       |
/// | `bag_fraction`       | 1.0            |
/// | `tree_selection`     | `All`          |
/// | `aggregation`        | `MajorityVote` |
/// | `oob_mode`           | `Disabled`     |
/// | `seed`               | 42             |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestConfig {
    pub(crate) n_trees: usize,
    pub(crate) max_features: MaxFeatures,
    pub(crate) max_depth: Option<usize>,
    pub(crate) min_samples_split: usize,
    pub(crate) min_samples_leaf: usize,
    pub(crate) criterion: SplitCriterion,
    pub(crate) bagging: Bagging,
    pub(crate) bag_fraction: f64,
    pub(crate) tree_selection: TreeSelection,
    pub(crate) aggregation: Aggregation,
    pub(crate) oob_mode: OobMode,
    pub(crate) seed: u64,
}

impl RandomForestConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, ModelError> {
        if n_trees == 0 {
            return Err(ModelError::InvalidTreeCount { n_trees });
        }
        Ok(Self {
            n_trees,
            max_features: MaxFeatures::Sqrt,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion: SplitCriterion::Gini,
            bagging: Bagging::Normal,
            bag_fraction: 1.0,
            tree_selection: TreeSelection::All,
            aggregation: Aggregation::MajorityVote,
            oob_mode: OobMode::Disabled,
            seed: 42,
        })
    }

    // --- Setters ---

    /// Set the number of trees grown. Zero is rejected at fit time.
    #[must_use]
    pub fn with_n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    /// Set the max features strategy.
    #[must_use]
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Set the maximum tree depth. `None` means unlimited.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the minimum number of rows required to attempt a split.
    #[must_use]
    pub fn with_min_samples_split(mut self, min_samples_split: usize) -> Self {
        self.min_samples_split = min_samples_split;
        self
    }

    /// Set the minimum number of rows in each leaf.
    #[must_use]
    pub fn with_min_samples_leaf(mut self, min_samples_leaf: usize) -> Self {
        self.min_samples_leaf = min_samples_leaf;
        self
    }

    /// Set the split quality criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the bagging scheme.
    #[must_use]
    pub fn with_bagging(mut self, bagging: Bagging) -> Self {
        self.bagging = bagging;
        self
    }

    /// Set the bag fraction.
    #[must_use]
    pub fn with_bag_fraction(mut self, bag_fraction: f64) -> Self {
        self.bag_fraction = bag_fraction;
        self
    }

    /// Set the tree selection rule.
    #[must_use]
    pub fn with_tree_selection(mut self, tree_selection: TreeSelection) -> Self {
        self.tree_selection = tree_selection;
        self
    }

    /// Set the vote aggregation.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Set the OOB evaluation mode.
    #[must_use]
    pub fn with_oob_mode(mut self, oob_mode: OobMode) -> Self {
        self.oob_mode = oob_mode;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the max features strategy.
    #[must_use]
    pub fn max_features(&self) -> MaxFeatures {
        self.max_features
    }

    /// Return the maximum depth limit, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Return the minimum rows required to split a node.
    #[must_use]
    pub fn min_samples_split(&self) -> usize {
        self.min_samples_split
    }

    /// Return the minimum rows required in each leaf.
    #[must_use]
    pub fn min_samples_leaf(&self) -> usize {
        self.min_samples_leaf
    }

    /// Return the split criterion.
    #[must_use]
    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
    }

    /// Return the bagging scheme.
    #[must_use]
    pub fn bagging(&self) -> Bagging {
        self.bagging
    }

    /// Return the bag fraction.
    #[must_use]
    pub fn bag_fraction(&self) -> f64 {
        self.bag_fraction
    }

    /// Return the tree selection rule.
    #[must_use]
    pub fn tree_selection(&self) -> TreeSelection {
        self.tree_selection
    }

    /// Return the vote aggregation.
    #[must_use]
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Return the OOB evaluation mode.
    #[must_use]
    pub fn oob_mode(&self) -> OobMode {
        self.oob_mode
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Train a random forest on `data`.
    ///
    /// # Errors
    ///
    /// | Variant                                | When                                             |
    /// |----------------------------------------|--------------------------------------------------|
    /// | [`ModelError::InvalidTreeCount`]       | `n_trees` is zero                                |
    /// | [`ModelError::ZeroFeatures`]           | the package has no feature columns               |
    /// | [`ModelError::InvalidMaxFeatures`]     | max_features resolves outside [1, n_features]    |
    /// | [`ModelError::InvalidBagFraction`]     | bag_fraction is not in (0.0, 1.0]                |
    /// | [`ModelError::InvalidKeepCount`]       | OOB selection keeps zero trees                   |
    /// | [`ModelError::InvalidMaxDepth`]        | `max_depth` is `Some(0)`                         |
    /// | [`ModelError::InvalidMinSamplesSplit`] | `min_samples_split` < 2                          |
    /// | [`ModelError::InvalidMinSamplesLeaf`]  | `min_samples_leaf` < 1                           |
    /// | [`ModelError::OobEvaluationFailed`]    | OOB enabled but no row has any OOB tree          |
    pub fn fit(&self, data: &DataPackage) -> Result<ForestFit, ModelError> {
        crate::forest::train(self, data)
    }
}
