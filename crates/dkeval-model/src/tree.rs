use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use dkeval_data::DataPackage;

use crate::classifier::{Classifier, Trainer};
use crate::config::MaxFeatures;
use crate::error::ModelError;
use crate::node::{Node, NodeIndex};
use crate::predict::ClassDistribution;
use crate::split::{SplitContext, SplitCriterion};

/// Configuration for a single CART decision tree.
///
/// Construct via [`DecisionTreeConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter           | Default             |
/// |---------------------|---------------------|
/// | `criterion`         | `Gini`              |
/// | `max_depth`         | `None` (unlimited)  |
/// | `min_samples_split` | 2                   |
/// | `min_samples_leaf`  | 1                   |
/// | `max_features`      | `All`               |
/// | `seed`              | 42                  |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeConfig {
    pub(crate) criterion: SplitCriterion,
    pub(crate) max_depth: Option<usize>,
    pub(crate) min_samples_split: usize,
    pub(crate) min_samples_leaf: usize,
    pub(crate) max_features: MaxFeatures,
    pub(crate) seed: u64,
}

impl DecisionTreeConfig {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            criterion: SplitCriterion::Gini,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            seed: 42,
        }
    }

    /// Set the split quality criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the maximum tree depth (root is depth 0). `None` is unlimited.
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

    /// Set the minimum number of rows required in each leaf after a split.
    #[must_use]
    pub fn with_min_samples_leaf(mut self, min_samples_leaf: usize) -> Self {
        self.min_samples_leaf = min_samples_leaf;
        self
    }

    /// Set the number of features drawn at each split.
    #[must_use]
    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // --- Getters ---

    /// Return the split criterion.
    #[must_use]
    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
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

    /// Return the per-split feature draw.
    #[must_use]
    pub fn max_features(&self) -> MaxFeatures {
        self.max_features
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check the numeric limits against a feature count and return the
    /// resolved max_features.
    pub(crate) fn validate(&self, n_features: usize) -> Result<usize, ModelError> {
        if n_features == 0 {
            return Err(ModelError::ZeroFeatures);
        }
        if let Some(d) = self.max_depth
            && d == 0
        {
            return Err(ModelError::InvalidMaxDepth { max_depth: 0 });
        }
        if self.min_samples_split < 2 {
            return Err(ModelError::InvalidMinSamplesSplit {
                min_samples_split: self.min_samples_split,
            });
        }
        if self.min_samples_leaf < 1 {
            return Err(ModelError::InvalidMinSamplesLeaf {
                min_samples_leaf: self.min_samples_leaf,
            });
        }
        self.max_features.resolve(n_features)
    }

    /// Grow a tree on `rows[i]` for every `i` in `indices`.
    ///
    /// Shared by [`Trainer::train`] and the forest's bagging loop. Inputs are
    /// finite by construction of [`DataPackage`].
    pub(crate) fn fit_rows(
        &self,
        rows: &[Vec<f64>],
        labels: &[usize],
        indices: &[usize],
        n_classes: usize,
        feature_names: &[String],
    ) -> Result<DecisionTreeModel, ModelError> {
        let n_features = feature_names.len();
        let max_features = self.validate(n_features)?;

        let columns: Vec<Vec<f64>> = (0..n_features)
            .map(|f| indices.iter().map(|&i| rows[i][f]).collect())
            .collect();
        let local_labels: Vec<usize> = indices.iter().map(|&i| labels[i]).collect();

        let context = SplitContext {
            columns: &columns,
            labels: &local_labels,
            n_classes,
            criterion: self.criterion,
            max_features,
            min_samples_leaf: self.min_samples_leaf,
        };
        let mut builder = TreeBuilder {
            config: self,
            context,
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            arena: Vec::new(),
        };
        let samples: Vec<usize> = (0..indices.len()).collect();
        builder.grow(&samples, 0);

        debug!(n_nodes = builder.arena.len(), n_samples = indices.len(), "decision tree built");

        Ok(DecisionTreeModel {
            nodes: builder.arena,
            feature_names: feature_names.to_vec(),
            n_classes,
        })
    }
}

impl Default for DecisionTreeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Trainer for DecisionTreeConfig {
    type Model = DecisionTreeModel;

    /// # Errors
    ///
    /// | Variant                                | When                                 |
    /// |----------------------------------------|--------------------------------------|
    /// | [`ModelError::ZeroFeatures`]           | the package has no feature columns   |
    /// | [`ModelError::InvalidMaxFeatures`]     | max_features resolves out of range   |
    /// | [`ModelError::InvalidMaxDepth`]        | `max_depth` is `Some(0)`             |
    /// | [`ModelError::InvalidMinSamplesSplit`] | `min_samples_split` < 2              |
    /// | [`ModelError::InvalidMinSamplesLeaf`]  | `min_samples_leaf` < 1               |
    #[instrument(skip(self, data), fields(n_samples = data.row_count(), criterion = self.criterion.name()))]
    fn train(&self, data: &DataPackage) -> Result<DecisionTreeModel, ModelError> {
        let indices: Vec<usize> = (0..data.row_count()).collect();
        self.fit_rows(
            data.feature_database(),
            data.labels(),
            &indices,
            data.n_classes(),
            &data.feature_names(),
        )
    }
}

struct TreeBuilder<'a> {
    config: &'a DecisionTreeConfig,
    context: SplitContext<'a>,
    rng: ChaCha8Rng,
    arena: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, samples: &[usize], depth: usize) -> NodeIndex {
        let n_samples = samples.len();
        let mut class_counts = vec![0usize; self.context.n_classes];
        for &s in samples {
            class_counts[self.context.labels[s]] += 1;
        }
        let impurity = self.config.criterion.impurity(&class_counts, n_samples);

        let stop = impurity.is_pure()
            || n_samples < self.config.min_samples_split
            || self.config.max_depth.is_some_and(|d| depth >= d);
        let split = if stop {
            None
        } else {
            self.context
                .best_split(samples, &mut self.rng)
                .filter(|s| s.impurity_decrease > 1e-12)
        };

        let Some(split) = split else {
            let total = n_samples.max(1) as f64;
            let distribution: Vec<f64> = class_counts.iter().map(|&c| c as f64 / total).collect();
            let prediction = ClassDistribution::from_scores(distribution.clone()).predicted_class();
            self.arena.push(Node::Leaf {
                prediction,
                distribution,
                impurity,
                n_samples,
            });
            return NodeIndex::new(self.arena.len() - 1);
        };

        // Reserve this node's slot, grow the children, then overwrite.
        let slot = self.arena.len();
        self.arena.push(Node::Leaf {
            prediction: 0,
            distribution: Vec::new(),
            impurity,
            n_samples,
        });
        let left = self.grow(&split.left_indices, depth + 1);
        let right = self.grow(&split.right_indices, depth + 1);
        self.arena[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            impurity,
            n_samples,
            impurity_decrease: split.impurity_decrease,
        };
        NodeIndex::new(slot)
    }
}

/// A fitted CART decision tree stored as an index-linked `Vec<Node>` arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeModel {
    pub(crate) nodes: Vec<Node>,
    pub(crate) feature_names: Vec<String>,
    pub(crate) n_classes: usize,
}

impl DecisionTreeModel {
    /// Return the root node.
    #[must_use]
    pub fn root_node(&self) -> &Node {
        &self.nodes[NodeIndex::ROOT.index()]
    }

    /// Return the node at `index`, if any.
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.index())
    }

    /// Return the number of features this tree was trained on.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Return the total number of nodes.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaves.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the maximum depth. A lone root leaf has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(NodeIndex::ROOT, 0usize)];
        while let Some((index, d)) = stack.pop() {
            deepest = deepest.max(d);
            if let Some((left, right)) = self.nodes[index.index()].children() {
                stack.push((left, d + 1));
                stack.push((right, d + 1));
            }
        }
        deepest
    }

    /// Mean decrease in impurity per feature column, normalized to sum to 1.
    ///
    /// All zeros when the tree is a single leaf.
    #[must_use]
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut totals = vec![0.0f64; self.n_features()];
        for node in &self.nodes {
            if let Node::Split {
                feature,
                impurity_decrease,
                ..
            } = node
            {
                totals[feature.index()] += impurity_decrease;
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            totals.iter_mut().for_each(|v| *v /= sum);
        }
        totals
    }

    /// Walk from the root to the leaf reached by `row`.
    pub(crate) fn leaf_for(&self, row: &[f64]) -> Result<&Node, ModelError> {
        if row.len() != self.n_features() {
            return Err(ModelError::PredictionFeatureMismatch {
                expected: self.n_features(),
                got: row.len(),
            });
        }
        let mut node = self.root_node();
        while let Node::Split {
            feature,
            threshold,
            left,
            right,
            ..
        } = node
        {
            let next = if row[feature.index()] <= *threshold { left } else { right };
            node = &self.nodes[next.index()];
        }
        Ok(node)
    }

    /// Return the predicted class for `row`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::PredictionFeatureMismatch`] on a row of the wrong width.
    pub fn predict(&self, row: &[f64]) -> Result<usize, ModelError> {
        match self.leaf_for(row)? {
            Node::Leaf { prediction, .. } => Ok(*prediction),
            Node::Split { .. } => unreachable!("leaf_for always stops at a leaf"),
        }
    }
}

impl Classifier for DecisionTreeModel {
    fn evaluate(&self, row: &[f64]) -> Result<ClassDistribution, ModelError> {
        match self.leaf_for(row)? {
            Node::Leaf { distribution, .. } => Ok(ClassDistribution::from_scores(distribution.clone())),
            Node::Split { .. } => unreachable!("leaf_for always stops at a leaf"),
        }
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn set_feature_names(&mut self, names: Vec<String>) -> Result<(), ModelError> {
        if names.len() != self.feature_names.len() {
            return Err(ModelError::FeatureNameCountMismatch {
                expected: self.feature_names.len(),
                got: names.len(),
            });
        }
        self.feature_names = names;
        Ok(())
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}
