//! Random forest training with parallel tree construction.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use dkeval_data::DataPackage;

use crate::classifier::{Classifier, Trainer};
use crate::config::{Aggregation, Bagging, OobMode, RandomForestConfig, TreeSelection};
use crate::error::ModelError;
use crate::importance::{RankedFeature, aggregate_importances};
use crate::oob::{compute_oob, tree_oob_accuracy};
use crate::predict::ClassDistribution;
use crate::result::ForestFit;
use crate::tree::{DecisionTreeConfig, DecisionTreeModel};

/// An ensemble of [`DecisionTreeModel`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestModel {
    pub(crate) trees: Vec<DecisionTreeModel>,
    pub(crate) feature_names: Vec<String>,
    pub(crate) n_classes: usize,
    pub(crate) aggregation: Aggregation,
}

impl RandomForestModel {
    /// Create an empty forest over the given schema.
    #[must_use]
    pub fn new(feature_names: Vec<String>, n_classes: usize) -> Self {
        Self {
            trees: Vec::new(),
            feature_names,
            n_classes,
            aggregation: Aggregation::MajorityVote,
        }
    }

    /// Switch how tree outputs are combined.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Add a trained tree to the ensemble.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::IncompatibleTree`] when the tree was trained on a
    /// different number of features.
    pub fn add_decision_tree_model(&mut self, tree: DecisionTreeModel) -> Result<(), ModelError> {
        if tree.n_features() != self.feature_names.len() {
            return Err(ModelError::IncompatibleTree {
                expected: self.feature_names.len(),
                got: tree.n_features(),
            });
        }
        self.n_classes = self.n_classes.max(tree.n_classes());
        self.trees.push(tree);
        Ok(())
    }

    /// Return the trees of the ensemble.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTreeModel] {
        &self.trees
    }

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the aggregation rule.
    #[must_use]
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Ranked mean-decrease-in-impurity importances over all trees.
    #[must_use]
    pub fn feature_importances(&self) -> Vec<RankedFeature> {
        let per_tree: Vec<Vec<f64>> = self.trees.iter().map(DecisionTreeModel::feature_importances).collect();
        aggregate_importances(&per_tree, &self.feature_names)
    }
}

impl Classifier for RandomForestModel {
    fn evaluate(&self, row: &[f64]) -> Result<ClassDistribution, ModelError> {
        if row.len() != self.feature_names.len() {
            return Err(ModelError::PredictionFeatureMismatch {
                expected: self.feature_names.len(),
                got: row.len(),
            });
        }
        self.aggregate(row)
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
        for tree in &mut self.trees {
            tree.set_feature_names(names.clone())?;
        }
        self.feature_names = names;
        Ok(())
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

impl Trainer for RandomForestConfig {
    type Model = RandomForestModel;

    fn train(&self, data: &DataPackage) -> Result<RandomForestModel, ModelError> {
        Ok(self.fit(data)?.into_model())
    }
}

/// Draw one bag of row indices and return it with its out-of-bag complement.
fn draw_bag(
    bagging: Bagging,
    bag_fraction: f64,
    labels: &[usize],
    class_rows: &[Vec<usize>],
    rng: &mut impl Rng,
) -> (Vec<usize>, Vec<usize>) {
    let n_samples = labels.len();
    let mut in_bag = vec![false; n_samples];
    let mut bag = Vec::new();
    match bagging {
        Bagging::Normal => {
            let draws = ((n_samples as f64) * bag_fraction).ceil() as usize;
            for _ in 0..draws.max(1) {
                bag.push(rng.gen_range(0..n_samples));
            }
        }
        Bagging::Equalized => {
            let minority = class_rows
                .iter()
                .filter(|rows| !rows.is_empty())
                .map(Vec::len)
                .min()
                .unwrap_or(0);
            let per_class = ((minority as f64) * bag_fraction).ceil().max(1.0) as usize;
            for rows in class_rows.iter().filter(|rows| !rows.is_empty()) {
                for _ in 0..per_class {
                    bag.push(rows[rng.gen_range(0..rows.len())]);
                }
            }
        }
    }
    for &i in &bag {
        in_bag[i] = true;
    }
    let oob = (0..n_samples).filter(|&i| !in_bag[i]).collect();
    (bag, oob)
}

/// Train the forest ensemble.
#[instrument(skip_all, fields(n_trees = config.n_trees, n_samples = data.row_count()))]
pub(crate) fn train(config: &RandomForestConfig, data: &DataPackage) -> Result<ForestFit, ModelError> {
    if config.n_trees == 0 {
        return Err(ModelError::InvalidTreeCount { n_trees: 0 });
    }
    if !(config.bag_fraction > 0.0 && config.bag_fraction <= 1.0) {
        return Err(ModelError::InvalidBagFraction {
            fraction: config.bag_fraction,
        });
    }
    if let TreeSelection::Oob { keep } = config.tree_selection
        && keep == 0
    {
        return Err(ModelError::InvalidKeepCount { keep });
    }

    let feature_names = data.feature_names();
    let rows = data.feature_database();
    let labels = data.labels();
    let n_classes = data.n_classes();

    let tree_template = DecisionTreeConfig::new()
        .with_criterion(config.criterion)
        .with_max_depth(config.max_depth)
        .with_min_samples_split(config.min_samples_split)
        .with_min_samples_leaf(config.min_samples_leaf)
        .with_max_features(config.max_features);
    let max_features = tree_template.validate(feature_names.len())?;

    let mut class_rows: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (i, &label) in labels.iter().enumerate() {
        class_rows[label].push(i);
    }

    info!(
        n_trees = config.n_trees,
        n_features = feature_names.len(),
        n_classes,
        max_features,
        bagging = ?config.bagging,
        "training random forest"
    );

    let mut master_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let tree_seeds: Vec<u64> = (0..config.n_trees).map(|_| master_rng.r#gen()).collect();

    let grown: Vec<(DecisionTreeModel, Vec<usize>)> = tree_seeds
        .into_par_iter()
        .map(|seed| -> Result<(DecisionTreeModel, Vec<usize>), ModelError> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let (bag, oob) = draw_bag(config.bagging, config.bag_fraction, labels, &class_rows, &mut rng);
            let tree = tree_template
                .clone()
                .with_seed(rng.r#gen())
                .fit_rows(rows, labels, &bag, n_classes, &feature_names)?;
            Ok((tree, oob))
        })
        .collect::<Result<_, _>>()?;

    let (mut trees, mut oob_per_tree): (Vec<_>, Vec<_>) = grown.into_iter().unzip();
    let tree_accuracy: Vec<f64> = trees
        .iter()
        .zip(&oob_per_tree)
        .map(|(tree, oob)| tree_oob_accuracy(tree, rows, labels, oob))
        .collect::<Result<_, _>>()?;

    if let TreeSelection::Oob { keep } = config.tree_selection {
        let mut order: Vec<usize> = (0..trees.len()).collect();
        order.sort_by(|&a, &b| tree_accuracy[b].total_cmp(&tree_accuracy[a]));
        order.truncate(keep.min(trees.len()));
        order.sort_unstable();
        let mut slots: Vec<Option<(DecisionTreeModel, Vec<usize>)>> =
            trees.into_iter().zip(oob_per_tree).map(Some).collect();
        (trees, oob_per_tree) = order.iter().filter_map(|&i| slots[i].take()).unzip();
        debug!(kept = trees.len(), "out-of-bag tree selection applied");
    }

    let oob_score = if config.oob_mode == OobMode::Enabled {
        Some(compute_oob(&trees, rows, labels, n_classes, &oob_per_tree)?)
    } else {
        None
    };

    let mut model = RandomForestModel::new(feature_names, n_classes).with_aggregation(config.aggregation);
    for tree in trees {
        model.add_decision_tree_model(tree)?;
    }

    info!(
        n_trees = model.n_trees(),
        oob_accuracy = oob_score.as_ref().map(|s| s.accuracy),
        "random forest training complete"
    );

    Ok(ForestFit::new(model, oob_score, tree_accuracy))
}

#[cfg(test)]
mod tests {
    use dkeval_data::{DataPackage, SubjectId};

    use super::*;
    use crate::config::MaxFeatures;

    fn make_separable_data() -> DataPackage {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for class in 0..3 {
            for i in 0..20 {
                rows.push(vec![class as f64 * 10.0 + i as f64 * 0.15, 0.5]);
                labels.push(class);
            }
        }
        let subjects = (0..rows.len()).map(|i| SubjectId::new(format!("s{i}"))).collect();
        DataPackage::from_names(&["x", "y"], rows, labels, subjects).unwrap()
    }

    fn accuracy(model: &RandomForestModel, data: &DataPackage) -> f64 {
        let predictions = model.predict_batch(data.feature_database()).unwrap();
        let correct = predictions.iter().zip(data.labels()).filter(|&(p, l)| p == l).count();
        correct as f64 / data.row_count() as f64
    }

    #[test]
    fn three_class_separable_accuracy() {
        let data = make_separable_data();
        let model = RandomForestConfig::new(30)
            .unwrap()
            .with_max_features(MaxFeatures::All)
            .train(&data)
            .unwrap();
        assert_eq!(model.n_trees(), 30);
        assert!(accuracy(&model, &data) > 0.9);
    }

    #[test]
    fn oob_selection_keeps_best_trees() {
        let data = make_separable_data();
        let fit = RandomForestConfig::new(20)
            .unwrap()
            .with_tree_selection(TreeSelection::Oob { keep: 5 })
            .with_oob_mode(OobMode::Enabled)
            .fit(&data)
            .unwrap();
        assert_eq!(fit.model().n_trees(), 5);
        assert_eq!(fit.tree_oob_accuracy().len(), 20);
        assert!(fit.oob_score().unwrap().accuracy > 0.8);
    }

    #[test]
    fn equalized_bagging_trains() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..30 {
            let label = usize::from(i < 5);
            let offset = if label == 1 { 5.0 } else { 0.0 };
            rows.push(vec![offset + i as f64 * 0.01]);
            labels.push(label);
        }
        let subjects = (0..30).map(|i| SubjectId::new(format!("s{i}"))).collect();
        let data = DataPackage::from_names(&["x"], rows, labels, subjects).unwrap();
        let model = RandomForestConfig::new(10)
            .unwrap()
            .with_bagging(Bagging::Equalized)
            .with_max_features(MaxFeatures::All)
            .train(&data)
            .unwrap();
        assert!(accuracy(&model, &data) > 0.95);
    }

    #[test]
    fn deterministic_with_same_seed() {
        let data = make_separable_data();
        let a = RandomForestConfig::new(8).unwrap().with_seed(99).train(&data).unwrap();
        let b = RandomForestConfig::new(8).unwrap().with_seed(99).train(&data).unwrap();
        assert_eq!(
            a.predict_batch(data.feature_database()).unwrap(),
            b.predict_batch(data.feature_database()).unwrap()
        );
    }

    #[test]
    fn average_probability_matches_vote_on_easy_data() {
        let data = make_separable_data();
        let model = RandomForestConfig::new(10)
            .unwrap()
            .with_aggregation(Aggregation::AverageProbability)
            .train(&data)
            .unwrap();
        let dist = model.evaluate(&[20.5, 0.5]).unwrap();
        assert_eq!(dist.predicted_class(), 2);
        assert!((dist.scores().iter().sum::<f64>() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn manual_assembly() {
        let data = make_separable_data();
        let tree = DecisionTreeConfig::new().train(&data).unwrap();
        let mut forest = RandomForestModel::new(data.feature_names(), data.n_classes());
        assert!(matches!(forest.evaluate(&[0.0, 0.5]).unwrap_err(), ModelError::EmptyForest));
        forest.add_decision_tree_model(tree).unwrap();
        assert_eq!(forest.evaluate(&[0.0, 0.5]).unwrap().predicted_class(), 0);

        let mut narrow = RandomForestModel::new(vec!["x".into()], 3);
        let tree = DecisionTreeConfig::new().train(&data).unwrap();
        assert!(matches!(
            narrow.add_decision_tree_model(tree).unwrap_err(),
            ModelError::IncompatibleTree { expected: 1, got: 2 }
        ));
    }

    #[test]
    fn rejects_bad_bag_fraction() {
        let data = make_separable_data();
        let err = RandomForestConfig::new(3).unwrap().with_bag_fraction(0.0).fit(&data).unwrap_err();
        assert!(matches!(err, ModelError::InvalidBagFraction { .. }));
    }
}
