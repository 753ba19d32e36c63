use dkeval_data::DataError;

/// Errors from model training, prediction and analytics.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when max_depth is zero.
    #[error("max_depth must be at least 1, got {max_depth}")]
    InvalidMaxDepth {
        /// The invalid max_depth value provided.
        max_depth: usize,
    },

    /// Returned when min_samples_split is less than 2.
    #[error("min_samples_split must be at least 2, got {min_samples_split}")]
    InvalidMinSamplesSplit {
        /// The invalid min_samples_split value provided.
        min_samples_split: usize,
    },

    /// Returned when min_samples_leaf is zero.
    #[error("min_samples_leaf must be at least 1, got {min_samples_leaf}")]
    InvalidMinSamplesLeaf {
        /// The invalid min_samples_leaf value provided.
        min_samples_leaf: usize,
    },

    /// Returned when max_features resolves to 0 or exceeds the feature count.
    #[error("max_features resolved to {max_features}, but must be in [1, {n_features}]")]
    InvalidMaxFeatures {
        /// The resolved max_features value.
        max_features: usize,
        /// The number of features in the dataset.
        n_features: usize,
    },

    /// Returned when bag_fraction is not in (0.0, 1.0].
    #[error("bag_fraction must be in (0.0, 1.0], got {fraction}")]
    InvalidBagFraction {
        /// The invalid fraction.
        fraction: f64,
    },

    /// Returned when out-of-bag selection would keep zero trees.
    #[error("out-of-bag selection must keep at least 1 tree, got {keep}")]
    InvalidKeepCount {
        /// The invalid keep count.
        keep: usize,
    },

    /// Returned when a kernel density floor is not strictly positive.
    #[error("density floor must be positive and finite, got {floor}")]
    InvalidDensityFloor {
        /// The invalid floor.
        floor: f64,
    },

    /// Returned when a training set has zero feature columns.
    #[error("training dataset has zero feature columns")]
    ZeroFeatures,

    /// Returned when a kernel or confusion matrix is built from no values.
    #[error("no values to build {what} from")]
    EmptyInput {
        /// What was being built.
        what: &'static str,
    },

    /// Returned when a row handed to a model has the wrong length.
    #[error("prediction input has {got} features, expected {expected}")]
    PredictionFeatureMismatch {
        /// The expected number of features.
        expected: usize,
        /// The actual number of features in the prediction input.
        got: usize,
    },

    /// Returned when replacement feature names do not match the model's width.
    #[error("model has {expected} features, {got} names supplied")]
    FeatureNameCountMismatch {
        /// The number of features the model was trained on.
        expected: usize,
        /// The number of names supplied.
        got: usize,
    },

    /// Returned when a tree added to a forest was trained on a different schema.
    #[error("tree was trained on {got} features, forest expects {expected}")]
    IncompatibleTree {
        /// The forest's feature count.
        expected: usize,
        /// The tree's feature count.
        got: usize,
    },

    /// Returned when a forest without trees is asked to predict.
    #[error("random forest has no trees")]
    EmptyForest,

    /// Returned when a label is not below the declared class count.
    #[error("label {label} out of range for {n_classes} classes")]
    LabelOutOfRange {
        /// The offending label.
        label: usize,
        /// Number of classes declared.
        n_classes: usize,
    },

    /// Returned when true and predicted label slices differ in length.
    #[error("{truth} true labels but {predicted} predictions")]
    PredictionCountMismatch {
        /// Number of true labels.
        truth: usize,
        /// Number of predictions.
        predicted: usize,
    },

    /// Returned when parsing an unknown measure name.
    #[error("unknown measure \"{name}\"")]
    UnknownMeasure {
        /// The unparsed name.
        name: String,
    },

    /// Returned when OOB evaluation fails (no row has any OOB tree).
    #[error("OOB evaluation failed: {reason}")]
    OobEvaluationFailed {
        /// Human-readable description of why OOB evaluation failed.
        reason: String,
    },

    /// Data package error.
    #[error("data error: {0}")]
    Data(#[from] DataError),
}
