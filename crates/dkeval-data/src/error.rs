/// Errors from data package construction, access and fold generation.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// Returned when a requested feature name is not part of the schema.
    #[error("unknown feature \"{name}\"")]
    UnknownFeature {
        /// The name that was looked up.
        name: String,
    },

    /// Returned when two features share the same name.
    #[error("duplicate feature name \"{name}\"")]
    DuplicateFeature {
        /// The repeated name.
        name: String,
    },

    /// Returned when the package would contain zero rows.
    #[error("data package has zero rows")]
    EmptyDataset,

    /// Returned when rows, labels and subject ids disagree in length.
    #[error("column length mismatch: {rows} rows, {labels} labels, {subjects} subject ids")]
    LengthMismatch {
        /// Number of matrix rows.
        rows: usize,
        /// Number of labels.
        labels: usize,
        /// Number of subject ids.
        subjects: usize,
    },

    /// Returned when a row has a different number of values than there are features.
    #[error("row {row_index} has {got} values, expected {expected}")]
    FeatureCountMismatch {
        /// Number of features in the schema.
        expected: usize,
        /// Number of values in the offending row.
        got: usize,
        /// Zero-based index of the offending row.
        row_index: usize,
    },

    /// Returned when a matrix value is NaN or infinite.
    #[error("non-finite value at row {row_index}, feature {feature_index}")]
    NonFiniteValue {
        /// Zero-based row index.
        row_index: usize,
        /// Zero-based feature column index.
        feature_index: usize,
    },

    /// Returned when a row index is outside the package.
    #[error("row index {index} out of range for {row_count} rows")]
    RowOutOfRange {
        /// The requested row index.
        index: usize,
        /// Number of rows in the package.
        row_count: usize,
    },

    /// Returned when a subject id is empty.
    #[error("subject id at row {row_index} is empty")]
    EmptySubjectId {
        /// Zero-based row index.
        row_index: usize,
    },

    /// Returned when n_folds is less than 2.
    #[error("n_folds must be at least 2, got {n_folds}")]
    InvalidFoldCount {
        /// The invalid n_folds value provided.
        n_folds: usize,
    },

    /// Returned when there are fewer distinct subjects than folds.
    #[error("{n_folds} folds requested but only {n_subjects} distinct subjects")]
    InsufficientSubjects {
        /// The requested number of folds.
        n_folds: usize,
        /// The number of distinct subjects in the package.
        n_subjects: usize,
    },

    /// Returned when a Monte Carlo validation fraction is not in (0.0, 1.0).
    #[error("validation_fraction must be in (0.0, 1.0), got {fraction}")]
    InvalidValidationFraction {
        /// The invalid fraction.
        fraction: f64,
    },

    /// Returned when a class-balanced split needs at least two labelled classes.
    #[error("stratified hold-out needs at least 2 classes with subjects, found {n_classes}")]
    TooFewClasses {
        /// Number of classes that own at least one subject.
        n_classes: usize,
    },
}
