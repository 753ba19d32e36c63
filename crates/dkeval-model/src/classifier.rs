//! The two seams every model family plugs into.

use dkeval_data::DataPackage;

use crate::error::ModelError;
use crate::predict::ClassDistribution;

/// A fitted model that scores feature rows.
pub trait Classifier: Send + Sync {
    /// Score one row laid out in [`Classifier::feature_names`] order.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::PredictionFeatureMismatch`] on a row of the wrong width.
    fn evaluate(&self, row: &[f64]) -> Result<ClassDistribution, ModelError>;

    /// Names of the features the model expects, in column order.
    fn feature_names(&self) -> &[String];

    /// Rename the expected features. The count cannot change.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::FeatureNameCountMismatch`] when `names` has a different length.
    fn set_feature_names(&mut self, names: Vec<String>) -> Result<(), ModelError>;

    /// Number of classes the model can predict.
    fn n_classes(&self) -> usize;

    /// Predict the class of every row of `data`.
    ///
    /// # Errors
    ///
    /// Propagates the first [`Classifier::evaluate`] failure.
    fn predict_package(&self, data: &DataPackage) -> Result<Vec<usize>, ModelError> {
        data.feature_database()
            .iter()
            .map(|row| self.evaluate(row).map(|d| d.predicted_class()))
            .collect()
    }
}

/// A model configuration that can be fitted to a package.
pub trait Trainer {
    /// The fitted model type.
    type Model: Classifier;

    /// Fit a model on every row of `data`.
    ///
    /// # Errors
    ///
    /// Implementation-specific configuration and data errors.
    fn train(&self, data: &DataPackage) -> Result<Self::Model, ModelError>;
}
