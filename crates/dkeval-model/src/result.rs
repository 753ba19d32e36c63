//! Output of random forest training.

use crate::forest::RandomForestModel;
use crate::importance::RankedFeature;
use crate::oob::OobScore;

/// A fitted forest plus its training diagnostics.
#[derive(Debug)]
pub struct ForestFit {
    model: RandomForestModel,
    oob_score: Option<OobScore>,
    tree_oob_accuracy: Vec<f64>,
}

impl ForestFit {
    pub(crate) fn new(model: RandomForestModel, oob_score: Option<OobScore>, tree_oob_accuracy: Vec<f64>) -> Self {
        Self {
            model,
            oob_score,
            tree_oob_accuracy,
        }
    }

    /// Borrow the fitted forest.
    #[must_use]
    pub fn model(&self) -> &RandomForestModel {
        &self.model
    }

    /// Consume the result and return the fitted forest.
    #[must_use]
    pub fn into_model(self) -> RandomForestModel {
        self.model
    }

    /// Return the ensemble OOB score, if computed.
    #[must_use]
    pub fn oob_score(&self) -> Option<&OobScore> {
        self.oob_score.as_ref()
    }

    /// Out-of-bag accuracy of every grown tree, before selection.
    #[must_use]
    pub fn tree_oob_accuracy(&self) -> &[f64] {
        &self.tree_oob_accuracy
    }

    /// Ranked importances of the kept trees.
    #[must_use]
    pub fn importances(&self) -> Vec<RankedFeature> {
        self.model.feature_importances()
    }
}
