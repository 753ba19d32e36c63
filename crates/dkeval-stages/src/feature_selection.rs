//! Univariate feature ranking by R² against the numeric label.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use dkeval_data::DataPackage;

use crate::error::StageError;
use crate::stage::{FittedTransform, Preprocessor, StageOutput};
use crate::stats;

const STAGE: &str = "feature-selection";

/// A feature and its univariate regression fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    /// Feature name.
    pub name: String,
    /// R² of the label regressed on this feature alone.
    pub r_squared: f64,
}

/// Configuration for the feature selection stage.
///
/// At least two features are kept, never more than the package has.
///
/// # Defaults
///
/// | Parameter | Default |
/// |-----------|---------|
/// | `count`   | 3       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSelectionConfig {
    count: usize,
}

impl FeatureSelectionConfig {
    /// Keep the `count` best features.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidParameter`] when `count` is zero.
    pub fn new(count: usize) -> Result<Self, StageError> {
        if count == 0 {
            return Err(StageError::InvalidParameter {
                stage: STAGE,
                parameter: "count",
                value: "0".to_string(),
            });
        }
        Ok(Self { count })
    }

    /// Half the features, at least three.
    #[must_use]
    pub fn default_for(n_features: usize) -> Self {
        Self {
            count: (n_features / 2).max(3),
        }
    }

    /// Return the requested count.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Count actually kept for a package with `n_features` columns.
    #[must_use]
    pub fn effective_count(&self, n_features: usize) -> usize {
        self.count.max(2).min(n_features)
    }

    /// Every feature with its R², best first; ties keep column order.
    #[must_use]
    pub fn rank(data: &DataPackage) -> Vec<FeatureScore> {
        let rows = data.feature_database();
        let labels: Vec<f64> = data.labels().iter().map(|&l| l as f64).collect();
        let mut scores: Vec<FeatureScore> = data
            .features()
            .iter()
            .map(|f| FeatureScore {
                name: f.name().to_string(),
                r_squared: stats::pearson(&stats::column(rows, f.column()), &labels).powi(2),
            })
            .collect();
        scores.sort_by(|a, b| b.r_squared.total_cmp(&a.r_squared));
        scores
    }
}

impl Default for FeatureSelectionConfig {
    fn default() -> Self {
        Self { count: 3 }
    }
}

impl Preprocessor for FeatureSelectionConfig {
    fn name(&self) -> &'static str {
        STAGE
    }

    #[instrument(skip_all, fields(count = self.count, n_features = train.feature_count()))]
    fn run(&self, train: &DataPackage, _seed: u64) -> Result<StageOutput, StageError> {
        let keep = self.effective_count(train.feature_count());
        let ranked = Self::rank(train);
        let chosen: Vec<&str> = ranked.iter().take(keep).map(|s| s.name.as_str()).collect();
        // Schema order, not rank order.
        let names: Vec<String> = train
            .features()
            .iter()
            .map(|f| f.name())
            .filter(|n| chosen.contains(n))
            .map(str::to_string)
            .collect();
        debug!(kept = ?names, "features selected");
        let data = train.feature_database_subset(&names)?;
        Ok(StageOutput {
            data,
            transform: FittedTransform::Select(names),
        })
    }
}
