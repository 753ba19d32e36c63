//! Redundant feature analysis.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use dkeval_data::DataPackage;

use crate::error::StageError;
use crate::stats;

/// Finds features that add nothing: constant columns and columns highly
/// correlated with an earlier kept column.
///
/// # Defaults
///
/// | Parameter               | Default |
/// |-------------------------|---------|
/// | `correlation_threshold` | 0.95    |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataOptimizer {
    correlation_threshold: f64,
}

impl DataOptimizer {
    /// Create an optimizer with the given |r| threshold.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidParameter`] when the threshold is outside
    /// (0, 1].
    pub fn new(correlation_threshold: f64) -> Result<Self, StageError> {
        if !(correlation_threshold > 0.0 && correlation_threshold <= 1.0) {
            return Err(StageError::InvalidParameter {
                stage: "data-optimizer",
                parameter: "correlation_threshold",
                value: correlation_threshold.to_string(),
            });
        }
        Ok(Self { correlation_threshold })
    }

    /// Return the correlation threshold.
    #[must_use]
    pub fn correlation_threshold(&self) -> f64 {
        self.correlation_threshold
    }

    /// Names of the redundant features of `data`. The package is not modified.
    #[instrument(skip_all, fields(n_features = data.feature_count()))]
    pub fn redundant_features(&self, data: &DataPackage) -> BTreeSet<String> {
        let rows = data.feature_database();
        let columns: Vec<Vec<f64>> = (0..data.feature_count()).map(|j| stats::column(rows, j)).collect();
        let mut kept: Vec<usize> = Vec::new();
        let mut redundant = BTreeSet::new();
        for (j, feature) in data.features().iter().enumerate() {
            let column = &columns[j];
            let constant = column.iter().all(|&v| v == column[0]);
            let correlated = !constant
                && kept
                    .iter()
                    .any(|&k| stats::pearson(&columns[k], column).abs() >= self.correlation_threshold);
            if constant || correlated {
                debug!(feature = feature.name(), constant, "redundant feature");
                redundant.insert(feature.name().to_string());
            } else {
                kept.push(j);
            }
        }
        redundant
    }
}

impl Default for DataOptimizer {
    fn default() -> Self {
        Self {
            correlation_threshold: 0.95,
        }
    }
}
