//! The stage contract: fit on a training package, replay on validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dkeval_data::DataPackage;

use crate::error::StageError;
use crate::feature_selection::FeatureSelectionConfig;
use crate::isolation_forest::IsolationForestConfig;
use crate::oversampling::OversamplingConfig;
use crate::pca::{PcaConfig, Projection};
use crate::undersampling::UndersamplingConfig;

/// Stage family without parameters, used by the search tree's pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Univariate R² feature ranking.
    FeatureSelection,
    /// Isolation forest outlier removal.
    IsolationForest,
    /// Minority oversampling.
    Oversampling,
    /// Majority undersampling.
    Undersampling,
    /// Principal component projection.
    Pca,
}

impl StageKind {
    /// Every stage family, in catalog order.
    pub const ALL: [StageKind; 5] = [
        StageKind::FeatureSelection,
        StageKind::IsolationForest,
        StageKind::Oversampling,
        StageKind::Undersampling,
        StageKind::Pca,
    ];

    /// Stable kebab-case name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            StageKind::FeatureSelection => "feature-selection",
            StageKind::IsolationForest => "isolation-forest",
            StageKind::Oversampling => "oversampling",
            StageKind::Undersampling => "undersampling",
            StageKind::Pca => "pca",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| StageError::UnknownStage { name: s.to_string() })
    }
}

/// What a fitted stage does to validation data.
#[derive(Debug, Clone, PartialEq)]
pub enum FittedTransform {
    /// Rows were added or dropped in training only; validation passes through.
    Resample,
    /// Keep these features, in this order.
    Select(Vec<String>),
    /// Standardize with training statistics and project.
    Project(Projection),
}

impl FittedTransform {
    /// Replay the transform on a package the stage never saw.
    ///
    /// # Errors
    ///
    /// | Variant                                | When                                   |
    /// |----------------------------------------|----------------------------------------|
    /// | [`DataError::UnknownFeature`] (wrapped) | a selected feature is absent           |
    /// | [`StageError::SchemaMismatch`]         | the projection's input schema differs  |
    ///
    /// [`DataError::UnknownFeature`]: dkeval_data::DataError::UnknownFeature
    pub fn apply(&self, data: &DataPackage) -> Result<DataPackage, StageError> {
        match self {
            FittedTransform::Resample => Ok(data.clone()),
            FittedTransform::Select(names) => Ok(data.feature_database_subset(names)?),
            FittedTransform::Project(projection) => projection.apply(data),
        }
    }
}

/// A stage's training output.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Transformed training package.
    pub data: DataPackage,
    /// The transform to replay on validation.
    pub transform: FittedTransform,
}

impl StageOutput {
    /// Output of a resampling stage.
    #[must_use]
    pub fn resampled(data: DataPackage) -> Self {
        Self {
            data,
            transform: FittedTransform::Resample,
        }
    }
}

/// A preprocessing step fitted on training rows only.
pub trait Preprocessor {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Fit on `train` and return the transformed package and its transform.
    ///
    /// # Errors
    ///
    /// Implementation-specific; [`StageError::DegenerateMatrix`] is the
    /// recoverable case.
    fn run(&self, train: &DataPackage, seed: u64) -> Result<StageOutput, StageError>;
}

/// A configured stage of any family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Stage {
    /// See [`FeatureSelectionConfig`].
    FeatureSelection(FeatureSelectionConfig),
    /// See [`IsolationForestConfig`].
    IsolationForest(IsolationForestConfig),
    /// See [`OversamplingConfig`].
    Oversampling(OversamplingConfig),
    /// See [`UndersamplingConfig`].
    Undersampling(UndersamplingConfig),
    /// See [`PcaConfig`].
    Pca(PcaConfig),
}

impl Stage {
    /// The stage's family.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::FeatureSelection(_) => StageKind::FeatureSelection,
            Stage::IsolationForest(_) => StageKind::IsolationForest,
            Stage::Oversampling(_) => StageKind::Oversampling,
            Stage::Undersampling(_) => StageKind::Undersampling,
            Stage::Pca(_) => StageKind::Pca,
        }
    }

    /// Default configuration of a family for a package with `n_features`
    /// columns.
    #[must_use]
    pub fn default_for(kind: StageKind, n_features: usize) -> Self {
        match kind {
            StageKind::FeatureSelection => Stage::FeatureSelection(FeatureSelectionConfig::default_for(n_features)),
            StageKind::IsolationForest => Stage::IsolationForest(IsolationForestConfig::default_for(n_features)),
            StageKind::Oversampling => Stage::Oversampling(OversamplingConfig::default()),
            StageKind::Undersampling => Stage::Undersampling(UndersamplingConfig::default()),
            StageKind::Pca => Stage::Pca(PcaConfig::default()),
        }
    }

    fn preprocessor(&self) -> &dyn Preprocessor {
        match self {
            Stage::FeatureSelection(c) => c,
            Stage::IsolationForest(c) => c,
            Stage::Oversampling(c) => c,
            Stage::Undersampling(c) => c,
            Stage::Pca(c) => c,
        }
    }
}

impl Preprocessor for Stage {
    fn name(&self) -> &'static str {
        self.preprocessor().name()
    }

    fn run(&self, train: &DataPackage, seed: u64) -> Result<StageOutput, StageError> {
        self.preprocessor().run(train, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pca::ComponentSelection;

    #[test]
    fn kind_names_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(kind.name().parse::<StageKind>().unwrap(), kind);
        }
        assert!(matches!("smote".parse::<StageKind>(), Err(StageError::UnknownStage { .. })));
    }

    #[test]
    fn default_stage_matches_kind() {
        for kind in StageKind::ALL {
            assert_eq!(Stage::default_for(kind, 6).kind(), kind);
        }
    }

    #[test]
    fn stage_serializes_with_kind_tag() {
        let stage = Stage::Pca(PcaConfig::new(ComponentSelection::Fixed(2)).unwrap());
        let json = serde_json::to_string(&stage).unwrap();
        assert!(json.contains("\"kind\":\"pca\""), "{json}");
        let back: Stage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stage);
    }
}
