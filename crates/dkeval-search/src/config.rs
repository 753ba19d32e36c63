//! Run-wide search settings, built in code or loaded from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dkeval_data::PatientFoldGenerator;
use dkeval_model::{DecisionTreeConfig, KdeConfig, Measure, RandomForestConfig};
use dkeval_optim::{Budget, NelderMead};
use dkeval_stages::StageKind;

use crate::candidate::EvaluationOptions;
use crate::error::PipelineError;
use crate::model::ModelSpec;
use crate::tree::{Exploration, TreeLimits};

/// Settings read once at search start.
///
/// Every field is optional in JSON; missing fields take their defaults.
///
/// # Defaults
///
/// | Parameter          | Default                           |
/// |--------------------|-----------------------------------|
/// | `n_folds`          | 5                                 |
/// | `stratify`         | `true`                            |
/// | `max_candidates`   | 50                                |
/// | `max_seconds`      | `None`                            |
/// | `batch_size`       | 4                                 |
/// | `tune`             | `false`                           |
/// | `tune_evaluations` | 30                                |
/// | `tolerance`        | 1e-4                              |
/// | `max_depth`        | 3                                 |
/// | `max_repetitions`  | 2                                 |
/// | `stages`           | every stage family                |
/// | `models`           | random-forest (50 trees), decision-tree, kde |
/// | `measure`          | `RocDistance`                     |
/// | `variance_penalty` | 0.5                               |
/// | `exploration`      | softmax, temperature 0.1          |
/// | `seed`             | 42                                |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    n_folds: usize,
    stratify: bool,
    max_candidates: usize,
    max_seconds: Option<f64>,
    batch_size: usize,
    tune: bool,
    tune_evaluations: usize,
    tolerance: f64,
    max_depth: usize,
    max_repetitions: usize,
    stages: Vec<StageKind>,
    models: Vec<ModelSpec>,
    measure: Measure,
    variance_penalty: f64,
    exploration: Exploration,
    seed: u64,
}

impl SearchConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// | Variant                          | When                           |
    /// |----------------------------------|--------------------------------|
    /// | [`PipelineError::ReadConfig`]    | the file cannot be read        |
    /// | [`PipelineError::ParseConfig`]   | the file is not a valid config |
    /// | see [`SearchConfig::validate`]   | a setting is out of range      |
    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| PipelineError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// | Variant                          | When                                                |
    /// |----------------------------------|-----------------------------------------------------|
    /// | [`PipelineError::InvalidConfig`] | a count is zero, `n_folds < 2`, or a float is bad   |
    /// | [`PipelineError::EmptyPipeline`] | the model catalog is empty                          |
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |field: &'static str, value: String| Err(PipelineError::InvalidConfig { field, value });
        if self.n_folds < 2 {
            return invalid("n_folds", self.n_folds.to_string());
        }
        if self.max_candidates == 0 {
            return invalid("max_candidates", "0".to_string());
        }
        if self.batch_size == 0 {
            return invalid("batch_size", "0".to_string());
        }
        if self.tune_evaluations == 0 {
            return invalid("tune_evaluations", "0".to_string());
        }
        if self.max_repetitions == 0 {
            return invalid("max_repetitions", "0".to_string());
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return invalid("tolerance", self.tolerance.to_string());
        }
        if !(self.variance_penalty.is_finite() && self.variance_penalty >= 0.0) {
            return invalid("variance_penalty", self.variance_penalty.to_string());
        }
        if let Some(s) = self.max_seconds
            && !(s.is_finite() && s >= 0.0)
        {
            return invalid("max_seconds", s.to_string());
        }
        if let Exploration::Softmax { temperature } = self.exploration
            && !(temperature.is_finite() && temperature > 0.0)
        {
            return invalid("temperature", temperature.to_string());
        }
        if self.models.is_empty() {
            return Err(PipelineError::EmptyPipeline {
                reason: "model catalog is empty",
            });
        }
        Ok(())
    }

    // --- Setters ---

    /// Set the outer fold count.
    #[must_use]
    pub fn with_n_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    /// Enable or disable label stratification of the outer folds.
    #[must_use]
    pub fn with_stratification(mut self, stratify: bool) -> Self {
        self.stratify = stratify;
        self
    }

    /// Set the number of candidates evaluated before stopping.
    #[must_use]
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    /// Stop starting new batches after this wall-clock time.
    #[must_use]
    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_seconds = Some(limit.as_secs_f64());
        self
    }

    /// Set how many candidates are evaluated in parallel.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Tune stage hyperparameters of each candidate with Nelder-Mead.
    #[must_use]
    pub fn with_tuning(mut self, tune: bool) -> Self {
        self.tune = tune;
        self
    }

    /// Set the Nelder-Mead evaluation budget per candidate.
    #[must_use]
    pub fn with_tune_evaluations(mut self, tune_evaluations: usize) -> Self {
        self.tune_evaluations = tune_evaluations;
        self
    }

    /// Set the Nelder-Mead tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the most stages per pipeline.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the most uses of each resampling stage per pipeline.
    #[must_use]
    pub fn with_max_repetitions(mut self, max_repetitions: usize) -> Self {
        self.max_repetitions = max_repetitions;
        self
    }

    /// Set the enabled stage families.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<StageKind>) -> Self {
        self.stages = stages;
        self
    }

    /// Set the model catalog.
    #[must_use]
    pub fn with_models(mut self, models: Vec<ModelSpec>) -> Self {
        self.models = models;
        self
    }

    /// Set the fitness measure.
    #[must_use]
    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measure = measure;
        self
    }

    /// Set the fold spread penalty.
    #[must_use]
    pub fn with_variance_penalty(mut self, variance_penalty: f64) -> Self {
        self.variance_penalty = variance_penalty;
        self
    }

    /// Set the child selection policy.
    #[must_use]
    pub fn with_exploration(mut self, exploration: Exploration) -> Self {
        self.exploration = exploration;
        self
    }

    /// Set the master seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // --- Getters ---

    /// Return the outer fold count.
    #[must_use]
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Return the candidate budget.
    #[must_use]
    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    /// Return the wall-clock limit.
    #[must_use]
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_seconds.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Return the batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Return whether candidates are tuned.
    #[must_use]
    pub fn tune(&self) -> bool {
        self.tune
    }

    /// Return the enabled stage families.
    #[must_use]
    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    /// Return the model catalog.
    #[must_use]
    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Return the measure.
    #[must_use]
    pub fn measure(&self) -> Measure {
        self.measure
    }

    /// Return the master seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    // --- Derived collaborators ---

    /// Outer fold generator.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Data`] when `n_folds < 2`.
    pub fn fold_generator(&self) -> Result<PatientFoldGenerator, PipelineError> {
        Ok(PatientFoldGenerator::new(self.n_folds)?
            .with_seed(self.seed)
            .with_stratification(self.stratify))
    }

    /// Scoring options with the master seed.
    #[must_use]
    pub fn evaluation_options(&self) -> EvaluationOptions {
        EvaluationOptions::new(self.measure)
            .with_variance_penalty(self.variance_penalty)
            .with_seed(self.seed)
    }

    /// Per-candidate Nelder-Mead minimizer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Optim`] on a bad tolerance or budget.
    pub fn nelder_mead(&self) -> Result<NelderMead, PipelineError> {
        Ok(NelderMead::new(self.tolerance)?
            .with_initial_step(0.25)
            .with_budget(Budget::new(self.tune_evaluations)?))
    }

    /// Search tree shape.
    #[must_use]
    pub fn tree_limits(&self) -> TreeLimits {
        TreeLimits {
            max_depth: self.max_depth,
            max_repetitions: self.max_repetitions,
            exploration: self.exploration,
            seed: self.seed,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            stratify: true,
            max_candidates: 50,
            max_seconds: None,
            batch_size: 4,
            tune: false,
            tune_evaluations: 30,
            tolerance: 1e-4,
            max_depth: 3,
            max_repetitions: 2,
            stages: StageKind::ALL.to_vec(),
            models: RandomForestConfig::new(50)
                .map(ModelSpec::RandomForest)
                .into_iter()
                .chain([
                    ModelSpec::DecisionTree(DecisionTreeConfig::new()),
                    ModelSpec::Kde(KdeConfig::new()),
                ])
                .collect(),
            measure: Measure::RocDistance,
            variance_penalty: 0.5,
            exploration: Exploration::default(),
            seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SearchConfig::new();
        config.validate().unwrap();
        assert_eq!(config.models().len(), 3);
        assert_eq!(config.stages().len(), StageKind::ALL.len());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"n_folds": 3, "measure": "mcc", "stages": ["pca", "undersampling"]}"#).unwrap();
        assert_eq!(config.n_folds(), 3);
        assert_eq!(config.measure(), Measure::Mcc);
        assert_eq!(config.stages(), &[StageKind::Pca, StageKind::Undersampling]);
        assert_eq!(config.max_candidates(), 50);
    }

    #[test]
    fn invalid_settings_rejected() {
        assert!(matches!(
            SearchConfig::new().with_n_folds(1).validate(),
            Err(PipelineError::InvalidConfig { field: "n_folds", .. })
        ));
        assert!(matches!(
            SearchConfig::new().with_models(vec![]).validate(),
            Err(PipelineError::EmptyPipeline { .. })
        ));
        assert!(matches!(
            SearchConfig::new().with_tolerance(-1.0).validate(),
            Err(PipelineError::InvalidConfig { field: "tolerance", .. })
        ));
    }
}
