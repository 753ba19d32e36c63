//! A pipeline candidate: ordered stages plus a terminal model, scored by
//! subject-grouped cross-validation.

use std::collections::BTreeMap;
use std::fmt;

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use dkeval_data::{DataPackage, Fold, PatientFoldGenerator};
use dkeval_model::{ConfusionMatrixAnalytics, Measure};
use dkeval_optim::{NelderMead, OptimizerResult};
use dkeval_stages::{FittedTransform, Preprocessor, Stage, StageError};

use crate::error::PipelineError;
use crate::model::ModelSpec;
use crate::params::ParameterSpace;

/// One step of a pipeline description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    /// A preprocessing stage.
    Stage(Stage),
    /// The terminal model.
    Model(ModelSpec),
}

/// Scoring options shared by every candidate of a run.
///
/// # Defaults
///
/// | Parameter          | Default       |
/// |--------------------|---------------|
/// | `measure`          | `RocDistance` |
/// | `variance_penalty` | 0.5           |
/// | `seed`             | 42            |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOptions {
    measure: Measure,
    variance_penalty: f64,
    seed: u64,
}

impl EvaluationOptions {
    /// Score folds by `measure`.
    #[must_use]
    pub fn new(measure: Measure) -> Self {
        Self {
            measure,
            ..Self::default()
        }
    }

    /// Set the weight of the fold standard deviation subtracted from the
    /// mean fitness.
    #[must_use]
    pub fn with_variance_penalty(mut self, variance_penalty: f64) -> Self {
        self.variance_penalty = variance_penalty.max(0.0);
        self
    }

    /// Set the seed folds, stages and models derive their seeds from.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Return the measure.
    #[must_use]
    pub fn measure(&self) -> Measure {
        self.measure
    }

    /// Return the variance penalty.
    #[must_use]
    pub fn variance_penalty(&self) -> f64 {
        self.variance_penalty
    }

    /// Return the seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            measure: Measure::RocDistance,
            variance_penalty: 0.5,
            seed: 42,
        }
    }
}

/// Outcome of one validation fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldScore {
    /// Fold index.
    pub fold: usize,
    /// Fitness in `[0, 1]`; 0 when the fold failed.
    pub fitness: f64,
    /// Every measure by name.
    pub measures: BTreeMap<String, f64>,
    /// Confusion matrix rows (truth) by columns (prediction).
    pub confusion: Option<Vec<Vec<usize>>>,
    /// Stages skipped on degenerate input.
    pub warnings: Vec<String>,
    /// Error that made the fold fail.
    pub error: Option<String>,
}

impl FoldScore {
    /// `true` when the fold was scored as worst after an error.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregated cross-validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvaluation {
    /// `clamp(mean - variance_penalty * std_dev, 0, 1)`.
    pub fitness: f64,
    /// Mean fold fitness.
    pub mean: f64,
    /// Population standard deviation of the fold fitness.
    pub std_dev: f64,
    /// Per-fold outcomes in fold order.
    pub folds: Vec<FoldScore>,
}

impl CandidateEvaluation {
    fn aggregate(folds: Vec<FoldScore>, variance_penalty: f64) -> Self {
        let n = folds.len().max(1) as f64;
        let mean = folds.iter().map(|f| f.fitness).sum::<f64>() / n;
        let std_dev = (folds.iter().map(|f| (f.fitness - mean).powi(2)).sum::<f64>() / n).sqrt();
        Self {
            fitness: (mean - variance_penalty * std_dev).clamp(0.0, 1.0),
            mean,
            std_dev,
            folds,
        }
    }

    /// Number of folds that failed.
    #[must_use]
    pub fn failed_folds(&self) -> usize {
        self.folds.iter().filter(|f| f.failed()).count()
    }
}

/// Result of [`PipelineCandidate::tune`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneOutcome {
    /// Evaluation of the stages the candidate now holds.
    pub evaluation: CandidateEvaluation,
    /// Simplex record, absent when no stage has a tunable parameter.
    pub optimizer: Option<OptimizerResult>,
}

/// Ordered preprocessing stages and a terminal model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCandidate {
    stages: Vec<Stage>,
    model: ModelSpec,
    fitness: Option<f64>,
}

impl PipelineCandidate {
    /// Create an unevaluated candidate.
    #[must_use]
    pub fn new(stages: Vec<Stage>, model: ModelSpec) -> Self {
        Self {
            stages,
            model,
            fitness: None,
        }
    }

    /// Build a candidate from a step list ending in exactly one model.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyPipeline`] when no model step is present
    /// or a model step is not last.
    pub fn from_steps(steps: Vec<PipelineStep>) -> Result<Self, PipelineError> {
        let mut stages = Vec::new();
        let mut model = None;
        for step in steps {
            if model.is_some() {
                return Err(PipelineError::EmptyPipeline {
                    reason: "model is not the last step",
                });
            }
            match step {
                PipelineStep::Stage(stage) => stages.push(stage),
                PipelineStep::Model(spec) => model = Some(spec),
            }
        }
        let model = model.ok_or(PipelineError::EmptyPipeline { reason: "no model step" })?;
        Ok(Self::new(stages, model))
    }

    /// The stages, in application order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The terminal model.
    #[must_use]
    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    /// Fitness of the last evaluation, if any.
    #[must_use]
    pub fn fitness(&self) -> Option<f64> {
        self.fitness
    }

    /// Stage and model names, e.g. `["pca", "undersampling", "random-forest"]`.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|s| s.kind().name().to_string())
            .chain(std::iter::once(self.model.name().to_string()))
            .collect()
    }

    /// Cross-validate the candidate and store its fitness.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Data`] when folds cannot be generated, e.g.
    /// `InsufficientSubjects`. Errors inside a fold only fail that fold.
    #[instrument(skip_all, fields(pipeline = %self))]
    pub fn evaluate(
        &mut self,
        data: &DataPackage,
        folds: &PatientFoldGenerator,
        options: &EvaluationOptions,
    ) -> Result<CandidateEvaluation, PipelineError> {
        let evaluation = self.score(data, folds, options)?;
        debug!(fitness = evaluation.fitness, failed = evaluation.failed_folds(), "candidate evaluated");
        self.fitness = Some(evaluation.fitness);
        Ok(evaluation)
    }

    /// Tune stage hyperparameters with `optimizer` minimizing
    /// `1 - fitness`, keep the best stages seen and store their fitness.
    ///
    /// # Errors
    ///
    /// | Variant                  | When                                 |
    /// |--------------------------|--------------------------------------|
    /// | [`PipelineError::Data`]  | folds cannot be generated            |
    /// | [`PipelineError::Optim`] | the simplex cannot be initialized    |
    #[instrument(skip_all, fields(pipeline = %self))]
    pub fn tune(
        &mut self,
        data: &DataPackage,
        folds: &PatientFoldGenerator,
        options: &EvaluationOptions,
        optimizer: &NelderMead,
    ) -> Result<TuneOutcome, PipelineError> {
        let space = ParameterSpace::new(&self.stages, data.feature_count());
        let baseline = self.score(data, folds, options)?;
        if space.is_empty() {
            self.fitness = Some(baseline.fitness);
            return Ok(TuneOutcome {
                evaluation: baseline,
                optimizer: None,
            });
        }

        let mut best = (self.stages.clone(), baseline);
        let start = vec![0.5; space.dimension()];
        let result = optimizer.minimize(&start, |point| {
            let penalty = ParameterSpace::penalty(point);
            let Ok(stages) = space.decode(&self.stages, point) else {
                return 1.0 + penalty;
            };
            let trial = PipelineCandidate::new(stages, self.model.clone());
            match trial.score(data, folds, options) {
                Ok(evaluation) => {
                    let objective = 1.0 - evaluation.fitness + penalty;
                    if penalty == 0.0 && evaluation.fitness > best.1.fitness {
                        best = (trial.stages, evaluation);
                    }
                    objective
                }
                Err(_) => 1.0 + penalty,
            }
        })?;

        let (stages, evaluation) = best;
        debug!(
            fitness = evaluation.fitness,
            evaluations = result.evaluations,
            termination = ?result.termination,
            "candidate tuned"
        );
        self.stages = stages;
        self.fitness = Some(evaluation.fitness);
        Ok(TuneOutcome {
            evaluation,
            optimizer: Some(result),
        })
    }

    fn score(
        &self,
        data: &DataPackage,
        generator: &PatientFoldGenerator,
        options: &EvaluationOptions,
    ) -> Result<CandidateEvaluation, PipelineError> {
        let folds: Vec<Fold> = generator.folds(data)?.collect();
        let scores: Vec<FoldScore> = folds
            .par_iter()
            .enumerate()
            .map(|(index, fold)| self.score_fold(index, fold, data, options))
            .collect();
        Ok(CandidateEvaluation::aggregate(scores, options.variance_penalty))
    }

    fn score_fold(&self, index: usize, fold: &Fold, data: &DataPackage, options: &EvaluationOptions) -> FoldScore {
        let seed = options.seed.wrapping_add(index as u64);
        let mut warnings = Vec::new();
        match self.run_fold(fold, data, seed, options.measure, &mut warnings) {
            Ok(analytics) => FoldScore {
                fold: index,
                fitness: analytics.fitness(options.measure),
                measures: analytics.all_values(),
                confusion: Some(analytics.confusion().as_rows().to_vec()),
                warnings,
                error: None,
            },
            Err(e) => {
                warn!(fold = index, error = %e, "fold failed, scored as worst");
                FoldScore {
                    fold: index,
                    fitness: 0.0,
                    measures: BTreeMap::new(),
                    confusion: None,
                    warnings,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn run_fold(
        &self,
        fold: &Fold,
        data: &DataPackage,
        seed: u64,
        measure: Measure,
        warnings: &mut Vec<String>,
    ) -> Result<ConfusionMatrixAnalytics, PipelineError> {
        let mut train = data.select_rows(fold.train())?;
        let mut transforms: Vec<FittedTransform> = Vec::with_capacity(self.stages.len());
        for (s, stage) in self.stages.iter().enumerate() {
            match stage.run(&train, seed.wrapping_add(s as u64)) {
                Ok(output) => {
                    train = output.data;
                    transforms.push(output.transform);
                }
                Err(StageError::DegenerateMatrix { stage, reason }) => {
                    warn!(stage, %reason, "degenerate input, stage skipped for this fold");
                    warnings.push(format!("{stage}: {reason}"));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut validation = data.select_rows(fold.validation())?;
        for transform in &transforms {
            validation = transform.apply(&validation)?;
        }

        let fitted = self.model.fit(&train, seed, measure)?;
        let validation = validation.feature_database_subset(&fitted.features)?;
        Ok(ConfusionMatrixAnalytics::evaluate(fitted.model.as_ref(), &validation)?)
    }
}

impl fmt::Display for PipelineCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.step_names().join(" > "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dkeval_stages::StageKind;

    fn forest() -> ModelSpec {
        ModelSpec::random_forest(5).unwrap()
    }

    #[test]
    fn steps_must_end_in_a_model() {
        let pca = PipelineStep::Stage(Stage::default_for(StageKind::Pca, 3));
        assert!(matches!(
            PipelineCandidate::from_steps(vec![pca.clone()]),
            Err(PipelineError::EmptyPipeline { reason: "no model step" })
        ));
        assert!(matches!(
            PipelineCandidate::from_steps(vec![PipelineStep::Model(forest()), pca.clone()]),
            Err(PipelineError::EmptyPipeline { .. })
        ));
        let candidate = PipelineCandidate::from_steps(vec![pca, PipelineStep::Model(forest())]).unwrap();
        assert_eq!(candidate.step_names(), vec!["pca", "random-forest"]);
        assert_eq!(candidate.fitness(), None);
        assert_eq!(candidate.to_string(), "pca > random-forest");
    }

    #[test]
    fn aggregate_penalizes_spread() {
        let fold = |fitness| FoldScore {
            fold: 0,
            fitness,
            measures: BTreeMap::new(),
            confusion: None,
            warnings: Vec::new(),
            error: None,
        };
        let evaluation = CandidateEvaluation::aggregate(vec![fold(0.6), fold(1.0)], 1.0);
        assert!((evaluation.mean - 0.8).abs() < 1e-12);
        assert!((evaluation.std_dev - 0.2).abs() < 1e-12);
        assert!((evaluation.fitness - 0.6).abs() < 1e-12);

        let clamped = CandidateEvaluation::aggregate(vec![fold(0.0), fold(0.2)], 50.0);
        assert!(clamped.fitness.abs() < f64::EPSILON);
    }

    #[test]
    fn options_defaults() {
        let options = EvaluationOptions::default();
        assert_eq!(options.measure(), Measure::RocDistance);
        assert_eq!(options.seed(), 42);
        assert!(EvaluationOptions::new(Measure::Mcc).with_variance_penalty(-1.0).variance_penalty().abs() < f64::EPSILON);
    }
}
