//! The search driver: sample paths, evaluate them in parallel batches, feed
//! the fitness back into the tree.

use std::time::Instant;

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use dkeval_data::DataPackage;
use dkeval_optim::OptimizerResult;

use crate::candidate::{CandidateEvaluation, PipelineCandidate};
use crate::config::SearchConfig;
use crate::error::PipelineError;
use crate::tree::{PipelineTree, SearchPath};

/// Why the driver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// `max_candidates` candidates were evaluated.
    CandidateBudget,
    /// The wall-clock limit passed.
    WallClock,
}

/// One evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    /// Evaluation order.
    pub index: usize,
    /// The candidate, with tuned stages when tuning is on.
    pub candidate: PipelineCandidate,
    /// Its cross-validation result.
    pub evaluation: CandidateEvaluation,
    /// Simplex record when the candidate was tuned.
    pub tuning: Option<OptimizerResult>,
}

/// Result of [`Search::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    /// Index into `history` of the fittest candidate; ties keep the earliest.
    pub best: Option<usize>,
    /// Every evaluated candidate, in evaluation order.
    pub history: Vec<SearchRecord>,
    /// Why the run ended.
    pub stop_reason: StopReason,
    /// Wall-clock duration of the run.
    pub elapsed_seconds: f64,
}

impl SearchReport {
    /// The fittest record.
    #[must_use]
    pub fn best_record(&self) -> Option<&SearchRecord> {
        self.best.and_then(|i| self.history.get(i))
    }
}

/// A configured pipeline search.
#[derive(Debug, Clone)]
pub struct Search {
    config: SearchConfig,
}

impl Search {
    /// Validate `config` and wrap it.
    ///
    /// # Errors
    ///
    /// See [`SearchConfig::validate`].
    pub fn new(config: SearchConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Return the config.
    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search pipelines on `data` until the candidate or wall-clock budget
    /// runs out.
    ///
    /// # Errors
    ///
    /// | Variant                          | When                                          |
    /// |----------------------------------|-----------------------------------------------|
    /// | [`PipelineError::Data`]          | outer folds cannot be generated               |
    /// | [`PipelineError::Optim`]         | tuning is on and the simplex cannot start     |
    /// | [`PipelineError::EmptyPipeline`] | the model catalog is empty                    |
    #[instrument(skip_all, fields(n_rows = data.row_count(), n_features = data.feature_count()))]
    pub fn run(&self, data: &DataPackage) -> Result<SearchReport, PipelineError> {
        let started = Instant::now();
        let config = &self.config;
        let folds = config.fold_generator()?;
        // Surface InsufficientSubjects before any work.
        folds.folds(data)?;
        let tree = PipelineTree::new(
            config.stages(),
            config.models().to_vec(),
            data.feature_count(),
            config.tree_limits(),
        )?;
        let nelder_mead = config.nelder_mead()?;
        let base_options = config.evaluation_options();

        let mut history: Vec<SearchRecord> = Vec::with_capacity(config.max_candidates());
        let stop_reason = loop {
            if history.len() >= config.max_candidates() {
                break StopReason::CandidateBudget;
            }
            if config.max_duration().is_some_and(|limit| started.elapsed() >= limit) {
                break StopReason::WallClock;
            }
            let batch = config.batch_size().min(config.max_candidates() - history.len());
            let first = history.len();
            let sampled: Vec<(usize, SearchPath, PipelineCandidate)> = (first..first + batch)
                .map(|index| {
                    let (path, candidate) = tree.random_path();
                    (index, path, candidate)
                })
                .collect();

            let results: Vec<(SearchPath, SearchRecord)> = sampled
                .into_par_iter()
                .map(|(index, path, mut candidate)| -> Result<(SearchPath, SearchRecord), PipelineError> {
                    let options = base_options.with_seed(base_options.seed().wrapping_add(index as u64));
                    let (evaluation, tuning) = if config.tune() {
                        let outcome = candidate.tune(data, &folds, &options, &nelder_mead)?;
                        (outcome.evaluation, outcome.optimizer)
                    } else {
                        (candidate.evaluate(data, &folds, &options)?, None)
                    };
                    Ok((
                        path,
                        SearchRecord {
                            index,
                            candidate,
                            evaluation,
                            tuning,
                        },
                    ))
                })
                .collect::<Result<_, PipelineError>>()?;

            for (path, record) in results {
                tree.record_fitness(&path, record.evaluation.fitness);
                if record.evaluation.failed_folds() > 0 {
                    warn!(
                        pipeline = %record.candidate,
                        failed = record.evaluation.failed_folds(),
                        "candidate had failed folds"
                    );
                }
                info!(
                    index = record.index,
                    pipeline = %record.candidate,
                    fitness = record.evaluation.fitness,
                    "candidate scored"
                );
                history.push(record);
            }
        };

        let best = (0..history.len()).fold(None, |best: Option<usize>, i| match best {
            Some(b) if history[b].evaluation.fitness >= history[i].evaluation.fitness => Some(b),
            _ => Some(i),
        });
        let elapsed_seconds = started.elapsed().as_secs_f64();
        if let Some(b) = best {
            info!(
                pipeline = %history[b].candidate,
                fitness = history[b].evaluation.fitness,
                evaluated = history.len(),
                ?stop_reason,
                "search finished"
            );
        }
        Ok(SearchReport {
            best,
            history,
            stop_reason,
            elapsed_seconds,
        })
    }
}
