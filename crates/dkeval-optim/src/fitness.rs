//! Subject-grouped cross-validated fitness of a trainer.

use tracing::{debug, instrument};

use dkeval_data::{DataPackage, PatientFoldGenerator};
use dkeval_model::{ConfusionMatrixAnalytics, Measure, Trainer};

use crate::error::OptimError;

/// Fold generator for inner validation: `n_folds` capped at the number of
/// distinct subjects.
///
/// # Errors
///
/// | Variant                          | When                                      |
/// |----------------------------------|-------------------------------------------|
/// | [`OptimError::InvalidInnerFolds`] | `n_folds` is below 2                     |
/// | [`OptimError::Data`]             | fewer than 2 distinct subjects are present |
pub fn inner_folds(data: &DataPackage, n_folds: usize, seed: u64) -> Result<PatientFoldGenerator, OptimError> {
    if n_folds < 2 {
        return Err(OptimError::InvalidInnerFolds { n_folds });
    }
    let k = n_folds.min(data.distinct_subjects()).max(2);
    Ok(PatientFoldGenerator::new(k)?.with_seed(seed))
}

/// Mean fitness under `measure` of `trainer` over the folds of `folds`.
///
/// A fold whose training or prediction fails scores 0.
///
/// # Errors
///
/// Returns [`OptimError::Data`] when fold generation or row selection fails.
#[instrument(skip_all, fields(measure = %measure, n_rows = data.row_count()))]
pub fn cross_validated_fitness<T: Trainer>(
    trainer: &T,
    data: &DataPackage,
    folds: &PatientFoldGenerator,
    measure: Measure,
) -> Result<f64, OptimError> {
    let mut total = 0.0;
    let mut n = 0usize;
    for fold in folds.folds(data)? {
        let train = data.select_rows(fold.train())?;
        let validation = data.select_rows(fold.validation())?;
        let scored = trainer
            .train(&train)
            .and_then(|model| ConfusionMatrixAnalytics::evaluate(&model, &validation));
        let fitness = match scored {
            Ok(analytics) => analytics.fitness(measure),
            Err(e) => {
                debug!(error = %e, "inner fold failed");
                0.0
            }
        };
        total += fitness;
        n += 1;
    }
    Ok(if n == 0 { 0.0 } else { total / n as f64 })
}
