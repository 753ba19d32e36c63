use dkeval_data::DataError;
use dkeval_model::ModelError;

/// Errors from optimizer configuration and fitness evaluation.
///
/// Running out of budget is not an error; it is reported as
/// [`Termination::BudgetExhausted`](crate::Termination::BudgetExhausted).
#[derive(Debug, thiserror::Error)]
pub enum OptimError {
    /// Returned when the starting point has no coordinates.
    #[error("starting point must have at least 1 dimension")]
    EmptyStartingPoint,

    /// Returned when the starting point or the objective is not finite.
    #[error("objective is not finite at {point:?}")]
    NonFiniteObjective {
        /// The offending point.
        point: Vec<f64>,
    },

    /// Returned when the convergence tolerance is not positive.
    #[error("tolerance must be positive and finite, got {tolerance}")]
    InvalidTolerance {
        /// The invalid tolerance.
        tolerance: f64,
    },

    /// Returned when an evaluation budget of zero is requested.
    #[error("evaluation budget must be at least 1")]
    ZeroBudget,

    /// Returned when a wall-clock limit is negative or not finite.
    #[error("time limit must be a non-negative finite number of seconds, got {seconds}")]
    InvalidDuration {
        /// The invalid limit.
        seconds: f64,
    },

    /// Returned when a hyperparameter axis has no candidate values.
    #[error("hyperparameter axis \"{axis}\" is empty")]
    EmptyAxis {
        /// Axis name.
        axis: &'static str,
    },

    /// Returned when the inner cross-validation fold count is below 2.
    #[error("inner fold count must be at least 2, got {n_folds}")]
    InvalidInnerFolds {
        /// The invalid count.
        n_folds: usize,
    },

    /// Model error outside a single fold.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Data package or fold error.
    #[error("data error: {0}")]
    Data(#[from] DataError),
}
