//! Optimizers for model hyperparameters.
//!
//! [`NelderMead`] minimizes a continuous objective. [`DecisionTreeOptimizer`]
//! and [`RandomForestOptimizer`] search discrete axes and score each point by
//! subject-grouped inner cross-validation. Every run is capped by a
//! [`Budget`]; running out of it ends the run with the best point so far.

pub mod budget;
mod discrete;
pub mod error;
pub mod fitness;
pub mod forest_optimizer;
pub mod nelder_mead;
pub mod result;
pub mod tree_optimizer;

pub use budget::{Budget, BudgetTracker};
pub use discrete::SearchStrategy;
pub use error::OptimError;
pub use fitness::{cross_validated_fitness, inner_folds};
pub use forest_optimizer::RandomForestOptimizer;
pub use nelder_mead::{NelderMead, SimplexState, relative_tolerance};
pub use result::{OptimizerResult, Termination, TunedModel};
pub use tree_optimizer::DecisionTreeOptimizer;
