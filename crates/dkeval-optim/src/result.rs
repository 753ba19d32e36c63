use serde::{Deserialize, Serialize};

/// Why an optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// The simplex spread fell below tolerance, or a discrete search visited
    /// every point it planned to.
    FunctionConverged,
    /// The iteration cap was reached.
    MaxIterations,
    /// The evaluation or wall-clock budget ran out.
    BudgetExhausted,
}

/// Outcome of an optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerResult {
    /// Parameters of the best point seen.
    pub best_parameters: Vec<f64>,
    /// Objective at `best_parameters`. Nelder-Mead minimizes it; the tree
    /// optimizers maximize cross-validated fitness.
    pub best_fitness: f64,
    /// Objective evaluations consumed.
    pub evaluations: usize,
    /// Iterations (simplex steps, or discrete points visited).
    pub iterations: usize,
    /// Stop reason.
    pub termination: Termination,
}

/// A tuned configuration, the model fitted with it on all rows, and the
/// search record.
#[derive(Debug, Clone)]
pub struct TunedModel<C, M> {
    /// Best configuration found.
    pub config: C,
    /// Model trained with `config` on every input row.
    pub model: M,
    /// Features the model was trained on, in column order.
    pub features: Vec<String>,
    /// Search record; `best_parameters` is the encoded `config`.
    pub result: OptimizerResult,
}
