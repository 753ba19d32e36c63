//! Derivative-free simplex minimization.

use tracing::{debug, instrument};

use crate::budget::Budget;
use crate::error::OptimError;
use crate::result::{OptimizerResult, Termination};

const REFLECTION: f64 = -1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Relative spread of the simplex values used as the convergence test.
#[must_use]
pub fn relative_tolerance(f_hi: f64, f_lo: f64) -> f64 {
    2.0 * (f_hi - f_lo).abs() / (f_hi.abs() + f_lo.abs() + 1e-10)
}

/// Vertices and values of a simplex in `R^n`, kept sorted best first after
/// every [`NelderMead::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimplexState {
    vertices: Vec<Vec<f64>>,
    values: Vec<f64>,
    iterations: usize,
    evaluations: usize,
}

impl SimplexState {
    /// Dimension of the search space.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.vertices.len() - 1
    }

    /// The `n + 1` vertices.
    #[must_use]
    pub fn vertices(&self) -> &[Vec<f64>] {
        &self.vertices
    }

    /// Objective value of each vertex.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Best vertex and its value.
    #[must_use]
    pub fn best(&self) -> (&[f64], f64) {
        let i = self.best_index();
        (&self.vertices[i], self.values[i])
    }

    /// Steps taken so far.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Objective evaluations so far, including the initial simplex.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Current [`relative_tolerance`] between the worst and best vertex.
    #[must_use]
    pub fn spread(&self) -> f64 {
        let (lo, hi) = self
            .values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        relative_tolerance(hi, lo)
    }

    fn best_index(&self) -> usize {
        (0..self.values.len())
            .min_by(|&a, &b| self.values[a].total_cmp(&self.values[b]).then(a.cmp(&b)))
            .unwrap_or(0)
    }

    fn sort(&mut self) {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]).then(a.cmp(&b)));
        self.vertices = order.iter().map(|&i| self.vertices[i].clone()).collect();
        self.values = order.iter().map(|&i| self.values[i]).collect();
    }

    fn evaluate<F: FnMut(&[f64]) -> f64>(&mut self, point: &[f64], objective: &mut F) -> f64 {
        self.evaluations += 1;
        let value = objective(point);
        if value.is_nan() { f64::INFINITY } else { value }
    }
}

/// Nelder-Mead configuration.
///
/// The initial simplex is the start point plus one vertex per axis offset by
/// `initial_step`.
///
/// # Defaults
///
/// | Parameter        | Default               |
/// |------------------|-----------------------|
/// | `tolerance`      | 1e-8                  |
/// | `max_iterations` | 1000                  |
/// | `initial_step`   | 0.1                   |
/// | `budget`         | [`Budget::default`]   |
#[derive(Debug, Clone, PartialEq)]
pub struct NelderMead {
    tolerance: f64,
    max_iterations: usize,
    initial_step: f64,
    budget: Budget,
}

impl NelderMead {
    /// Create a minimizer that stops once the simplex spread drops below
    /// `tolerance`.
    ///
    /// # Errors
    ///
    /// Returns [`OptimError::InvalidTolerance`] when `tolerance` is not
    /// positive and finite.
    pub fn new(tolerance: f64) -> Result<Self, OptimError> {
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(OptimError::InvalidTolerance { tolerance });
        }
        Ok(Self {
            tolerance,
            ..Self::default()
        })
    }

    /// Set the iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the per-axis offset of the initial simplex.
    #[must_use]
    pub fn with_initial_step(mut self, initial_step: f64) -> Self {
        self.initial_step = initial_step;
        self
    }

    /// Set the evaluation budget.
    #[must_use]
    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Return the convergence tolerance.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Return the iteration cap.
    #[must_use]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Return the initial step.
    #[must_use]
    pub fn initial_step(&self) -> f64 {
        self.initial_step
    }

    /// Return the budget.
    #[must_use]
    pub fn budget(&self) -> Budget {
        self.budget
    }

    /// Build the initial simplex around `start`.
    ///
    /// # Errors
    ///
    /// | Variant                             | When                                  |
    /// |-------------------------------------|---------------------------------------|
    /// | [`OptimError::EmptyStartingPoint`]  | `start` is empty                      |
    /// | [`OptimError::NonFiniteObjective`]  | `start` or its value is not finite    |
    pub fn initialize<F>(&self, start: &[f64], objective: &mut F) -> Result<SimplexState, OptimError>
    where
        F: FnMut(&[f64]) -> f64,
    {
        if start.is_empty() {
            return Err(OptimError::EmptyStartingPoint);
        }
        if start.iter().any(|x| !x.is_finite()) {
            return Err(OptimError::NonFiniteObjective { point: start.to_vec() });
        }
        let mut state = SimplexState {
            vertices: Vec::with_capacity(start.len() + 1),
            values: Vec::with_capacity(start.len() + 1),
            iterations: 0,
            evaluations: 0,
        };
        let first = state.evaluate(start, objective);
        if !first.is_finite() {
            return Err(OptimError::NonFiniteObjective { point: start.to_vec() });
        }
        state.vertices.push(start.to_vec());
        state.values.push(first);
        for axis in 0..start.len() {
            let mut vertex = start.to_vec();
            vertex[axis] += self.initial_step;
            let value = state.evaluate(&vertex, objective);
            state.vertices.push(vertex);
            state.values.push(value);
        }
        state.sort();
        Ok(state)
    }

    /// Advance the simplex by one reflect / expand / contract / shrink move.
    pub fn step<F>(&self, state: &mut SimplexState, objective: &mut F)
    where
        F: FnMut(&[f64]) -> f64,
    {
        state.sort();
        let n = state.dimension();
        let worst = n;
        let centroid: Vec<f64> = (0..n)
            .map(|d| state.vertices[..n].iter().map(|v| v[d]).sum::<f64>() / n as f64)
            .collect();
        let along = |from: &[f64], fac: f64| -> Vec<f64> {
            centroid.iter().zip(from).map(|(c, x)| c + fac * (x - c)).collect()
        };

        let reflected = along(&state.vertices[worst], REFLECTION);
        let f_reflected = state.evaluate(&reflected, objective);

        if f_reflected < state.values[0] {
            let expanded = along(&reflected, EXPANSION);
            let f_expanded = state.evaluate(&expanded, objective);
            if f_expanded < f_reflected {
                state.vertices[worst] = expanded;
                state.values[worst] = f_expanded;
            } else {
                state.vertices[worst] = reflected;
                state.values[worst] = f_reflected;
            }
        } else if f_reflected < state.values[n - 1] {
            state.vertices[worst] = reflected;
            state.values[worst] = f_reflected;
        } else {
            let (base, f_base) = if f_reflected < state.values[worst] {
                (reflected, f_reflected)
            } else {
                (state.vertices[worst].clone(), state.values[worst])
            };
            let contracted = along(&base, CONTRACTION);
            let f_contracted = state.evaluate(&contracted, objective);
            if f_contracted < f_base {
                state.vertices[worst] = contracted;
                state.values[worst] = f_contracted;
            } else {
                let best = state.vertices[0].clone();
                for i in 1..=n {
                    let shrunk: Vec<f64> = best
                        .iter()
                        .zip(&state.vertices[i])
                        .map(|(b, x)| b + SHRINK * (x - b))
                        .collect();
                    state.values[i] = state.evaluate(&shrunk, objective);
                    state.vertices[i] = shrunk;
                }
            }
        }
        state.sort();
        state.iterations += 1;
    }

    /// Minimize `objective` from `start`.
    ///
    /// The run ends on the first of convergence, the iteration cap, or the
    /// budget. Budget checks happen between steps, so the final count can
    /// exceed the cap by up to `n + 2` evaluations.
    ///
    /// # Errors
    ///
    /// See [`NelderMead::initialize`].
    #[instrument(skip_all, fields(dimension = start.len(), tolerance = self.tolerance))]
    pub fn minimize<F>(&self, start: &[f64], mut objective: F) -> Result<OptimizerResult, OptimError>
    where
        F: FnMut(&[f64]) -> f64,
    {
        let mut tracker = self.budget.start();
        let mut state = self.initialize(start, &mut objective)?;
        tracker.record(state.evaluations);

        let termination = loop {
            if state.spread() < self.tolerance {
                break Termination::FunctionConverged;
            }
            if state.iterations >= self.max_iterations {
                break Termination::MaxIterations;
            }
            if tracker.exhausted() {
                break Termination::BudgetExhausted;
            }
            let before = state.evaluations;
            self.step(&mut state, &mut objective);
            tracker.record(state.evaluations - before);
        };

        let (best, value) = state.best();
        debug!(?termination, iterations = state.iterations, evaluations = state.evaluations, value, "simplex finished");
        Ok(OptimizerResult {
            best_parameters: best.to_vec(),
            best_fitness: value,
            evaluations: state.evaluations,
            iterations: state.iterations,
            termination,
        })
    }
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 1000,
            initial_step: 0.1,
            budget: Budget::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_is_zero_on_equal_values() {
        assert!(relative_tolerance(1.5, 1.5).abs() < f64::EPSILON);
        assert!(relative_tolerance(2.0, 1.0) > 0.6);
    }

    #[test]
    fn initial_simplex_offsets_each_axis() {
        let nm = NelderMead::default().with_initial_step(0.5);
        let state = nm.initialize(&[1.0, 1.0], &mut |x: &[f64]| x[0] + x[1]).unwrap();
        assert_eq!(state.vertices().len(), 3);
        assert_eq!(state.evaluations(), 3);
        assert_eq!(state.best().0, &[1.0, 1.0]);
    }

    #[test]
    fn step_never_worsens_best() {
        let nm = NelderMead::default().with_initial_step(1.0);
        let mut f = |x: &[f64]| (x[0] - 2.0).powi(2) + 3.0 * (x[1] + 4.0).powi(2);
        let mut state = nm.initialize(&[0.0, 0.0], &mut f).unwrap();
        let mut best = state.best().1;
        for _ in 0..50 {
            nm.step(&mut state, &mut f);
            assert!(state.best().1 <= best);
            best = state.best().1;
        }
        assert_eq!(state.iterations(), 50);
    }

    #[test]
    fn one_dimensional_minimum() {
        let result = NelderMead::default().minimize(&[10.0], |x| (x[0] + 2.5).powi(2)).unwrap();
        assert!((result.best_parameters[0] + 2.5).abs() < 1e-3, "{result:?}");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(NelderMead::new(0.0), Err(OptimError::InvalidTolerance { .. })));
        let nm = NelderMead::default();
        assert!(matches!(nm.minimize(&[], |_| 0.0), Err(OptimError::EmptyStartingPoint)));
        assert!(matches!(
            nm.minimize(&[1.0], |_| f64::NAN),
            Err(OptimError::NonFiniteObjective { .. })
        ));
    }
}
