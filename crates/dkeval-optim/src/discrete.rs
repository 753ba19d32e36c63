//! Grid and greedy search over discrete hyperparameter axes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::Budget;
use crate::error::OptimError;
use crate::result::{OptimizerResult, Termination};

/// How a tree optimizer walks its hyperparameter axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchStrategy {
    /// Every combination of axis values.
    Grid,
    /// One axis at a time in declaration order, keeping the best value of
    /// each before moving on.
    #[default]
    Greedy,
}

/// One hyperparameter with its numerically encoded candidate values.
#[derive(Debug, Clone)]
pub(crate) struct Axis {
    pub(crate) name: &'static str,
    pub(crate) values: Vec<f64>,
}

impl Axis {
    pub(crate) fn new(name: &'static str, values: Vec<f64>) -> Self {
        Self { name, values }
    }
}

struct Walker<'a, F> {
    axes: &'a [Axis],
    score: F,
    seen: BTreeMap<Vec<usize>, f64>,
    best: Option<(Vec<usize>, f64)>,
    evaluations: usize,
}

impl<F> Walker<'_, F>
where
    F: FnMut(&[f64]) -> Result<f64, OptimError>,
{
    fn point(&self, at: &[usize]) -> Vec<f64> {
        at.iter().zip(self.axes).map(|(&i, axis)| axis.values[i]).collect()
    }

    /// Score `at`, reusing earlier results. Ties keep the earlier point.
    fn visit(&mut self, at: &[usize]) -> Result<f64, OptimError> {
        if let Some(&fitness) = self.seen.get(at) {
            return Ok(fitness);
        }
        let point = self.point(at);
        let fitness = (self.score)(&point)?;
        self.evaluations += 1;
        debug!(?point, fitness, "hyperparameter point scored");
        self.seen.insert(at.to_vec(), fitness);
        if self.best.as_ref().is_none_or(|(_, b)| fitness > *b) {
            self.best = Some((at.to_vec(), fitness));
        }
        Ok(fitness)
    }
}

/// Maximize `score` over the axes. At least one point is always scored.
///
/// # Errors
///
/// | Variant                   | When                          |
/// |---------------------------|-------------------------------|
/// | [`OptimError::EmptyAxis`] | an axis has no values         |
/// | any                       | propagated from `score`       |
pub(crate) fn maximize<F>(
    axes: &[Axis],
    strategy: SearchStrategy,
    budget: &Budget,
    score: F,
) -> Result<OptimizerResult, OptimError>
where
    F: FnMut(&[f64]) -> Result<f64, OptimError>,
{
    if let Some(axis) = axes.iter().find(|a| a.values.is_empty()) {
        return Err(OptimError::EmptyAxis { axis: axis.name });
    }
    let mut tracker = budget.start();
    let mut walker = Walker {
        axes,
        score,
        seen: BTreeMap::new(),
        best: None,
        evaluations: 0,
    };
    let mut at = vec![0usize; axes.len()];
    let mut termination = Termination::FunctionConverged;

    match strategy {
        SearchStrategy::Grid => loop {
            walker.visit(&at)?;
            tracker.record(1);
            let Some(axis) = (0..axes.len()).rev().find(|&a| at[a] + 1 < axes[a].values.len()) else {
                break;
            };
            at[axis] += 1;
            at[axis + 1..].iter_mut().for_each(|i| *i = 0);
            if tracker.exhausted() {
                termination = Termination::BudgetExhausted;
                break;
            }
        },
        SearchStrategy::Greedy => {
            let mut current = walker.visit(&at)?;
            tracker.record(1);
            'axes: for axis in 0..axes.len() {
                let mut chosen = at[axis];
                for value in 0..axes[axis].values.len() {
                    if value == at[axis] {
                        continue;
                    }
                    if tracker.exhausted() {
                        termination = Termination::BudgetExhausted;
                        at[axis] = chosen;
                        break 'axes;
                    }
                    let mut probe = at.clone();
                    probe[axis] = value;
                    let before = walker.evaluations;
                    let fitness = walker.visit(&probe)?;
                    tracker.record(walker.evaluations - before);
                    if fitness > current {
                        current = fitness;
                        chosen = value;
                    }
                }
                at[axis] = chosen;
            }
        }
    }

    let (best_at, best_fitness) = walker.best.clone().unwrap_or((at, 0.0));
    Ok(OptimizerResult {
        best_parameters: walker.point(&best_at),
        best_fitness,
        evaluations: walker.evaluations,
        iterations: walker.seen.len(),
        termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes() -> Vec<Axis> {
        vec![Axis::new("a", vec![0.0, 1.0, 2.0]), Axis::new("b", vec![10.0, 20.0])]
    }

    // Peak at a = 2, b = 10.
    fn peak(p: &[f64]) -> Result<f64, OptimError> {
        Ok(-(p[0] - 2.0).powi(2) - (p[1] - 10.0).abs())
    }

    #[test]
    fn grid_visits_every_point() {
        let result = maximize(&axes(), SearchStrategy::Grid, &Budget::default(), peak).unwrap();
        assert_eq!(result.evaluations, 6);
        assert_eq!(result.best_parameters, vec![2.0, 10.0]);
        assert_eq!(result.termination, Termination::FunctionConverged);
    }

    #[test]
    fn greedy_walks_axes_in_order() {
        let result = maximize(&axes(), SearchStrategy::Greedy, &Budget::default(), peak).unwrap();
        assert_eq!(result.evaluations, 4);
        assert_eq!(result.best_parameters, vec![2.0, 10.0]);
    }

    #[test]
    fn budget_stops_grid() {
        let result = maximize(&axes(), SearchStrategy::Grid, &Budget::new(2).unwrap(), peak).unwrap();
        assert_eq!(result.evaluations, 2);
        assert_eq!(result.termination, Termination::BudgetExhausted);
    }

    #[test]
    fn empty_axis_rejected() {
        let axes = vec![Axis::new("depth", vec![])];
        assert!(matches!(
            maximize(&axes, SearchStrategy::Grid, &Budget::default(), peak),
            Err(OptimError::EmptyAxis { axis: "depth" })
        ));
    }
}
