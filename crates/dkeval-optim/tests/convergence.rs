//! Convergence and budget behaviour of the optimizers.

use std::collections::BTreeSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use dkeval_data::{DataPackage, SubjectId};
use dkeval_model::{MaxFeatures, Measure};
use dkeval_optim::{
    Budget, DecisionTreeOptimizer, NelderMead, RandomForestOptimizer, SearchStrategy, Termination,
};

// ---------------------------------------------------------------------------
// Helper: two-class cohort, features 0-2 informative
// ---------------------------------------------------------------------------

fn make_cohort() -> DataPackage {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let mut subjects = Vec::new();
    for i in 0..120 {
        let class = (i / 2) % 2;
        labels.push(class);
        subjects.push(SubjectId::new(format!("patient-{}", i / 2)));
        rows.push(
            (0..6)
                .map(|f| {
                    let base = if f < 3 { class as f64 * 2.0 } else { 0.0 };
                    base + rng.r#gen::<f64>()
                })
                .collect(),
        );
    }
    let names: Vec<String> = (0..6).map(|f| format!("f{f}")).collect();
    DataPackage::from_names(&names, rows, labels, subjects).unwrap()
}

// ---------------------------------------------------------------------------
// Nelder-Mead
// ---------------------------------------------------------------------------

#[test]
fn quadratic_minimum_found() {
    let nm = NelderMead::default()
        .with_initial_step(1.0)
        .with_budget(Budget::new(2000).unwrap());
    let result = nm
        .minimize(&[0.0, 0.0], |p| (p[0] - 3.0).powi(2) + (p[1] + 1.0).powi(2))
        .unwrap();
    assert_eq!(result.termination, Termination::FunctionConverged);
    assert!((result.best_parameters[0] - 3.0).abs() < 1e-4, "{result:?}");
    assert!((result.best_parameters[1] + 1.0).abs() < 1e-4, "{result:?}");
    assert!(result.evaluations <= 2000);
}

#[test]
fn rosenbrock_valley_followed() {
    let nm = NelderMead::new(1e-12)
        .unwrap()
        .with_initial_step(0.5)
        .with_max_iterations(5000)
        .with_budget(Budget::new(10_000).unwrap());
    let result = nm
        .minimize(&[-1.2, 1.0], |p| 100.0 * (p[1] - p[0] * p[0]).powi(2) + (1.0 - p[0]).powi(2))
        .unwrap();
    assert!((result.best_parameters[0] - 1.0).abs() < 1e-3, "{result:?}");
    assert!((result.best_parameters[1] - 1.0).abs() < 1e-3, "{result:?}");
}

#[test]
fn iteration_cap_returns_best_so_far() {
    let f = |p: &[f64]| (p[0] - 3.0).powi(2) + (p[1] + 1.0).powi(2);
    let result = NelderMead::default().with_max_iterations(5).minimize(&[0.0, 0.0], f).unwrap();
    assert_eq!(result.termination, Termination::MaxIterations);
    assert_eq!(result.iterations, 5);
    assert!(result.best_fitness < f(&[0.0, 0.0]));
}

#[test]
fn evaluation_budget_is_not_an_error() {
    let result = NelderMead::default()
        .with_budget(Budget::new(10).unwrap())
        .minimize(&[5.0, 5.0, 5.0], |p| p.iter().map(|x| x * x).sum())
        .unwrap();
    assert_eq!(result.termination, Termination::BudgetExhausted);
    // One step may run past the cap by at most n + 2 evaluations.
    assert!(result.evaluations <= 10 + 5, "{}", result.evaluations);
    assert!(result.best_fitness <= 75.0);
}

// ---------------------------------------------------------------------------
// Tree optimizers
// ---------------------------------------------------------------------------

#[test]
fn tree_grid_visits_every_combination() {
    let data = make_cohort();
    let tuned = DecisionTreeOptimizer::new(SearchStrategy::Grid).run(&data).unwrap();
    assert_eq!(tuned.result.evaluations, 4 * 3 * 2);
    assert_eq!(tuned.result.termination, Termination::FunctionConverged);
    assert!(tuned.result.best_fitness > 0.8, "{:?}", tuned.result);
    assert_eq!(tuned.result.best_parameters.len(), 3);
    assert_eq!(tuned.config.max_features(), MaxFeatures::Log2PlusOne);
}

#[test]
fn tree_greedy_uses_fewer_evaluations() {
    let data = make_cohort();
    let greedy = DecisionTreeOptimizer::new(SearchStrategy::Greedy).run(&data).unwrap();
    assert!(greedy.result.evaluations <= 1 + 3 + 2 + 1);
    assert!(greedy.result.best_fitness > 0.8);
}

#[test]
fn tree_budget_stops_search() {
    let data = make_cohort();
    let tuned = DecisionTreeOptimizer::new(SearchStrategy::Grid)
        .with_budget(Budget::new(3).unwrap())
        .run(&data)
        .unwrap();
    assert_eq!(tuned.result.evaluations, 3);
    assert_eq!(tuned.result.termination, Termination::BudgetExhausted);
}

#[test]
fn forest_restricted_to_kde_features() {
    let data = make_cohort();
    let tuned = RandomForestOptimizer::new(SearchStrategy::Grid)
        .with_tree_counts(vec![5, 10])
        .with_max_depths(vec![None])
        .with_min_samples_leaf(vec![1])
        .with_max_features(vec![MaxFeatures::Sqrt, MaxFeatures::All])
        .with_kde_top_k(3)
        .with_measure(Measure::Auc)
        .run(&data)
        .unwrap();
    let chosen: BTreeSet<&str> = tuned.features.iter().map(String::as_str).collect();
    assert_eq!(chosen, BTreeSet::from(["f0", "f1", "f2"]));
    assert_eq!(tuned.result.evaluations, 4);
    assert!(tuned.result.best_fitness > 0.8, "{:?}", tuned.result);
    assert_eq!(tuned.model.n_trees(), tuned.config.n_trees());
}
