//! Hyperparameter ranges of a stage list, addressed by a normalized vector.
//!
//! Each coordinate of a point in `[0, 1]^d` selects one value of one range
//! by index `round((len - 1) * p)`. Coordinates outside the unit interval are
//! clamped for decoding and reported by [`ParameterSpace::penalty`].

use serde::Serialize;

use dkeval_stages::{
    ComponentSelection, FeatureSelectionConfig, IsolationForestConfig, OversamplingAmount, OversamplingConfig,
    OversamplingMethod, PcaConfig, Stage, UndersamplingConfig, UndersamplingMethod,
};

use crate::error::PipelineError;

/// One candidate value of a stage hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterValue {
    /// A count: features, trees or neighbours.
    Count(usize),
    /// A percentage.
    Percent(u32),
    /// An oversampling method.
    Oversampling(OversamplingMethod),
    /// An undersampling method.
    Undersampling(UndersamplingMethod),
    /// A switch.
    Flag(bool),
}

/// The range of one hyperparameter of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    /// Position of the stage in the pipeline.
    pub stage: usize,
    /// Hyperparameter name.
    pub name: &'static str,
    /// Candidate values in range order.
    pub values: Vec<ParameterValue>,
}

impl Parameter {
    fn new(stage: usize, name: &'static str, values: Vec<ParameterValue>) -> Option<Self> {
        (!values.is_empty()).then_some(Self { stage, name, values })
    }

    /// Value selected by normalized coordinate `p`.
    #[must_use]
    pub fn pick(&self, p: f64) -> ParameterValue {
        self.values[range_index(self.values.len(), p)]
    }
}

/// Index `round((len - 1) * p)` with `p` clamped to `[0, 1]`.
#[must_use]
pub fn range_index(len: usize, p: f64) -> usize {
    if len == 0 {
        return 0;
    }
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    ((len - 1) as f64 * p).round() as usize
}

/// The tunable hyperparameters of a stage list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterSpace {
    parameters: Vec<Parameter>,
}

impl ParameterSpace {
    /// Enumerate the ranges for `stages` over a package with `n_features`
    /// columns.
    #[must_use]
    pub fn new(stages: &[Stage], n_features: usize) -> Self {
        use ParameterValue::{Count, Flag, Oversampling, Percent, Undersampling};

        let mut parameters = Vec::new();
        for (i, stage) in stages.iter().enumerate() {
            let ranges: Vec<Option<Parameter>> = match stage {
                Stage::FeatureSelection(_) => {
                    vec![Parameter::new(i, "count", (n_features.min(3)..=n_features).filter(|&c| c > 0).map(Count).collect())]
                }
                Stage::IsolationForest(_) => vec![Parameter::new(
                    i,
                    "n_trees",
                    [5, 10, 20].iter().map(|m| Count((m * n_features).max(1))).collect(),
                )],
                Stage::Oversampling(_) => vec![
                    Parameter::new(i, "k_neighbors", (1..=9).map(Count).collect()),
                    Parameter::new(
                        i,
                        "method",
                        [OversamplingMethod::Smote, OversamplingMethod::BorderlineSmote, OversamplingMethod::Random]
                            .into_iter()
                            .map(Oversampling)
                            .collect(),
                    ),
                    Parameter::new(i, "percentage", (50..=1000).step_by(50).map(Percent).collect()),
                    Parameter::new(i, "auto", vec![Flag(true), Flag(false)]),
                ],
                Stage::Undersampling(_) => vec![Parameter::new(
                    i,
                    "method",
                    vec![Undersampling(UndersamplingMethod::Random), Undersampling(UndersamplingMethod::TomekLink)],
                )],
                Stage::Pca(_) => vec![Parameter::new(i, "preserved_variance", (90..=99).map(Percent).collect())],
            };
            parameters.extend(ranges.into_iter().flatten());
        }
        Self { parameters }
    }

    /// Number of coordinates.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.parameters.len()
    }

    /// `true` when no stage has a tunable parameter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// The parameters, in coordinate order.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Total distance of `point` outside the unit cube.
    #[must_use]
    pub fn penalty(point: &[f64]) -> f64 {
        point.iter().map(|&p| (-p).max(0.0) + (p - 1.0).max(0.0)).sum()
    }

    /// Rebuild `stages` with the values `point` selects. Stages without a
    /// coordinate are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Stage`] when a selected combination is
    /// rejected by a stage constructor.
    pub fn decode(&self, stages: &[Stage], point: &[f64]) -> Result<Vec<Stage>, PipelineError> {
        let pick = |stage: usize, name: &str| -> Option<ParameterValue> {
            self.parameters
                .iter()
                .enumerate()
                .find(|(_, p)| p.stage == stage && p.name == name)
                .map(|(coord, p)| p.pick(point.get(coord).copied().unwrap_or(0.5)))
        };
        let count = |stage: usize, name: &str| match pick(stage, name) {
            Some(ParameterValue::Count(c)) => Some(c),
            _ => None,
        };
        let percent = |stage: usize, name: &str| match pick(stage, name) {
            Some(ParameterValue::Percent(p)) => Some(p),
            _ => None,
        };

        stages
            .iter()
            .enumerate()
            .map(|(i, stage)| -> Result<Stage, PipelineError> {
                Ok(match stage {
                    Stage::FeatureSelection(c) => {
                        Stage::FeatureSelection(FeatureSelectionConfig::new(count(i, "count").unwrap_or(c.count()))?)
                    }
                    Stage::IsolationForest(c) => Stage::IsolationForest(
                        IsolationForestConfig::new(count(i, "n_trees").unwrap_or(c.n_trees()))?
                            .with_max_samples(c.max_samples())
                            .with_threshold(c.threshold()),
                    ),
                    Stage::Oversampling(c) => {
                        let method = match pick(i, "method") {
                            Some(ParameterValue::Oversampling(m)) => m,
                            _ => c.method(),
                        };
                        let amount = match pick(i, "auto") {
                            Some(ParameterValue::Flag(true)) => OversamplingAmount::Auto,
                            Some(ParameterValue::Flag(false)) => {
                                OversamplingAmount::Percentage(percent(i, "percentage").unwrap_or(100))
                            }
                            _ => c.amount(),
                        };
                        Stage::Oversampling(OversamplingConfig::new(
                            method,
                            amount,
                            count(i, "k_neighbors").unwrap_or(c.k_neighbors()),
                        )?)
                    }
                    Stage::Undersampling(c) => match pick(i, "method") {
                        Some(ParameterValue::Undersampling(m)) => Stage::Undersampling(UndersamplingConfig::new(m)),
                        _ => Stage::Undersampling(*c),
                    },
                    Stage::Pca(c) => match percent(i, "preserved_variance") {
                        Some(p) => Stage::Pca(
                            PcaConfig::new(ComponentSelection::PreservedVariance(f64::from(p)))?
                                .with_max_iterations(c.max_iterations())
                                .with_tolerance(c.tolerance()),
                        ),
                        None => Stage::Pca(c.clone()),
                    },
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dkeval_stages::StageKind;

    #[test]
    fn index_rounds_and_clamps() {
        assert_eq!(range_index(10, 0.0), 0);
        assert_eq!(range_index(10, 1.0), 9);
        assert_eq!(range_index(10, 0.5), 5);
        assert_eq!(range_index(10, 1.7), 9);
        assert_eq!(range_index(10, -3.0), 0);
        assert_eq!(range_index(1, 0.9), 0);
    }

    #[test]
    fn penalty_only_outside_unit_cube() {
        assert!(ParameterSpace::penalty(&[0.0, 0.5, 1.0]).abs() < f64::EPSILON);
        assert!((ParameterSpace::penalty(&[-0.5, 1.25]) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn ranges_per_stage() {
        let stages: Vec<Stage> = StageKind::ALL.iter().map(|&k| Stage::default_for(k, 8)).collect();
        let space = ParameterSpace::new(&stages, 8);
        // count, n_trees, 4 oversampling, method, variance
        assert_eq!(space.dimension(), 1 + 1 + 4 + 1 + 1);
        let count = &space.parameters()[0];
        assert_eq!(count.values.first(), Some(&ParameterValue::Count(3)));
        assert_eq!(count.values.last(), Some(&ParameterValue::Count(8)));
        let trees = &space.parameters()[1];
        assert_eq!(trees.values, vec![ParameterValue::Count(40), ParameterValue::Count(80), ParameterValue::Count(160)]);
        let pct = space.parameters().iter().find(|p| p.name == "percentage").unwrap();
        assert_eq!(pct.values.len(), 20);
    }

    #[test]
    fn decode_selects_range_ends() {
        let stages = vec![
            Stage::default_for(StageKind::Pca, 4),
            Stage::default_for(StageKind::Undersampling, 4),
        ];
        let space = ParameterSpace::new(&stages, 4);
        let low = space.decode(&stages, &[0.0, 0.0]).unwrap();
        let high = space.decode(&stages, &[1.0, 1.0]).unwrap();
        match (&low[0], &high[0]) {
            (Stage::Pca(a), Stage::Pca(b)) => {
                assert_eq!(a.selection(), ComponentSelection::PreservedVariance(90.0));
                assert_eq!(b.selection(), ComponentSelection::PreservedVariance(99.0));
            }
            other => panic!("{other:?}"),
        }
        assert_eq!(high[1], Stage::Undersampling(UndersamplingConfig::new(UndersamplingMethod::TomekLink)));
    }

    #[test]
    fn oversampling_percentage_used_when_auto_off() {
        let stages = vec![Stage::default_for(StageKind::Oversampling, 4)];
        let space = ParameterSpace::new(&stages, 4);
        let decoded = space.decode(&stages, &[0.0, 1.0, 0.0, 1.0]).unwrap();
        let Stage::Oversampling(c) = &decoded[0] else { panic!("{decoded:?}") };
        assert_eq!(c.k_neighbors(), 1);
        assert_eq!(c.method(), OversamplingMethod::Random);
        assert_eq!(c.amount(), OversamplingAmount::Percentage(50));
    }
}
