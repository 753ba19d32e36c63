//! Principal component projection.
//!
//! Columns are z-scored with training statistics, the covariance matrix is
//! decomposed by power iteration with deflation, and rows are projected onto
//! the leading eigenvectors. The output schema is `PC1..PCn`.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use dkeval_data::{DataPackage, Feature};

use crate::error::StageError;
use crate::stage::{FittedTransform, Preprocessor, StageOutput};
use crate::stats;

const STAGE: &str = "pca";

/// How many components to keep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentSelection {
    /// Exactly this many components.
    Fixed(usize),
    /// The fewest components whose explained variance reaches this
    /// percentage.
    PreservedVariance(f64),
}

/// Configuration for the PCA stage.
///
/// # Defaults
///
/// | Parameter        | Default                    |
/// |------------------|----------------------------|
/// | `selection`      | `PreservedVariance(95.0)`  |
/// | `max_iterations` | 300                        |
/// | `tolerance`      | 1e-10                      |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaConfig {
    selection: ComponentSelection,
    max_iterations: usize,
    tolerance: f64,
}

impl PcaConfig {
    /// Create a config keeping components per `selection`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidParameter`] for zero fixed components or a
    /// percentage outside (0, 100].
    pub fn new(selection: ComponentSelection) -> Result<Self, StageError> {
        match selection {
            ComponentSelection::Fixed(0) => {
                return Err(StageError::InvalidParameter {
                    stage: STAGE,
                    parameter: "components",
                    value: "0".to_string(),
                });
            }
            ComponentSelection::PreservedVariance(p) if !(p > 0.0 && p <= 100.0) => {
                return Err(StageError::InvalidParameter {
                    stage: STAGE,
                    parameter: "preserved_variance",
                    value: p.to_string(),
                });
            }
            _ => {}
        }
        Ok(Self {
            selection,
            max_iterations: 300,
            tolerance: 1e-10,
        })
    }

    /// Set the power iteration cap per component.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Set the eigenvector convergence tolerance.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Return the component selection rule.
    #[must_use]
    pub fn selection(&self) -> ComponentSelection {
        self.selection
    }

    /// Return the power iteration cap.
    #[must_use]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Return the tolerance.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Fit a projection on `data` without transforming it.
    ///
    /// # Errors
    ///
    /// [`StageError::DegenerateMatrix`] on fewer than two rows, zero total
    /// variance, or a requested component with a non-positive eigenvalue.
    #[instrument(skip_all, fields(n_rows = data.row_count(), n_features = data.feature_count()))]
    pub fn fit(&self, data: &DataPackage, seed: u64) -> Result<Projection, StageError> {
        let rows = data.feature_database();
        let n = rows.len();
        let d = data.feature_count();
        if n < 2 {
            return Err(degenerate(format!("{n} rows, need at least 2")));
        }

        let means: Vec<f64> = (0..d).map(|j| stats::mean(&stats::column(rows, j))).collect();
        let stds: Vec<f64> = (0..d)
            .map(|j| {
                let sd = stats::std_dev(&stats::column(rows, j));
                if sd > 1e-12 { sd } else { 1.0 }
            })
            .collect();
        let standardized: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| r.iter().enumerate().map(|(j, v)| (v - means[j]) / stds[j]).collect())
            .collect();

        let mut cov = covariance(&standardized, d);
        let total_variance: f64 = (0..d).map(|i| cov[i * d + i]).sum();
        if total_variance <= 1e-12 {
            return Err(degenerate("zero total variance".to_string()));
        }

        let wanted = match self.selection {
            ComponentSelection::Fixed(k) if k > d => {
                return Err(degenerate(format!("{k} components requested from {d} features")));
            }
            ComponentSelection::Fixed(k) => k,
            ComponentSelection::PreservedVariance(_) => d,
        };

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut components = Vec::with_capacity(wanted);
        let mut eigenvalues = Vec::with_capacity(wanted);
        let mut explained = 0.0;
        for index in 0..wanted {
            let (value, vector) = self.leading_eigenpair(&cov, d, &mut rng);
            if value <= 1e-10 * total_variance {
                if let ComponentSelection::PreservedVariance(_) = self.selection
                    && !components.is_empty()
                {
                    break;
                }
                return Err(degenerate(format!(
                    "component {} has non-positive eigenvalue {value:.3e}",
                    index + 1
                )));
            }
            for i in 0..d {
                for j in 0..d {
                    cov[i * d + j] -= value * vector[i] * vector[j];
                }
            }
            explained += value / total_variance * 100.0;
            eigenvalues.push(value);
            components.push(vector);
            if let ComponentSelection::PreservedVariance(p) = self.selection
                && explained >= p
            {
                break;
            }
        }

        debug!(
            components = components.len(),
            explained_percent = explained,
            "pca fitted"
        );
        Ok(Projection {
            input_names: data.feature_names(),
            means,
            stds,
            components,
            explained_variance: eigenvalues.iter().map(|v| v / total_variance).collect(),
        })
    }

    fn leading_eigenpair(&self, matrix: &[f64], d: usize, rng: &mut ChaCha8Rng) -> (f64, Vec<f64>) {
        let mut v: Vec<f64> = (0..d).map(|_| rng.gen_range(-1.0..1.0)).collect();
        normalize(&mut v);
        let mut value = 0.0;
        for _ in 0..self.max_iterations {
            let mut w: Vec<f64> = (0..d)
                .map(|i| matrix[i * d..(i + 1) * d].iter().zip(&v).map(|(a, b)| a * b).sum())
                .collect();
            value = v.iter().zip(&w).map(|(a, b)| a * b).sum();
            normalize(&mut w);
            let diff = v.iter().zip(&w).map(|(a, b)| (a - b).powi(2)).sum::<f64>().sqrt();
            v = w;
            if diff < self.tolerance {
                break;
            }
        }
        // Sign convention: largest-magnitude coordinate positive.
        let pivot = v
            .iter()
            .copied()
            .fold(0.0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            v.iter_mut().for_each(|x| *x = -*x);
        }
        (value.max(0.0), v)
    }
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            selection: ComponentSelection::PreservedVariance(95.0),
            max_iterations: 300,
            tolerance: 1e-10,
        }
    }
}

impl Preprocessor for PcaConfig {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn run(&self, train: &DataPackage, seed: u64) -> Result<StageOutput, StageError> {
        let projection = self.fit(train, seed)?;
        let data = projection.apply(train)?;
        Ok(StageOutput {
            data,
            transform: FittedTransform::Project(projection),
        })
    }
}

/// A fitted standardize-and-project transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    input_names: Vec<String>,
    means: Vec<f64>,
    stds: Vec<f64>,
    components: Vec<Vec<f64>>,
    explained_variance: Vec<f64>,
}

impl Projection {
    /// Number of output components.
    #[must_use]
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// Fraction of the training variance explained by each component.
    #[must_use]
    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// Unit eigenvectors, one per component.
    #[must_use]
    pub fn components(&self) -> &[Vec<f64>] {
        &self.components
    }

    /// Project `data` onto the fitted components.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::SchemaMismatch`] when `data` does not carry the
    /// fitted feature names in the fitted order.
    pub fn apply(&self, data: &DataPackage) -> Result<DataPackage, StageError> {
        let names = data.feature_names();
        if names != self.input_names {
            return Err(StageError::SchemaMismatch {
                expected: self.input_names.clone(),
                got: names,
            });
        }
        let rows: Vec<Vec<f64>> = data
            .feature_database()
            .iter()
            .map(|row| {
                self.components
                    .iter()
                    .map(|c| {
                        row.iter()
                            .enumerate()
                            .map(|(j, v)| (v - self.means[j]) / self.stds[j] * c[j])
                            .sum()
                    })
                    .collect()
            })
            .collect();
        let features = (0..self.components.len())
            .map(|i| Feature::continuous(format!("PC{}", i + 1), i))
            .collect();
        Ok(data.with_schema(features, rows)?)
    }
}

fn covariance(data: &[Vec<f64>], d: usize) -> Vec<f64> {
    let denominator = (data.len() as f64 - 1.0).max(1.0);
    let mut cov = vec![0.0f64; d * d];
    for i in 0..d {
        for j in i..d {
            let value = data.iter().map(|r| r[i] * r[j]).sum::<f64>() / denominator;
            cov[i * d + j] = value;
            cov[j * d + i] = value;
        }
    }
    cov
}

fn normalize(v: &mut [f64]) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt().max(1e-12);
    v.iter_mut().for_each(|x| *x /= norm);
}

fn degenerate(reason: String) -> StageError {
    StageError::DegenerateMatrix { stage: STAGE, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dkeval_data::SubjectId;

    fn package(rows: Vec<Vec<f64>>) -> DataPackage {
        let names: Vec<String> = (0..rows[0].len()).map(|f| format!("x{f}")).collect();
        let labels = (0..rows.len()).map(|i| i % 2).collect();
        let subjects = (0..rows.len()).map(|i| SubjectId::new(format!("s{i}"))).collect();
        DataPackage::from_names(&names, rows, labels, subjects).unwrap()
    }

    fn correlated(n: usize) -> DataPackage {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let rows = (0..n)
            .map(|_| {
                let t: f64 = rng.gen_range(-5.0..5.0);
                let u: f64 = rng.gen_range(-1.0..1.0);
                vec![t, 2.0 * t + 0.1 * u, u]
            })
            .collect();
        package(rows)
    }

    #[test]
    fn fixed_components_rename_schema() {
        let data = correlated(50);
        let out = PcaConfig::new(ComponentSelection::Fixed(2)).unwrap().run(&data, 1).unwrap();
        assert_eq!(out.data.feature_names(), vec!["PC1", "PC2"]);
        assert_eq!(out.data.row_count(), 50);
        assert_eq!(out.data.labels(), data.labels());
    }

    #[test]
    fn components_are_orthonormal() {
        let data = correlated(80);
        let projection = PcaConfig::new(ComponentSelection::Fixed(3)).unwrap().fit(&data, 5).unwrap();
        let c = projection.components();
        for a in 0..3 {
            for b in 0..3 {
                let dot: f64 = c[a].iter().zip(&c[b]).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-3, "c{a}.c{b} = {dot}");
            }
        }
        let ev = projection.explained_variance();
        assert!(ev[0] >= ev[1] && ev[1] >= ev[2]);
    }

    #[test]
    fn preserved_variance_picks_fewest_components() {
        // Two of three columns are nearly collinear: two components cover ~100%.
        let data = correlated(100);
        let projection = PcaConfig::new(ComponentSelection::PreservedVariance(95.0))
            .unwrap()
            .fit(&data, 2)
            .unwrap();
        assert_eq!(projection.n_components(), 2);
        assert!(projection.explained_variance().iter().sum::<f64>() >= 0.95);
    }

    #[test]
    fn validation_uses_training_statistics() {
        let train = correlated(40);
        let out = PcaConfig::new(ComponentSelection::Fixed(1)).unwrap().run(&train, 0).unwrap();
        let validation = package(vec![vec![0.0, 0.0, 0.0], vec![1.0, 2.0, 0.0]]);
        let projected = out.transform.apply(&validation).unwrap();
        assert_eq!(projected.feature_names(), vec!["PC1"]);
        assert_eq!(projected.row_count(), 2);
    }

    #[test]
    fn single_row_is_degenerate() {
        let data = package(vec![vec![1.0, 2.0]]);
        let err = PcaConfig::default().fit(&data, 0).unwrap_err();
        assert!(matches!(err, StageError::DegenerateMatrix { .. }));
    }

    #[test]
    fn constant_matrix_is_degenerate() {
        let data = package(vec![vec![1.0, 1.0]; 5]);
        let err = PcaConfig::default().fit(&data, 0).unwrap_err();
        assert!(matches!(err, StageError::DegenerateMatrix { .. }));
    }

    #[test]
    fn rank_deficient_request_is_degenerate() {
        let rows = (0..10).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        let err = PcaConfig::new(ComponentSelection::Fixed(2)).unwrap().fit(&package(rows), 0).unwrap_err();
        assert!(matches!(err, StageError::DegenerateMatrix { .. }));
    }

    #[test]
    fn schema_mismatch_rejected() {
        let out = PcaConfig::new(ComponentSelection::Fixed(1)).unwrap().run(&correlated(20), 0).unwrap();
        let other = package(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert!(matches!(out.transform.apply(&other), Err(StageError::SchemaMismatch { .. })));
    }

    #[test]
    fn invalid_selection_rejected() {
        assert!(PcaConfig::new(ComponentSelection::Fixed(0)).is_err());
        assert!(PcaConfig::new(ComponentSelection::PreservedVariance(120.0)).is_err());
    }
}
