//! Minority-class oversampling: SMOTE, Borderline-SMOTE and random
//! duplication.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use dkeval_data::{DataPackage, SubjectId};

use crate::error::StageError;
use crate::neighbors;
use crate::stage::{Preprocessor, StageOutput};

const STAGE: &str = "oversampling";

/// How synthetic minority rows are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OversamplingMethod {
    /// Interpolate between a minority row and one of its minority neighbours.
    Smote,
    /// SMOTE restricted to minority rows on the class border.
    BorderlineSmote,
    /// Duplicate random minority rows.
    Random,
}

/// How many synthetic rows to add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OversamplingAmount {
    /// This percentage of the minority count.
    Percentage(u32),
    /// Enough to match the majority count.
    Auto,
}

/// Configuration for the oversampling stage.
///
/// # Defaults
///
/// | Parameter     | Default |
/// |---------------|---------|
/// | `method`      | `Smote` |
/// | `amount`      | `Auto`  |
/// | `k_neighbors` | 5       |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OversamplingConfig {
    method: OversamplingMethod,
    amount: OversamplingAmount,
    k_neighbors: usize,
}

impl OversamplingConfig {
    /// Create a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidParameter`] when `k_neighbors` is zero or
    /// the percentage is zero.
    pub fn new(method: OversamplingMethod, amount: OversamplingAmount, k_neighbors: usize) -> Result<Self, StageError> {
        if k_neighbors == 0 {
            return Err(StageError::InvalidParameter {
                stage: STAGE,
                parameter: "k_neighbors",
                value: "0".to_string(),
            });
        }
        if amount == OversamplingAmount::Percentage(0) {
            return Err(StageError::InvalidParameter {
                stage: STAGE,
                parameter: "percentage",
                value: "0".to_string(),
            });
        }
        Ok(Self {
            method,
            amount,
            k_neighbors,
        })
    }

    /// Return the method.
    #[must_use]
    pub fn method(&self) -> OversamplingMethod {
        self.method
    }

    /// Return the amount rule.
    #[must_use]
    pub fn amount(&self) -> OversamplingAmount {
        self.amount
    }

    /// Return the neighbour count.
    #[must_use]
    pub fn k_neighbors(&self) -> usize {
        self.k_neighbors
    }

    fn synthetic_count(&self, minority: usize, majority: usize) -> usize {
        match self.amount {
            OversamplingAmount::Auto => majority.saturating_sub(minority),
            OversamplingAmount::Percentage(p) => (f64::from(p) / 100.0 * minority as f64).round() as usize,
        }
    }

    /// Minority rows whose `k` nearest neighbours are at least half but not
    /// all from other classes.
    fn danger_rows(&self, rows: &[Vec<f64>], labels: &[usize], minority_rows: &[usize], class: usize) -> Vec<usize> {
        let all: Vec<usize> = (0..rows.len()).collect();
        minority_rows
            .iter()
            .copied()
            .filter(|&i| {
                let nn = neighbors::nearest(rows, i, &all, self.k_neighbors);
                let foreign = nn.iter().filter(|&&j| labels[j] != class).count();
                !nn.is_empty() && 2 * foreign >= nn.len() && foreign < nn.len()
            })
            .collect()
    }
}

impl Default for OversamplingConfig {
    fn default() -> Self {
        Self {
            method: OversamplingMethod::Smote,
            amount: OversamplingAmount::Auto,
            k_neighbors: 5,
        }
    }
}

impl Preprocessor for OversamplingConfig {
    fn name(&self) -> &'static str {
        STAGE
    }

    #[instrument(skip_all, fields(method = ?self.method, n_rows = train.row_count()))]
    fn run(&self, train: &DataPackage, seed: u64) -> Result<StageOutput, StageError> {
        let counts = train.class_counts();
        if counts.iter().filter(|&&c| c > 0).count() < 2 {
            debug!("single class present, nothing to oversample");
            return Ok(StageOutput::resampled(train.clone()));
        }
        let class = train.minority_class();
        let majority = counts.iter().copied().max().unwrap_or(0);
        let n_new = self.synthetic_count(counts[class], majority);
        if n_new == 0 {
            return Ok(StageOutput::resampled(train.clone()));
        }

        let rows = train.feature_database();
        let labels = train.labels();
        let minority_rows: Vec<usize> = (0..rows.len()).filter(|&i| labels[i] == class).collect();
        let sources = match self.method {
            OversamplingMethod::BorderlineSmote => {
                let danger = self.danger_rows(rows, labels, &minority_rows, class);
                if danger.is_empty() {
                    debug!("no borderline minority rows, using every minority row");
                    minority_rows.clone()
                } else {
                    danger
                }
            }
            OversamplingMethod::Smote | OversamplingMethod::Random => minority_rows.clone(),
        };

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut neighbour_cache: Vec<Option<Vec<usize>>> = vec![None; sources.len()];
        let mut out_rows = rows.to_vec();
        let mut out_labels = labels.to_vec();
        let mut out_subjects = train.subject_ids().to_vec();

        for n in 0..n_new {
            let slot = rng.gen_range(0..sources.len());
            let source = sources[slot];
            let row = match self.method {
                OversamplingMethod::Random => rows[source].clone(),
                OversamplingMethod::Smote | OversamplingMethod::BorderlineSmote => {
                    let nn = neighbour_cache[slot]
                        .get_or_insert_with(|| neighbors::nearest(rows, source, &minority_rows, self.k_neighbors));
                    if nn.is_empty() {
                        rows[source].clone()
                    } else {
                        let partner = &rows[nn[rng.gen_range(0..nn.len())]];
                        let gap: f64 = rng.r#gen();
                        rows[source]
                            .iter()
                            .zip(partner)
                            .map(|(a, b)| a + gap * (b - a))
                            .collect()
                    }
                }
            };
            out_rows.push(row);
            out_labels.push(class);
            out_subjects.push(SubjectId::new(format!(
                "{}#synthetic-{n}",
                train.subject_ids()[source]
            )));
        }

        debug!(class, added = n_new, "minority oversampled");
        Ok(StageOutput::resampled(train.with_rows(out_rows, out_labels, out_subjects)?))
    }
}
