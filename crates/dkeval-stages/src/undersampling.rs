//! Majority-class undersampling.

use rand::SeedableRng;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use dkeval_data::DataPackage;

use crate::error::StageError;
use crate::neighbors;
use crate::stage::{Preprocessor, StageOutput};

const STAGE: &str = "undersampling";

/// Which rows are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UndersamplingMethod {
    /// Reduce every larger class to the minority count at random.
    Random,
    /// Remove the larger-class member of every Tomek link.
    TomekLink,
}

/// Configuration for the undersampling stage.
///
/// # Defaults
///
/// | Parameter | Default  |
/// |-----------|----------|
/// | `method`  | `Random` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndersamplingConfig {
    method: UndersamplingMethod,
}

impl UndersamplingConfig {
    /// Create a config with the given method.
    #[must_use]
    pub fn new(method: UndersamplingMethod) -> Self {
        Self { method }
    }

    /// Return the method.
    #[must_use]
    pub fn method(&self) -> UndersamplingMethod {
        self.method
    }

    fn random_keep(data: &DataPackage, seed: u64) -> Vec<usize> {
        let labels = data.labels();
        let counts = data.class_counts();
        let target = counts[data.minority_class()];
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut keep = Vec::new();
        for (class, &count) in counts.iter().enumerate() {
            let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
            if count <= target {
                keep.extend(members);
            } else {
                keep.extend(index::sample(&mut rng, count, target).into_iter().map(|k| members[k]));
            }
        }
        keep.sort_unstable();
        keep
    }

    /// Pairs of mutual nearest neighbours with different labels; the member of
    /// the larger class is dropped, both are kept on equal class counts.
    fn tomek_keep(data: &DataPackage) -> Vec<usize> {
        let rows = data.feature_database();
        let labels = data.labels();
        let counts = data.class_counts();
        let all: Vec<usize> = (0..rows.len()).collect();
        let nearest: Vec<Option<usize>> = all
            .iter()
            .map(|&i| neighbors::nearest(rows, i, &all, 1).first().copied())
            .collect();

        let mut drop = vec![false; rows.len()];
        for i in 0..rows.len() {
            let Some(j) = nearest[i] else { continue };
            if i < j && labels[i] != labels[j] && nearest[j] == Some(i) {
                match counts[labels[i]].cmp(&counts[labels[j]]) {
                    std::cmp::Ordering::Greater => drop[i] = true,
                    std::cmp::Ordering::Less => drop[j] = true,
                    std::cmp::Ordering::Equal => {}
                }
            }
        }
        all.into_iter().filter(|&i| !drop[i]).collect()
    }
}

impl Default for UndersamplingConfig {
    fn default() -> Self {
        Self::new(UndersamplingMethod::Random)
    }
}

impl Preprocessor for UndersamplingConfig {
    fn name(&self) -> &'static str {
        STAGE
    }

    #[instrument(skip_all, fields(method = ?self.method, n_rows = train.row_count()))]
    fn run(&self, train: &DataPackage, seed: u64) -> Result<StageOutput, StageError> {
        let keep = match self.method {
            UndersamplingMethod::Random => Self::random_keep(train, seed),
            UndersamplingMethod::TomekLink => Self::tomek_keep(train),
        };
        if keep.len() == train.row_count() {
            return Ok(StageOutput::resampled(train.clone()));
        }
        debug!(removed = train.row_count() - keep.len(), "rows undersampled");
        Ok(StageOutput::resampled(train.select_rows(&keep)?))
    }
}
