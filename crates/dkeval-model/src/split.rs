use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::node::{FeatureIndex, Impurity};

/// Node impurity used to score candidate splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitCriterion {
    /// Gini impurity `1 - Σ p²`.
    Gini,
    /// Information gain over Shannon entropy `-Σ p ln p`.
    Gain,
}

impl SplitCriterion {
    /// Compute the impurity of a node from its class counts. Empty nodes are pure.
    #[must_use]
    pub fn impurity(&self, class_counts: &[usize], n_samples: usize) -> Impurity {
        if n_samples == 0 {
            return Impurity::new(0.0);
        }
        let n = n_samples as f64;
        let proportions = class_counts.iter().filter(|&&c| c > 0).map(|&c| c as f64 / n);
        let value = match self {
            SplitCriterion::Gini => 1.0 - proportions.map(|p| p * p).sum::<f64>(),
            SplitCriterion::Gain => -proportions.map(|p| p * p.ln()).sum::<f64>(),
        };
        Impurity::new(value)
    }

    /// Stable lowercase name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SplitCriterion::Gini => "gini",
            SplitCriterion::Gain => "gain",
        }
    }
}

/// The best split found for a node.
#[derive(Debug, Clone)]
pub(crate) struct SplitResult {
    pub(crate) feature: FeatureIndex,
    pub(crate) threshold: f64,
    pub(crate) impurity_decrease: f64,
    pub(crate) left_indices: Vec<usize>,
    pub(crate) right_indices: Vec<usize>,
}

/// Inputs shared by every split search of one tree.
pub(crate) struct SplitContext<'a> {
    /// Column-major values: `columns[feature][sample]`.
    pub(crate) columns: &'a [Vec<f64>],
    pub(crate) labels: &'a [usize],
    pub(crate) n_classes: usize,
    pub(crate) criterion: SplitCriterion,
    pub(crate) max_features: usize,
    pub(crate) min_samples_leaf: usize,
}

impl SplitContext<'_> {
    /// Scan a random subset of `max_features` features for the split with the
    /// largest weighted impurity decrease.
    ///
    /// Returns `None` when every candidate feature is constant over the node
    /// or when no boundary leaves `min_samples_leaf` rows on both sides.
    pub(crate) fn best_split(&self, samples: &[usize], rng: &mut impl Rng) -> Option<SplitResult> {
        let n_features = self.columns.len();
        let n_samples = samples.len();
        if n_samples < 2 || n_features == 0 {
            return None;
        }

        let mut parent_counts = vec![0usize; self.n_classes];
        for &s in samples {
            parent_counts[self.labels[s]] += 1;
        }
        let parent = self.criterion.impurity(&parent_counts, n_samples).value();

        let mut order: Vec<usize> = (0..n_features).collect();
        let take = self.max_features.min(n_features);
        for i in 0..take {
            let j = rng.gen_range(i..n_features);
            order.swap(i, j);
        }

        let mut best: Option<(usize, f64, f64)> = None;
        for &feature in &order[..take] {
            let column = &self.columns[feature];
            let mut sorted: Vec<(f64, usize)> = samples.iter().map(|&s| (column[s], s)).collect();
            sorted.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = vec![0usize; self.n_classes];
            let mut right = parent_counts.clone();
            for i in 0..n_samples - 1 {
                let (value, s) = sorted[i];
                left[self.labels[s]] += 1;
                right[self.labels[s]] -= 1;

                let next = sorted[i + 1].0;
                let n_left = i + 1;
                let n_right = n_samples - n_left;
                if value == next || n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }

                let decrease = n_samples as f64 * parent
                    - n_left as f64 * self.criterion.impurity(&left, n_left).value()
                    - n_right as f64 * self.criterion.impurity(&right, n_right).value();
                if best.is_none_or(|(_, _, d)| decrease > d) {
                    best = Some((feature, (value + next) / 2.0, decrease));
                }
            }
        }

        let (feature, threshold, impurity_decrease) = best?;
        let column = &self.columns[feature];
        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) =
            samples.iter().copied().partition(|&s| column[s] <= threshold);
        Some(SplitResult {
            feature: FeatureIndex::new(feature),
            threshold,
            impurity_decrease,
            left_indices,
            right_indices,
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn context<'a>(columns: &'a [Vec<f64>], labels: &'a [usize], min_leaf: usize) -> SplitContext<'a> {
        SplitContext {
            columns,
            labels,
            n_classes: 2,
            criterion: SplitCriterion::Gini,
            max_features: columns.len(),
            min_samples_leaf: min_leaf,
        }
    }

    #[test]
    fn gini_values() {
        assert!(SplitCriterion::Gini.impurity(&[6, 0], 6).is_pure());
        assert!((SplitCriterion::Gini.impurity(&[3, 3], 6).value() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn gain_uses_natural_log() {
        let imp = SplitCriterion::Gain.impurity(&[4, 4], 8);
        assert!((imp.value() - 2.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn finds_the_separating_feature() {
        let columns = vec![vec![0.3, 0.1, 0.2, 0.4], vec![1.0, 2.0, 8.0, 9.0]];
        let labels = vec![0, 0, 1, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let split = context(&columns, &labels, 1).best_split(&[0, 1, 2, 3], &mut rng).unwrap();
        assert_eq!(split.feature.index(), 1);
        assert!((split.threshold - 5.0).abs() < 1e-12);
        assert_eq!(split.left_indices, vec![0, 1]);
        assert_eq!(split.right_indices, vec![2, 3]);
    }

    #[test]
    fn constant_columns_have_no_split() {
        let columns = vec![vec![2.0; 4]];
        let labels = vec![0, 1, 0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(context(&columns, &labels, 1).best_split(&[0, 1, 2, 3], &mut rng).is_none());
    }

    #[test]
    fn leaf_minimum_blocks_split() {
        let columns = vec![vec![0.0, 1.0, 2.0]];
        let labels = vec![0, 1, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(context(&columns, &labels, 2).best_split(&[0, 1, 2], &mut rng).is_none());
    }
}
