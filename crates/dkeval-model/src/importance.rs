//! Feature importance aggregation across trees.

use serde::Serialize;

/// A feature with its normalized importance and 1-based rank.
#[derive(Debug, Clone, Serialize)]
pub struct RankedFeature {
    /// Feature name.
    pub name: String,
    /// Normalized importance (sums to 1.0 across features).
    pub importance: f64,
    /// 1 = most important.
    pub rank: usize,
}

/// Sum per-tree importances, normalize, and rank in descending order.
pub(crate) fn aggregate_importances(per_tree: &[Vec<f64>], names: &[String]) -> Vec<RankedFeature> {
    if per_tree.is_empty() || names.is_empty() {
        return vec![];
    }
    let mut totals = vec![0.0f64; names.len()];
    for importances in per_tree {
        for (total, value) in totals.iter_mut().zip(importances) {
            *total += value;
        }
    }
    let sum: f64 = totals.iter().sum();
    if sum > 0.0 {
        totals.iter_mut().for_each(|v| *v /= sum);
    }

    let mut ranked: Vec<RankedFeature> = names
        .iter()
        .zip(totals)
        .map(|(name, importance)| RankedFeature {
            name: name.clone(),
            importance,
            rank: 0,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    for (i, feature) in ranked.iter_mut().enumerate() {
        feature.rank = i + 1;
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_summed_importance() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = aggregate_importances(&[vec![0.1, 0.9, 0.0], vec![0.5, 0.5, 0.0]], &names);
        assert_eq!(ranked[0].name, "b");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].name, "c");
        let total: f64 = ranked.iter().map(|f| f.importance).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
}
