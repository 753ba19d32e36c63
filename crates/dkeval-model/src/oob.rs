//! Out-of-bag (OOB) scoring.

use crate::error::ModelError;
use crate::predict::ClassDistribution;
use crate::tree::DecisionTreeModel;

/// Out-of-bag result of a trained ensemble.
#[derive(Debug, Clone)]
pub struct OobScore {
    /// Fraction of OOB-evaluated rows whose majority vote was correct.
    pub accuracy: f64,
    /// Rows that were out of bag for at least one kept tree.
    pub n_oob_samples: usize,
}

/// Accuracy of one tree on its own out-of-bag rows. 0 when it has none.
pub(crate) fn tree_oob_accuracy(
    tree: &DecisionTreeModel,
    rows: &[Vec<f64>],
    labels: &[usize],
    oob: &[usize],
) -> Result<f64, ModelError> {
    if oob.is_empty() {
        return Ok(0.0);
    }
    let mut correct = 0usize;
    for &i in oob {
        if tree.predict(&rows[i])? == labels[i] {
            correct += 1;
        }
    }
    Ok(correct as f64 / oob.len() as f64)
}

/// Majority-vote accuracy where each row is judged only by trees that did
/// not see it during training.
pub(crate) fn compute_oob(
    trees: &[DecisionTreeModel],
    rows: &[Vec<f64>],
    labels: &[usize],
    n_classes: usize,
    oob_per_tree: &[Vec<usize>],
) -> Result<OobScore, ModelError> {
    let mut votes = vec![vec![0usize; n_classes]; rows.len()];
    let mut has_oob = vec![false; rows.len()];
    for (tree, oob) in trees.iter().zip(oob_per_tree) {
        for &i in oob {
            votes[i][tree.predict(&rows[i])?] += 1;
            has_oob[i] = true;
        }
    }

    let n_oob_samples = has_oob.iter().filter(|&&h| h).count();
    if n_oob_samples == 0 {
        return Err(ModelError::OobEvaluationFailed {
            reason: "no row is out of bag for any kept tree".to_string(),
        });
    }
    let correct = votes
        .iter()
        .enumerate()
        .filter(|&(i, v)| has_oob[i] && ClassDistribution::from_votes(v).predicted_class() == labels[i])
        .count();

    Ok(OobScore {
        accuracy: correct as f64 / n_oob_samples as f64,
        n_oob_samples,
    })
}
