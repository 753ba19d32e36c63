//! Class distributions and ensemble prediction.

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::config::Aggregation;
use crate::error::ModelError;
use crate::forest::RandomForestModel;

/// A predicted class together with one score per class.
///
/// Scores are probabilities for trees, forests and kernel-density models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDistribution {
    predicted: usize,
    scores: Vec<f64>,
}

impl ClassDistribution {
    /// Build from per-class scores. The arg-max wins; ties go to the lower class.
    #[must_use]
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let mut predicted = 0;
        for (class, &score) in scores.iter().enumerate() {
            if score > scores[predicted] {
                predicted = class;
            }
        }
        Self { predicted, scores }
    }

    /// Build from per-class vote counts, normalized to fractions.
    #[must_use]
    pub fn from_votes(votes: &[usize]) -> Self {
        let total = votes.iter().sum::<usize>().max(1) as f64;
        Self::from_scores(votes.iter().map(|&v| v as f64 / total).collect())
    }

    /// Return the predicted class.
    #[must_use]
    pub fn predicted_class(&self) -> usize {
        self.predicted
    }

    /// Return the per-class scores.
    #[must_use]
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// Return the score of one class, 0 when out of range.
    #[must_use]
    pub fn score(&self, class: usize) -> f64 {
        self.scores.get(class).copied().unwrap_or(0.0)
    }
}

impl RandomForestModel {
    /// Combine the trees' outputs for one row under the forest's aggregation.
    pub(crate) fn aggregate(&self, row: &[f64]) -> Result<ClassDistribution, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::EmptyForest);
        }
        match self.aggregation {
            Aggregation::MajorityVote => {
                let mut votes = vec![0usize; self.n_classes];
                for tree in &self.trees {
                    votes[tree.predict(row)?] += 1;
                }
                Ok(ClassDistribution::from_votes(&votes))
            }
            Aggregation::AverageProbability => {
                let mut mean = vec![0.0f64; self.n_classes];
                for tree in &self.trees {
                    for (class, p) in tree.evaluate(row)?.scores().iter().enumerate() {
                        mean[class] += p;
                    }
                }
                let n = self.trees.len() as f64;
                mean.iter_mut().for_each(|v| *v /= n);
                Ok(ClassDistribution::from_scores(mean))
            }
        }
    }

    /// Predict the class of every row in parallel.
    ///
    /// # Errors
    ///
    /// | Variant                                   | When                         |
    /// |-------------------------------------------|------------------------------|
    /// | [`ModelError::EmptyForest`]               | the forest holds no trees    |
    /// | [`ModelError::PredictionFeatureMismatch`] | a row has the wrong width    |
    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<usize>, ModelError> {
        rows.par_iter()
            .map(|row| self.aggregate(row).map(|d| d.predicted_class()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_go_to_lower_class() {
        let d = ClassDistribution::from_scores(vec![0.4, 0.4, 0.2]);
        assert_eq!(d.predicted_class(), 0);
        let d = ClassDistribution::from_votes(&[1, 3, 3]);
        assert_eq!(d.predicted_class(), 1);
    }

    #[test]
    fn votes_normalize() {
        let d = ClassDistribution::from_votes(&[1, 3]);
        assert!((d.score(1) - 0.75).abs() < 1e-12);
        assert!(d.score(5).abs() < f64::EPSILON);
    }
}
