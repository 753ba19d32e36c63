//! Confusion matrices and the classification measures derived from them.
//!
//! Every rate whose denominator is zero is reported as 0.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dkeval_data::DataPackage;

use crate::classifier::Classifier;
use crate::error::ModelError;

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 { 0.0 } else { numerator / denominator }
}

/// One point in ROC space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    /// False positive rate.
    pub fpr: f64,
    /// True positive rate.
    pub tpr: f64,
}

/// Binary confusion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// True positives.
    pub tp: usize,
    /// False positives.
    pub fp: usize,
    /// True negatives.
    pub tn: usize,
    /// False negatives.
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// Create a matrix from its four counts.
    #[must_use]
    pub fn new(tp: usize, fp: usize, tn: usize, fn_: usize) -> Self {
        Self { tp, fp, tn, fn_ }
    }

    /// Count outcomes treating `positive` as the positive class.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::PredictionCountMismatch`] when the slices differ in length.
    pub fn from_predictions(truth: &[usize], predicted: &[usize], positive: usize) -> Result<Self, ModelError> {
        if truth.len() != predicted.len() {
            return Err(ModelError::PredictionCountMismatch {
                truth: truth.len(),
                predicted: predicted.len(),
            });
        }
        let mut cm = Self::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t == positive, p == positive) {
                (true, true) => cm.tp += 1,
                (false, true) => cm.fp += 1,
                (false, false) => cm.tn += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        Ok(cm)
    }

    /// Total number of counted rows.
    #[must_use]
    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    /// TP / (TP + FP).
    #[must_use]
    pub fn precision(&self) -> f64 {
        ratio(self.tp as f64, (self.tp + self.fp) as f64)
    }

    /// TP / (TP + FN).
    #[must_use]
    pub fn recall(&self) -> f64 {
        ratio(self.tp as f64, (self.tp + self.fn_) as f64)
    }

    /// Alias for [`ConfusionMatrix::recall`].
    #[must_use]
    pub fn sensitivity(&self) -> f64 {
        self.recall()
    }

    /// TN / (TN + FP).
    #[must_use]
    pub fn specificity(&self) -> f64 {
        ratio(self.tn as f64, (self.tn + self.fp) as f64)
    }

    /// TN / (TN + FN).
    #[must_use]
    pub fn npv(&self) -> f64 {
        ratio(self.tn as f64, (self.tn + self.fn_) as f64)
    }

    /// (TP + TN) / total.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        ratio((self.tp + self.tn) as f64, self.total() as f64)
    }

    /// F1 score.
    #[must_use]
    pub fn f_score(&self) -> f64 {
        self.f_beta(1.0)
    }

    /// General F-beta score; 0 when precision and recall are both 0.
    #[must_use]
    pub fn f_beta(&self, beta: f64) -> f64 {
        let p = self.precision();
        let r = self.recall();
        let b2 = beta * beta;
        ratio((1.0 + b2) * p * r, b2 * p + r)
    }

    /// (FPR, TPR) of this matrix.
    #[must_use]
    pub fn roc(&self) -> RocPoint {
        RocPoint {
            fpr: ratio(self.fp as f64, (self.fp + self.tn) as f64),
            tpr: self.recall(),
        }
    }

    /// Euclidean distance from the ROC point to (0, 1). Lower is better.
    #[must_use]
    pub fn roc_distance(&self) -> f64 {
        let RocPoint { fpr, tpr } = self.roc();
        ((1.0 - tpr).powi(2) + fpr.powi(2)).sqrt()
    }

    /// Area under the single-point ROC curve.
    #[must_use]
    pub fn auc(&self) -> f64 {
        let RocPoint { fpr, tpr } = self.roc();
        fpr * tpr / 2.0 + (1.0 - fpr) * tpr + (1.0 - fpr) * (1.0 - tpr) / 2.0
    }

    /// Matthews correlation coefficient in [-1, 1].
    #[must_use]
    pub fn mcc(&self) -> f64 {
        let (tp, fp, tn, fn_) = (self.tp as f64, self.fp as f64, self.tn as f64, self.fn_ as f64);
        let denominator = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        ratio(tp * tn - fp * fn_, denominator)
    }

    /// Value of one measure on this matrix.
    #[must_use]
    pub fn measure(&self, measure: Measure) -> f64 {
        match measure {
            Measure::Auc => self.auc(),
            Measure::Accuracy => self.accuracy(),
            Measure::Sensitivity => self.sensitivity(),
            Measure::Specificity => self.specificity(),
            Measure::Ppv => self.precision(),
            Measure::Npv => self.npv(),
            Measure::Mcc => self.mcc(),
            Measure::RocDistance => self.roc_distance(),
            Measure::FScore => self.f_score(),
        }
    }
}

impl AddAssign for ConfusionMatrix {
    fn add_assign(&mut self, other: Self) {
        self.tp += other.tp;
        self.fp += other.fp;
        self.tn += other.tn;
        self.fn_ += other.fn_;
    }
}

/// Square multi-class confusion matrix, `matrix[true][predicted]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConfusion {
    matrix: Vec<Vec<usize>>,
}

impl ClassConfusion {
    /// Count true against predicted labels over `n_classes` classes.
    ///
    /// # Errors
    ///
    /// | Variant                                  | When                             |
    /// |------------------------------------------|----------------------------------|
    /// | [`ModelError::EmptyInput`]               | no labels                        |
    /// | [`ModelError::PredictionCountMismatch`]  | slices differ in length          |
    /// | [`ModelError::LabelOutOfRange`]          | a label is `>= n_classes`        |
    pub fn from_labels(truth: &[usize], predicted: &[usize], n_classes: usize) -> Result<Self, ModelError> {
        if truth.is_empty() {
            return Err(ModelError::EmptyInput { what: "confusion matrix" });
        }
        if truth.len() != predicted.len() {
            return Err(ModelError::PredictionCountMismatch {
                truth: truth.len(),
                predicted: predicted.len(),
            });
        }
        let mut matrix = vec![vec![0usize; n_classes]; n_classes];
        for (&t, &p) in truth.iter().zip(predicted) {
            if let Some(&label) = [t, p].iter().find(|&&l| l >= n_classes) {
                return Err(ModelError::LabelOutOfRange { label, n_classes });
            }
            matrix[t][p] += 1;
        }
        Ok(Self { matrix })
    }

    /// Evaluate `model` on every row of `data` and count the outcomes.
    ///
    /// # Errors
    ///
    /// Propagates prediction errors and the errors of [`ClassConfusion::from_labels`].
    pub fn from_model(model: &dyn Classifier, data: &DataPackage) -> Result<Self, ModelError> {
        let predicted = model.predict_package(data)?;
        let n_classes = data.n_classes().max(model.n_classes());
        Self::from_labels(data.labels(), &predicted, n_classes)
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.matrix.len()
    }

    /// Return the matrix rows.
    #[must_use]
    pub fn as_rows(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    /// Binary counts of `class` against all other classes.
    #[must_use]
    pub fn one_vs_rest(&self, class: usize) -> ConfusionMatrix {
        let n = self.n_classes();
        let mut cm = ConfusionMatrix::default();
        for t in 0..n {
            for p in 0..n {
                let count = self.matrix[t][p];
                match (t == class, p == class) {
                    (true, true) => cm.tp += count,
                    (false, true) => cm.fp += count,
                    (false, false) => cm.tn += count,
                    (true, false) => cm.fn_ += count,
                }
            }
        }
        cm
    }

    /// Overall fraction of correct predictions.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..self.n_classes()).map(|i| self.matrix[i][i]).sum();
        let total: usize = self.matrix.iter().flatten().sum();
        ratio(correct as f64, total as f64)
    }
}

impl fmt::Display for ClassConfusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for j in 0..self.n_classes() {
            write!(f, " pred_{j:>3}")?;
        }
        writeln!(f)?;
        for (i, row) in self.matrix.iter().enumerate() {
            write!(f, "true_{i:>3}")?;
            for value in row {
                write!(f, " {value:>8}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A classification measure used as an optimization target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Measure {
    /// Single-point ROC area.
    Auc,
    /// Fraction correct.
    Accuracy,
    /// True positive rate.
    Sensitivity,
    /// True negative rate.
    Specificity,
    /// Positive predictive value (precision).
    Ppv,
    /// Negative predictive value.
    Npv,
    /// Matthews correlation coefficient.
    Mcc,
    /// Distance to the ideal ROC point.
    RocDistance,
    /// F1 score.
    FScore,
}

impl Measure {
    /// Every measure, in report order.
    pub const ALL: [Measure; 9] = [
        Measure::Auc,
        Measure::Accuracy,
        Measure::Sensitivity,
        Measure::Specificity,
        Measure::Ppv,
        Measure::Npv,
        Measure::Mcc,
        Measure::RocDistance,
        Measure::FScore,
    ];

    /// Stable kebab-case name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Measure::Auc => "auc",
            Measure::Accuracy => "accuracy",
            Measure::Sensitivity => "sensitivity",
            Measure::Specificity => "specificity",
            Measure::Ppv => "ppv",
            Measure::Npv => "npv",
            Measure::Mcc => "mcc",
            Measure::RocDistance => "roc-distance",
            Measure::FScore => "f-score",
        }
    }

    /// `true` when smaller raw values are better.
    #[must_use]
    pub fn lower_is_better(self) -> bool {
        matches!(self, Measure::RocDistance)
    }

    /// Map a raw value onto `[0, 1]` with higher meaning better.
    #[must_use]
    pub fn fitness(self, value: f64) -> f64 {
        let mapped = match self {
            Measure::RocDistance => 1.0 - value / std::f64::consts::SQRT_2,
            Measure::Mcc => (value + 1.0) / 2.0,
            _ => value,
        };
        mapped.clamp(0.0, 1.0)
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Measure {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Measure::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| ModelError::UnknownMeasure { name: s.to_string() })
    }
}

/// Every measure of a multi-class confusion matrix.
///
/// Two-class problems are scored with class 1 as positive. With more classes
/// each measure is the root mean square of its one-vs-rest values, except
/// accuracy, which is the overall fraction correct, and MCC, which is
/// computed once from the one-vs-rest counts summed over every class.
#[derive(Debug, Clone)]
pub struct ConfusionMatrixAnalytics {
    confusion: ClassConfusion,
    per_class: Vec<ConfusionMatrix>,
}

impl ConfusionMatrixAnalytics {
    /// Wrap a class confusion matrix.
    #[must_use]
    pub fn new(confusion: ClassConfusion) -> Self {
        let per_class = (0..confusion.n_classes()).map(|c| confusion.one_vs_rest(c)).collect();
        Self { confusion, per_class }
    }

    /// Score `model` on `data`.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`ClassConfusion::from_model`].
    pub fn evaluate(model: &dyn Classifier, data: &DataPackage) -> Result<Self, ModelError> {
        Ok(Self::new(ClassConfusion::from_model(model, data)?))
    }

    /// Borrow the underlying matrix.
    #[must_use]
    pub fn confusion(&self) -> &ClassConfusion {
        &self.confusion
    }

    /// Binary counts used for two-class reporting, or class 0 vs rest
    /// otherwise.
    #[must_use]
    pub fn binary(&self) -> ConfusionMatrix {
        match self.per_class.len() {
            2 => self.per_class[1],
            0 => ConfusionMatrix::default(),
            _ => self.per_class[0],
        }
    }

    fn combine(&self, f: impl Fn(&ConfusionMatrix) -> f64) -> f64 {
        match self.per_class.len() {
            0 => 0.0,
            1 => f(&self.per_class[0]),
            2 => f(&self.per_class[1]),
            n => (self.per_class.iter().map(|cm| f(cm).powi(2)).sum::<f64>() / n as f64).sqrt(),
        }
    }

    fn pooled(&self) -> ConfusionMatrix {
        let mut total = ConfusionMatrix::default();
        for cm in &self.per_class {
            total += *cm;
        }
        total
    }

    /// Value of one measure.
    #[must_use]
    pub fn value(&self, measure: Measure) -> f64 {
        match measure {
            Measure::Accuracy => self.confusion.accuracy(),
            Measure::Mcc if self.per_class.len() > 2 => self.pooled().mcc(),
            m => self.combine(|cm| cm.measure(m)),
        }
    }

    /// [`Measure::fitness`] of [`ConfusionMatrixAnalytics::value`].
    #[must_use]
    pub fn fitness(&self, measure: Measure) -> f64 {
        measure.fitness(self.value(measure))
    }

    /// Distance to the ideal ROC point.
    #[must_use]
    pub fn roc_distance(&self) -> f64 {
        self.value(Measure::RocDistance)
    }

    /// F-beta score.
    #[must_use]
    pub fn f_score(&self, beta: f64) -> f64 {
        self.combine(|cm| cm.f_beta(beta))
    }

    /// Every measure by name, including F0.5, F1 and F2.
    #[must_use]
    pub fn all_values(&self) -> BTreeMap<String, f64> {
        let mut values: BTreeMap<String, f64> = Measure::ALL
            .into_iter()
            .filter(|&m| m != Measure::FScore)
            .map(|m| (m.name().to_string(), self.value(m)))
            .collect();
        values.insert("f0.5".to_string(), self.f_score(0.5));
        values.insert("f1".to_string(), self.f_score(1.0));
        values.insert("f2".to_string(), self.f_score(2.0));
        values
    }
}
