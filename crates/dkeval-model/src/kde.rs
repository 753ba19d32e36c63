//! Per-class Gaussian kernel densities: feature ranking by class overlap and
//! a naive-Bayes style classifier built on the same kernels.

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use dkeval_data::{DataError, DataPackage};

use crate::classifier::{Classifier, Trainer};
use crate::error::ModelError;
use crate::predict::ClassDistribution;

/// A binned Gaussian kernel density over one feature's values.
///
/// The bandwidth is Silverman's rule of thumb and the bins extend three
/// bandwidths past the value range. Bin values are normalized so the peak
/// is 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureKernel {
    bins: Vec<f64>,
    min: f64,
    range: f64,
    sigma: f64,
    bin_margin: usize,
    n_values: usize,
}

impl FeatureKernel {
    /// Number of bins spanning the value range.
    pub const BIN_SIZE: usize = 1000;

    /// Build a kernel over the range of `values` itself.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::EmptyInput`] when `values` is empty.
    pub fn new(values: &[f64]) -> Result<Self, ModelError> {
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Self::with_range(values, min, max)
    }

    /// Build a kernel whose bins span `[min, max]`, typically the range of the
    /// feature across every class.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::EmptyInput`] when `values` is empty.
    pub fn with_range(values: &[f64], min: f64, max: f64) -> Result<Self, ModelError> {
        if values.is_empty() {
            return Err(ModelError::EmptyInput { what: "feature kernel" });
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let sigma = silverman_bandwidth(&sorted);

        let (range, bin_margin) = if max - min == 0.0 {
            (1.0, 1)
        } else {
            let bin_width = (max - min) / Self::BIN_SIZE as f64;
            (max - min, ((3.0 * sigma / bin_width) as usize).max(1))
        };

        let mut kernel = Self {
            bins: vec![0.0; 2 * bin_margin + Self::BIN_SIZE],
            min,
            range,
            sigma,
            bin_margin,
            n_values: sorted.len(),
        };
        let denominator = 2.0 * sigma * sigma;
        let last = kernel.bins.len() as i64 - 1;
        for &x in &sorted {
            let centre = kernel.to_index(x);
            let start = (centre - bin_margin as i64).max(0);
            let end = (centre + bin_margin as i64).min(last);
            for i in start..=end {
                let real = kernel.to_real(i);
                kernel.bins[i as usize] += (-(x - real).powi(2) / denominator).exp();
            }
        }
        let peak = kernel.bins.iter().copied().fold(0.0, f64::max);
        if peak > 0.0 {
            kernel.bins.iter_mut().for_each(|b| *b /= peak);
        }
        Ok(kernel)
    }

    fn to_index(&self, x: f64) -> i64 {
        ((x - self.min) / self.range * Self::BIN_SIZE as f64).floor() as i64 + self.bin_margin as i64
    }

    fn to_real(&self, index: i64) -> f64 {
        (index - self.bin_margin as i64) as f64 / Self::BIN_SIZE as f64 * self.range + self.min
    }

    /// Normalized density at `x`; 0 outside the binned range.
    #[must_use]
    pub fn density_at(&self, x: f64) -> f64 {
        let index = self.to_index(x);
        if index < 0 {
            return 0.0;
        }
        self.bins.get(index as usize).copied().unwrap_or(0.0)
    }

    /// Sample the density at [`FeatureKernel::BIN_SIZE`] evenly spaced points
    /// starting at `min`.
    #[must_use]
    pub fn render(&self, min: f64, max: f64) -> Vec<f64> {
        let step = (max - min) / Self::BIN_SIZE as f64;
        (0..Self::BIN_SIZE).map(|i| self.density_at(min + step * i as f64)).collect()
    }

    /// Area under the binned curve in feature units.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.bins.iter().sum::<f64>() * self.range / Self::BIN_SIZE as f64
    }

    /// Return the kernel bandwidth.
    #[must_use]
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Return the binned density values.
    #[must_use]
    pub fn bins(&self) -> &[f64] {
        &self.bins
    }

    /// Return the number of values the kernel was built from.
    #[must_use]
    pub fn n_values(&self) -> usize {
        self.n_values
    }
}

fn silverman_bandwidth(sorted: &[f64]) -> f64 {
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let sd = (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let last = sorted.len() - 1;
    let q1 = sorted[((n * 0.25) as usize).min(last)];
    let q3 = sorted[((n * 0.75) as usize).min(last)];
    let spread = (sd + f64::EPSILON).min((q3 - q1) / 1.34) + f64::EPSILON;
    0.9 * spread * n.powf(-0.2)
}

/// Class-overlap score of one feature. Lower values separate the classes
/// better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOverlap {
    /// Feature name.
    pub name: String,
    /// Column index in the source package.
    pub index: usize,
    /// Summed pairwise intersection over summed pairwise union of the class
    /// densities, in `[0, 1]`.
    pub ratio: f64,
}

/// Per-class kernels for every feature of a package.
#[derive(Debug, Clone)]
pub struct KernelDensityExtractor {
    classes: Vec<usize>,
    kernels: Vec<Vec<FeatureKernel>>,
    ranges: Vec<(f64, f64)>,
    overlaps: Vec<FeatureOverlap>,
}

impl KernelDensityExtractor {
    /// Build kernels for every (class, feature) pair and rank the features.
    ///
    /// # Errors
    ///
    /// | Variant                                 | When                              |
    /// |-----------------------------------------|-----------------------------------|
    /// | [`ModelError::ZeroFeatures`]            | the package has no features       |
    /// | [`DataError::TooFewClasses`] (wrapped)  | fewer than two classes have rows  |
    #[instrument(skip(data), fields(n_rows = data.row_count(), n_features = data.feature_count()))]
    pub fn new(data: &DataPackage) -> Result<Self, ModelError> {
        if data.feature_count() == 0 {
            return Err(ModelError::ZeroFeatures);
        }
        let classes: Vec<usize> = data
            .class_counts()
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(class, _)| class)
            .collect();
        if classes.len() < 2 {
            return Err(DataError::TooFewClasses { n_classes: classes.len() }.into());
        }

        let rows = data.feature_database();
        let labels = data.labels();
        let names = data.feature_names();

        let per_feature: Vec<(Vec<FeatureKernel>, (f64, f64))> = (0..data.feature_count())
            .into_par_iter()
            .map(|f| -> Result<(Vec<FeatureKernel>, (f64, f64)), ModelError> {
                let (min, max) = rows
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| (lo.min(r[f]), hi.max(r[f])));
                let kernels = classes
                    .iter()
                    .map(|&class| {
                        let values: Vec<f64> = rows
                            .iter()
                            .zip(labels)
                            .filter(|&(_, &l)| l == class)
                            .map(|(r, _)| r[f])
                            .collect();
                        FeatureKernel::with_range(&values, min, max)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((kernels, (min, max)))
            })
            .collect::<Result<_, _>>()?;

        let (kernels, ranges): (Vec<_>, Vec<_>) = per_feature.into_iter().unzip();
        let mut overlaps: Vec<FeatureOverlap> = kernels
            .iter()
            .zip(&ranges)
            .enumerate()
            .map(|(index, (class_kernels, &(min, max)))| FeatureOverlap {
                name: names[index].clone(),
                index,
                ratio: overlap_ratio(class_kernels, min, max),
            })
            .collect();
        overlaps.sort_by(|a, b| a.ratio.total_cmp(&b.ratio).then(a.index.cmp(&b.index)));

        if let Some(best) = overlaps.first() {
            debug!(feature = %best.name, ratio = best.ratio, "lowest class overlap");
        }
        Ok(Self {
            classes,
            kernels,
            ranges,
            overlaps,
        })
    }

    /// Features sorted by ascending overlap ratio.
    #[must_use]
    pub fn overlap_ratios(&self) -> &[FeatureOverlap] {
        &self.overlaps
    }

    /// Names of the `k` least overlapping features, best first.
    #[must_use]
    pub fn top_features(&self, k: usize) -> Vec<String> {
        self.overlaps.iter().take(k).map(|o| o.name.clone()).collect()
    }

    /// Classes with at least one training row.
    #[must_use]
    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    /// Kernel of one class over one feature column.
    #[must_use]
    pub fn kernel(&self, class: usize, feature: usize) -> Option<&FeatureKernel> {
        let slot = self.classes.iter().position(|&c| c == class)?;
        self.kernels.get(feature)?.get(slot)
    }

    /// Value range of one feature over all classes.
    #[must_use]
    pub fn range(&self, feature: usize) -> Option<(f64, f64)> {
        self.ranges.get(feature).copied()
    }
}

fn overlap_ratio(kernels: &[FeatureKernel], min: f64, max: f64) -> f64 {
    let rendered: Vec<Vec<f64>> = kernels.iter().map(|k| k.render(min, max)).collect();
    let mut intersection = 0.0;
    let mut union = 0.0;
    for a in 0..rendered.len() {
        for b in (a + 1)..rendered.len() {
            for (x, y) in rendered[a].iter().zip(&rendered[b]) {
                intersection += x.min(*y);
                union += x.max(*y);
            }
        }
    }
    if union == 0.0 { 1.0 } else { intersection / union }
}

/// Configuration for [`KdeClassifier`].
///
/// # Defaults
///
/// | Parameter       | Default |
/// |-----------------|---------|
/// | `density_floor` | 1e-9    |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KdeConfig {
    density_floor: f64,
}

impl KdeConfig {
    /// Create a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self { density_floor: 1e-9 }
    }

    /// Set the smallest density used in the log-likelihood.
    #[must_use]
    pub fn with_density_floor(mut self, density_floor: f64) -> Self {
        self.density_floor = density_floor;
        self
    }

    /// Return the density floor.
    #[must_use]
    pub fn density_floor(&self) -> f64 {
        self.density_floor
    }
}

impl Default for KdeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Trainer for KdeConfig {
    type Model = KdeClassifier;

    /// # Errors
    ///
    /// | Variant                                | When                             |
    /// |----------------------------------------|----------------------------------|
    /// | [`ModelError::InvalidDensityFloor`]    | floor is not positive and finite |
    /// | [`ModelError::ZeroFeatures`]           | the package has no features      |
    /// | [`DataError::TooFewClasses`] (wrapped) | fewer than two classes have rows |
    #[instrument(skip_all, fields(n_rows = data.row_count()))]
    fn train(&self, data: &DataPackage) -> Result<KdeClassifier, ModelError> {
        if !(self.density_floor.is_finite() && self.density_floor > 0.0) {
            return Err(ModelError::InvalidDensityFloor {
                floor: self.density_floor,
            });
        }
        let extractor = KernelDensityExtractor::new(data)?;
        let counts = data.class_counts();
        let total = data.row_count() as f64;
        let log_priors = extractor
            .classes()
            .iter()
            .map(|&c| (counts[c] as f64 / total).ln())
            .collect();
        let areas = extractor
            .kernels
            .iter()
            .map(|per_class| per_class.iter().map(FeatureKernel::area).collect())
            .collect();
        Ok(KdeClassifier {
            feature_names: data.feature_names(),
            n_classes: data.n_classes(),
            log_priors,
            areas,
            extractor,
            density_floor: self.density_floor,
        })
    }
}

/// Classifier scoring each class by log-prior plus the summed log-densities
/// of the row's features.
#[derive(Debug, Clone)]
pub struct KdeClassifier {
    extractor: KernelDensityExtractor,
    feature_names: Vec<String>,
    n_classes: usize,
    log_priors: Vec<f64>,
    areas: Vec<Vec<f64>>,
    density_floor: f64,
}

impl KdeClassifier {
    /// Borrow the fitted kernels.
    #[must_use]
    pub fn extractor(&self) -> &KernelDensityExtractor {
        &self.extractor
    }

    fn log_likelihood(&self, slot: usize, row: &[f64]) -> f64 {
        row.iter()
            .enumerate()
            .map(|(f, &x)| {
                let kernel = &self.extractor.kernels[f][slot];
                let area = self.areas[f][slot];
                let density = if area > 0.0 { kernel.density_at(x) / area } else { 0.0 };
                density.max(self.density_floor).ln()
            })
            .sum::<f64>()
            + self.log_priors[slot]
    }
}

impl Classifier for KdeClassifier {
    fn evaluate(&self, row: &[f64]) -> Result<ClassDistribution, ModelError> {
        if row.len() != self.feature_names.len() {
            return Err(ModelError::PredictionFeatureMismatch {
                expected: self.feature_names.len(),
                got: row.len(),
            });
        }
        let classes = self.extractor.classes();
        let logs: Vec<f64> = (0..classes.len()).map(|slot| self.log_likelihood(slot, row)).collect();
        let peak = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = logs.iter().map(|l| (l - peak).exp()).collect();
        let total: f64 = weights.iter().sum();

        let mut scores = vec![0.0; self.n_classes];
        for (&class, w) in classes.iter().zip(&weights) {
            scores[class] = w / total;
        }
        Ok(ClassDistribution::from_scores(scores))
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn set_feature_names(&mut self, names: Vec<String>) -> Result<(), ModelError> {
        if names.len() != self.feature_names.len() {
            return Err(ModelError::FeatureNameCountMismatch {
                expected: self.feature_names.len(),
                got: names.len(),
            });
        }
        self.feature_names = names;
        Ok(())
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dkeval_data::Feature;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn package(names: &[&str], rows: Vec<Vec<f64>>, labels: Vec<usize>) -> DataPackage {
        let features = names.iter().enumerate().map(|(i, n)| Feature::continuous(*n, i)).collect();
        DataPackage::without_subjects(features, rows, labels).unwrap()
    }

    /// Feature `signal` separates the classes, feature `noise` does not.
    fn two_class_package(n: usize) -> DataPackage {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut rows = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let label = i % 2;
            let signal = label as f64 * 4.0 + rng.gen_range(-1.0..1.0);
            let noise = rng.gen_range(0.0..1.0);
            rows.push(vec![noise, signal]);
            labels.push(label);
        }
        package(&["noise", "signal"], rows, labels)
    }

    #[test]
    fn kernel_peaks_at_one() {
        let kernel = FeatureKernel::new(&[1.0, 2.0, 2.0, 3.0, 4.0]).unwrap();
        let peak = kernel.bins().iter().copied().fold(0.0, f64::max);
        assert!((peak - 1.0).abs() < 1e-12);
        assert_eq!(kernel.bins().len(), FeatureKernel::BIN_SIZE + 2 * kernel.bin_margin);
        assert!(kernel.sigma() > 0.0);
    }

    #[test]
    fn kernel_density_is_zero_far_away() {
        let kernel = FeatureKernel::new(&[0.0, 1.0, 2.0]).unwrap();
        assert!(kernel.density_at(100.0).abs() < f64::EPSILON);
        assert!(kernel.density_at(-100.0).abs() < f64::EPSILON);
        assert!(kernel.density_at(1.0) > 0.0);
    }

    #[test]
    fn constant_values_build_a_kernel() {
        let kernel = FeatureKernel::new(&[5.0; 8]).unwrap();
        assert!(kernel.density_at(5.0) > 0.0);
        assert_eq!(kernel.render(5.0, 5.0).len(), FeatureKernel::BIN_SIZE);
    }

    #[test]
    fn empty_values_rejected() {
        assert!(matches!(FeatureKernel::new(&[]), Err(ModelError::EmptyInput { .. })));
    }

    #[test]
    fn separating_feature_ranks_first() {
        let data = two_class_package(200);
        let extractor = KernelDensityExtractor::new(&data).unwrap();
        let ratios = extractor.overlap_ratios();
        assert_eq!(ratios[0].name, "signal");
        assert!(ratios[0].ratio < ratios[1].ratio);
        assert!(ratios.iter().all(|o| (0.0..=1.0).contains(&o.ratio)));
        assert_eq!(extractor.top_features(1), vec!["signal".to_string()]);
    }

    #[test]
    fn single_class_rejected() {
        let data = package(&["a"], vec![vec![1.0], vec![2.0]], vec![0, 0]);
        let err = KernelDensityExtractor::new(&data).unwrap_err();
        assert!(matches!(err, ModelError::Data(DataError::TooFewClasses { n_classes: 1 })));
    }

    #[test]
    fn classifier_separates_classes() {
        let data = two_class_package(200);
        let model = KdeConfig::new().train(&data).unwrap();
        let predicted = model.predict_package(&data).unwrap();
        let correct = predicted.iter().zip(data.labels()).filter(|(p, t)| p == t).count();
        assert!(correct as f64 / data.row_count() as f64 > 0.9);

        let d = model.evaluate(&[0.5, 4.0]).unwrap();
        assert_eq!(d.predicted_class(), 1);
        assert!((d.scores().iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn classifier_checks_row_width() {
        let model = KdeConfig::new().train(&two_class_package(20)).unwrap();
        assert!(matches!(
            model.evaluate(&[1.0]),
            Err(ModelError::PredictionFeatureMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn invalid_floor_rejected() {
        let err = KdeConfig::new().with_density_floor(0.0).train(&two_class_package(20)).unwrap_err();
        assert!(matches!(err, ModelError::InvalidDensityFloor { .. }));
    }
}
