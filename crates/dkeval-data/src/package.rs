//! The tabular store: feature schema, row matrix, labels and subject ids.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::DataError;
use crate::feature::{Feature, SubjectId};

/// An in-memory tabular dataset.
///
/// Rows are stored row-major: `feature_database()[row][column]`. Labels are
/// zero-based class indices. Every row carries the [`SubjectId`] of the
/// patient it was measured on.
///
/// Every subsetting operation returns an independent copy. A stage that
/// transforms a package therefore never aliases the caller's data.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPackage {
    features: Vec<Feature>,
    rows: Vec<Vec<f64>>,
    labels: Vec<usize>,
    subject_ids: Vec<SubjectId>,
    class_names: Vec<String>,
}

impl DataPackage {
    /// Build a package from a schema, a row-major matrix, labels and subject ids.
    ///
    /// Feature columns are re-indexed to their position in `features`.
    ///
    /// # Errors
    ///
    /// | Variant                               | When                                      |
    /// |---------------------------------------|-------------------------------------------|
    /// | [`DataError::EmptyDataset`]           | `rows` is empty                           |
    /// | [`DataError::LengthMismatch`]         | rows, labels and subject ids differ       |
    /// | [`DataError::DuplicateFeature`]       | two features share a name                 |
    /// | [`DataError::FeatureCountMismatch`]   | a row length differs from the schema      |
    /// | [`DataError::NonFiniteValue`]         | any value is NaN or infinite              |
    /// | [`DataError::EmptySubjectId`]         | a subject id is the empty string          |
    pub fn new(
        features: Vec<Feature>,
        rows: Vec<Vec<f64>>,
        labels: Vec<usize>,
        subject_ids: Vec<SubjectId>,
    ) -> Result<Self, DataError> {
        let features: Vec<Feature> = features
            .iter()
            .enumerate()
            .map(|(i, f)| f.with_column(i))
            .collect();
        validate(&features, &rows, &labels, &subject_ids)?;
        Ok(Self {
            features,
            rows,
            labels,
            subject_ids,
            class_names: Vec::new(),
        })
    }

    /// Build a package of continuous features from plain column names.
    ///
    /// # Errors
    ///
    /// Same as [`DataPackage::new`].
    pub fn from_names<S: AsRef<str>>(
        names: &[S],
        rows: Vec<Vec<f64>>,
        labels: Vec<usize>,
        subject_ids: Vec<SubjectId>,
    ) -> Result<Self, DataError> {
        let features = names
            .iter()
            .enumerate()
            .map(|(i, n)| Feature::continuous(n.as_ref(), i))
            .collect();
        Self::new(features, rows, labels, subject_ids)
    }

    /// Build a package where every row is its own subject (`row-<index>`).
    ///
    /// # Errors
    ///
    /// Same as [`DataPackage::new`].
    pub fn without_subjects(
        features: Vec<Feature>,
        rows: Vec<Vec<f64>>,
        labels: Vec<usize>,
    ) -> Result<Self, DataError> {
        let subject_ids = (0..rows.len())
            .map(|i| SubjectId::new(format!("row-{i}")))
            .collect();
        Self::new(features, rows, labels, subject_ids)
    }

    /// Attach human-readable class names (index = class label).
    #[must_use]
    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    /// Build a new package with the same schema and class names but new rows.
    ///
    /// Used by resampling stages that add or drop rows.
    ///
    /// # Errors
    ///
    /// Same as [`DataPackage::new`].
    pub fn with_rows(
        &self,
        rows: Vec<Vec<f64>>,
        labels: Vec<usize>,
        subject_ids: Vec<SubjectId>,
    ) -> Result<Self, DataError> {
        validate(&self.features, &rows, &labels, &subject_ids)?;
        Ok(Self {
            features: self.features.clone(),
            rows,
            labels,
            subject_ids,
            class_names: self.class_names.clone(),
        })
    }

    /// Build a new package with a replaced schema over the same rows' labels
    /// and subjects.
    ///
    /// Used by projections that change feature identity.
    ///
    /// # Errors
    ///
    /// Same as [`DataPackage::new`].
    pub fn with_schema(&self, features: Vec<Feature>, rows: Vec<Vec<f64>>) -> Result<Self, DataError> {
        let features: Vec<Feature> = features
            .iter()
            .enumerate()
            .map(|(i, f)| f.with_column(i))
            .collect();
        validate(&features, &rows, &self.labels, &self.subject_ids)?;
        Ok(Self {
            features,
            rows,
            labels: self.labels.clone(),
            subject_ids: self.subject_ids.clone(),
            class_names: self.class_names.clone(),
        })
    }

    // --- Schema ---

    /// Return the number of feature columns.
    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Return the feature schema in column order.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Return the feature names in column order.
    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name().to_string()).collect()
    }

    /// Return the column index of a named feature.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnknownFeature`] if `name` is not in the schema.
    pub fn feature_index(&self, name: &str) -> Result<usize, DataError> {
        self.features
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| DataError::UnknownFeature {
                name: name.to_string(),
            })
    }

    /// Return a copy of one feature column.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnknownFeature`] if `name` is not in the schema.
    pub fn feature_column(&self, name: &str) -> Result<Vec<f64>, DataError> {
        let col = self.feature_index(name)?;
        Ok(self.rows.iter().map(|row| row[col]).collect())
    }

    // --- Matrix ---

    /// Return the full row-major matrix.
    #[must_use]
    pub fn feature_database(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Return mutable row slices. Row lengths cannot change through them.
    pub fn feature_database_mut(&mut self) -> impl Iterator<Item = &mut [f64]> {
        self.rows.iter_mut().map(Vec::as_mut_slice)
    }

    /// Return one row, or `None` when out of range.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Return the number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Return a new package restricted to `names`, in the requested order.
    ///
    /// The source package is never modified.
    ///
    /// # Errors
    ///
    /// | Variant                          | When                               |
    /// |----------------------------------|------------------------------------|
    /// | [`DataError::UnknownFeature`]    | any name is absent                 |
    /// | [`DataError::DuplicateFeature`]  | `names` repeats a name             |
    pub fn feature_database_subset<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, DataError> {
        let columns = self.resolve_columns(names)?;
        let features = columns
            .iter()
            .enumerate()
            .map(|(i, &c)| self.features[c].with_column(i))
            .collect();
        let rows = self.project_columns(&columns);
        Ok(Self {
            features,
            rows,
            labels: self.labels.clone(),
            subject_ids: self.subject_ids.clone(),
            class_names: self.class_names.clone(),
        })
    }

    /// Copy the values and names of a feature subset without building a package.
    ///
    /// # Errors
    ///
    /// Same as [`DataPackage::feature_database_subset`].
    pub fn feature_values_subset<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<(Vec<Vec<f64>>, Vec<String>), DataError> {
        let columns = self.resolve_columns(names)?;
        let out_names = columns
            .iter()
            .map(|&c| self.features[c].name().to_string())
            .collect();
        Ok((self.project_columns(&columns), out_names))
    }

    /// Return a new package containing the given rows, in the given order.
    ///
    /// # Errors
    ///
    /// | Variant                         | When                        |
    /// |---------------------------------|-----------------------------|
    /// | [`DataError::EmptyDataset`]     | `indices` is empty          |
    /// | [`DataError::RowOutOfRange`]    | any index is out of range   |
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self, DataError> {
        if indices.is_empty() {
            return Err(DataError::EmptyDataset);
        }
        let row_count = self.rows.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= row_count) {
            return Err(DataError::RowOutOfRange { index, row_count });
        }
        Ok(Self {
            features: self.features.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            subject_ids: indices.iter().map(|&i| self.subject_ids[i].clone()).collect(),
            class_names: self.class_names.clone(),
        })
    }

    /// Remove one row in place.
    ///
    /// # Errors
    ///
    /// | Variant                         | When                                 |
    /// |---------------------------------|--------------------------------------|
    /// | [`DataError::RowOutOfRange`]    | `index >= row_count()`               |
    /// | [`DataError::EmptyDataset`]     | the row is the last one remaining    |
    pub fn remove_row(&mut self, index: usize) -> Result<(), DataError> {
        let row_count = self.rows.len();
        if index >= row_count {
            return Err(DataError::RowOutOfRange { index, row_count });
        }
        if row_count == 1 {
            return Err(DataError::EmptyDataset);
        }
        self.rows.remove(index);
        self.labels.remove(index);
        self.subject_ids.remove(index);
        Ok(())
    }

    /// Remove one feature column in place and re-index the remaining columns.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::UnknownFeature`] if `name` is not in the schema.
    pub fn remove_feature(&mut self, name: &str) -> Result<(), DataError> {
        let col = self.feature_index(name)?;
        self.features.remove(col);
        self.features = self
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| f.with_column(i))
            .collect();
        for row in &mut self.rows {
            row.remove(col);
        }
        debug!(feature = name, remaining = self.features.len(), "feature removed");
        Ok(())
    }

    // --- Labels and subjects ---

    /// Return the class label of every row.
    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Return the subject id of every row.
    #[must_use]
    pub fn subject_ids(&self) -> &[SubjectId] {
        &self.subject_ids
    }

    /// Return the class names, empty when none were attached.
    #[must_use]
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Return the number of classes: the larger of the attached class names
    /// and the highest label plus one.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        let from_labels = self.labels.iter().max().map_or(0, |&m| m + 1);
        from_labels.max(self.class_names.len())
    }

    /// Return the number of rows per class, indexed by class label.
    #[must_use]
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_classes()];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }

    /// Return the present class with the fewest rows (lowest index on ties).
    #[must_use]
    pub fn minority_class(&self) -> usize {
        self.class_counts()
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0)
            .min_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(&b.0)))
            .map_or(0, |(class, _)| class)
    }

    /// Return the class with the most rows (lowest index on ties).
    #[must_use]
    pub fn majority_class(&self) -> usize {
        self.class_counts()
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map_or(0, |(class, _)| class)
    }

    /// Return the number of distinct subjects.
    #[must_use]
    pub fn distinct_subjects(&self) -> usize {
        self.subject_ids.iter().collect::<HashSet<_>>().len()
    }

    /// Group row indices by subject, in first-appearance order.
    #[must_use]
    pub fn subject_groups(&self) -> Vec<(SubjectId, Vec<usize>)> {
        let mut position: HashMap<&SubjectId, usize> = HashMap::new();
        let mut groups: Vec<(SubjectId, Vec<usize>)> = Vec::new();
        for (row, subject) in self.subject_ids.iter().enumerate() {
            match position.get(subject) {
                Some(&g) => groups[g].1.push(row),
                None => {
                    position.insert(subject, groups.len());
                    groups.push((subject.clone(), vec![row]));
                }
            }
        }
        groups
    }

    fn resolve_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>, DataError> {
        let mut seen = HashSet::new();
        names
            .iter()
            .map(|n| {
                let name = n.as_ref();
                if !seen.insert(name) {
                    return Err(DataError::DuplicateFeature {
                        name: name.to_string(),
                    });
                }
                self.feature_index(name)
            })
            .collect()
    }

    fn project_columns(&self, columns: &[usize]) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| columns.iter().map(|&c| row[c]).collect())
            .collect()
    }
}

fn validate(
    features: &[Feature],
    rows: &[Vec<f64>],
    labels: &[usize],
    subject_ids: &[SubjectId],
) -> Result<(), DataError> {
    if rows.is_empty() {
        return Err(DataError::EmptyDataset);
    }
    if rows.len() != labels.len() || rows.len() != subject_ids.len() {
        return Err(DataError::LengthMismatch {
            rows: rows.len(),
            labels: labels.len(),
            subjects: subject_ids.len(),
        });
    }

    let mut names = HashSet::new();
    for f in features {
        if !names.insert(f.name()) {
            return Err(DataError::DuplicateFeature {
                name: f.name().to_string(),
            });
        }
    }

    let expected = features.len();
    for (row_index, row) in rows.iter().enumerate() {
        if row.len() != expected {
            return Err(DataError::FeatureCountMismatch {
                expected,
                got: row.len(),
                row_index,
            });
        }
        if let Some(feature_index) = row.iter().position(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValue {
                row_index,
                feature_index,
            });
        }
    }

    if let Some(row_index) = subject_ids.iter().position(|s| s.as_str().is_empty()) {
        return Err(DataError::EmptySubjectId { row_index });
    }

    Ok(())
}
