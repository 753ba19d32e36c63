//! CSV reader producing a validated [`DataPackage`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use dkeval_data::{DataPackage, Feature, SubjectId};
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::ColumnRoles;

/// Reads a labelled feature table from a CSV file.
///
/// Expected CSV format:
/// - Header row required
/// - One label column and optionally one subject id column, found by name
/// - Every other column is a continuous feature, in header order
///
/// Labels may be any string. Distinct labels are sorted and mapped to class
/// indices `0..n`; the sorted labels become the package's class names.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed CSV record |
/// | [`IoError::MissingColumn`] | Label or subject column absent from the header |
/// | [`IoError::NoFeatures`] | Header has no feature column |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
/// | [`IoError::InconsistentRowLength`] | Row has different column count than header |
/// | [`IoError::NonFiniteValue`] | Feature cell is NaN, Inf, or unparseable |
/// | [`IoError::InvalidDataset`] | Rows fail package validation, e.g. empty subject id |
pub struct CsvReader {
    path: PathBuf,
    roles: ColumnRoles,
}

impl CsvReader {
    /// Create a reader for `path` with the given column roles.
    pub fn new(path: &Path, roles: ColumnRoles) -> Self {
        Self {
            path: path.to_path_buf(),
            roles,
        }
    }

    fn column_index(&self, header: &csv::StringRecord, name: &str) -> Result<usize, IoError> {
        header.iter().position(|h| h == name).ok_or_else(|| IoError::MissingColumn {
            path: self.path.clone(),
            column: name.to_string(),
        })
    }

    fn csv_error(&self, e: csv::Error) -> IoError {
        IoError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        }
    }

    /// Read and validate the CSV file.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<DataPackage, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible(true) lets the row length check below report the row.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let header = rdr.headers().map_err(|e| self.csv_error(e))?.clone();
        let label_col = self.column_index(&header, &self.roles.label)?;
        let subject_col = self
            .roles
            .subject
            .as_deref()
            .map(|name| self.column_index(&header, name))
            .transpose()?;
        let feature_cols: Vec<usize> = (0..header.len())
            .filter(|&c| c != label_col && Some(c) != subject_col)
            .collect();
        if feature_cols.is_empty() {
            return Err(IoError::NoFeatures {
                path: self.path.clone(),
            });
        }
        debug!(n_columns = header.len(), n_features = feature_cols.len(), "read CSV header");

        let mut rows = Vec::new();
        let mut raw_labels = Vec::new();
        let mut subjects = Vec::new();
        for (row_index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| self.csv_error(e))?;
            if record.len() != header.len() {
                return Err(IoError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    expected: header.len(),
                    got: record.len(),
                });
            }

            let mut values = Vec::with_capacity(feature_cols.len());
            for &c in &feature_cols {
                let raw = &record[c];
                match raw.parse::<f64>() {
                    Ok(v) if v.is_finite() => values.push(v),
                    _ => {
                        return Err(IoError::NonFiniteValue {
                            path: self.path.clone(),
                            row_index,
                            column: header[c].to_string(),
                            raw: raw.to_string(),
                        });
                    }
                }
            }
            rows.push(values);
            raw_labels.push(record[label_col].to_string());
            subjects.push(match subject_col {
                Some(c) => SubjectId::new(&record[c]),
                None => SubjectId::new(format!("row-{row_index}")),
            });
        }

        if rows.is_empty() {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        let class_names: Vec<String> = raw_labels.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let class_index: BTreeMap<&str, usize> = class_names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        let labels = raw_labels.iter().map(|l| class_index[l.as_str()]).collect();
        let features = feature_cols
            .iter()
            .enumerate()
            .map(|(i, &c)| Feature::continuous(&header[c], i))
            .collect();

        let package = DataPackage::new(features, rows, labels, subjects)
            .map_err(|source| IoError::InvalidDataset {
                path: self.path.clone(),
                source,
            })?
            .with_class_names(class_names);

        info!(
            n_rows = package.row_count(),
            n_features = package.feature_count(),
            n_subjects = package.distinct_subjects(),
            n_classes = package.n_classes(),
            "dataset loaded"
        );
        Ok(package)
    }
}
