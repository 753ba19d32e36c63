//! Tabular clinical data: the feature store and patient-grouped folds.
//!
//! A [`DataPackage`] owns a row-major matrix of finite values, one class
//! label and one [`SubjectId`] per row. [`PatientFoldGenerator`] partitions a
//! package so that no subject appears on both sides of a fold.

mod error;
mod feature;
mod fold;
mod package;

pub use error::DataError;
pub use feature::{Feature, FeatureKind, SubjectId};
pub use fold::{Fold, Folds, PatientFoldGenerator};
pub use package::DataPackage;
