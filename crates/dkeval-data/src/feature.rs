use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic kind of a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureKind {
    /// Real-valued measurement.
    Continuous,
    /// Encoded category (stored as a number, compared by equality).
    Categorical,
}

/// A named column of a [`DataPackage`](crate::DataPackage).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Feature {
    name: String,
    kind: FeatureKind,
    column: usize,
}

impl Feature {
    /// Create a continuous feature at the given column.
    #[must_use]
    pub fn continuous(name: impl Into<String>, column: usize) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Continuous,
            column,
        }
    }

    /// Create a categorical feature at the given column.
    #[must_use]
    pub fn categorical(name: impl Into<String>, column: usize) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Categorical,
            column,
        }
    }

    /// Return the unique feature name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the semantic kind.
    #[must_use]
    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    /// Return the zero-based column index into the row matrix.
    #[must_use]
    pub fn column(&self) -> usize {
        self.column
    }

    pub(crate) fn with_column(&self, column: usize) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            column,
        }
    }
}

/// Identifier of the patient (subject) a row belongs to.
///
/// All rows sharing a subject id are kept in the same fold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a subject id. Emptiness is checked when the package is built.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
