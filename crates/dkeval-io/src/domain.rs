//! Domain types for dkeval-io.

use std::fmt;
use std::str::FromStr;

use crate::IoError;

/// A validated experiment name used as the report file prefix.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentName(String);

impl ExperimentName {
    /// Parse and validate an experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidExperimentName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, IoError> {
        let name = name.into();
        let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(IoError::InvalidExperimentName { name });
        }
        Ok(Self(name))
    }

    /// Return the experiment name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name `{experiment}_{kind}.json`.
    #[must_use]
    pub fn report_file(&self, kind: &str) -> String {
        format!("{}_{kind}.json", self.0)
    }
}

impl FromStr for ExperimentName {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which header columns carry the label and the subject id. Every other
/// column is a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRoles {
    /// Label column name.
    pub label: String,
    /// Subject id column; each row is its own subject when absent.
    pub subject: Option<String>,
}

impl ColumnRoles {
    /// Roles with only a label column.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            subject: None,
        }
    }

    /// Name the subject id column.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}
