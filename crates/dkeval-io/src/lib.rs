//! CSV ingestion and JSON reports for dkeval.

mod domain;
mod error;
mod reader;
mod writer;

pub use domain::{ColumnRoles, ExperimentName};
pub use error::IoError;
pub use reader::CsvReader;
pub use writer::ReportWriter;
