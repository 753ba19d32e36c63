use std::path::PathBuf;

use dkeval_data::DataError;
use dkeval_model::ModelError;
use dkeval_optim::OptimError;
use dkeval_stages::StageError;

/// Errors from building, evaluating or searching pipelines.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Returned when a step list has no model, or the model is not last.
    #[error("pipeline has no terminal model step: {reason}")]
    EmptyPipeline {
        /// What was wrong with the step list.
        reason: &'static str,
    },

    /// Returned when parsing an unknown model name.
    #[error("unknown model \"{name}\"")]
    UnknownModel {
        /// The unparsed name.
        name: String,
    },

    /// Returned when a search setting is outside its valid range.
    #[error("invalid search setting {field} = {value}")]
    InvalidConfig {
        /// Setting name.
        field: &'static str,
        /// The rejected value, formatted.
        value: String,
    },

    /// Returned when a config file cannot be read.
    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a config file is not valid JSON for [`SearchConfig`](crate::SearchConfig).
    #[error("failed to parse config {path}: {source}")]
    ParseConfig {
        /// File that failed.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Stage configuration or fitting error.
    #[error("stage error: {0}")]
    Stage(#[from] StageError),

    /// Model training or prediction error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Optimizer error.
    #[error("optimizer error: {0}")]
    Optim(#[from] OptimError),

    /// Data package or fold error.
    #[error("data error: {0}")]
    Data(#[from] DataError),
}
