use dkeval_data::DataError;

/// Errors from fitting or applying a preprocessing stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Returned when a matrix cannot support the requested decomposition.
    /// Recovered per fold by skipping the stage.
    #[error("{stage}: degenerate matrix: {reason}")]
    DegenerateMatrix {
        /// Stage that hit the condition.
        stage: &'static str,
        /// What made the matrix degenerate.
        reason: String,
    },

    /// Returned when a stage parameter is outside its valid range.
    #[error("{stage}: invalid {parameter} = {value}")]
    InvalidParameter {
        /// Stage the parameter belongs to.
        stage: &'static str,
        /// Parameter name.
        parameter: &'static str,
        /// The rejected value, formatted.
        value: String,
    },

    /// Returned when a fitted projection is applied to a package whose
    /// schema differs from the one it was fitted on.
    #[error("projection fitted on {expected:?}, applied to {got:?}")]
    SchemaMismatch {
        /// Feature names seen while fitting.
        expected: Vec<String>,
        /// Feature names of the package the transform was applied to.
        got: Vec<String>,
    },

    /// Returned when parsing an unknown stage name.
    #[error("unknown stage \"{name}\"")]
    UnknownStage {
        /// The unparsed name.
        name: String,
    },

    /// Data package error.
    #[error("data error: {0}")]
    Data(#[from] DataError),
}
