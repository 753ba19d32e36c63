//! Pipeline candidates and the search over pipeline configurations.
//!
//! A [`PipelineCandidate`] is an ordered list of preprocessing [`Stage`]s
//! ending in a [`ModelSpec`]. It is scored by subject-grouped
//! cross-validation: stages are fitted on each training fold only and
//! replayed on its validation fold. The [`PipelineTree`] proposes candidates
//! and learns from their fitness; [`Search`] drives the loop.
//!
//! [`Stage`]: dkeval_stages::Stage

pub mod candidate;
pub mod config;
pub mod error;
pub mod model;
pub mod params;
pub mod search;
pub mod tree;

pub use candidate::{CandidateEvaluation, EvaluationOptions, FoldScore, PipelineCandidate, PipelineStep, TuneOutcome};
pub use config::SearchConfig;
pub use error::PipelineError;
pub use model::{FittedModel, ModelSpec};
pub use params::{Parameter, ParameterSpace, ParameterValue, range_index};
pub use search::{Search, SearchRecord, SearchReport, StopReason};
pub use tree::{Element, Exploration, NodeId, PipelineTree, SearchPath, TreeLimits};
