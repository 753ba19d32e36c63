//! Preprocessing stages for fold-wise pipelines.
//!
//! Every stage is fitted on a training package and returns a
//! [`FittedTransform`] that is replayed unchanged on the matching validation
//! package. [`DataOptimizer`] is a read-only redundancy analysis.

mod data_optimizer;
mod error;
mod feature_selection;
mod isolation_forest;
mod neighbors;
mod oversampling;
mod pca;
mod stage;
mod stats;
mod undersampling;

pub use data_optimizer::DataOptimizer;
pub use error::StageError;
pub use feature_selection::{FeatureScore, FeatureSelectionConfig};
pub use isolation_forest::IsolationForestConfig;
pub use oversampling::{OversamplingAmount, OversamplingConfig, OversamplingMethod};
pub use pca::{ComponentSelection, PcaConfig, Projection};
pub use stage::{FittedTransform, Preprocessor, Stage, StageKind, StageOutput};
pub use undersampling::{UndersamplingConfig, UndersamplingMethod};
