//! Classifiers and classification analytics.
//!
//! Provides CART decision trees, random forests with bagging variants and
//! out-of-bag tree selection, kernel density feature ranking with a
//! density-based classifier, and confusion-matrix analytics. Every model
//! plugs into the [`Classifier`] and [`Trainer`] traits.

mod analytics;
mod classifier;
mod config;
mod error;
mod forest;
mod importance;
mod kde;
mod node;
mod oob;
mod predict;
mod result;
mod split;
mod tree;

pub use analytics::{ClassConfusion, ConfusionMatrix, ConfusionMatrixAnalytics, Measure, RocPoint};
pub use classifier::{Classifier, Trainer};
pub use config::{Aggregation, Bagging, MaxFeatures, OobMode, RandomForestConfig, TreeSelection};
pub use error::ModelError;
pub use forest::RandomForestModel;
pub use importance::RankedFeature;
pub use kde::{FeatureKernel, FeatureOverlap, KdeClassifier, KdeConfig, KernelDensityExtractor};
pub use node::{FeatureIndex, Impurity, Node, NodeIndex};
pub use oob::OobScore;
pub use predict::ClassDistribution;
pub use result::ForestFit;
pub use split::SplitCriterion;
pub use tree::{DecisionTreeConfig, DecisionTreeModel};
