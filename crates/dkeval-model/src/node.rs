use std::fmt;

/// Zero-based feature column index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct FeatureIndex(usize);

impl FeatureIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based feature column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Position of a node in a tree's `Vec<Node>` arena. The root is always 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// The root of every tree.
    pub const ROOT: NodeIndex = NodeIndex(0);

    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Impurity of a node under the tree's split criterion.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Impurity(f64);

impl Impurity {
    pub(crate) fn new(value: f64) -> Self {
        Self(value)
    }

    /// Return the raw impurity value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Return `true` when the node holds a single class.
    #[must_use]
    pub fn is_pure(self) -> bool {
        self.0 <= 0.0
    }
}

/// A node of a [`DecisionTreeModel`](crate::DecisionTreeModel) arena.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Node {
    /// Interior node. Rows with `row[feature] <= threshold` descend left.
    Split {
        /// Feature tested by this node.
        feature: FeatureIndex,
        /// Split threshold.
        threshold: f64,
        /// Left child.
        left: NodeIndex,
        /// Right child.
        right: NodeIndex,
        /// Impurity before the split.
        impurity: Impurity,
        /// Training rows that reached the node.
        n_samples: usize,
        /// Sample-weighted impurity decrease achieved by the split.
        impurity_decrease: f64,
    },
    /// Terminal node.
    Leaf {
        /// Majority class of the rows in the leaf.
        prediction: usize,
        /// Class frequencies in the leaf, summing to 1.
        distribution: Vec<f64>,
        /// Impurity of the leaf.
        impurity: Impurity,
        /// Training rows in the leaf.
        n_samples: usize,
    },
}

impl Node {
    /// Return the impurity at this node.
    #[must_use]
    pub fn impurity(&self) -> Impurity {
        match self {
            Node::Split { impurity, .. } | Node::Leaf { impurity, .. } => *impurity,
        }
    }

    /// Return the number of training rows that reached this node.
    #[must_use]
    pub fn n_samples(&self) -> usize {
        match self {
            Node::Split { n_samples, .. } | Node::Leaf { n_samples, .. } => *n_samples,
        }
    }

    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Return the children of a split node.
    #[must_use]
    pub fn children(&self) -> Option<(NodeIndex, NodeIndex)> {
        match self {
            Node::Split { left, right, .. } => Some((*left, *right)),
            Node::Leaf { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_display() {
        assert_eq!(format!("{}", FeatureIndex::new(3)), "f3");
        assert_eq!(format!("{}", NodeIndex::ROOT), "#0");
    }

    #[test]
    fn purity() {
        assert!(Impurity::new(0.0).is_pure());
        assert!(!Impurity::new(0.25).is_pure());
    }

    #[test]
    fn split_children() {
        let node = Node::Split {
            feature: FeatureIndex::new(1),
            threshold: 0.5,
            left: NodeIndex::new(1),
            right: NodeIndex::new(4),
            impurity: Impurity::new(0.5),
            n_samples: 12,
            impurity_decrease: 3.0,
        };
        assert_eq!(node.children(), Some((NodeIndex::new(1), NodeIndex::new(4))));
        assert_eq!(node.n_samples(), 12);
        assert!(!node.is_leaf());
    }

    #[test]
    fn leaf_has_no_children() {
        let node = Node::Leaf {
            prediction: 0,
            distribution: vec![1.0, 0.0],
            impurity: Impurity::new(0.0),
            n_samples: 4,
        };
        assert!(node.is_leaf());
        assert!(node.children().is_none());
        assert!(node.impurity().is_pure());
    }
}
