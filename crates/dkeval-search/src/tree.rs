//! The pipeline search tree.
//!
//! Edges are "apply stage X" or "choose model Y". Children are created on
//! first visit; model edges are terminal. Node statistics live behind one
//! [`parking_lot::Mutex`], so sampling and fitness reporting from worker
//! threads are serialized.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use dkeval_stages::{Stage, StageKind};

use crate::candidate::PipelineCandidate;
use crate::error::PipelineError;
use crate::model::ModelSpec;

/// Fitness assumed for children that were never scored.
const OPTIMISTIC_PRIOR: f64 = 1.0;

/// How a child edge is drawn during [`PipelineTree::random_path`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Exploration {
    /// Every eligible child is equally likely.
    Uniform,
    /// Children weighted by `exp(mean_fitness / temperature)`; unvisited
    /// children use an optimistic mean of 1.
    Softmax {
        /// Softmax temperature; smaller is greedier.
        temperature: f64,
    },
}

impl Default for Exploration {
    fn default() -> Self {
        Exploration::Softmax { temperature: 0.1 }
    }
}

/// What an edge into a node chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Element {
    /// Apply a stage family.
    Stage(StageKind),
    /// Choose the model at this catalog index.
    Model(usize),
}

/// Arena index of a tree node.
pub type NodeId = usize;

#[derive(Debug, Clone)]
struct TreeNode {
    element: Option<Element>,
    depth: usize,
    pool: Vec<StageKind>,
    oversampling: usize,
    undersampling: usize,
    children: Option<Vec<NodeId>>,
    visits: usize,
    fitness_sum: f64,
}

impl TreeNode {
    fn mean_fitness(&self) -> Option<f64> {
        (self.visits > 0).then(|| self.fitness_sum / self.visits as f64)
    }

    fn is_terminal(&self) -> bool {
        matches!(self.element, Some(Element::Model(_)))
    }
}

#[derive(Debug)]
struct TreeState {
    nodes: Vec<TreeNode>,
    rng: ChaCha8Rng,
}

/// A root-to-terminal walk through the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPath {
    nodes: Vec<NodeId>,
    elements: Vec<Element>,
}

impl SearchPath {
    /// Nodes visited after the root.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Edge choices in order; the last is always a model.
    #[must_use]
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Stage families on the path.
    #[must_use]
    pub fn stages(&self) -> Vec<StageKind> {
        self.elements
            .iter()
            .filter_map(|e| match e {
                Element::Stage(kind) => Some(*kind),
                Element::Model(_) => None,
            })
            .collect()
    }
}

/// Limits on the tree's shape.
///
/// # Defaults
///
/// | Parameter         | Default  |
/// |-------------------|----------|
/// | `max_depth`       | 3        |
/// | `max_repetitions` | 2        |
/// | `exploration`     | softmax, temperature 0.1 |
/// | `seed`            | 42       |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeLimits {
    /// Most stages on one path.
    pub max_depth: usize,
    /// Most uses of oversampling, and of undersampling, on one path.
    pub max_repetitions: usize,
    /// Child selection policy.
    pub exploration: Exploration,
    /// Sampling seed.
    pub seed: u64,
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_repetitions: 2,
            exploration: Exploration::default(),
            seed: 42,
        }
    }
}

/// A lazily expanded tree of pipeline configurations.
#[derive(Debug)]
pub struct PipelineTree {
    models: Vec<ModelSpec>,
    n_features: usize,
    limits: TreeLimits,
    state: Mutex<TreeState>,
}

impl PipelineTree {
    /// Create a tree over the given stage and model catalogs. Stages are
    /// materialized with their defaults for a package of `n_features`
    /// columns.
    ///
    /// # Errors
    ///
    /// | Variant                          | When                                 |
    /// |----------------------------------|--------------------------------------|
    /// | [`PipelineError::EmptyPipeline`] | `models` is empty                    |
    /// | [`PipelineError::InvalidConfig`] | softmax temperature is not positive  |
    pub fn new(
        stages: &[StageKind],
        models: Vec<ModelSpec>,
        n_features: usize,
        limits: TreeLimits,
    ) -> Result<Self, PipelineError> {
        if models.is_empty() {
            return Err(PipelineError::EmptyPipeline {
                reason: "model catalog is empty",
            });
        }
        if let Exploration::Softmax { temperature } = limits.exploration
            && !(temperature.is_finite() && temperature > 0.0)
        {
            return Err(PipelineError::InvalidConfig {
                field: "temperature",
                value: temperature.to_string(),
            });
        }
        let mut pool: Vec<StageKind> = stages.to_vec();
        pool.sort_unstable();
        pool.dedup();
        let root = TreeNode {
            element: None,
            depth: 0,
            pool,
            oversampling: 0,
            undersampling: 0,
            children: None,
            visits: 0,
            fitness_sum: 0.0,
        };
        Ok(Self {
            models,
            n_features,
            limits,
            state: Mutex::new(TreeState {
                nodes: vec![root],
                rng: ChaCha8Rng::seed_from_u64(limits.seed),
            }),
        })
    }

    /// The model catalog.
    #[must_use]
    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Return the shape limits.
    #[must_use]
    pub fn limits(&self) -> TreeLimits {
        self.limits
    }

    /// Nodes created so far, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Visits recorded at the root.
    #[must_use]
    pub fn total_visits(&self) -> usize {
        self.state.lock().nodes[0].visits
    }

    /// Mean recorded fitness of a node, `None` if never scored.
    #[must_use]
    pub fn mean_fitness(&self, node: NodeId) -> Option<f64> {
        self.state.lock().nodes.get(node).and_then(TreeNode::mean_fitness)
    }

    /// Walk from the root to a model terminal and build its candidate.
    #[must_use]
    pub fn random_path(&self) -> (SearchPath, PipelineCandidate) {
        let mut state = self.state.lock();
        let mut path = SearchPath {
            nodes: Vec::new(),
            elements: Vec::new(),
        };
        let mut current = 0;
        loop {
            let children = self.expand(&mut state, current);
            let next = self.choose(&mut state, &children);
            let node = &state.nodes[next];
            let element = node.element.unwrap_or(Element::Model(0));
            path.nodes.push(next);
            path.elements.push(element);
            if node.is_terminal() {
                break;
            }
            current = next;
        }
        drop(state);
        trace!(elements = ?path.elements, "path sampled");
        let candidate = self.materialize(&path);
        (path, candidate)
    }

    /// Add `fitness` to the statistics of every node on `path` and the root.
    pub fn record_fitness(&self, path: &SearchPath, fitness: f64) {
        let mut state = self.state.lock();
        for &id in std::iter::once(&0).chain(&path.nodes) {
            if let Some(node) = state.nodes.get_mut(id) {
                node.visits += 1;
                node.fitness_sum += fitness;
            }
        }
    }

    /// Build the candidate a path describes.
    #[must_use]
    pub fn materialize(&self, path: &SearchPath) -> PipelineCandidate {
        let stages = path
            .stages()
            .into_iter()
            .map(|kind| Stage::default_for(kind, self.n_features))
            .collect();
        let model = match path.elements.last() {
            Some(Element::Model(i)) => self.models.get(*i),
            _ => None,
        }
        .unwrap_or(&self.models[0])
        .clone();
        PipelineCandidate::new(stages, model)
    }

    fn expand(&self, state: &mut TreeState, id: NodeId) -> Vec<NodeId> {
        if let Some(children) = &state.nodes[id].children {
            return children.clone();
        }
        let parent = state.nodes[id].clone();
        let mut created = Vec::new();
        if parent.depth < self.limits.max_depth {
            for &kind in &parent.pool {
                if kind == StageKind::Oversampling && parent.element == Some(Element::Stage(StageKind::Oversampling)) {
                    continue;
                }
                created.push(self.stage_child(&parent, kind));
            }
        }
        for m in 0..self.models.len() {
            created.push(TreeNode {
                element: Some(Element::Model(m)),
                depth: parent.depth + 1,
                pool: Vec::new(),
                oversampling: parent.oversampling,
                undersampling: parent.undersampling,
                children: Some(Vec::new()),
                visits: 0,
                fitness_sum: 0.0,
            });
        }
        let first = state.nodes.len();
        let ids: Vec<NodeId> = (first..first + created.len()).collect();
        state.nodes.extend(created);
        state.nodes[id].children = Some(ids.clone());
        ids
    }

    fn stage_child(&self, parent: &TreeNode, kind: StageKind) -> TreeNode {
        let mut oversampling = parent.oversampling;
        let mut undersampling = parent.undersampling;
        let keep = match kind {
            StageKind::Oversampling => {
                oversampling += 1;
                oversampling < self.limits.max_repetitions
            }
            StageKind::Undersampling => {
                undersampling += 1;
                undersampling < self.limits.max_repetitions
            }
            _ => false,
        };
        let pool = parent
            .pool
            .iter()
            .copied()
            .filter(|&k| if k == kind { keep } else { true })
            .filter(|&k| match kind {
                StageKind::FeatureSelection => k != StageKind::Pca,
                StageKind::Pca => k != StageKind::FeatureSelection,
                _ => true,
            })
            .collect();
        TreeNode {
            element: Some(Element::Stage(kind)),
            depth: parent.depth + 1,
            pool,
            oversampling,
            undersampling,
            children: None,
            visits: 0,
            fitness_sum: 0.0,
        }
    }

    fn choose(&self, state: &mut TreeState, children: &[NodeId]) -> NodeId {
        match self.limits.exploration {
            Exploration::Uniform => children[state.rng.gen_range(0..children.len())],
            Exploration::Softmax { temperature } => {
                let scores: Vec<f64> = children
                    .iter()
                    .map(|&c| state.nodes[c].mean_fitness().unwrap_or(OPTIMISTIC_PRIOR))
                    .collect();
                let top = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let weights: Vec<f64> = scores.iter().map(|s| ((s - top) / temperature).exp()).collect();
                let total: f64 = weights.iter().sum();
                let mut target = state.rng.r#gen::<f64>() * total;
                for (i, w) in weights.iter().enumerate() {
                    if target < *w {
                        return children[i];
                    }
                    target -= w;
                }
                children[children.len() - 1]
            }
        }
    }
}
