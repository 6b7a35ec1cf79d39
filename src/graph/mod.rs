//! Symbolic layer graph.
//!
//! A [`Graph`] is an append-only list of [`Node`]s. Applying a [`Layer`] to one
//! or more [`SymbolicTensor`]s validates shapes immediately and returns a handle
//! to the new node's output, so graph code reads like a chain of calls:
//!
//! ```rust
//! use briny_resnet::graph::{ActivationKind, Conv2d, Graph, Layer};
//!
//! let mut g = Graph::new();
//! let x = g.input([8, 8, 3])?;
//! let y = g.apply_named(Layer::Conv2d(Conv2d::new(4, (3, 3))), "conv", &[&x])?;
//! let y = g.apply(Layer::Activation(ActivationKind::ReLU), &[&y])?;
//! assert_eq!(y.shape(), &[6, 6, 4]);
//! # Ok::<(), briny_resnet::GraphError>(())
//! ```
//!
//! Nodes are stored in creation order, which is also a valid evaluation order.

mod activation;
mod init;
mod layer;

pub use self::activation::ActivationKind;
pub use self::init::{fans, Initializer};
pub use self::layer::{BatchNorm, Conv2d, Dense, Layer, Padding, ParamSlot, Pool2d};

use crate::error::{GraphError, Result};
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::HashMap;
use tracing::debug;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);

/// Handle to the output of a graph node.
///
/// Only the per-sample shape is tracked; the batch axis is left open until
/// the model is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolicTensor {
    graph: u64,
    id: usize,
    shape: Vec<usize>,
}

impl SymbolicTensor {
    /// Index of the producing node.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Per-sample shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Size of the last axis (channels for images).
    #[must_use]
    pub fn channels(&self) -> usize {
        self.shape.last().copied().unwrap_or_default()
    }
}

/// A layer applied to specific inputs.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    layer: Layer,
    inputs: Vec<usize>,
    shape: Vec<usize>,
}

impl Node {
    /// Unique layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layer configuration.
    #[must_use]
    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Ids of the nodes feeding this one, in argument order.
    #[must_use]
    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    /// Per-sample output shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

/// Append-only layer graph.
#[derive(Debug)]
pub struct Graph {
    id: u64,
    nodes: Vec<Node>,
    names: HashMap<String, usize>,
    counters: HashMap<&'static str, usize>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// An empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            names: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    /// Declares an input of the given per-sample shape.
    ///
    /// # Errors
    /// Fails for an empty shape or a zero extent.
    pub fn input(&mut self, shape: impl Into<Vec<usize>>) -> Result<SymbolicTensor> {
        self.push(Layer::Input { shape: shape.into() }, None, &[])
    }

    /// Applies `layer` under an auto-generated name.
    ///
    /// # Errors
    /// See [`Layer::output_shape`]; also [`GraphError::ForeignTensor`].
    pub fn apply(&mut self, layer: Layer, inputs: &[&SymbolicTensor]) -> Result<SymbolicTensor> {
        self.push(layer, None, inputs)
    }

    /// Applies `layer` under an explicit, unique name.
    ///
    /// # Errors
    /// As [`Graph::apply`], plus [`GraphError::DuplicateName`].
    pub fn apply_named(
        &mut self,
        layer: Layer,
        name: &str,
        inputs: &[&SymbolicTensor],
    ) -> Result<SymbolicTensor> {
        self.push(layer, Some(name), inputs)
    }

    /// Element-wise sum of same-shaped tensors.
    ///
    /// # Errors
    /// [`GraphError::ShapeMismatch`] when the shapes differ.
    pub fn add(&mut self, inputs: &[&SymbolicTensor]) -> Result<SymbolicTensor> {
        self.push(Layer::Add, None, inputs)
    }

    fn push(
        &mut self,
        layer: Layer,
        name: Option<&str>,
        inputs: &[&SymbolicTensor],
    ) -> Result<SymbolicTensor> {
        for t in inputs {
            self.check(t)?;
        }

        let (name, counter) = match name {
            Some(name) if self.names.contains_key(name) => {
                return Err(GraphError::DuplicateName(name.to_owned()));
            }
            Some(name) => (name.to_owned(), None),
            None => {
                let (name, n) = self.fresh_name(layer.kind());
                (name, Some(n))
            }
        };

        let shapes: Vec<&[usize]> = inputs.iter().map(|t| t.shape()).collect();
        let shape = layer.output_shape(&name, &shapes)?;

        // auto-name counters only advance for layers that made it in
        if let Some(n) = counter {
            self.counters.insert(layer.kind(), n);
        }
        let id = self.nodes.len();
        debug!(layer = %name, kind = layer.kind(), ?shape, "node added");
        self.names.insert(name.clone(), id);
        self.nodes.push(Node {
            name,
            layer,
            inputs: inputs.iter().map(|t| t.id).collect(),
            shape: shape.clone(),
        });

        Ok(SymbolicTensor {
            graph: self.id,
            id,
            shape,
        })
    }

    fn fresh_name(&self, kind: &'static str) -> (String, usize) {
        let mut n = self.counters.get(kind).copied().unwrap_or_default();
        loop {
            n += 1;
            let candidate = format!("{kind}_{n}");
            if !self.names.contains_key(&candidate) {
                return (candidate, n);
            }
        }
    }

    /// Verifies that `t` was produced by this graph.
    ///
    /// # Errors
    /// [`GraphError::ForeignTensor`] otherwise.
    pub fn check(&self, t: &SymbolicTensor) -> Result<()> {
        if t.graph == self.id && t.id < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::ForeignTensor(t.id))
        }
    }

    /// All nodes in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node by id.
    #[must_use]
    pub fn node(&self, id: usize) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Node id by layer name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has been added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of every node `output` depends on (itself included), ascending.
    #[must_use]
    pub fn ancestors(&self, output: usize) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![output];
        while let Some(id) = stack.pop() {
            if id >= seen.len() || seen[id] {
                continue;
            }
            seen[id] = true;
            stack.extend_from_slice(&self.nodes[id].inputs);
        }
        seen.iter()
            .enumerate()
            .filter_map(|(id, &hit)| hit.then_some(id))
            .collect()
    }
}
