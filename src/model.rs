//! Assembled models: a graph, its designated input and output, and the
//! materialised parameters.
//!
//! # Lifecycle
//!
//! 1. Build a [`Graph`] with symbolic tensors.
//! 2. [`Model::new`] prunes it to the nodes the output needs, checks that
//!    they only depend on the chosen input, and initializes every parameter.
//! 3. Inspect it ([`Model::summary`], [`Model::count_params`], ...), swap
//!    weights with [`Model::set_weights`], or evaluate it with
//!    [`Model::predict`].

use crate::error::{GraphError, Result};
use crate::graph::{Graph, Layer, Node, SymbolicTensor};
use crate::ops::dispatch;
use crate::tensors::Tensor;
use core::fmt;
use tracing::{info, trace};

/// A materialised parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Slot name within its layer (`kernel`, `bias`, `gamma`, ...).
    pub name: &'static str,
    /// Current value.
    pub value: Tensor<f32>,
    /// Whether an optimizer would update it.
    pub trainable: bool,
}

/// One row of a model summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    /// Layer name.
    pub name: String,
    /// Layer type (`Conv2D`, `Add`, ...).
    pub class: &'static str,
    /// Per-sample output shape.
    pub output_shape: Vec<usize>,
    /// Parameter count.
    pub params: usize,
    /// Names of the feeding layers.
    pub inputs: Vec<String>,
}

/// Trainable graph with designated input and output.
#[derive(Debug)]
pub struct Model {
    name: String,
    graph: Graph,
    input: usize,
    output: usize,
    order: Vec<usize>,
    params: Vec<Vec<Parameter>>,
    threads: Option<usize>,
}

impl Model {
    /// Assembles a model computing `output` from `input`.
    ///
    /// Nodes the output does not depend on are left out. Parameters are drawn
    /// from each slot's initializer; the slot's position in evaluation order is
    /// its random stream, so seeded initializers give reproducible models.
    ///
    /// # Errors
    /// - [`GraphError::ForeignTensor`] if a handle belongs to another graph.
    /// - [`GraphError::InvalidArgument`] if `input` is not an input layer.
    /// - [`GraphError::Disconnected`] if `output` does not depend on `input`, or
    ///   depends on another input as well.
    pub fn new(
        graph: Graph,
        input: &SymbolicTensor,
        output: &SymbolicTensor,
        name: impl Into<String>,
    ) -> Result<Self> {
        graph.check(input)?;
        graph.check(output)?;

        let input_node = &graph.nodes()[input.id()];
        if !matches!(input_node.layer(), Layer::Input { .. }) {
            return Err(GraphError::invalid(
                input_node.name(),
                "model input must be an input layer",
            ));
        }

        let order = graph.ancestors(output.id());
        let feeds_only_from_input = order.iter().all(|&id| {
            id == input.id() || !matches!(graph.nodes()[id].layer(), Layer::Input { .. })
        });
        if !order.contains(&input.id()) || !feeds_only_from_input {
            return Err(GraphError::Disconnected {
                input: input_node.name().to_owned(),
                output: graph.nodes()[output.id()].name().to_owned(),
            });
        }

        let mut params = vec![Vec::new(); graph.len()];
        let mut stream = 0u64;
        for &id in &order {
            let node = &graph.nodes()[id];
            let shapes: Vec<&[usize]> = node
                .inputs()
                .iter()
                .map(|&i| graph.nodes()[i].shape())
                .collect();
            params[id] = node
                .layer()
                .param_slots(&shapes)
                .into_iter()
                .map(|slot| {
                    let value = slot.initializer.sample(&slot.shape, stream);
                    stream += 1;
                    Parameter {
                        name: slot.name,
                        value,
                        trainable: slot.trainable,
                    }
                })
                .collect();
        }

        let model = Self {
            name: name.into(),
            graph,
            input: input.id(),
            output: output.id(),
            order,
            params,
            threads: None,
        };
        info!(
            model = %model.name,
            layers = model.len(),
            params = model.count_params(),
            trainable = model.trainable_params(),
            "model assembled"
        );
        Ok(model)
    }

    /// Runs [`Model::predict`] on a dedicated pool of `threads` workers
    /// instead of the global rayon pool.
    #[must_use]
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    /// Model name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-sample input shape.
    #[must_use]
    pub fn input_shape(&self) -> &[usize] {
        self.graph.nodes()[self.input].shape()
    }

    /// Per-sample output shape.
    #[must_use]
    pub fn output_shape(&self) -> &[usize] {
        self.graph.nodes()[self.output].shape()
    }

    /// Number of layers, the input layer included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always `false`: a model holds at least its input layer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Layers in evaluation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().map(|&id| &self.graph.nodes()[id])
    }

    /// Looks a layer up by name.
    #[must_use]
    pub fn layer(&self, name: &str) -> Option<&Node> {
        self.node_id(name).map(|id| &self.graph.nodes()[id])
    }

    fn node_id(&self, name: &str) -> Option<usize> {
        self.graph
            .find(name)
            .filter(|id| self.order.binary_search(id).is_ok())
    }

    /// Summary rows in evaluation order.
    #[must_use]
    pub fn layers(&self) -> Vec<LayerInfo> {
        self.order
            .iter()
            .map(|&id| {
                let node = &self.graph.nodes()[id];
                LayerInfo {
                    name: node.name().to_owned(),
                    class: node.layer().class_name(),
                    output_shape: node.shape().to_vec(),
                    params: self.params[id].iter().map(|p| p.value.len()).sum(),
                    inputs: node
                        .inputs()
                        .iter()
                        .map(|&i| self.graph.nodes()[i].name().to_owned())
                        .collect(),
                }
            })
            .collect()
    }

    fn params_where(&self, keep: impl Fn(&Parameter) -> bool) -> usize {
        self.params
            .iter()
            .flatten()
            .filter(|p| keep(p))
            .map(|p| p.value.len())
            .sum()
    }

    /// Total number of scalar parameters.
    #[must_use]
    pub fn count_params(&self) -> usize {
        self.params_where(|_| true)
    }

    /// Parameters an optimizer would update.
    #[must_use]
    pub fn trainable_params(&self) -> usize {
        self.params_where(|p| p.trainable)
    }

    /// Parameters that are only tracked (batch-norm moving statistics).
    #[must_use]
    pub fn non_trainable_params(&self) -> usize {
        self.params_where(|p| !p.trainable)
    }

    /// Parameters of one layer, in slot order.
    ///
    /// # Errors
    /// [`GraphError::UnknownLayer`] if the model has no such layer.
    pub fn weights(&self, layer: &str) -> Result<&[Parameter]> {
        self.node_id(layer)
            .map(|id| self.params[id].as_slice())
            .ok_or_else(|| GraphError::UnknownLayer(layer.to_owned()))
    }

    /// Replaces every parameter of one layer, in slot order.
    ///
    /// Nothing is changed unless all tensors match.
    ///
    /// # Errors
    /// - [`GraphError::UnknownLayer`] if the model has no such layer.
    /// - [`GraphError::InvalidArgument`] for the wrong number of tensors.
    /// - [`GraphError::ShapeMismatch`] if any tensor has the wrong shape.
    pub fn set_weights(&mut self, layer: &str, values: Vec<Tensor<f32>>) -> Result<()> {
        let id = self
            .node_id(layer)
            .ok_or_else(|| GraphError::UnknownLayer(layer.to_owned()))?;
        let slots = &mut self.params[id];

        if values.len() != slots.len() {
            return Err(GraphError::invalid(
                layer,
                format!("expects {} weight tensors, got {}", slots.len(), values.len()),
            ));
        }
        if let Some((slot, value)) = slots
            .iter()
            .zip(&values)
            .find(|(slot, value)| slot.value.shape != value.shape)
        {
            return Err(GraphError::shape(layer, &slot.value.shape, &value.shape));
        }

        for (slot, value) in slots.iter_mut().zip(values) {
            slot.value.update(value);
        }
        Ok(())
    }

    /// Keras-style overview of the model.
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            name: self.name.clone(),
            rows: self.layers(),
            total: self.count_params(),
            trainable: self.trainable_params(),
            non_trainable: self.non_trainable_params(),
        }
    }

    /// Inference forward pass over a batch shaped `[n, ..input_shape]`.
    ///
    /// Returns `[n, ..output_shape]`. Batch normalization uses the moving
    /// statistics; activations are released as soon as no later layer reads them.
    ///
    /// # Errors
    /// - [`GraphError::ShapeMismatch`] if the batch does not match the input shape.
    /// - [`GraphError::InvalidArgument`] for an empty batch, or one so large that
    ///   some layer's activations would overflow `usize`.
    /// - [`GraphError::ThreadPool`] if a dedicated pool was requested and cannot start.
    pub fn predict(&self, batch: &Tensor<f32>) -> Result<Tensor<f32>> {
        let input_name = self.graph.nodes()[self.input].name();
        if batch.shape.get(1..) != Some(self.input_shape()) {
            let mut expected = vec![batch.shape.first().copied().unwrap_or(1)];
            expected.extend_from_slice(self.input_shape());
            return Err(GraphError::shape(input_name, &expected, &batch.shape));
        }
        if batch.shape[0] == 0 {
            return Err(GraphError::invalid(input_name, "batch must hold at least one sample"));
        }

        let n = batch.shape[0];
        if let Some(node) = self.nodes().find(|node| {
            node.shape()
                .iter()
                .try_fold(n, |acc, &d| acc.checked_mul(d))
                .is_none()
        }) {
            return Err(GraphError::invalid(
                node.name(),
                format!("a batch of {n} samples has too many elements"),
            ));
        }

        info!(model = %self.name, batch = n, "predict");
        match self.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
                Ok(pool.install(|| self.run(batch)))
            }
            None => Ok(self.run(batch)),
        }
    }

    fn run(&self, batch: &Tensor<f32>) -> Tensor<f32> {
        let nodes = self.graph.nodes();
        let mut uses = vec![0usize; nodes.len()];
        for &id in &self.order {
            for &i in nodes[id].inputs() {
                uses[i] += 1;
            }
        }

        let mut values: Vec<Option<Tensor<f32>>> = vec![None; nodes.len()];
        values[self.input] = Some(batch.clone());

        for &id in &self.order {
            if id == self.input {
                continue;
            }
            let node = &nodes[id];
            let out = {
                let inputs: Vec<&Tensor<f32>> = node
                    .inputs()
                    .iter()
                    .filter_map(|&i| values[i].as_ref())
                    .collect();
                let params: Vec<&Tensor<f32>> = self.params[id].iter().map(|p| &p.value).collect();
                dispatch::forward(node.layer(), &inputs, &params)
            };
            trace!(layer = node.name(), shape = ?out.shape, "evaluated");
            values[id] = Some(out);

            for &i in node.inputs() {
                uses[i] -= 1;
                if uses[i] == 0 && i != self.output {
                    values[i] = None;
                }
            }
        }

        values[self.output]
            .take()
            .expect("the output is evaluated last and never released")
    }
}

/// Printable model overview returned by [`Model::summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Model name.
    pub name: String,
    /// One row per layer.
    pub rows: Vec<LayerInfo>,
    /// Total parameter count.
    pub total: usize,
    /// Trainable parameter count.
    pub trainable: usize,
    /// Non-trainable parameter count.
    pub non_trainable: usize,
}

fn batch_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
    format!("(None, {})", dims.join(", "))
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RULE: &str = concat!(
            "=============================================",
            "============================================="
        );
        writeln!(f, "Model: \"{}\"", self.name)?;
        writeln!(f, "{}", &RULE.replace('=', "_"))?;
        writeln!(
            f,
            "{:<40}{:<22}{:<12}{}",
            "Layer (type)", "Output Shape", "Param #", "Connected to"
        )?;
        writeln!(f, "{RULE}")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<40}{:<22}{:<12}{}",
                format!("{} ({})", row.name, row.class),
                batch_shape(&row.output_shape),
                row.params,
                row.inputs.join(", ")
            )?;
        }
        writeln!(f, "{RULE}")?;
        writeln!(f, "Total params: {}", self.total)?;
        writeln!(f, "Trainable params: {}", self.trainable)?;
        writeln!(f, "Non-trainable params: {}", self.non_trainable)?;
        write!(f, "{}", &RULE.replace('=', "_"))
    }
}
