//! Computation graphs for the optimizer.
//!
//! The IR is a directed graph where:
//! - **Nodes** (`Op`) are operations (opaque computations, collectives, and
//!   the synthesized combined/slice ops)
//! - **Values** (`Value`) are the tensor results flowing between them
//!
//! Each `Op` produces exactly one `Value`. Values live in a side-table; the
//! petgraph edges exist solely for topological ordering. Every operand
//! reference resolves to a value produced earlier in definition order or to
//! a graph input, and the op graph is a DAG.

use crate::collective::{CollectiveAttrs, SliceAttrs};
use crate::types::{DataType, Shape};
use crate::{Error, Result};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, Topo};
use petgraph::Direction;

use std::collections::HashMap;

/// Type alias for op identifiers (backed by petgraph NodeIndex).
pub type OpId = NodeIndex;

/// Unique identifier for a value in a graph.
///
/// This is an index into `Graph::values`. Unlike op ids (petgraph's stable
/// NodeIndex), value ids are plain indices that remain valid across graph
/// mutations; values are never removed, only orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub usize);

impl ValueId {
    /// Create a new value id.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

// ──────────────────────────────── Module ─────────────────────────────────

/// An ordered set of computation graphs.
///
/// Graph order is definition order; passes that iterate the module must do
/// so in this order to stay deterministic. Graphs are disjoint: there are
/// no cross-graph value references.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Module name (for diagnostics).
    pub name: String,

    graphs: Vec<Graph>,
}

impl Module {
    /// Create a new empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graphs: Vec::new(),
        }
    }

    /// Append a graph, returning its position in definition order.
    pub fn add_graph(&mut self, graph: Graph) -> usize {
        self.graphs.push(graph);
        self.graphs.len() - 1
    }

    /// Iterate graphs in definition order.
    pub fn graphs(&self) -> impl Iterator<Item = &Graph> {
        self.graphs.iter()
    }

    /// Iterate graphs mutably, in definition order.
    pub fn graphs_mut(&mut self) -> impl Iterator<Item = &mut Graph> {
        self.graphs.iter_mut()
    }

    /// Number of graphs in the module.
    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }
}

// ──────────────────────────────── Graph ──────────────────────────────────

/// One computation graph.
///
/// Owns all `Op`s of one computation in an arena. Ops are identified by
/// `OpId` (stable across removals); values by `ValueId` into a side-table.
/// Producer/consumer lookup tables are maintained on every mutation.
#[derive(Debug, Clone)]
pub struct Graph {
    /// Graph name (for diagnostics).
    pub name: String,

    /// The op graph (nodes only; petgraph edges order producers before
    /// consumers).
    graph: StableGraph<Op, ()>,

    /// Value side-table.
    values: Vec<Value>,

    /// Lookup table: value id -> producing op.
    producer: HashMap<ValueId, OpId>,

    /// Lookup table: value id -> consuming ops.
    consumers: HashMap<ValueId, Vec<OpId>>,

    /// Graph input value ids.
    pub inputs: Vec<ValueId>,

    /// Graph output value ids.
    pub outputs: Vec<ValueId>,

    /// Next definition sequence number.
    next_seq: u64,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            graph: StableGraph::new(),
            values: Vec::new(),
            producer: HashMap::new(),
            consumers: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            next_seq: 0,
        }
    }

    // ── Op access ──

    /// Get an immutable reference to an op.
    pub fn op(&self, id: OpId) -> Result<&Op> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Op {:?} not found", id)))
    }

    /// Get a mutable reference to an op.
    pub fn op_mut(&mut self, id: OpId) -> Result<&mut Op> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Op {:?} not found", id)))
    }

    /// Iterate over all ops in the graph (arbitrary order).
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Op)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|op| (id, op)))
    }

    /// Number of ops in the graph.
    pub fn op_count(&self) -> usize {
        self.graph.node_count()
    }

    // ── Value access ──

    /// Get an immutable reference to a value.
    pub fn value(&self, id: ValueId) -> Result<&Value> {
        self.values
            .get(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("Value {:?} not found", id)))
    }

    /// Get a mutable reference to a value.
    pub fn value_mut(&mut self, id: ValueId) -> Result<&mut Value> {
        self.values
            .get_mut(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("Value {:?} not found", id)))
    }

    /// Number of values in the graph.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Get the op that produces a value, if any (graph inputs have none).
    pub fn producer(&self, id: ValueId) -> Option<OpId> {
        self.producer.get(&id).copied()
    }

    /// Get the ops that consume a value.
    pub fn consumers(&self, id: ValueId) -> Vec<OpId> {
        self.consumers.get(&id).cloned().unwrap_or_default()
    }

    // ── Graph mutation ──

    /// Add a value to the graph and return its id.
    pub fn add_value(&mut self, value: Value) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(value);
        id
    }

    /// Add an op to the graph and return its id.
    ///
    /// Assigns the op its definition sequence number, registers it in the
    /// producer/consumer tables, and adds petgraph edges from the producers
    /// of its operands for topological ordering.
    pub fn add_op(&mut self, mut op: Op) -> Result<OpId> {
        for &input in &op.inputs {
            if input.index() >= self.values.len() {
                return Err(Error::InvalidGraph(format!(
                    "Op '{}' references unknown value {:?}",
                    op.name, input
                )));
            }
        }
        if op.output.index() >= self.values.len() {
            return Err(Error::InvalidGraph(format!(
                "Op '{}' has unknown output value {:?}",
                op.name, op.output
            )));
        }
        if self.producer.contains_key(&op.output) {
            return Err(Error::InvalidGraph(format!(
                "Value {:?} already has a producer",
                op.output
            )));
        }

        op.seq = self.next_seq;
        self.next_seq += 1;

        let output = op.output;
        let inputs = op.inputs.clone();
        let op_id = self.graph.add_node(op);

        self.producer.insert(output, op_id);

        for &input in &inputs {
            // An op consuming the same value through several operands is
            // listed once.
            let entry = self.consumers.entry(input).or_default();
            if !entry.contains(&op_id) {
                entry.push(op_id);
            }
            if let Some(&producer_id) = self.producer.get(&input) {
                self.graph.add_edge(producer_id, op_id, ());
            }
        }

        Ok(op_id)
    }

    /// Remove an op from the graph.
    ///
    /// Refuses to remove an op whose result still has consumers — rewire
    /// the consumers first. With `StableGraph`, other op ids remain valid.
    pub fn remove_op(&mut self, id: OpId) -> Result<()> {
        let op = self.op(id)?;
        let output = op.output;
        let inputs = op.inputs.clone();
        let name = op.name.clone();

        if !self.consumers(output).is_empty() {
            return Err(Error::InvalidGraph(format!(
                "Cannot remove op '{}': its result still has consumers",
                name
            )));
        }

        self.producer.remove(&output);
        for input in inputs {
            if let Some(consumers) = self.consumers.get_mut(&input) {
                consumers.retain(|&c| c != id);
            }
        }

        self.graph.remove_node(id);

        Ok(())
    }

    /// Replace every occurrence of `old` in an op's operand list with `new`.
    ///
    /// Updates the consumer tables and rebuilds the op's incoming ordering
    /// edges. The op's definition sequence number is unchanged.
    pub fn replace_input(&mut self, id: OpId, old: ValueId, new: ValueId) -> Result<()> {
        if new.index() >= self.values.len() {
            return Err(Error::InvalidGraph(format!(
                "Replacement value {:?} not found",
                new
            )));
        }

        let op = self.op_mut(id)?;
        let mut replaced = false;
        for input in op.inputs.iter_mut() {
            if *input == old {
                *input = new;
                replaced = true;
            }
        }
        if !replaced {
            return Err(Error::InvalidGraph(format!(
                "Op '{}' does not consume value {:?}",
                op.name, old
            )));
        }
        let inputs = op.inputs.clone();

        if let Some(consumers) = self.consumers.get_mut(&old) {
            consumers.retain(|&c| c != id);
        }
        let new_consumers = self.consumers.entry(new).or_default();
        if !new_consumers.contains(&id) {
            new_consumers.push(id);
        }

        // Rebuild incoming ordering edges from the updated operand list.
        let incoming: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| e.id())
            .collect();
        for edge in incoming {
            self.graph.remove_edge(edge);
        }
        for input in inputs {
            if let Some(&producer_id) = self.producer.get(&input) {
                self.graph.add_edge(producer_id, id, ());
            }
        }

        Ok(())
    }

    // ── Graph queries ──

    /// Get a topological order of the ops.
    ///
    /// Every op appears after the producers of all its operands. Ops left
    /// unvisited by the traversal (only possible if the graph has a cycle)
    /// are absent from the result; `validate()` reports this as an error.
    pub fn topological_order(&self) -> Vec<OpId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::new();

        while let Some(id) = topo.next(&self.graph) {
            order.push(id);
        }

        order
    }

    /// Get all ops sorted by definition sequence number.
    ///
    /// This is the stable visitation order for deterministic passes: it
    /// depends only on the order ops were added, never on arena indices or
    /// hash iteration.
    pub fn definition_order(&self) -> Vec<OpId> {
        let mut order: Vec<_> = self.ops().map(|(id, op)| (op.seq, id)).collect();
        order.sort_unstable_by_key(|&(seq, _)| seq);
        order.into_iter().map(|(_, id)| id).collect()
    }

    /// Validate graph structure.
    ///
    /// Checks that all operand references resolve, graph inputs/outputs
    /// exist, and the op graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        for &input in &self.inputs {
            self.value(input)?;
        }
        for &output in &self.outputs {
            self.value(output)?;
        }

        for (_, op) in self.ops() {
            for &input in &op.inputs {
                self.value(input)?;
            }
            self.value(op.output)?;
        }

        if self.topological_order().len() != self.op_count() {
            return Err(Error::InvalidGraph(format!(
                "Graph '{}' contains a cycle",
                self.name
            )));
        }

        Ok(())
    }
}

// ──────────────────────────────── Op ─────────────────────────────────────

/// Operator kind.
///
/// Non-collective computation is opaque to the optimizer; collectives carry
/// closed attribute variants checked by exhaustive matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Opaque non-collective computation, identified by op type name.
    Compute(String),

    /// All-gather collective: gathers the operand across the topology's
    /// participants, concatenating along the gather dimension.
    AllGather(CollectiveAttrs),

    /// Combined all-gather synthesized by the combiner: variadic, with an
    /// aggregate result covering all members along the gather dimension.
    CombinedAllGather(CollectiveAttrs),

    /// Slice extracting one member's range from a combined result.
    Slice(SliceAttrs),
}

impl OpKind {
    /// Collective attributes, if this is a collective kind.
    pub fn collective_attrs(&self) -> Option<&CollectiveAttrs> {
        match self {
            OpKind::AllGather(attrs) | OpKind::CombinedAllGather(attrs) => Some(attrs),
            OpKind::Compute(_) | OpKind::Slice(_) => None,
        }
    }
}

/// An operation in the graph.
#[derive(Debug, Clone)]
pub struct Op {
    /// Op name (unique within the graph by convention, for diagnostics).
    pub name: String,

    /// What the op does.
    pub kind: OpKind,

    /// Operand value ids, in operand order.
    pub inputs: Vec<ValueId>,

    /// Result value id.
    pub output: ValueId,

    /// Definition sequence number, assigned by `Graph::add_op`.
    pub seq: u64,
}

impl Op {
    /// Create a new op. The sequence number is assigned when the op is
    /// added to a graph.
    pub fn new(name: impl Into<String>, kind: OpKind, inputs: Vec<ValueId>, output: ValueId) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            output,
            seq: 0,
        }
    }
}

// ──────────────────────────────── Value ──────────────────────────────────

/// A tensor value produced by an op or provided as a graph input.
#[derive(Debug, Clone)]
pub struct Value {
    /// Value name (for diagnostics).
    pub name: String,

    /// Element type.
    pub dtype: DataType,

    /// Shape.
    pub shape: Shape,
}

impl Value {
    /// Create a new value.
    pub fn new(name: impl Into<String>, dtype: DataType, shape: Shape) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
        }
    }

    /// Payload size in bytes, if the shape is static.
    pub fn byte_size(&self) -> Option<usize> {
        self.shape
            .element_count()
            .map(|n| n * self.dtype.size_bytes())
    }
}
