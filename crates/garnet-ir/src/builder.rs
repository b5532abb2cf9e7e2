//! Build valid graphs without hand-wiring producer/consumer tables.
//!
//! Embedding frontends (and tests) construct graphs through `GraphBuilder`,
//! which computes result values for each op so call sites cannot produce
//! dangling references or shape mismatches.

use crate::collective::CollectiveAttrs;
use crate::graph::{Graph, Op, OpKind, Value, ValueId};
use crate::types::{DataType, Shape};
use crate::{Error, Result};

/// Builder for one computation graph.
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    /// Start a new graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(name),
        }
    }

    /// Add a graph input value.
    pub fn input(&mut self, name: impl Into<String>, dtype: DataType, shape: Shape) -> ValueId {
        let id = self.graph.add_value(Value::new(name, dtype, shape));
        self.graph.inputs.push(id);
        id
    }

    /// Add an opaque computation with an explicitly-shaped result.
    pub fn compute(
        &mut self,
        name: &str,
        op_type: &str,
        inputs: &[ValueId],
        dtype: DataType,
        shape: Shape,
    ) -> Result<ValueId> {
        let output = self
            .graph
            .add_value(Value::new(name.to_string(), dtype, shape));
        self.graph.add_op(Op::new(
            name,
            OpKind::Compute(op_type.to_string()),
            inputs.to_vec(),
            output,
        ))?;
        Ok(output)
    }

    /// Add an all-gather collective.
    ///
    /// The result shape is the operand shape with the gather dimension
    /// multiplied by the topology's group size. Operands with unknown
    /// shapes pass through as unknown; the combiner rejects them later if
    /// asked to combine such an op.
    pub fn all_gather(
        &mut self,
        name: &str,
        input: ValueId,
        attrs: CollectiveAttrs,
    ) -> Result<ValueId> {
        let operand = self.graph.value(input)?;
        let dtype = operand.dtype;
        let shape = match operand.shape.as_static() {
            Some(dims) => {
                if attrs.gather_dim >= dims.len() {
                    return Err(Error::Shape(format!(
                        "all-gather '{}': gather dim {} out of range for rank {}",
                        name,
                        attrs.gather_dim,
                        dims.len()
                    )));
                }
                let group = attrs.topology.group_size().ok_or_else(|| {
                    Error::Shape(format!("all-gather '{}': empty participant set", name))
                })?;
                let mut dims = dims.to_vec();
                dims[attrs.gather_dim] *= group;
                Shape::Static(dims)
            }
            None => Shape::Unknown,
        };

        let output = self
            .graph
            .add_value(Value::new(name.to_string(), dtype, shape));
        self.graph.add_op(Op::new(
            name,
            OpKind::AllGather(attrs),
            vec![input],
            output,
        ))?;
        Ok(output)
    }

    /// Mark a value as a graph output.
    pub fn output(&mut self, id: ValueId) {
        self.graph.outputs.push(id);
    }

    /// Finish building and return the graph.
    pub fn finish(self) -> Graph {
        self.graph
    }
}
