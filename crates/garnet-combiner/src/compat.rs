//! Compatibility classification for collective ops.
//!
//! Two collectives may share a combined op only when their communication
//! topology (participant groups and channel), element type, and — when the
//! pass combines by dimension — gather dimension all compare equal. Grouping
//! is keyed on the full `CombineKey`, so compatibility is an equivalence
//! relation by construction; the rewriter still re-checks members against
//! the group representative before mutating anything.

use garnet_ir::{DataType, Graph, OpId, OpKind, TopologyDescriptor};

use crate::{CombineError, Result};

/// Equivalence-class key for combinable collectives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CombineKey {
    /// Participant groups and channel identity.
    pub topology: TopologyDescriptor,

    /// Element type of the gathered payload.
    pub dtype: DataType,

    /// Gather dimension; populated only when combining by dimension.
    pub gather_dim: Option<usize>,
}

/// A collective eligible for combining, with its classification key and
/// payload size.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The op.
    pub op: OpId,

    /// Its equivalence-class key.
    pub key: CombineKey,

    /// Operand payload size in bytes.
    pub payload_bytes: usize,
}

/// Classify one op.
///
/// Returns `Ok(None)` for ops that are not combinable: non-collective
/// kinds, already-combined collectives, and collectives pinned with
/// `no_combine`. Returns an error when an op that claims to be combinable
/// is missing a required attribute — an empty participant set, an unknown
/// operand or result shape, or a gather dimension out of range.
pub fn classify(graph: &Graph, id: OpId, combine_by_dim: bool) -> Result<Option<Candidate>> {
    let op = graph.op(id)?;

    let attrs = match &op.kind {
        OpKind::AllGather(attrs) => attrs,
        OpKind::Compute(_) | OpKind::CombinedAllGather(_) | OpKind::Slice(_) => return Ok(None),
    };

    if attrs.no_combine {
        return Ok(None);
    }

    if attrs.topology.is_empty() {
        return Err(CombineError::MissingTopology {
            op: op.name.clone(),
        });
    }

    if op.inputs.len() != 1 {
        return Err(CombineError::Graph(garnet_ir::Error::InvalidGraph(format!(
            "all-gather '{}' must have exactly 1 operand, got {}",
            op.name,
            op.inputs.len()
        ))));
    }

    let operand = graph.value(op.inputs[0])?;
    let result = graph.value(op.output)?;

    let operand_dims = operand.shape.as_static().ok_or_else(|| CombineError::UnknownShape {
        op: op.name.clone(),
    })?;
    if !result.shape.is_static() {
        return Err(CombineError::UnknownShape {
            op: op.name.clone(),
        });
    }

    if attrs.gather_dim >= operand_dims.len() {
        return Err(CombineError::GatherDimOutOfRange {
            op: op.name.clone(),
            dim: attrs.gather_dim,
            rank: operand_dims.len(),
        });
    }

    // Static shape established above.
    let payload_bytes = operand_dims.iter().product::<usize>() * operand.dtype.size_bytes();

    Ok(Some(Candidate {
        op: id,
        key: CombineKey {
            topology: attrs.topology.clone(),
            dtype: operand.dtype,
            gather_dim: combine_by_dim.then_some(attrs.gather_dim),
        },
        payload_bytes,
    }))
}
