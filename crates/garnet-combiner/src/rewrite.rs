//! Graph rewrite: replace a group with one combined op plus slices.
//!
//! Rewriting is split into planning and application. `plan_rewrite` only
//! reads the graph: it re-verifies the group's invariants (pairwise
//! independence, compatibility with the group representative) and computes
//! everything the mutation will need. `apply_rewrite` then performs the
//! mutation using pre-validated ids only. The driver plans every group of a
//! graph before applying any plan, so a planning failure leaves the graph
//! untouched.
//!
//! The combined result concatenates member results in member order. When
//! every member gathers along the same dimension and their result shapes
//! agree on all other dimensions, the concatenation happens along that
//! dimension and slices extract index ranges of it. Otherwise (possible
//! when not combining by dimension, or with off-dimension shape mismatches)
//! the combined result is rank-1 and member results occupy consecutive
//! element ranges. Either way each slice carries its member's original
//! result shape, so consumers observe exactly the value the original op
//! produced, without reshape chains.

use garnet_ir::{
    CollectiveAttrs, DataType, Graph, Op, OpId, OpKind, Shape, SliceAttrs, TopologyDescriptor,
    Value, ValueId,
};
use tracing::debug;

use crate::compat::classify;
use crate::grouping::Group;
use crate::reachability::ReachabilityIndex;
use crate::{CombineError, Result};

/// One member's portion of the combined result.
#[derive(Debug)]
struct SliceSpec {
    /// The original op to be replaced.
    member: OpId,

    /// Its name (for the synthesized slice's name).
    member_name: String,

    /// Its original result value.
    result: ValueId,

    /// Its original result shape.
    result_dims: Vec<usize>,

    /// Offset of this member's range along the sliced axis.
    start: usize,

    /// Extent of this member's range along the sliced axis.
    len: usize,

    /// The member's topology, preserved on the slice for diagnostics.
    origin: TopologyDescriptor,
}

/// Everything needed to rewrite one group, computed without mutating the
/// graph.
#[derive(Debug)]
pub struct RewritePlan {
    combined_name: String,
    attrs: CollectiveAttrs,
    dtype: DataType,
    operands: Vec<ValueId>,

    /// Shape of the combined result.
    combined_dims: Vec<usize>,

    /// Axis of the combined result that slices index into.
    slice_dim: usize,

    slices: Vec<SliceSpec>,
}

impl RewritePlan {
    /// Number of ops this plan replaces.
    pub fn member_count(&self) -> usize {
        self.slices.len()
    }
}

/// Pick the concatenation axis for a group's combined result.
///
/// Members concatenate along their common gather dimension when they have
/// one and their result shapes agree everywhere else; otherwise the
/// combined result is flattened to rank 1.
fn concat_dim(gather_dims: &[usize], member_dims: &[Vec<usize>]) -> Option<usize> {
    let dim = gather_dims[0];
    if gather_dims.iter().any(|&d| d != dim) {
        return None;
    }

    let first = &member_dims[0];
    if dim >= first.len() {
        return None;
    }
    for dims in &member_dims[1..] {
        if dims.len() != first.len() {
            return None;
        }
        let off_dims_match = dims
            .iter()
            .zip(first.iter())
            .enumerate()
            .all(|(i, (a, b))| i == dim || a == b);
        if !off_dims_match {
            return None;
        }
    }

    Some(dim)
}

/// Validate a group and compute its rewrite plan. Read-only.
///
/// Re-verifies what the group builder already established: every member
/// still classifies to the group's representative key, and no two members
/// are connected by a dependency path. Violations mean the grouping and the
/// graph disagree — fail rather than emit a wrong graph.
pub fn plan_rewrite(
    graph: &Graph,
    reach: &ReachabilityIndex,
    group: &Group,
    combine_by_dim: bool,
) -> Result<RewritePlan> {
    if group.members.len() < 2 {
        return Err(CombineError::Graph(garnet_ir::Error::InvalidGraph(
            "rewrite requires a group with at least 2 members".to_string(),
        )));
    }

    let representative = graph.op(group.members[0])?.name.clone();

    for (i, &a) in group.members.iter().enumerate() {
        for &b in &group.members[i + 1..] {
            if reach.connected(a, b) {
                return Err(CombineError::DependentMembers {
                    a: graph.op(a)?.name.clone(),
                    b: graph.op(b)?.name.clone(),
                });
            }
        }
    }

    let mut operands = Vec::with_capacity(group.members.len());
    let mut member_names = Vec::with_capacity(group.members.len());
    let mut member_results = Vec::with_capacity(group.members.len());
    let mut member_dims = Vec::with_capacity(group.members.len());
    let mut gather_dims = Vec::with_capacity(group.members.len());
    let mut origins = Vec::with_capacity(group.members.len());

    for &member in &group.members {
        let op = graph.op(member)?;

        let candidate = classify(graph, member, combine_by_dim)?.ok_or_else(|| {
            CombineError::IncompatibleMembers {
                a: representative.clone(),
                b: op.name.clone(),
            }
        })?;
        if candidate.key != group.key {
            return Err(CombineError::IncompatibleMembers {
                a: representative.clone(),
                b: op.name.clone(),
            });
        }

        let attrs = match &op.kind {
            OpKind::AllGather(attrs) => attrs,
            // classify() only accepts all-gathers.
            _ => {
                return Err(CombineError::IncompatibleMembers {
                    a: representative.clone(),
                    b: op.name.clone(),
                })
            }
        };

        // classify() established a static result shape.
        let result = graph.value(op.output)?;
        let result_dims = result
            .shape
            .as_static()
            .ok_or_else(|| CombineError::UnknownShape {
                op: op.name.clone(),
            })?
            .to_vec();

        operands.push(op.inputs[0]);
        member_names.push(op.name.clone());
        member_results.push(op.output);
        member_dims.push(result_dims);
        gather_dims.push(attrs.gather_dim);
        origins.push(attrs.topology.clone());
    }

    // Lay the member results out along the concatenation axis.
    let (slice_dim, combined_dims, extents) = match concat_dim(&gather_dims, &member_dims) {
        Some(dim) => {
            let mut combined = member_dims[0].clone();
            combined[dim] = member_dims.iter().map(|dims| dims[dim]).sum();
            let extents: Vec<usize> = member_dims.iter().map(|dims| dims[dim]).collect();
            (dim, combined, extents)
        }
        None => {
            let extents: Vec<usize> = member_dims
                .iter()
                .map(|dims| dims.iter().product())
                .collect();
            (0, vec![extents.iter().sum()], extents)
        }
    };

    let mut slices = Vec::with_capacity(group.members.len());
    let mut start = 0usize;
    for (i, &member) in group.members.iter().enumerate() {
        slices.push(SliceSpec {
            member,
            member_name: member_names[i].clone(),
            result: member_results[i],
            result_dims: member_dims[i].clone(),
            start,
            len: extents[i],
            origin: origins[i].clone(),
        });
        start += extents[i];
    }

    Ok(RewritePlan {
        combined_name: format!("{}.combined", representative),
        attrs: CollectiveAttrs::new(group.key.topology.clone(), slice_dim),
        dtype: group.key.dtype,
        operands,
        combined_dims,
        slice_dim,
        slices,
    })
}

/// Apply a validated plan to the graph.
///
/// Inserts the combined op and one slice per member, redirects all former
/// consumers (and graph outputs) of each member's result to its slice, then
/// removes the members. All ids were validated during planning; an error
/// here indicates the graph changed between planning and application.
pub fn apply_rewrite(graph: &mut Graph, plan: RewritePlan) -> Result<()> {
    debug!(
        combined = %plan.combined_name,
        members = plan.slices.len(),
        dim = plan.slice_dim,
        "rewriting group"
    );

    let combined_value = graph.add_value(Value::new(
        plan.combined_name.clone(),
        plan.dtype,
        Shape::Static(plan.combined_dims),
    ));
    graph.add_op(Op::new(
        plan.combined_name,
        OpKind::CombinedAllGather(plan.attrs),
        plan.operands,
        combined_value,
    ))?;

    for spec in plan.slices {
        let slice_name = format!("{}.sliced", spec.member_name);
        let slice_value = graph.add_value(Value::new(
            slice_name.clone(),
            plan.dtype,
            Shape::Static(spec.result_dims),
        ));
        graph.add_op(Op::new(
            slice_name,
            OpKind::Slice(SliceAttrs {
                dim: plan.slice_dim,
                start: spec.start,
                len: spec.len,
                origin: Some(spec.origin),
            }),
            vec![combined_value],
            slice_value,
        ))?;

        for consumer in graph.consumers(spec.result) {
            graph.replace_input(consumer, spec.result, slice_value)?;
        }
        for output in graph.outputs.iter_mut() {
            if *output == spec.result {
                *output = slice_value;
            }
        }

        graph.remove_op(spec.member)?;
    }

    Ok(())
}
