//! Reachability analysis over one computation graph.
//!
//! Builds a transitive closure over operand edges so the group builder can
//! answer "are these two ops connected by a dependency path?" in O(1). The
//! closure is exact: a false "independent" answer could let the rewriter
//! introduce a cycle (or a deadlock between fused collectives), so there is
//! no approximation here. A conservative false "dependent" would only lose
//! optimization opportunity; we don't produce those either.

use fixedbitset::FixedBitSet;
use garnet_ir::{Graph, OpId};
use std::collections::HashMap;

use crate::Result;

/// Precomputed reachability for all ops of one graph.
///
/// One bitset row per op, indexed by dense topological position: bit `j` of
/// row `i` is set when the op at position `j` reaches the op at position
/// `i` via operand edges. Rows are built by OR-ing predecessor rows in
/// topological order, so construction is O(V·E) bit-word operations and
/// queries are single word lookups. Reachability is reflexive.
pub struct ReachabilityIndex {
    /// Dense topological position of each op.
    position: HashMap<OpId, usize>,

    /// `reachable[i]`: positions of all ops that reach op `i`.
    reachable: Vec<FixedBitSet>,
}

impl ReachabilityIndex {
    /// Build the index from a graph's current state.
    ///
    /// Must be rebuilt after any mutation; the combiner builds it once per
    /// graph, before grouping, and mutates only after all queries are done.
    pub fn new(graph: &Graph) -> Result<Self> {
        let order = graph.topological_order();
        let n = order.len();

        let position: HashMap<OpId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut reachable: Vec<FixedBitSet> = Vec::with_capacity(n);
        for (i, &id) in order.iter().enumerate() {
            let mut row = FixedBitSet::with_capacity(n);
            row.insert(i);

            let op = graph.op(id)?;
            for &input in &op.inputs {
                if let Some(pred) = graph.producer(input) {
                    // Producers precede consumers in topological order, so
                    // the predecessor row is already complete.
                    if let Some(&p) = position.get(&pred) {
                        row.union_with(&reachable[p]);
                    }
                }
            }

            reachable.push(row);
        }

        Ok(Self {
            position,
            reachable,
        })
    }

    /// Check if `from` reaches `to` via operand edges (reflexive).
    pub fn reaches(&self, from: OpId, to: OpId) -> bool {
        match (self.position.get(&from), self.position.get(&to)) {
            (Some(&f), Some(&t)) => self.reachable[t].contains(f),
            _ => false,
        }
    }

    /// Check if two ops are connected by a dependency path in either
    /// direction. Independent ops (and only those) may share a group.
    pub fn connected(&self, a: OpId, b: OpId) -> bool {
        self.reaches(a, b) || self.reaches(b, a)
    }
}
