//! Greedy deterministic packing of compatible collectives into groups.
//!
//! Candidates are fed in graph definition order. Each candidate joins the
//! earliest-opened group of its key that stays within the byte and count
//! thresholds and whose members are all independent of it; otherwise it
//! opens a new group. The earliest-opened tie-break is what makes the
//! grouping reproducible — output depends only on definition order and
//! configuration, never on map iteration order or arena indices.

use garnet_ir::OpId;
use std::collections::HashMap;
use tracing::trace;

use crate::compat::{Candidate, CombineKey};
use crate::reachability::ReachabilityIndex;
use crate::CombinerConfig;

/// An ordered set of mutually compatible, mutually independent collectives.
#[derive(Debug)]
pub struct Group {
    /// Classification key shared by every member.
    pub key: CombineKey,

    /// Members in the order they were added (graph definition order).
    pub members: Vec<OpId>,

    /// Sum of member operand payloads in bytes.
    pub total_bytes: usize,

    /// Single member at or over the byte threshold; never joined.
    oversized: bool,
}

impl Group {
    fn new(candidate: Candidate, oversized: bool) -> Self {
        Self {
            key: candidate.key,
            members: vec![candidate.op],
            total_bytes: candidate.payload_bytes,
            oversized,
        }
    }

    /// Assemble a group directly, bypassing the builder's checks.
    #[cfg(test)]
    pub(crate) fn unchecked(key: CombineKey, members: Vec<OpId>, total_bytes: usize) -> Self {
        Self {
            key,
            members,
            total_bytes,
            oversized: false,
        }
    }
}

/// Greedy group builder for one pass invocation.
///
/// Groups are kept in creation order; the per-key map holds only indices
/// into that ordered list and is never iterated.
pub struct GroupBuilder<'a> {
    config: &'a CombinerConfig,
    reach: &'a ReachabilityIndex,
    groups: Vec<Group>,
    open: HashMap<CombineKey, Vec<usize>>,
}

impl<'a> GroupBuilder<'a> {
    /// Create a builder for one graph.
    pub fn new(config: &'a CombinerConfig, reach: &'a ReachabilityIndex) -> Self {
        Self {
            config,
            reach,
            groups: Vec::new(),
            open: HashMap::new(),
        }
    }

    /// Place one candidate, visiting open groups earliest-opened-first.
    pub fn add(&mut self, candidate: Candidate) {
        // An op that alone meets the byte threshold stays a singleton: it
        // is never combined and never split.
        if candidate.payload_bytes >= self.config.combine_threshold_bytes {
            trace!(bytes = candidate.payload_bytes, "oversized op, permanent singleton");
            self.groups.push(Group::new(candidate, true));
            return;
        }

        if let Some(indices) = self.open.get(&candidate.key) {
            for &gi in indices {
                let group = &self.groups[gi];
                if group.oversized {
                    continue;
                }
                if group.members.len() + 1 > self.config.combine_threshold_count {
                    continue;
                }
                if group.total_bytes + candidate.payload_bytes
                    > self.config.combine_threshold_bytes
                {
                    continue;
                }
                if group
                    .members
                    .iter()
                    .any(|&member| self.reach.connected(member, candidate.op))
                {
                    continue;
                }

                trace!(group = gi, bytes = candidate.payload_bytes, "joined open group");
                let group = &mut self.groups[gi];
                group.members.push(candidate.op);
                group.total_bytes += candidate.payload_bytes;
                return;
            }
        }

        trace!(bytes = candidate.payload_bytes, "opened new group");
        let gi = self.groups.len();
        let key = candidate.key.clone();
        self.groups.push(Group::new(candidate, false));
        self.open.entry(key).or_default().push(gi);
    }

    /// Close all groups and return them in the order they were opened.
    pub fn finish(self) -> Vec<Group> {
        self.groups
    }
}
