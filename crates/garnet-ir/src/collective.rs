//! Attribute types for collective communication operations.
//!
//! Collective attributes are a closed set of tagged variants checked by
//! exhaustive matching, not a stringly-keyed attribute map. Two collectives
//! may only be fused when their topology descriptors (participant groups
//! and channel identity) compare equal.

/// Logical channel a collective communicates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Communication among the replicas of the current partition.
    ReplicaLocal,

    /// A numbered dedicated channel (cross-partition communication).
    Dedicated(u64),
}

/// Which execution units exchange data, and along which channel.
///
/// Participant groups partition the participating units: each inner vector
/// is one group whose members exchange data with each other. Groups are
/// expected to be uniform in size; the gathered result grows by the group
/// size along the gather dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopologyDescriptor {
    /// Disjoint groups of participant ids.
    pub participant_groups: Vec<Vec<u32>>,

    /// Channel identity.
    pub channel: ChannelKind,
}

impl TopologyDescriptor {
    /// Descriptor for replica-local communication.
    pub fn replica_local(participant_groups: Vec<Vec<u32>>) -> Self {
        Self {
            participant_groups,
            channel: ChannelKind::ReplicaLocal,
        }
    }

    /// Descriptor for communication over a dedicated channel.
    pub fn dedicated(participant_groups: Vec<Vec<u32>>, channel: u64) -> Self {
        Self {
            participant_groups,
            channel: ChannelKind::Dedicated(channel),
        }
    }

    /// Check if the descriptor names no participants.
    pub fn is_empty(&self) -> bool {
        self.participant_groups.iter().all(|g| g.is_empty())
    }

    /// Number of participants in one group (the gather multiplier).
    ///
    /// Returns `None` when the descriptor names no participants.
    pub fn group_size(&self) -> Option<usize> {
        self.participant_groups
            .first()
            .map(|g| g.len())
            .filter(|&n| n > 0)
    }
}

/// Attributes of an all-gather collective.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectiveAttrs {
    /// Who exchanges data, and over which channel.
    pub topology: TopologyDescriptor,

    /// Axis along which gathered data is concatenated.
    pub gather_dim: usize,

    /// Pinned out of combining by an earlier pass.
    pub no_combine: bool,
}

impl CollectiveAttrs {
    /// Create attributes for a combinable all-gather.
    pub fn new(topology: TopologyDescriptor, gather_dim: usize) -> Self {
        Self {
            topology,
            gather_dim,
            no_combine: false,
        }
    }

    /// Mark the op as never-combinable.
    pub fn pinned(mut self) -> Self {
        self.no_combine = true;
        self
    }
}

/// Attributes of a slice extracting one member's range from a combined
/// result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceAttrs {
    /// Axis being sliced.
    pub dim: usize,

    /// First index of the extracted range.
    pub start: usize,

    /// Length of the extracted range.
    pub len: usize,

    /// Topology of the original op this slice stands in for.
    ///
    /// Preserved so downstream diagnostics can still attribute the value to
    /// its original channel assignment.
    pub origin: Option<TopologyDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_size() {
        let topo = TopologyDescriptor::replica_local(vec![vec![0, 1, 2, 3]]);
        assert_eq!(topo.group_size(), Some(4));
        assert!(!topo.is_empty());
    }

    #[test]
    fn test_empty_topology() {
        let topo = TopologyDescriptor::replica_local(vec![]);
        assert!(topo.is_empty());
        assert_eq!(topo.group_size(), None);

        let topo = TopologyDescriptor::replica_local(vec![vec![]]);
        assert!(topo.is_empty());
        assert_eq!(topo.group_size(), None);
    }

    #[test]
    fn test_descriptor_equality() {
        let a = TopologyDescriptor::replica_local(vec![vec![0, 1]]);
        let b = TopologyDescriptor::replica_local(vec![vec![0, 1]]);
        let c = TopologyDescriptor::dedicated(vec![vec![0, 1]], 7);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_pinned_attrs() {
        let topo = TopologyDescriptor::replica_local(vec![vec![0, 1]]);
        let attrs = CollectiveAttrs::new(topo, 0).pinned();
        assert!(attrs.no_combine);
    }
}
