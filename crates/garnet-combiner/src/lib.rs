//! Collective combiner pass for Garnet.
//!
//! Combines small independent all-gather ops into larger combined ops. A
//! typical all-gather implementation has a minimum latency-induced time per
//! invocation, so a single combined op is more efficient than many small
//! ones on interconnect-bound graphs.
//!
//! The pass runs per graph, in module definition order:
//! 1. **Classify** every op (`compat`): eligible collectives get an
//!    equivalence-class key; malformed collectives fail the graph before
//!    anything is mutated.
//! 2. **Analyze** dependencies (`reachability`): exact transitive closure
//!    over operand edges.
//! 3. **Group** greedily (`grouping`): definition-order visitation,
//!    earliest-opened-group-first, under the byte and count thresholds.
//! 4. **Rewrite** (`rewrite`): plan every group first, then apply — one
//!    combined op plus per-member slices, consumers rewired, members
//!    removed. A graph is either fully rewritten or left unmodified.
//!
//! # Example
//!
//! ```no_run
//! use garnet_combiner::{CollectiveCombiner, CombinerConfig};
//! use garnet_ir::{Module, Pass};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut module = Module::new("train_step");
//! // ... build graphs ...
//!
//! let combiner = CollectiveCombiner::new(CombinerConfig::default());
//! let changed = combiner.run(&mut module)?;
//! println!("combined anything: {}", changed);
//! # Ok(())
//! # }
//! ```

pub mod compat;
pub mod grouping;
pub mod reachability;
pub mod rewrite;

pub use compat::{Candidate, CombineKey};
pub use grouping::{Group, GroupBuilder};
pub use reachability::ReachabilityIndex;
pub use rewrite::{apply_rewrite, plan_rewrite, RewritePlan};

use garnet_ir::{Graph, Module, Pass};
use tracing::debug;

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, CombineError>;

/// Errors produced by the combiner.
///
/// Malformed-input errors (`MissingTopology`, `UnknownShape`,
/// `GatherDimOutOfRange`) mean an op that claims to be combinable lacks a
/// required attribute; the invocation fails with the graph unmodified.
/// Invariant violations (`DependentMembers`, `IncompatibleMembers`) are
/// defensive rewrite-time re-checks that should never trigger on correct
/// grouping; the invocation fails rather than emit an incorrect graph.
#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    #[error("collective '{op}' has an empty participant set")]
    MissingTopology { op: String },

    #[error("collective '{op}' has an unknown shape")]
    UnknownShape { op: String },

    #[error("collective '{op}': gather dim {dim} out of range for rank {rank}")]
    GatherDimOutOfRange { op: String, dim: usize, rank: usize },

    #[error("group members '{a}' and '{b}' are connected by a dependency path")]
    DependentMembers { a: String, b: String },

    #[error("group member '{b}' is not compatible with representative '{a}'")]
    IncompatibleMembers { a: String, b: String },

    #[error(transparent)]
    Graph(#[from] garnet_ir::Error),
}

/// Configuration for one combiner invocation. Immutable while it runs.
#[derive(Debug, Clone)]
pub struct CombinerConfig {
    /// Maximum aggregate operand payload of a combined op, in bytes. An op
    /// whose own payload meets this threshold is never combined.
    pub combine_threshold_bytes: usize,

    /// Maximum number of original ops fused into one combined op.
    pub combine_threshold_count: usize,

    /// Only combine ops sharing the same gather dimension.
    pub combine_by_dim: bool,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            combine_threshold_bytes: 256 * 1024,
            combine_threshold_count: 256,
            combine_by_dim: true,
        }
    }
}

impl CombinerConfig {
    /// Whether any combining is possible under this configuration.
    fn enabled(&self) -> bool {
        self.combine_threshold_bytes > 0 && self.combine_threshold_count >= 2
    }
}

/// Per-graph combining statistics, reported to the observer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombineStats {
    /// Multi-member groups rewritten.
    pub groups_combined: usize,

    /// Original ops replaced by combined ops.
    pub ops_combined: usize,

    /// Total operand payload of the replaced ops, in bytes.
    pub bytes_combined: usize,
}

/// Observer the driver notifies after each graph.
///
/// Instrumentation (counters, rollout metrics) lives behind this seam; the
/// core algorithm never touches ambient global state. The observer is
/// constructed by the caller and handed to the combiner, so its lifecycle
/// is explicit: it lives exactly as long as the combiner that owns it.
pub trait CombineObserver: Send + Sync {
    /// Called once per processed graph, with that graph's statistics
    /// (all-zero when the graph was left unchanged).
    fn on_graph(&self, graph: &str, stats: &CombineStats);
}

/// Observer that discards all notifications.
pub struct NoopObserver;

impl CombineObserver for NoopObserver {
    fn on_graph(&self, _graph: &str, _stats: &CombineStats) {}
}

/// The collective combiner pass.
pub struct CollectiveCombiner {
    config: CombinerConfig,
    observer: Box<dyn CombineObserver>,
}

impl CollectiveCombiner {
    /// Create a combiner with the given configuration.
    pub fn new(config: CombinerConfig) -> Self {
        Self {
            config,
            observer: Box::new(NoopObserver),
        }
    }

    /// Create a combiner that reports per-graph statistics to `observer`.
    pub fn with_observer(config: CombinerConfig, observer: Box<dyn CombineObserver>) -> Self {
        Self { config, observer }
    }

    /// Run the pass over every graph of a module, in definition order.
    ///
    /// Returns whether any graph was mutated. On error, the failing graph
    /// is left unmodified; graphs processed before it keep their rewrites.
    #[tracing::instrument(skip_all, fields(module = %module.name))]
    pub fn run_module(&self, module: &mut Module) -> Result<bool> {
        if !self.config.enabled() {
            debug!("combining disabled by configuration");
            return Ok(false);
        }

        let mut changed = false;
        for graph in module.graphs_mut() {
            let _span = tracing::debug_span!("graph", name = %graph.name).entered();
            let stats = self.run_graph(graph)?;
            changed |= stats.groups_combined > 0;
            self.observer.on_graph(&graph.name, &stats);
        }

        Ok(changed)
    }

    /// Run the pass on one graph.
    ///
    /// All classification and group validation completes before the first
    /// mutation, so any error leaves the graph as it was.
    fn run_graph(&self, graph: &mut Graph) -> Result<CombineStats> {
        let order = graph.definition_order();

        // Classify first: malformed collectives fail the graph before any
        // analysis or mutation, and graphs without eligible collectives
        // skip the closure entirely.
        let mut candidates = Vec::new();
        for &id in &order {
            if let Some(candidate) = compat::classify(graph, id, self.config.combine_by_dim)? {
                candidates.push(candidate);
            }
        }
        if candidates.len() < 2 {
            debug!(eligible = candidates.len(), "nothing to combine");
            return Ok(CombineStats::default());
        }

        let reach = ReachabilityIndex::new(graph)?;

        let mut builder = GroupBuilder::new(&self.config, &reach);
        for candidate in candidates {
            builder.add(candidate);
        }
        let groups = builder.finish();

        let mut plans = Vec::new();
        for group in groups.iter().filter(|g| g.members.len() >= 2) {
            plans.push(plan_rewrite(graph, &reach, group, self.config.combine_by_dim)?);
        }
        if plans.is_empty() {
            debug!(groups = groups.len(), "no multi-member groups");
            return Ok(CombineStats::default());
        }

        let mut stats = CombineStats::default();
        for group in groups.iter().filter(|g| g.members.len() >= 2) {
            stats.ops_combined += group.members.len();
            stats.bytes_combined += group.total_bytes;
        }
        stats.groups_combined = plans.len();

        for plan in plans {
            apply_rewrite(graph, plan)?;
        }

        debug!(
            groups = stats.groups_combined,
            ops = stats.ops_combined,
            bytes = stats.bytes_combined,
            "graph combined"
        );

        Ok(stats)
    }
}

impl Pass for CollectiveCombiner {
    fn name(&self) -> &str {
        "collective-combiner"
    }

    fn run(&self, module: &mut Module) -> garnet_ir::Result<bool> {
        self.run_module(module)
            .map_err(|e| garnet_ir::Error::Pass(e.to_string()))
    }
}
