//! Optimization pass trait.

use crate::graph::Module;
use crate::Result;

/// Trait for implementing optimizer passes over a module.
///
/// A pass transforms every graph of a module in place. The embedding pass
/// manager decides when and how often a pass runs (e.g. re-invoking it to a
/// fixpoint); the pass itself only reports whether it changed anything.
///
/// # Return Value
///
/// `run()` returns `Ok(true)` if the pass mutated any graph in the module,
/// `Ok(false)` otherwise. This lets the pass manager detect a fixed point
/// and skip unnecessary work.
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and debugging).
    fn name(&self) -> &str;

    /// Run the pass on the given module.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if the pass made changes to any graph.
    /// * `Ok(false)` if no changes were made.
    /// * `Err(_)` if the pass encountered an error.
    fn run(&self, module: &mut Module) -> Result<bool>;
}
