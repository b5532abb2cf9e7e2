//! DOT graph visualization for computation graphs.
//!
//! Generates Graphviz DOT format showing ops, value flow, and collective
//! attributes. Diagnostic surface only; nothing in the optimizer consumes
//! this.

use crate::graph::{Graph, OpKind};

/// Generate a DOT graph from a computation graph.
///
/// # Example
///
/// ```ignore
/// let dot = to_dot(&graph);
/// std::fs::write("graph.dot", dot)?;
/// // Render with: dot -Tpng graph.dot -o graph.png
/// ```
pub fn to_dot(graph: &Graph) -> String {
    let mut dot = String::new();
    dot.push_str(&format!("digraph \"{}\" {{\n", graph.name));
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");

    for (id, op) in graph.ops() {
        let label = match &op.kind {
            OpKind::Compute(op_type) => format!("{}\\n{}", op_type, op.name),
            OpKind::AllGather(attrs) => {
                format!("AllGather(dim={})\\n{}", attrs.gather_dim, op.name)
            }
            OpKind::CombinedAllGather(attrs) => format!(
                "CombinedAllGather(dim={}, operands={})\\n{}",
                attrs.gather_dim,
                op.inputs.len(),
                op.name
            ),
            OpKind::Slice(attrs) => format!(
                "Slice[{}..{}]\\n{}",
                attrs.start,
                attrs.start + attrs.len,
                op.name
            ),
        };
        dot.push_str(&format!("  op_{} [label=\"{}\"];\n", id.index(), label));
    }

    dot.push('\n');

    for (id, op) in graph.ops() {
        for &input in &op.inputs {
            if let Some(producer) = graph.producer(input) {
                let value_name = graph
                    .value(input)
                    .map(|v| v.name.clone())
                    .unwrap_or_default();
                dot.push_str(&format!(
                    "  op_{} -> op_{} [label=\"{}\"];\n",
                    producer.index(),
                    id.index(),
                    value_name
                ));
            }
        }
    }

    dot.push_str("}\n");
    dot
}
