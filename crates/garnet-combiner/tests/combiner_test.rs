//! End-to-end tests for the collective combiner.

use garnet_combiner::{CollectiveCombiner, CombinerConfig};
use garnet_ir::{
    to_dot, CollectiveAttrs, DataType, GraphBuilder, Module, OpKind, Shape, TopologyDescriptor,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .try_init();
}

fn topo() -> TopologyDescriptor {
    TopologyDescriptor::replica_local(vec![vec![0, 1]])
}

/// Module with one graph of independent u8 all-gathers, one per payload
/// size in bytes, defined in the given order.
fn gather_module(payload_bytes: &[usize]) -> Module {
    let mut b = GraphBuilder::new("main");
    for (i, &n) in payload_bytes.iter().enumerate() {
        let x = b.input(format!("x{}", i), DataType::U8, Shape::Static(vec![n]));
        let g = b
            .all_gather(&format!("ag{}", i), x, CollectiveAttrs::new(topo(), 0))
            .unwrap();
        b.output(g);
    }
    let mut module = Module::new("m");
    module.add_graph(b.finish());
    module
}

fn config(bytes: usize, count: usize) -> CombinerConfig {
    CombinerConfig {
        combine_threshold_bytes: bytes,
        combine_threshold_count: count,
        combine_by_dim: true,
    }
}

/// Collect (operand payload sum, operand count) for every combined op.
fn combined_ops(module: &Module) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for graph in module.graphs() {
        for id in graph.definition_order() {
            let op = graph.op(id).unwrap();
            if matches!(op.kind, OpKind::CombinedAllGather(_)) {
                let bytes = op
                    .inputs
                    .iter()
                    .map(|&v| graph.value(v).unwrap().byte_size().unwrap())
                    .sum();
                out.push((bytes, op.inputs.len()));
            }
        }
    }
    out
}

#[test]
fn test_threshold_scenario_100_150_120() {
    init_tracing();

    // 100 + 150 fit under 300; adding 120 would exceed it, so the third op
    // opens its own group and stays uncombined.
    let mut module = gather_module(&[100, 150, 120]);
    let combiner = CollectiveCombiner::new(config(300, 10));

    let changed = combiner.run_module(&mut module).unwrap();
    assert!(changed);

    let graph = module.graphs().next().unwrap();
    graph.validate().unwrap();

    assert_eq!(combined_ops(&module), vec![(250, 2)]);

    // The 120-byte gather survives untouched.
    let remaining: Vec<_> = graph
        .definition_order()
        .into_iter()
        .filter(|&id| matches!(graph.op(id).unwrap().kind, OpKind::AllGather(_)))
        .collect();
    assert_eq!(remaining.len(), 1);
    assert_eq!(graph.op(remaining[0]).unwrap().name, "ag2");
}

#[test]
fn test_oversized_op_stays_uncombined() {
    init_tracing();

    let mut module = gather_module(&[500]);
    let combiner = CollectiveCombiner::new(config(300, 10));

    let changed = combiner.run_module(&mut module).unwrap();
    assert!(!changed);

    let graph = module.graphs().next().unwrap();
    assert_eq!(graph.op_count(), 1);
    assert!(combined_ops(&module).is_empty());
}

#[test]
fn test_differing_topologies_never_group() {
    init_tracing();

    let mut b = GraphBuilder::new("main");
    let x = b.input("x", DataType::U8, Shape::Static(vec![50]));
    let y = b.input("y", DataType::U8, Shape::Static(vec![50]));
    b.all_gather("ag0", x, CollectiveAttrs::new(topo(), 0))
        .unwrap();
    b.all_gather(
        "ag1",
        y,
        CollectiveAttrs::new(TopologyDescriptor::replica_local(vec![vec![2, 3]]), 0),
    )
    .unwrap();
    let mut module = Module::new("m");
    module.add_graph(b.finish());

    let combiner = CollectiveCombiner::new(config(300, 10));
    let changed = combiner.run_module(&mut module).unwrap();
    assert!(!changed);
}

#[test]
fn test_thresholds_hold_for_all_combined_ops() {
    init_tracing();

    let sizes: Vec<usize> = (0..20).map(|i| 10 + 7 * i).collect();
    let mut module = gather_module(&sizes);
    let combiner = CollectiveCombiner::new(config(200, 4));
    combiner.run_module(&mut module).unwrap();

    for (bytes, count) in combined_ops(&module) {
        assert!(bytes <= 200, "combined payload {} exceeds threshold", bytes);
        assert!(count <= 4, "combined count {} exceeds threshold", count);
        assert!(count >= 2, "singleton group was rewritten");
    }
}

#[test]
fn test_dependent_gathers_never_combine() {
    init_tracing();

    // ag1 consumes ag0's result through an intermediate compute op.
    let mut b = GraphBuilder::new("main");
    let x = b.input("x", DataType::F32, Shape::Static(vec![4]));
    let g0 = b
        .all_gather("ag0", x, CollectiveAttrs::new(topo(), 0))
        .unwrap();
    let mid = b
        .compute("mid", "Relu", &[g0], DataType::F32, Shape::Static(vec![8]))
        .unwrap();
    let g1 = b
        .all_gather("ag1", mid, CollectiveAttrs::new(topo(), 0))
        .unwrap();
    b.output(g1);
    let mut module = Module::new("m");
    module.add_graph(b.finish());

    let combiner = CollectiveCombiner::new(CombinerConfig::default());
    let changed = combiner.run_module(&mut module).unwrap();
    assert!(!changed);
}

#[test]
fn test_slices_preserve_member_results() {
    init_tracing();

    let mut b = GraphBuilder::new("main");
    let shapes = [vec![4, 2], vec![3, 2], vec![5, 2]];
    for (i, dims) in shapes.iter().enumerate() {
        let x = b.input(
            format!("x{}", i),
            DataType::F32,
            Shape::Static(dims.clone()),
        );
        let g = b
            .all_gather(&format!("ag{}", i), x, CollectiveAttrs::new(topo(), 0))
            .unwrap();
        b.output(g);
    }
    let mut module = Module::new("m");
    module.add_graph(b.finish());

    // Original gathered shapes, in definition order.
    let original: Vec<Shape> = {
        let graph = module.graphs().next().unwrap();
        graph
            .outputs
            .iter()
            .map(|&v| graph.value(v).unwrap().shape.clone())
            .collect()
    };

    let combiner = CollectiveCombiner::new(CombinerConfig::default());
    assert!(combiner.run_module(&mut module).unwrap());

    let graph = module.graphs().next().unwrap();
    graph.validate().unwrap();

    // Every former consumer edge (here: graph outputs) now reads a slice
    // whose shape matches the original result, and the slice ranges tile
    // the combined dimension exactly, in member order.
    let mut expected_start = 0;
    for (i, &output) in graph.outputs.iter().enumerate() {
        assert_eq!(graph.value(output).unwrap().shape, original[i]);

        let producer = graph.producer(output).unwrap();
        let op = graph.op(producer).unwrap();
        match &op.kind {
            OpKind::Slice(attrs) => {
                assert_eq!(attrs.dim, 0);
                assert_eq!(attrs.start, expected_start);
                assert_eq!(attrs.len, original[i].as_static().unwrap()[0]);
                assert_eq!(attrs.origin.as_ref(), Some(&topo()));
                expected_start += attrs.len;
            }
            other => panic!("output producer is {:?}, expected slice", other),
        }
    }

    // The combined result is the member results concatenated along the
    // shared gather dimension: [8, 2] ++ [6, 2] ++ [10, 2] = [24, 2].
    let (_, combined) = graph
        .ops()
        .find(|(_, op)| matches!(op.kind, OpKind::CombinedAllGather(_)))
        .unwrap();
    assert_eq!(
        graph.value(combined.output).unwrap().shape,
        Shape::Static(vec![expected_start, 2])
    );
}

#[test]
fn test_idempotent_up_to_threshold() {
    init_tracing();

    let mut module = gather_module(&[100, 100, 100, 100, 100]);
    let combiner = CollectiveCombiner::new(config(250, 10));

    assert!(combiner.run_module(&mut module).unwrap());
    let after_first: Vec<String> = module.graphs().map(to_dot).collect();

    // Second run finds only combined ops and leftover singletons.
    assert!(!combiner.run_module(&mut module).unwrap());
    let after_second: Vec<String> = module.graphs().map(to_dot).collect();
    assert_eq!(after_first, after_second);
}

#[test]
fn test_deterministic_output() {
    init_tracing();

    let sizes: Vec<usize> = (0..30).map(|i| 5 + 13 * (i % 7)).collect();
    let combiner = CollectiveCombiner::new(config(120, 3));

    let mut first = gather_module(&sizes);
    let mut second = gather_module(&sizes);
    combiner.run_module(&mut first).unwrap();
    combiner.run_module(&mut second).unwrap();

    let a: Vec<String> = first.graphs().map(to_dot).collect();
    let b: Vec<String> = second.graphs().map(to_dot).collect();
    assert_eq!(a, b);
}

#[test]
fn test_malformed_collective_fails_without_mutation() {
    init_tracing();

    use garnet_ir::{Graph, Op, Value};

    // Two combinable gathers followed by one with an empty participant set.
    let mut graph = Graph::new("main");
    for i in 0..2 {
        let x = graph.add_value(Value::new(
            format!("x{}", i),
            DataType::U8,
            Shape::Static(vec![10]),
        ));
        let out = graph.add_value(Value::new(
            format!("g{}", i),
            DataType::U8,
            Shape::Static(vec![20]),
        ));
        graph
            .add_op(Op::new(
                format!("ag{}", i),
                OpKind::AllGather(CollectiveAttrs::new(topo(), 0)),
                vec![x],
                out,
            ))
            .unwrap();
    }
    let x = graph.add_value(Value::new("xbad", DataType::U8, Shape::Static(vec![10])));
    let out = graph.add_value(Value::new("gbad", DataType::U8, Shape::Static(vec![10])));
    graph
        .add_op(Op::new(
            "bad",
            OpKind::AllGather(CollectiveAttrs::new(
                TopologyDescriptor::replica_local(vec![]),
                0,
            )),
            vec![x],
            out,
        ))
        .unwrap();

    let mut module = Module::new("m");
    module.add_graph(graph);
    let before: Vec<String> = module.graphs().map(to_dot).collect();

    let combiner = CollectiveCombiner::new(CombinerConfig::default());
    let err = combiner.run_module(&mut module).unwrap_err();
    assert!(err.to_string().contains("bad"));

    // The failing graph is untouched: the two healthy gathers were not
    // combined either.
    let after: Vec<String> = module.graphs().map(to_dot).collect();
    assert_eq!(before, after);
}

#[test]
fn test_module_with_multiple_graphs() {
    init_tracing();

    let mut module = Module::new("m");
    for name in ["first", "second"] {
        let mut b = GraphBuilder::new(name);
        let x = b.input("x", DataType::U8, Shape::Static(vec![10]));
        let y = b.input("y", DataType::U8, Shape::Static(vec![10]));
        let gx = b
            .all_gather("agx", x, CollectiveAttrs::new(topo(), 0))
            .unwrap();
        let gy = b
            .all_gather("agy", y, CollectiveAttrs::new(topo(), 0))
            .unwrap();
        b.output(gx);
        b.output(gy);
        module.add_graph(b.finish());
    }

    let combiner = CollectiveCombiner::new(CombinerConfig::default());
    assert!(combiner.run_module(&mut module).unwrap());

    for graph in module.graphs() {
        graph.validate().unwrap();
        assert_eq!(graph.op_count(), 3);
    }
}
