use std::rc::Rc;

use exegraph::graph::types::{
    ATTR_COMPUTE_NODE_INDEX, ATTR_CONST_VALUE, ATTR_FEED_INDEX, ATTR_IS_STRING,
    ATTR_KERNEL_EXTEND_INDEX, ATTR_REF_FROM_INDEX, ATTR_REF_FROM_NODE, ATTR_STAGE, CONST, DATA,
    NET_OUTPUT,
};
use exegraph::graph::types::RunStage;
use exegraph::ir::{DataType, Format, IrInputKind, OpDesc, TensorDesc};
use exegraph::lowering::{ExecuteGraphBuilder, LoweringSession};

fn td() -> TensorDesc {
    TensorDesc::new(DataType::Float, Format::Nd, Format::Nd)
}

#[test]
fn data_output_returns_one_holder_per_output_in_order() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let feed = session.create_feed(0).unwrap();
    let holders = session
        .create_data_output("SplitLike", &[feed], 3)
        .unwrap();

    assert_eq!(holders.len(), 3);
    let node = holders[0].node().unwrap();
    for (index, holder) in holders.iter().enumerate() {
        assert_eq!(holder.node(), Some(node));
        assert_eq!(holder.out_index(), index as i32);
        assert!(holder.is_ok());
    }
}

#[test]
fn const_feed_and_data_output_wire_the_expected_topology() {
    let mut session = LoweringSession::new();
    let graph = session.push_graph_frame();

    let konst = session.create_const(b"\x01\x00\x00\x00", false).unwrap();
    let feed = session.create_feed(0).unwrap();
    let holders = session
        .create_data_output("TestNode", &[feed.clone(), konst.clone()], 3)
        .unwrap();

    let store = session.store();
    assert_eq!(store.graph_nodes(graph).len(), 3);
    let types: Vec<&str> = store
        .graph_nodes(graph)
        .iter()
        .map(|&id| store.node(id).node_type())
        .collect();
    assert_eq!(types, vec![CONST, DATA, "TestNode"]);

    let test_node = store.node(holders[0].node().unwrap());
    let peer0 = test_node.in_data_peer(0).unwrap();
    let peer1 = test_node.in_data_peer(1).unwrap();
    assert_eq!(store.node(peer0.node).node_type(), DATA);
    assert_eq!(store.node(peer1.node).node_type(), CONST);
    assert_eq!(peer0.index, 0);
    assert_eq!(peer1.index, 0);
}

#[test]
fn const_and_feed_payloads_land_in_attributes() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let konst = session.create_const(b"payload", true).unwrap();
    let feed = session.create_feed(7).unwrap();

    let store = session.store();
    let const_node = store.node(konst.node().unwrap());
    assert_eq!(const_node.attrs().get_bytes(ATTR_CONST_VALUE), Some(&b"payload"[..]));
    assert_eq!(const_node.attrs().get_bool(ATTR_IS_STRING), Some(true));

    let feed_node = store.node(feed.node().unwrap());
    assert_eq!(feed_node.attrs().get_int(ATTR_FEED_INDEX), Some(7));
}

#[test]
fn void_nodes_produce_control_only_holders() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let feed = session.create_feed(0).unwrap();
    let barrier = session.create_void("Sync", &[feed]).unwrap();

    assert!(barrier.is_control_only());
    assert_eq!(barrier.out_index(), -1);
    let node = session.store().node(barrier.node().unwrap());
    assert_eq!(node.out_num(), 0);
    assert_eq!(node.in_data_num(), 1);
}

#[test]
fn error_holders_are_values_not_nodes() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let error = session.create_error(format!("unsupported op {}", "Conv3D"));
    assert!(!error.is_ok());
    assert_eq!(error.error(), Some("unsupported op Conv3D"));
    assert!(error.node().is_none());

    // An error holder aborts the whole node creation.
    let result = session.create_single_data_output("Add", &[error.clone()]);
    assert!(result.is_err());

    let feed = session.create_feed(0).unwrap();
    assert!(session.add_dependency(&error, &feed).is_err());
    assert!(session.add_dependency(&feed, &error).is_err());
}

#[test]
fn add_dependency_creates_a_control_edge() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let first = session.create_feed(0).unwrap();
    let second = session.create_feed(1).unwrap();
    session.add_dependency(&first, &second).unwrap();

    let dst = session.store().node(second.node().unwrap());
    assert_eq!(dst.in_ctrl(), &[first.node().unwrap()]);
}

#[test]
fn ref_from_records_the_alias_on_the_output_descriptor() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let feed = session.create_feed(0).unwrap();
    let source = session.create_single_data_output("Alloc", &[]).unwrap();
    let view = session
        .create_single_data_output("View", &[feed])
        .unwrap();
    session.ref_from(&view, &source).unwrap();

    let store = session.store();
    let source_name = store.node(source.node().unwrap()).name().to_string();
    let attrs = store
        .node(view.node().unwrap())
        .output_attrs(0)
        .unwrap();
    assert_eq!(attrs.get_str(ATTR_REF_FROM_NODE), Some(source_name.as_str()));
    assert_eq!(attrs.get_int(ATTR_REF_FROM_INDEX), Some(0));

    // Control-only holders have no output descriptor to alias.
    let void = session.create_void("Sync", &[]).unwrap();
    assert!(session.ref_from(&void, &source).is_err());
}

#[test]
fn set_stage_tags_the_node() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let feed = session.create_feed(0).unwrap();
    session.set_stage(&feed, RunStage::Init).unwrap();
    let node = session.store().node(feed.node().unwrap());
    assert_eq!(node.attrs().get_int(ATTR_STAGE), Some(RunStage::Init as i64));
}

#[test]
fn islands_merge_into_one_graph_when_wired_together() {
    let mut session = LoweringSession::new();

    // No frame pushed: each creation opens its own island.
    let left = session.create_const(&[1u8], false).unwrap();
    let right = session.create_const(&[2u8], false).unwrap();
    assert_ne!(
        session.holder_graph(&left),
        session.holder_graph(&right)
    );

    let sum = session
        .create_single_data_output("Add", &[left.clone(), right.clone()])
        .unwrap();

    let graph = session.holder_graph(&sum).unwrap();
    assert_eq!(session.holder_graph(&left), Some(graph));
    assert_eq!(session.holder_graph(&right), Some(graph));
    assert_eq!(session.store().graph_nodes(graph).len(), 3);
}

#[test]
fn islands_adopted_by_a_framed_graph_get_extend_indices() {
    let mut session = LoweringSession::new();
    let island_const = session.create_const(&[9u8], false).unwrap();
    assert!(session
        .store()
        .node(island_const.node().unwrap())
        .attrs()
        .get_int(ATTR_KERNEL_EXTEND_INDEX)
        .is_none());

    let graph = session.push_graph_frame();
    let consumer = session
        .create_single_data_output("Identity", &[island_const.clone()])
        .unwrap();

    assert_eq!(session.holder_graph(&island_const), Some(graph));
    let store = session.store();
    assert!(store
        .node(island_const.node().unwrap())
        .attrs()
        .get_int(ATTR_KERNEL_EXTEND_INDEX)
        .is_some());
    assert!(store
        .node(consumer.node().unwrap())
        .attrs()
        .get_int(ATTR_KERNEL_EXTEND_INDEX)
        .is_some());
}

#[test]
fn current_compute_node_drives_compute_node_index() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let op = Rc::new(
        OpDesc::new("matmul_1", "MatMul")
            .add_ir_input("x1", IrInputKind::Required)
            .add_ir_input("x2", IrInputKind::Required)
            .add_input("x1", td())
            .add_input("x2", td())
            .add_output(td()),
    );
    session.set_current_compute_node(Some(op.clone())).unwrap();

    let tiling = session.create_single_data_output("Tiling", &[]).unwrap();
    let launch = session.create_single_data_output("Launch", &[tiling.clone()]).unwrap();

    let store = session.store();
    let tiling_index = store
        .node(tiling.node().unwrap())
        .attrs()
        .get_int(ATTR_COMPUTE_NODE_INDEX)
        .unwrap();
    let launch_index = store
        .node(launch.node().unwrap())
        .attrs()
        .get_int(ATTR_COMPUTE_NODE_INDEX)
        .unwrap();
    // Both exe nodes map to the same compute node's info record.
    assert_eq!(tiling_index, launch_index);

    session.set_current_compute_node(None).unwrap();
    let loose = session.create_single_data_output("Loose", &[]).unwrap();
    assert!(session
        .store()
        .node(loose.node().unwrap())
        .attrs()
        .get_int(ATTR_COMPUTE_NODE_INDEX)
        .is_none());
}

#[test]
fn scoped_compute_node_restores_the_previous_association() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let outer = Rc::new(OpDesc::new("outer", "Outer").add_output(td()));
    let inner = Rc::new(OpDesc::new("inner", "Inner").add_output(td()));
    session.set_current_compute_node(Some(outer.clone())).unwrap();

    session
        .with_scoped_compute_node(inner, |session| {
            let node = session.create_single_data_output("Scoped", &[])?;
            Ok(node)
        })
        .unwrap();

    let current = session
        .current_frame()
        .unwrap()
        .current_compute_node()
        .unwrap()
        .name()
        .to_string();
    assert_eq!(current, "outer");
}

#[test]
fn build_execute_graph_wires_netoutput_and_serializes_pools() {
    use exegraph::graph::types::{
        ATTR_BUFFER, ATTR_COMPUTE_NODE_INFO, ATTR_KERNEL_EXTEND_INFO, ATTR_MODEL_DESC,
    };

    let mut session = LoweringSession::new();
    session.push_graph_frame();

    let feed = session.create_feed(0).unwrap();
    let out = session.create_single_data_output("Square", &[feed]).unwrap();
    let sync = session.create_void("Sync", &[]).unwrap();

    let graph = ExecuteGraphBuilder::new()
        .set_outputs(vec![out.clone()])
        .set_targets(vec![sync.clone()])
        .build(&mut session)
        .unwrap();

    let store = session.store();
    let netoutput = store.find_first_node_by_type(graph, NET_OUTPUT).unwrap();
    let sink = store.node(netoutput);
    assert_eq!(sink.in_data_peer(0).unwrap().node, out.node().unwrap());
    assert_eq!(sink.in_ctrl(), &[sync.node().unwrap()]);

    let attrs = store.graph_attrs(graph);
    for key in [
        ATTR_BUFFER,
        ATTR_COMPUTE_NODE_INFO,
        ATTR_KERNEL_EXTEND_INFO,
        ATTR_MODEL_DESC,
    ] {
        assert!(attrs.get_bytes(key).is_some(), "missing graph attr {key}");
    }
    assert_eq!(session.frame_count(), 0);
}

#[test]
fn build_execute_graph_without_outputs_fails() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();
    let result = ExecuteGraphBuilder::new().build(&mut session);
    assert!(result.is_err());
}

#[test]
fn build_execute_graph_rejects_non_root_frames() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();
    session.push_graph_frame();
    let feed = session.create_feed(0).unwrap();
    let result = ExecuteGraphBuilder::new()
        .set_outputs(vec![feed])
        .build(&mut session);
    assert!(result.is_err());
}
