use std::rc::Rc;

use exegraph::graph::types::{
    ATTR_BUFFER, ATTR_COMPUTE_NODE_INDEX, ATTR_COMPUTE_NODE_INFO, ATTR_KERNEL_EXTEND_INDEX,
    ATTR_KERNEL_EXTEND_INFO,
};
use exegraph::graph::graph_to_json;
use exegraph::ir::{AttrValue, DataType, Format, IrInputKind, OpDesc, TensorDesc};
use exegraph::lowering::{ExecuteGraphBuilder, LoweringSession};
use exegraph::runtime::{ComputeNodeInfo, ContinuousBuffer, KernelExtendInfo};

fn td() -> TensorDesc {
    TensorDesc::new(DataType::Float, Format::Nchw, Format::Nchw)
}

fn matmul_desc() -> Rc<OpDesc> {
    Rc::new(
        OpDesc::new("matmul_1", "MatMul")
            .add_ir_input("x1", IrInputKind::Required)
            .add_ir_input("x2", IrInputKind::Required)
            .add_ir_input("bias", IrInputKind::Optional)
            .add_input("x1", td())
            .add_input("x2", td())
            .add_output(td())
            .set_attr("transpose_x1", AttrValue::Bool(false))
            .set_attr("offset", AttrValue::Int(16)),
    )
}

#[test]
fn lowered_graph_attributes_are_directly_addressable() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();
    session.set_current_compute_node(Some(matmul_desc())).unwrap();

    let feed = session.create_feed(0).unwrap();
    let tiling = session
        .create_single_data_output("MatMulTiling", &[feed.clone()])
        .unwrap();
    let launch = session
        .create_single_data_output("MatMulLaunch", &[feed, tiling])
        .unwrap();

    let graph = ExecuteGraphBuilder::new()
        .set_outputs(vec![launch.clone()])
        .build(&mut session)
        .unwrap();

    let store = session.store();
    let attrs = store.graph_attrs(graph);
    let buffer_blob = attrs.get_bytes(ATTR_BUFFER).unwrap();
    let cni_blob = attrs.get_bytes(ATTR_COMPUTE_NODE_INFO).unwrap();
    let kei_blob = attrs.get_bytes(ATTR_KERNEL_EXTEND_INFO).unwrap();

    let buffer = ContinuousBuffer::parse(buffer_blob).unwrap();
    let cni_pool = ContinuousBuffer::parse(cni_blob).unwrap();
    let kei_pool = ContinuousBuffer::parse(kei_blob).unwrap();

    // One distinct compute node was referenced, so one record exists even
    // though two exe nodes map to it.
    assert_eq!(cni_pool.num(), 1);
    let launch_node = store.node(launch.node().unwrap());
    let info_index = launch_node.attrs().get_int(ATTR_COMPUTE_NODE_INDEX).unwrap();
    let info = ComputeNodeInfo::parse(cni_pool.get(info_index as usize).unwrap()).unwrap();
    assert_eq!(buffer.get_str(info.node_name_id() as usize), Some("matmul_1"));
    assert_eq!(buffer.get_str(info.node_type_id() as usize), Some("MatMul"));
    assert_eq!(info.ir_inputs_num(), 3);
    assert_eq!(info.inputs_num(), 2);
    assert_eq!(info.outputs_num(), 1);

    // The omitted optional input instantiated zero anchors.
    let bias = info.input_instance_info(2).unwrap();
    assert_eq!(bias.instantiation_num, 0);

    // Attr section holds the IR-ordered values.
    let ir_attrs = info.attrs();
    assert_eq!(ir_attrs.get_int(0), Some(0));
    assert_eq!(ir_attrs.get_int(1), Some(16));

    // Every exe node with a kernel-extend index resolves to its own name
    // and type through the shared buffer pool.
    for &id in store.graph_nodes(graph) {
        let node = store.node(id);
        let Some(index) = node.attrs().get_int(ATTR_KERNEL_EXTEND_INDEX) else {
            continue;
        };
        let record = KernelExtendInfo::parse(kei_pool.get(index as usize).unwrap()).unwrap();
        assert_eq!(
            buffer.get_str(record.kernel_name_id() as usize),
            Some(node.name()),
            "kernel name mismatch for {}",
            node.name()
        );
        assert_eq!(
            buffer.get_str(record.kernel_type_id() as usize),
            Some(node.node_type())
        );
    }
}

#[test]
fn identical_extend_records_intern_to_one_pool_entry() {
    let mut session = LoweringSession::new();
    session.push_graph_frame();

    // Two compute nodes with identical shape but different names produce
    // two records; re-setting the first reuses its entry.
    let a = Rc::new(OpDesc::new("a", "Relu").add_output(td()));
    let b = Rc::new(OpDesc::new("b", "Relu").add_output(td()));
    session.set_current_compute_node(Some(a.clone())).unwrap();
    session.create_single_data_output("K1", &[]).unwrap();
    session.set_current_compute_node(Some(b)).unwrap();
    session.create_single_data_output("K2", &[]).unwrap();
    session.set_current_compute_node(Some(a)).unwrap();
    let again = session.create_single_data_output("K3", &[]).unwrap();

    let graph = ExecuteGraphBuilder::new()
        .set_outputs(vec![again.clone()])
        .build(&mut session)
        .unwrap();

    let store = session.store();
    let cni_blob = store.graph_attrs(graph).get_bytes(ATTR_COMPUTE_NODE_INFO).unwrap();
    let pool = ContinuousBuffer::parse(cni_blob).unwrap();
    assert_eq!(pool.num(), 2);
    assert_eq!(
        store
            .node(again.node().unwrap())
            .attrs()
            .get_int(ATTR_COMPUTE_NODE_INDEX),
        Some(0)
    );
}

#[test]
fn graph_dump_renders_edges_as_producer_refs() {
    let mut session = LoweringSession::new();
    let graph = session.push_graph_frame();
    let feed = session.create_feed(0).unwrap();
    session.create_single_data_output("Sq", &[feed]).unwrap();

    let json = graph_to_json(session.store(), graph).unwrap();
    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[1]["node_type"], "Sq");
    let input = nodes[1]["inputs"][0].as_str().unwrap();
    assert!(input.ends_with(":0"));
}
