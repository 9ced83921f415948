//! JSON debug dump of a constructed graph.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::graph::{GraphId, GraphStore};

#[derive(Serialize)]
struct DumpNode {
    name: String,
    node_type: String,
    inputs: Vec<Option<String>>,
    ctrl_inputs: Vec<String>,
    out_num: usize,
    subgraphs: Vec<String>,
}

#[derive(Serialize)]
struct DumpGraph {
    name: String,
    nodes: Vec<DumpNode>,
}

/// Renders `graph` as a JSON value with edges written as `"producer:index"`.
pub fn graph_to_json(store: &GraphStore, graph: GraphId) -> Result<Value> {
    let mut nodes = Vec::new();
    for &id in store.graph_nodes(graph) {
        let node = store.node(id);
        let inputs = (0..node.in_data_num())
            .map(|anchor| {
                node.in_data_peer(anchor)
                    .map(|peer| format!("{}:{}", store.node(peer.node).name(), peer.index))
            })
            .collect();
        let ctrl_inputs = node
            .in_ctrl()
            .iter()
            .map(|src| store.node(*src).name().to_string())
            .collect();
        let subgraphs = node
            .subgraphs()
            .iter()
            .map(|sub| store.graph_name(*sub).to_string())
            .collect();
        nodes.push(DumpNode {
            name: node.name().to_string(),
            node_type: node.node_type().to_string(),
            inputs,
            ctrl_inputs,
            out_num: node.out_num(),
            subgraphs,
        });
    }
    let dump = DumpGraph {
        name: store.graph_name(graph).to_string(),
        nodes,
    };
    Ok(serde_json::to_value(dump)?)
}
