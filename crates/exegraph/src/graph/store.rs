use anyhow::{anyhow, bail, ensure, Result};
use once_cell::unsync::OnceCell;
use smallvec::smallvec;

use crate::graph::node::{AttrMap, Endpoint, ExeNode};

/// Stable handle to a node in a [`GraphStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Stable handle to a graph in a [`GraphStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(pub u32);

/// One graph: an ordered node set, an optional owning parent node, and the
/// lazily created output sink.
#[derive(Debug, Default)]
pub(crate) struct GraphRecord {
    pub(crate) name: String,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) sink: OnceCell<NodeId>,
    pub(crate) attrs: AttrMap,
}

/// Arena owning every graph and node of one lowering session.
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: Vec<ExeNode>,
    graphs: Vec<GraphRecord>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new, empty graph. `parent` is the node owning it as a
    /// subgraph, or `None` for a root or island graph.
    pub fn add_graph(&mut self, name: impl Into<String>, parent: Option<NodeId>) -> GraphId {
        let id = GraphId(self.graphs.len() as u32);
        self.graphs.push(GraphRecord {
            name: name.into(),
            nodes: Vec::new(),
            parent,
            sink: OnceCell::new(),
            attrs: AttrMap::default(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.0 as usize].subgraphs.push(id);
        }
        id
    }

    /// Adds a node with `in_count` empty data in-anchors and `out_count`
    /// out anchors to `graph`.
    pub fn add_node(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        node_type: impl Into<String>,
        in_count: usize,
        out_count: usize,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(ExeNode {
            name: name.into(),
            node_type: node_type.into(),
            graph,
            in_data: smallvec![None; in_count],
            in_ctrl: Vec::new(),
            out_count,
            attrs: AttrMap::default(),
            out_attrs: vec![AttrMap::default(); out_count],
            subgraphs: Vec::new(),
        });
        self.graphs[graph.0 as usize].nodes.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &ExeNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ExeNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn graph_name(&self, id: GraphId) -> &str {
        &self.graphs[id.0 as usize].name
    }

    /// Nodes of `graph` in insertion order.
    pub fn graph_nodes(&self, id: GraphId) -> &[NodeId] {
        &self.graphs[id.0 as usize].nodes
    }

    /// Node owning `graph` as a subgraph, if any.
    pub fn parent_node(&self, id: GraphId) -> Option<NodeId> {
        self.graphs[id.0 as usize].parent
    }

    pub fn graph_attrs(&self, id: GraphId) -> &AttrMap {
        &self.graphs[id.0 as usize].attrs
    }

    pub fn graph_attrs_mut(&mut self, id: GraphId) -> &mut AttrMap {
        &mut self.graphs[id.0 as usize].attrs
    }

    /// First node of `graph` with the given type, in insertion order.
    pub fn find_first_node_by_type(&self, graph: GraphId, node_type: &str) -> Option<NodeId> {
        self.graphs[graph.0 as usize]
            .nodes
            .iter()
            .copied()
            .find(|id| self.node(*id).node_type == node_type)
    }

    /// The graph's output sink, if it has been created.
    pub fn sink(&self, graph: GraphId) -> Option<NodeId> {
        self.graphs[graph.0 as usize].sink.get().copied()
    }

    /// Returns the graph's output sink, creating a node of `sink_type` with
    /// `in_count` anchors on first use. Find-or-create is idempotent: an
    /// existing sink of the right type is reused even if it was added before
    /// this call.
    pub fn get_or_create_sink(
        &mut self,
        graph: GraphId,
        sink_type: &str,
        in_count: usize,
    ) -> NodeId {
        if let Some(id) = self.graphs[graph.0 as usize].sink.get() {
            return *id;
        }
        let existing = self.find_first_node_by_type(graph, sink_type);
        let id = match existing {
            Some(id) => id,
            None => self.add_node(graph, sink_type, sink_type, in_count, 0),
        };
        // The cell was empty above and nothing else sets it concurrently.
        let _ = self.graphs[graph.0 as usize].sink.set(id);
        id
    }

    /// Wires `src:src_index -> dst:dst_index`. The destination anchor must
    /// exist and be free; the source anchor must exist.
    pub fn add_data_edge(
        &mut self,
        src: NodeId,
        src_index: usize,
        dst: NodeId,
        dst_index: usize,
    ) -> Result<()> {
        ensure!(
            src_index < self.node(src).out_count,
            "no out anchor {} on node {}",
            src_index,
            self.node(src).name
        );
        let dst_node = &mut self.nodes[dst.0 as usize];
        let anchor = dst_node
            .in_data
            .get_mut(dst_index)
            .ok_or_else(|| anyhow!("no in anchor {} on node {}", dst_index, dst_node.name))?;
        ensure!(
            anchor.is_none(),
            "in anchor {} of node {} is already wired",
            dst_index,
            dst_node.name
        );
        *anchor = Some(Endpoint {
            node: src,
            index: src_index as u32,
        });
        Ok(())
    }

    /// Adds a control edge `src -> dst`; repeated edges collapse to one.
    pub fn add_control_edge(&mut self, src: NodeId, dst: NodeId) -> Result<()> {
        ensure!(src != dst, "control edge to self on {}", self.node(src).name);
        let dst_node = &mut self.nodes[dst.0 as usize];
        if !dst_node.in_ctrl.contains(&src) {
            dst_node.in_ctrl.push(src);
        }
        Ok(())
    }

    /// Grows `node`'s data in-anchors to `new_total`. Anchor counts never
    /// shrink.
    pub fn append_input_anchors(&mut self, node: NodeId, new_total: usize) -> Result<()> {
        let n = &mut self.nodes[node.0 as usize];
        ensure!(
            new_total >= n.in_data.len(),
            "cannot shrink in anchors of {} from {} to {}",
            n.name,
            n.in_data.len(),
            new_total
        );
        n.in_data.resize(new_total, None);
        Ok(())
    }

    /// Grows `node`'s out anchors to `new_total`. Anchor counts never
    /// shrink.
    pub fn append_output_anchors(&mut self, node: NodeId, new_total: usize) -> Result<()> {
        let n = &mut self.nodes[node.0 as usize];
        ensure!(
            new_total >= n.out_count,
            "cannot shrink out anchors of {} from {} to {}",
            n.name,
            n.out_count,
            new_total
        );
        n.out_count = new_total;
        n.out_attrs.resize(new_total, AttrMap::default());
        Ok(())
    }

    /// Consumers of `src:out_index`: every `(node, in_anchor)` in `src`'s
    /// graph wired to that endpoint.
    pub fn out_data_consumers(&self, src: NodeId, out_index: usize) -> Vec<(NodeId, usize)> {
        let graph = self.node(src).graph;
        let mut consumers = Vec::new();
        for &candidate in &self.graphs[graph.0 as usize].nodes {
            for (anchor, peer) in self.node(candidate).in_data.iter().enumerate() {
                if let Some(peer) = peer {
                    if peer.node == src && peer.index as usize == out_index {
                        consumers.push((candidate, anchor));
                    }
                }
            }
        }
        consumers
    }

    /// Moves every node of `src` into `dst`, preserving insertion order.
    /// `src` must not be owned by a parent node and becomes empty.
    pub fn merge_graphs(&mut self, src: GraphId, dst: GraphId) -> Result<()> {
        ensure!(src != dst, "cannot merge a graph into itself");
        ensure!(
            self.graphs[src.0 as usize].parent.is_none(),
            "cannot merge subgraph {} away from its parent node",
            self.graphs[src.0 as usize].name
        );
        let moved = std::mem::take(&mut self.graphs[src.0 as usize].nodes);
        for &id in &moved {
            self.nodes[id.0 as usize].graph = dst;
        }
        self.graphs[dst.0 as usize].nodes.extend(moved);
        Ok(())
    }

    /// Relocates one node into `dst`, detaching it from its current graph.
    pub fn move_node_to_graph(&mut self, node: NodeId, dst: GraphId) -> Result<()> {
        let src = self.node(node).graph;
        if src == dst {
            return Ok(());
        }
        let name = self.nodes[node.0 as usize].name.clone();
        let src_nodes = &mut self.graphs[src.0 as usize].nodes;
        let pos = src_nodes
            .iter()
            .position(|&id| id == node)
            .ok_or_else(|| anyhow!("node {} is not in its owning graph", name))?;
        src_nodes.remove(pos);
        self.nodes[node.0 as usize].graph = dst;
        self.graphs[dst.0 as usize].nodes.push(node);
        Ok(())
    }

    /// Drops every in-edge of `node` whose source lives in `graph`.
    /// Used when a node is relocated out of the subgraph it was built in.
    pub fn clear_in_edges_from_graph(&mut self, node: NodeId, graph: GraphId) -> Result<()> {
        let sources: Vec<Option<Endpoint>> = self.nodes[node.0 as usize].in_data.to_vec();
        for (anchor, peer) in sources.into_iter().enumerate() {
            if let Some(peer) = peer {
                if self.node(peer.node).graph == graph {
                    self.nodes[node.0 as usize].in_data[anchor] = None;
                }
            }
        }
        let ctrl: Vec<NodeId> = self.nodes[node.0 as usize].in_ctrl.clone();
        let keep: Vec<NodeId> = ctrl
            .into_iter()
            .filter(|src| self.node(*src).graph != graph)
            .collect();
        self.nodes[node.0 as usize].in_ctrl = keep;
        Ok(())
    }

    /// Validates that wiring `src` into a node of `dst_graph` is legal, and
    /// reports whether the source's island graph must be merged first.
    ///
    /// Wiring out of a parented subgraph into a different graph is the
    /// wrong direction: subgraph outputs are only exported through the
    /// sink/parent-anchor plumbing.
    pub fn classify_cross_graph(&self, src: NodeId, dst_graph: GraphId) -> Result<CrossGraph> {
        let src_graph = self.node(src).graph;
        if src_graph == dst_graph {
            return Ok(CrossGraph::SameGraph);
        }
        if self.graphs[src_graph.0 as usize].parent.is_some() {
            bail!(
                "node {} lives in subgraph {} and cannot feed graph {} directly",
                self.node(src).name,
                self.graphs[src_graph.0 as usize].name,
                self.graphs[dst_graph.0 as usize].name
            );
        }
        Ok(CrossGraph::MergeFrom(src_graph))
    }
}

/// Result of [`GraphStore::classify_cross_graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossGraph {
    SameGraph,
    MergeFrom(GraphId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_sink_is_idempotent() {
        let mut store = GraphStore::new();
        let graph = store.add_graph("g", None);
        let first = store.get_or_create_sink(graph, "NetOutput", 2);
        let second = store.get_or_create_sink(graph, "NetOutput", 5);
        assert_eq!(first, second);
        assert_eq!(store.node(first).in_data_num(), 2);
    }

    #[test]
    fn anchor_counts_only_grow() {
        let mut store = GraphStore::new();
        let graph = store.add_graph("g", None);
        let node = store.add_node(graph, "n", "T", 1, 1);
        store.append_output_anchors(node, 3).unwrap();
        assert_eq!(store.node(node).out_num(), 3);
        assert!(store.append_output_anchors(node, 2).is_err());
        assert!(store.append_input_anchors(node, 0).is_err());
    }

    #[test]
    fn data_edges_refuse_occupied_anchors() {
        let mut store = GraphStore::new();
        let graph = store.add_graph("g", None);
        let a = store.add_node(graph, "a", "T", 0, 1);
        let b = store.add_node(graph, "b", "T", 0, 1);
        let c = store.add_node(graph, "c", "T", 1, 0);
        store.add_data_edge(a, 0, c, 0).unwrap();
        assert!(store.add_data_edge(b, 0, c, 0).is_err());
        assert!(store.add_data_edge(a, 1, c, 0).is_err());
    }

    #[test]
    fn merge_refuses_parented_subgraphs() {
        let mut store = GraphStore::new();
        let root = store.add_graph("root", None);
        let owner = store.add_node(root, "call", "PartitionedCall", 0, 0);
        let sub = store.add_graph("sub", Some(owner));
        assert!(store.merge_graphs(sub, root).is_err());

        let island = store.add_graph("island", None);
        let node = store.add_node(island, "n", "T", 0, 1);
        store.merge_graphs(island, root).unwrap();
        assert_eq!(store.node(node).graph(), root);
        assert!(store.graph_nodes(island).is_empty());
        assert!(store.graph_nodes(root).contains(&node));
    }

    #[test]
    fn out_data_consumers_reports_anchor_pairs() {
        let mut store = GraphStore::new();
        let graph = store.add_graph("g", None);
        let src = store.add_node(graph, "src", "T", 0, 2);
        let dst = store.add_node(graph, "dst", "T", 2, 0);
        store.add_data_edge(src, 1, dst, 0).unwrap();
        store.add_data_edge(src, 0, dst, 1).unwrap();
        assert_eq!(store.out_data_consumers(src, 1), vec![(dst, 0)]);
        assert_eq!(store.out_data_consumers(src, 0), vec![(dst, 1)]);
        assert!(store.out_data_consumers(src, 2).is_empty());
    }
}
