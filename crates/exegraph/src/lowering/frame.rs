use std::collections::HashMap;

use crate::graph::types::{FIRST_EXEC_STAGE_COUNT, LAST_EXEC_STAGE_COUNT};
use crate::graph::GraphId;
use crate::ir::ComputeNode;
use crate::lowering::buffer_pool::BufferPool;
use crate::lowering::value_holder::ValueHolder;

/// The four build-wide interning pools, owned by the root frame alone.
#[derive(Debug, Default)]
pub struct FramePools {
    /// Strings and const payloads.
    pub buffer_pool: BufferPool,
    /// One serialized ComputeNodeInfo per distinct compute node.
    pub compute_node_infos: BufferPool,
    /// One serialized KernelExtendInfo per exe node.
    pub kernel_extend_infos: BufferPool,
    /// Model descriptors.
    pub model_descs: BufferPool,
}

/// One stack entry: the exe-subgraph currently under construction plus its
/// bookkeeping. Only the bottom (root) frame owns the pools; child frames
/// reach them through the session, which guarantees the root outlives them
/// by stack discipline.
#[derive(Debug)]
pub struct GraphFrame {
    graph: GraphId,
    current_compute_node: Option<ComputeNode>,
    pub(crate) node_names_to_index: HashMap<String, usize>,
    pub(crate) last_exec_node: Option<ValueHolder>,
    pub(crate) first_pcalls: [Option<ValueHolder>; FIRST_EXEC_STAGE_COUNT],
    pub(crate) last_pcalls: [Option<ValueHolder>; LAST_EXEC_STAGE_COUNT],
    pub(crate) pools: Option<FramePools>,
}

impl GraphFrame {
    pub(crate) fn root(graph: GraphId) -> Self {
        Self {
            graph,
            current_compute_node: None,
            node_names_to_index: HashMap::new(),
            last_exec_node: None,
            first_pcalls: Default::default(),
            last_pcalls: Default::default(),
            pools: Some(FramePools::default()),
        }
    }

    pub(crate) fn child(graph: GraphId) -> Self {
        Self {
            graph,
            current_compute_node: None,
            node_names_to_index: HashMap::new(),
            last_exec_node: None,
            first_pcalls: Default::default(),
            last_pcalls: Default::default(),
            pools: None,
        }
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn is_root(&self) -> bool {
        self.pools.is_some()
    }

    /// The originating compute node subsequently created exe nodes are
    /// associated with.
    pub fn current_compute_node(&self) -> Option<&ComputeNode> {
        self.current_compute_node.as_ref()
    }

    pub(crate) fn set_current_compute_node(&mut self, node: Option<ComputeNode>) {
        self.current_compute_node = node;
    }

    /// ComputeNodeInfo index recorded for the current compute node, if any.
    pub(crate) fn current_node_index(&self) -> Option<usize> {
        let node = self.current_compute_node.as_ref()?;
        self.node_names_to_index.get(node.name()).copied()
    }

    /// Last node routed through `FrameSelector::on_main_root_last`.
    pub fn last_exec_node(&self) -> Option<&ValueHolder> {
        self.last_exec_node.as_ref()
    }
}
