use anyhow::{anyhow, ensure, Result};

use crate::graph::types::{
    ExecuteGraphType, RunStage, ATTR_BUFFER, ATTR_COMPUTE_NODE_INDEX, ATTR_COMPUTE_NODE_INFO,
    ATTR_CONST_VALUE, ATTR_FEED_INDEX, ATTR_IS_STRING, ATTR_KERNEL_EXTEND_INDEX,
    ATTR_KERNEL_EXTEND_INFO, ATTR_MODEL_DESC, ATTR_REF_FROM_INDEX, ATTR_REF_FROM_NODE, ATTR_STAGE,
    CONST, DATA, NET_OUTPUT,
};
use crate::graph::{CrossGraph, GraphId, GraphStore, NodeId};
use crate::ir::{AttrValue, ComputeNode};
use crate::lowering::context_extend::{create_compute_node_info, create_kernel_extend_info};
use crate::lowering::frame::GraphFrame;
use crate::lowering::frame_selector::PcallSet;
use crate::lowering::value_holder::{MemKind, ValueHolder, ValueHolderKind, CONTROL_INDEX};
use crate::{trace, warning};

/// One lowering session: the graph arena, the frame stack, and the id
/// generator behind every node and holder created through it.
///
/// The session is the only construction context; there is no hidden global
/// or thread-local state. One session builds one exe-graph synchronously;
/// independent sessions are fully isolated.
pub struct LoweringSession {
    store: GraphStore,
    frames: Vec<GraphFrame>,
    redirects: Vec<usize>,
    next_id: u64,
}

impl Default for LoweringSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LoweringSession {
    pub fn new() -> Self {
        Self {
            store: GraphStore::new(),
            frames: Vec::new(),
            redirects: Vec::new(),
            next_id: 0,
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.store
    }

    pub(crate) fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ---- frame stack ----------------------------------------------------

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<&GraphFrame> {
        self.frames.get(index)
    }

    pub(crate) fn current_frame_index(&self) -> Option<usize> {
        if let Some(&index) = self.redirects.last() {
            return Some(index);
        }
        self.frames.len().checked_sub(1)
    }

    pub fn current_frame(&self) -> Option<&GraphFrame> {
        self.frames.get(self.current_frame_index()?)
    }

    /// Graph the next created node lands in, if a frame is active.
    pub fn current_graph(&self) -> Option<GraphId> {
        Some(self.current_frame()?.graph())
    }

    /// Opens a new frame over a fresh graph; the first frame of a session
    /// becomes the root frame and owns the pools.
    pub fn push_graph_frame(&mut self) -> GraphId {
        let graph = if self.frames.is_empty() {
            self.store.add_graph("root", None)
        } else {
            let id = self.fresh_id();
            self.store.add_graph(format!("graph{id}"), None)
        };
        let frame = if self.frames.is_empty() {
            GraphFrame::root(graph)
        } else {
            GraphFrame::child(graph)
        };
        self.frames.push(frame);
        graph
    }

    /// Pops the top frame. Returns `None` on an empty stack.
    pub fn pop_graph_frame(&mut self) -> Option<GraphFrame> {
        debug_assert!(
            self.redirects.is_empty(),
            "popping a frame while a frame redirection is active"
        );
        self.frames.pop()
    }

    /// Builds the execute-graph skeleton: a root frame whose graph carries
    /// `Init`, `DeInit` and `Main` nodes, each owning one subgraph, with the
    /// Main frame pushed on top. The stack afterwards is `[root, main]`.
    pub fn push_execute_graph_frames(&mut self) -> Result<()> {
        ensure!(
            self.frames.is_empty(),
            "the execute-graph skeleton must open the session"
        );
        let root_graph = self.push_graph_frame();

        let mut main_graph = None;
        for graph_type in [
            ExecuteGraphType::Init,
            ExecuteGraphType::DeInit,
            ExecuteGraphType::Main,
        ] {
            let name = graph_type.as_str();
            let node = self.store.add_node(root_graph, name, name, 0, 0);
            self.annotate_adopted_node(node)?;
            let sub = self
                .store
                .add_graph(format!("{name}_graph"), Some(node));
            if graph_type == ExecuteGraphType::Main {
                main_graph = Some(sub);
            }
        }

        let main_graph = main_graph.expect("main subgraph just created");
        self.frames.push(GraphFrame::child(main_graph));
        Ok(())
    }

    /// Runs `f` with an existing frame made current, restoring afterwards.
    pub(crate) fn with_existing_frame<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.redirects.push(index);
        let result = f(self);
        self.redirects.pop();
        result
    }

    /// Runs `f` with a temporary frame pushed and current, then removes the
    /// frame and hands it back alongside the result.
    pub(crate) fn with_temp_frame<R>(
        &mut self,
        frame: GraphFrame,
        f: impl FnOnce(&mut Self) -> R,
    ) -> (GraphFrame, R) {
        self.frames.push(frame);
        self.redirects.push(self.frames.len() - 1);
        let result = f(self);
        self.redirects.pop();
        let frame = self.frames.pop().expect("temp frame still on the stack");
        (frame, result)
    }

    // ---- current compute node -------------------------------------------

    /// Associates subsequently created exe nodes with `node`, creating its
    /// ComputeNodeInfo on first use.
    pub fn set_current_compute_node(&mut self, node: Option<ComputeNode>) -> Result<()> {
        let Some(index) = self.current_frame_index() else {
            warning!("ignoring current compute node, no frame is active");
            return Ok(());
        };
        if let Some(ref compute_node) = node {
            self.add_node_extend_info(index, compute_node)?;
        }
        self.frames[index].set_current_compute_node(node);
        Ok(())
    }

    /// Scoped variant: sets `node`, runs `f`, and restores the previous
    /// association however the scope is left.
    pub fn with_scoped_compute_node<R>(
        &mut self,
        node: ComputeNode,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let index = self
            .current_frame_index()
            .ok_or_else(|| anyhow!("no frame is active"))?;
        let previous = self.frames[index].current_compute_node().cloned();
        self.set_current_compute_node(Some(node))?;
        let result = f(self);
        if index < self.frames.len() {
            self.frames[index].set_current_compute_node(previous);
        }
        result
    }

    /// Interns the compute node's ComputeNodeInfo once per distinct node
    /// name; first use wins.
    pub(crate) fn add_node_extend_info(
        &mut self,
        frame_index: usize,
        node: &ComputeNode,
    ) -> Result<()> {
        if self.frames[frame_index]
            .node_names_to_index
            .contains_key(node.name())
        {
            return Ok(());
        }
        let pools = self.frames[0]
            .pools
            .as_mut()
            .expect("bottom frame owns the pools");
        let blob = create_compute_node_info(node, &mut pools.buffer_pool)?;
        let index = pools.compute_node_infos.add_buf(&blob);
        self.frames[frame_index]
            .node_names_to_index
            .insert(node.name().to_string(), index);
        Ok(())
    }

    // ---- node creation --------------------------------------------------

    /// Creates a node in the current frame's graph (or a fresh island graph
    /// when no frame is active), wiring `inputs` 1:1 onto its data anchors.
    /// Validation happens before anything is created: a single bad input
    /// aborts the whole creation.
    pub(crate) fn create_node(
        &mut self,
        node_type: &str,
        inputs: &[ValueHolder],
        out_count: usize,
    ) -> Result<NodeId> {
        for (anchor, holder) in inputs.iter().enumerate() {
            ensure!(
                holder.is_ok(),
                "input {anchor} of {node_type} carries an error: {}",
                holder.error().unwrap_or_default()
            );
            ensure!(
                holder.node().is_some(),
                "input {anchor} of {node_type} has no node"
            );
            ensure!(
                !holder.is_control_only(),
                "input {anchor} of {node_type} is a control-only holder"
            );
        }

        let (graph, framed) = match self.current_frame_index() {
            Some(index) => (self.frames[index].graph(), true),
            None => {
                let id = self.fresh_id();
                (self.store.add_graph(format!("island{id}"), None), false)
            }
        };

        let mut merges: Vec<GraphId> = Vec::new();
        for holder in inputs {
            let src = holder.node().expect("validated above");
            ensure!(
                (holder.out_index() as usize) < self.store.node(src).out_num(),
                "node {} has no out anchor {}",
                self.store.node(src).name(),
                holder.out_index()
            );
            if let Some(island) = self.classify_for_wiring(src, graph)? {
                if !merges.contains(&island) {
                    merges.push(island);
                }
            }
        }
        for island in merges {
            self.merge_island(island, graph)?;
        }

        let id = self.fresh_id();
        let node = self
            .store
            .add_node(graph, format!("node{id}"), node_type, inputs.len(), out_count);
        if framed {
            self.annotate_new_node(node)?;
        }

        for (anchor, holder) in inputs.iter().enumerate() {
            self.store.add_data_edge(
                holder.node().expect("validated above"),
                holder.out_index() as usize,
                node,
                anchor,
            )?;
            // The guarder releases the resource only after every consumer.
            if let Some(guarder) = holder.guarder() {
                if let Some(guarder_node) = guarder.node() {
                    self.store.add_control_edge(node, guarder_node)?;
                }
            }
        }
        Ok(node)
    }

    /// Decides whether wiring `src` into a node of `dst_graph` is legal.
    /// Returns the island graph to merge first, or `None` when the source
    /// already lives in `dst_graph`. Sources in parented subgraphs or in a
    /// graph owned by an active frame cannot cross into another graph;
    /// that wiring direction goes through the sink/parent-anchor plumbing.
    fn classify_for_wiring(&self, src: NodeId, dst_graph: GraphId) -> Result<Option<GraphId>> {
        match self.store.classify_cross_graph(src, dst_graph)? {
            CrossGraph::SameGraph => Ok(None),
            CrossGraph::MergeFrom(island) => {
                ensure!(
                    !self.frames.iter().any(|frame| frame.graph() == island),
                    "node {} lives in the graph of an active frame and cannot feed another graph directly",
                    self.store.node(src).name()
                );
                Ok(Some(island))
            }
        }
    }

    /// Moves an island graph's nodes into `dst` and assigns the adopted
    /// nodes their kernel-extend indices, which islands could not record.
    fn merge_island(&mut self, island: GraphId, dst: GraphId) -> Result<()> {
        let moved: Vec<NodeId> = self.store.graph_nodes(island).to_vec();
        trace!(
            "merging island {} ({} nodes) into {}",
            self.store.graph_name(island),
            moved.len(),
            self.store.graph_name(dst)
        );
        self.store.merge_graphs(island, dst)?;
        if !self.frames.is_empty() {
            for node in moved {
                self.annotate_adopted_node(node)?;
            }
        }
        Ok(())
    }

    fn annotate_new_node(&mut self, node: NodeId) -> Result<()> {
        if let Some(index) = self.current_frame_index() {
            if let Some(info_index) = self.frames[index].current_node_index() {
                self.store
                    .node_mut(node)
                    .attrs_mut()
                    .set(ATTR_COMPUTE_NODE_INDEX, AttrValue::Int(info_index as i64));
            }
        }
        self.annotate_adopted_node(node)
    }

    pub(crate) fn annotate_adopted_node(&mut self, node: NodeId) -> Result<()> {
        if self
            .store
            .node(node)
            .attrs()
            .get_int(ATTR_KERNEL_EXTEND_INDEX)
            .is_some()
        {
            return Ok(());
        }
        let (name, node_type) = {
            let n = self.store.node(node);
            (n.name().to_string(), n.node_type().to_string())
        };
        let pools = self.frames[0]
            .pools
            .as_mut()
            .expect("bottom frame owns the pools");
        let blob = create_kernel_extend_info(&name, &node_type, &mut pools.buffer_pool);
        let id = pools.kernel_extend_infos.add_buf(&blob);
        self.store
            .node_mut(node)
            .attrs_mut()
            .set(ATTR_KERNEL_EXTEND_INDEX, AttrValue::Int(id as i64));
        Ok(())
    }

    pub(crate) fn holders_from_node(
        &mut self,
        node: NodeId,
        out_count: usize,
        mem: MemKind,
    ) -> Vec<ValueHolder> {
        (0..out_count)
            .map(|index| {
                let id = self.fresh_id();
                ValueHolder::from_node(id, node, index as i32, ValueHolderKind::Output, mem)
            })
            .collect()
    }

    // ---- holder factories -----------------------------------------------

    pub(crate) fn create_const_with(
        &mut self,
        data: &[u8],
        is_string: bool,
        mem: MemKind,
    ) -> Result<ValueHolder> {
        let node = self.create_node(CONST, &[], 1)?;
        let attrs = self.store.node_mut(node).attrs_mut();
        attrs.set(ATTR_IS_STRING, AttrValue::Bool(is_string));
        attrs.set(ATTR_CONST_VALUE, AttrValue::Bytes(data.to_vec()));
        let id = self.fresh_id();
        Ok(ValueHolder::from_node(
            id,
            node,
            0,
            ValueHolderKind::Const,
            mem,
        ))
    }

    /// Zero-input, one-output `Const` node with the payload attached as an
    /// attribute.
    pub fn create_const(&mut self, data: &[u8], is_string: bool) -> Result<ValueHolder> {
        self.create_const_with(data, is_string, MemKind::Plain)
    }

    /// Zero-input, one-output `Data` node bound to feed slot `index`.
    pub fn create_feed(&mut self, index: i64) -> Result<ValueHolder> {
        let node = self.create_node(DATA, &[], 1)?;
        self.store
            .node_mut(node)
            .attrs_mut()
            .set(ATTR_FEED_INDEX, AttrValue::Int(index));
        let id = self.fresh_id();
        Ok(ValueHolder::from_node(
            id,
            node,
            0,
            ValueHolderKind::Feed,
            MemKind::Plain,
        ))
    }

    pub(crate) fn create_data_output_with(
        &mut self,
        node_type: &str,
        inputs: &[ValueHolder],
        out_count: usize,
        mem: MemKind,
    ) -> Result<Vec<ValueHolder>> {
        let node = self.create_node(node_type, inputs, out_count)?;
        Ok(self.holders_from_node(node, out_count, mem))
    }

    /// Node with `inputs.len()` data edges wired 1:1 and `out_count`
    /// outputs; the returned holders are in output order.
    pub fn create_data_output(
        &mut self,
        node_type: &str,
        inputs: &[ValueHolder],
        out_count: usize,
    ) -> Result<Vec<ValueHolder>> {
        self.create_data_output_with(node_type, inputs, out_count, MemKind::Plain)
    }

    pub fn create_single_data_output(
        &mut self,
        node_type: &str,
        inputs: &[ValueHolder],
    ) -> Result<ValueHolder> {
        let mut holders = self.create_data_output(node_type, inputs, 1)?;
        Ok(holders.remove(0))
    }

    /// Zero-output node; the returned holder is control-only and usable for
    /// dependency ordering.
    pub fn create_void(&mut self, node_type: &str, inputs: &[ValueHolder]) -> Result<ValueHolder> {
        let node = self.create_node(node_type, inputs, 0)?;
        let id = self.fresh_id();
        Ok(ValueHolder::from_node(
            id,
            node,
            CONTROL_INDEX,
            ValueHolderKind::Output,
            MemKind::Plain,
        ))
    }

    /// Error-valued holder: no node, `is_ok() == false`. Lets a builder
    /// keep passing holder-shaped results through a pipeline, postponing
    /// the check to the point of use.
    pub fn create_error(&mut self, message: impl Into<String>) -> ValueHolder {
        let id = self.fresh_id();
        ValueHolder::new_error(id, message.into(), MemKind::Plain)
    }

    /// Pure control edge `src -> dst`; both sides must have nodes.
    pub fn add_dependency(&mut self, src: &ValueHolder, dst: &ValueHolder) -> Result<()> {
        let src_node = src
            .node()
            .ok_or_else(|| anyhow!("cannot add control edge, the src does not have a node"))?;
        let dst_node = dst
            .node()
            .ok_or_else(|| anyhow!("cannot add control edge, the dst does not have a node"))?;
        let dst_graph = self.store.node(dst_node).graph();
        if let Some(island) = self.classify_for_wiring(src_node, dst_graph)? {
            self.merge_island(island, dst_graph)?;
        }
        self.store.add_control_edge(src_node, dst_node)
    }

    /// Tags the holder's node with its execution stage.
    pub fn set_stage(&mut self, holder: &ValueHolder, stage: RunStage) -> Result<()> {
        let node = holder
            .node()
            .ok_or_else(|| anyhow!("cannot set stage on a holder without a node"))?;
        self.store
            .node_mut(node)
            .attrs_mut()
            .set(ATTR_STAGE, AttrValue::Int(stage as i64));
        Ok(())
    }

    /// Marks `holder`'s output as aliasing `other`'s memory at runtime: a
    /// soft reference recorded on the output descriptor, not ownership.
    pub fn ref_from(&mut self, holder: &ValueHolder, other: &ValueHolder) -> Result<()> {
        let node = holder
            .node()
            .ok_or_else(|| anyhow!("cannot ref-from, the holder has no node"))?;
        let other_node = other
            .node()
            .ok_or_else(|| anyhow!("cannot ref-from, the referenced holder has no node"))?;
        ensure!(
            holder.out_index() >= 0 && other.out_index() >= 0,
            "invalid index to ref {} -> {}",
            holder.out_index(),
            other.out_index()
        );
        let other_name = self.store.node(other_node).name().to_string();
        let attrs = self
            .store
            .node_mut(node)
            .output_attrs_mut(holder.out_index() as usize)
            .ok_or_else(|| anyhow!("holder's node has no output {}", holder.out_index()))?;
        attrs.set(ATTR_REF_FROM_NODE, AttrValue::Str(other_name));
        attrs.set(
            ATTR_REF_FROM_INDEX,
            AttrValue::Int(other.out_index() as i64),
        );
        Ok(())
    }

    /// Graph currently owning the holder's node.
    pub fn holder_graph(&self, holder: &ValueHolder) -> Option<GraphId> {
        Some(self.store.node(holder.node()?).graph())
    }

    pub(crate) fn generate_node_name(&mut self, prefix: &str) -> String {
        let id = self.fresh_id();
        format!("{prefix}_{id}")
    }
}

/// Finalizes the root frame into a complete execute graph.
///
/// Popping with outputs serializes the root pools as graph-level attributes,
/// wires every output into the lazily created `NetOutput` sink, and returns
/// the finished graph. Nothing is published on failure.
#[derive(Default)]
pub struct ExecuteGraphBuilder {
    outputs: Vec<ValueHolder>,
    targets: Vec<ValueHolder>,
}

impl ExecuteGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data outputs of the graph, in output order.
    pub fn set_outputs(mut self, outputs: Vec<ValueHolder>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Control-only terminals that must run before the graph completes.
    pub fn set_targets(mut self, targets: Vec<ValueHolder>) -> Self {
        self.targets = targets;
        self
    }

    pub fn build(self, session: &mut LoweringSession) -> Result<GraphId> {
        ensure!(
            !(self.outputs.is_empty() && self.targets.is_empty()),
            "cannot build an execute graph without outputs"
        );
        let frame = session
            .pop_graph_frame()
            .ok_or_else(|| anyhow!("no frame on the stack"))?;
        ensure!(
            frame.is_root(),
            "cannot finalize, the current exe-graph is not the root graph"
        );
        let graph = frame.graph();
        session.append_graph_level_data(&frame)?;

        let netoutput = session
            .store_mut()
            .get_or_create_sink(graph, NET_OUTPUT, self.outputs.len());
        let existing = session.store().node(netoutput).in_data_num();
        if existing < self.outputs.len() {
            session
                .store_mut()
                .append_input_anchors(netoutput, self.outputs.len())?;
        }

        for (index, output) in self.outputs.iter().enumerate() {
            ensure!(output.is_ok(), "output {index} carries an error");
            let node = output
                .node()
                .ok_or_else(|| anyhow!("output {index} has no node"))?;
            if let Some(island) = session.classify_for_wiring(node, graph)? {
                session.merge_island(island, graph)?;
            }
            session
                .store_mut()
                .add_data_edge(node, output.out_index() as usize, netoutput, index)?;
        }
        for target in &self.targets {
            let node = target
                .node()
                .ok_or_else(|| anyhow!("target holder has no node"))?;
            if let Some(island) = session.classify_for_wiring(node, graph)? {
                session.merge_island(island, graph)?;
            }
            session.store_mut().add_control_edge(node, netoutput)?;
        }
        Ok(graph)
    }
}

impl LoweringSession {
    /// Index of the Main frame: stack position 1, holding the subgraph of
    /// the root graph's `Main` node.
    pub(crate) fn main_frame_index(&self) -> Option<usize> {
        if self.frames.len() < 2 {
            return None;
        }
        let root_graph = self.frames[0].graph();
        let main_node = self
            .store
            .find_first_node_by_type(root_graph, ExecuteGraphType::Main.as_str())?;
        let main_graph = *self.store.node(main_node).subgraphs().first()?;
        (self.frames[1].graph() == main_graph).then_some(1)
    }

    pub(crate) fn current_compute_node_cloned(&self) -> Option<ComputeNode> {
        self.current_frame()?.current_compute_node().cloned()
    }

    pub(crate) fn set_last_exec_node(&mut self, frame_index: usize, holder: ValueHolder) {
        if let Some(frame) = self.frames.get_mut(frame_index) {
            frame.last_exec_node = Some(holder);
        }
    }

    pub(crate) fn pcall_slot(
        &self,
        frame_index: usize,
        set: PcallSet,
        stage_id: usize,
    ) -> Result<Option<ValueHolder>> {
        let frame = self
            .frames
            .get(frame_index)
            .ok_or_else(|| anyhow!("no frame at index {frame_index}"))?;
        let slots = match set {
            PcallSet::First => &frame.first_pcalls[..],
            PcallSet::Last => &frame.last_pcalls[..],
        };
        let slot = slots
            .get(stage_id)
            .ok_or_else(|| anyhow!("stage id {stage_id} is out of range for {} slots", slots.len()))?;
        Ok(slot.clone())
    }

    pub(crate) fn set_pcall_slot(
        &mut self,
        frame_index: usize,
        set: PcallSet,
        stage_id: usize,
        holder: ValueHolder,
    ) -> Result<()> {
        let frame = self
            .frames
            .get_mut(frame_index)
            .ok_or_else(|| anyhow!("no frame at index {frame_index}"))?;
        let slots = match set {
            PcallSet::First => &mut frame.first_pcalls[..],
            PcallSet::Last => &mut frame.last_pcalls[..],
        };
        let slot = slots
            .get_mut(stage_id)
            .ok_or_else(|| anyhow!("stage id {stage_id} is out of range"))?;
        *slot = Some(holder);
        Ok(())
    }

    fn append_graph_level_data(&mut self, frame: &GraphFrame) -> Result<()> {
        let pools = frame
            .pools
            .as_ref()
            .ok_or_else(|| anyhow!("graph-level data lives on the root frame only"))?;
        let graph = frame.graph();
        let buffer = pools.buffer_pool.serialize()?;
        let compute_node_infos = pools.compute_node_infos.serialize()?;
        let kernel_extend_infos = pools.kernel_extend_infos.serialize()?;
        let model_descs = pools.model_descs.serialize()?;

        let attrs = self.store.graph_attrs_mut(graph);
        attrs.set(ATTR_BUFFER, AttrValue::Bytes(buffer));
        attrs.set(ATTR_COMPUTE_NODE_INFO, AttrValue::Bytes(compute_node_infos));
        attrs.set(
            ATTR_KERNEL_EXTEND_INFO,
            AttrValue::Bytes(kernel_extend_infos),
        );
        attrs.set(ATTR_MODEL_DESC, AttrValue::Bytes(model_descs));
        Ok(())
    }
}
