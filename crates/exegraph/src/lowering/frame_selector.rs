//! Routing of construction calls onto non-current frames.
//!
//! Builders passed in here are ordinary closures over the session; the
//! selector decides which frame is current while they run, wires produced
//! subgraph outputs through the right sinks, and keeps cross-frame
//! bookkeeping (guarder relocation, partitioned-call sharing) consistent.

use std::collections::HashMap;

use anyhow::{anyhow, ensure, Result};

use crate::graph::types::{
    ExecuteGraphType, FirstExecStage, LastExecStage, RunStage, ATTR_FEED_INDEX, ATTR_STAGE,
    INNER_DATA, INNER_NET_OUTPUT, PARTITIONED_CALL,
};
use crate::graph::{GraphId, NodeId};
use crate::ir::AttrValue;
use crate::lowering::frame::GraphFrame;
use crate::lowering::session::LoweringSession;
use crate::lowering::value_holder::{ValueHolder, ValueHolderKind};
use crate::warning;

/// Redirects construction to a non-current frame, preserving correct
/// cross-frame wiring.
pub struct FrameSelector;

impl FrameSelector {
    /// Runs `builder` with the Main frame current. Falls back to the bottom
    /// frame when no Main frame exists: a graceful degrade, not a failure.
    pub fn on_main_root(
        session: &mut LoweringSession,
        builder: impl FnOnce(&mut LoweringSession) -> Result<Vec<ValueHolder>>,
    ) -> Result<Vec<ValueHolder>> {
        ensure!(session.frame_count() > 0, "no frame exists");
        match session.main_frame_index() {
            Some(index) => session.with_existing_frame(index, builder),
            None => {
                warning!("no Main frame exists, building against the bottom frame");
                session.with_existing_frame(0, builder)
            }
        }
    }

    /// Runs `builder` inside the `Init` node's subgraph, exports its
    /// outputs through an InnerNetOutput into the Init node's own outputs,
    /// and migrates each output's resource guarder into the paired DeInit
    /// subgraph. Returns holders on the Init node's outputs.
    pub fn on_init_root(
        session: &mut LoweringSession,
        builder: impl FnOnce(&mut LoweringSession) -> Result<Vec<ValueHolder>>,
    ) -> Result<Vec<ValueHolder>> {
        ensure!(session.frame_count() > 0, "no root frame exists");
        let root_graph = session.frame(0).expect("root frame present").graph();
        let init_node = session
            .store()
            .find_first_node_by_type(root_graph, ExecuteGraphType::Init.as_str())
            .ok_or_else(|| anyhow!("no Init node on the root graph"))?;
        let init_graph = *session
            .store()
            .node(init_node)
            .subgraphs()
            .first()
            .ok_or_else(|| anyhow!("Init node has no subgraph"))?;

        let outputs = run_in_sub_frame(session, init_graph, builder)?;
        if outputs.is_empty() {
            return Ok(Vec::new());
        }
        let (guarders, parent_outputs) =
            connect_sub_graph_out(session, init_node, init_graph, &outputs)?;
        move_guarders_to_deinit(session, init_node, guarders)?;
        Ok(parent_outputs)
    }

    /// Routes `builder` into the shared PartitionedCall subgraph parked at
    /// the first-execution event-sync slot of the Main frame.
    pub fn on_main_root_first(
        session: &mut LoweringSession,
        builder: impl FnOnce(&mut LoweringSession) -> Result<Vec<ValueHolder>>,
    ) -> Result<Vec<ValueHolder>> {
        on_main_root_partitioned_call(
            session,
            PcallSet::First,
            FirstExecStage::EventSync as usize,
            builder,
        )
    }

    /// Routes `builder` into the shared PartitionedCall subgraph parked at
    /// the last-execution event-sync slot of the Main frame.
    pub fn on_main_root_last_event_sync(
        session: &mut LoweringSession,
        builder: impl FnOnce(&mut LoweringSession) -> Result<Vec<ValueHolder>>,
    ) -> Result<Vec<ValueHolder>> {
        on_main_root_partitioned_call(
            session,
            PcallSet::Last,
            LastExecStage::EventSync as usize,
            builder,
        )
    }

    /// Runs `builder` on the Main frame if present, else the root frame,
    /// and records the produced holder as that frame's last exec node.
    pub fn on_main_root_last(
        session: &mut LoweringSession,
        builder: impl FnOnce(&mut LoweringSession) -> Result<ValueHolder>,
    ) -> Result<ValueHolder> {
        ensure!(session.frame_count() > 0, "no frame exists");
        let index = if session.frame_count() > 1 { 1 } else { 0 };
        let output = session.with_existing_frame(index, builder)?;
        session.set_last_exec_node(index, output.clone());
        Ok(output)
    }
}

/// Which partitioned-call slot array a stage id indexes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum PcallSet {
    First,
    Last,
}

fn run_in_sub_frame(
    session: &mut LoweringSession,
    sub_graph: GraphId,
    builder: impl FnOnce(&mut LoweringSession) -> Result<Vec<ValueHolder>>,
) -> Result<Vec<ValueHolder>> {
    let current = session.current_compute_node_cloned();
    let (_frame, outputs) = session.with_temp_frame(GraphFrame::child(sub_graph), |session| {
        if let Some(node) = current {
            session.set_current_compute_node(Some(node))?;
        }
        builder(session)
    });
    outputs
}

fn on_main_root_partitioned_call(
    session: &mut LoweringSession,
    set: PcallSet,
    stage_id: usize,
    builder: impl FnOnce(&mut LoweringSession) -> Result<Vec<ValueHolder>>,
) -> Result<Vec<ValueHolder>> {
    let main_index = session
        .main_frame_index()
        .ok_or_else(|| anyhow!("no Main frame exists"))?;

    let pcall = match session.pcall_slot(main_index, set, stage_id)? {
        Some(holder) => holder,
        None => session.with_existing_frame(main_index, |session| {
            session.create_void(PARTITIONED_CALL, &[])
        })?,
    };
    let pcall_node = pcall
        .node()
        .ok_or_else(|| anyhow!("partitioned call holder has no node"))?;
    let sub_graph = match session.store().node(pcall_node).subgraphs().first() {
        Some(&graph) => graph,
        None => {
            let name = session.generate_node_name("exec_sub_graph");
            session.store_mut().add_graph(name, Some(pcall_node))
        }
    };

    let outputs = run_in_sub_frame(session, sub_graph, builder)?;
    let (_guarders, parent_outputs) =
        connect_sub_graph_out(session, pcall_node, sub_graph, &outputs)?;
    session.set_pcall_slot(main_index, set, stage_id, pcall)?;
    Ok(parent_outputs)
}

/// Exports `outputs` of a subgraph through its InnerNetOutput and mirrors
/// them onto the parent node:
///
/// 1. lazily ensures an InnerNetOutput with enough input anchors;
/// 2. dedups by producing edge: a holder already feeding the sink reuses
///    its anchor, otherwise a fresh one is allocated;
/// 3. control-only holders route through the control anchor;
/// 4. every newly allocated index is mirrored onto the parent node's output
///    anchors, copying placement metadata;
/// 5. `(guarder, index)` pairs are collected for the caller to relocate.
fn connect_sub_graph_out(
    session: &mut LoweringSession,
    parent_node: NodeId,
    sub_graph: GraphId,
    outputs: &[ValueHolder],
) -> Result<(Vec<(ValueHolder, i64)>, Vec<ValueHolder>)> {
    let netoutput = session
        .store_mut()
        .get_or_create_sink(sub_graph, INNER_NET_OUTPUT, 0);
    session.annotate_adopted_node(netoutput)?;
    let base = session.store().node(netoutput).in_data_num();

    let mut index_of: Vec<i64> = Vec::with_capacity(outputs.len());
    let mut by_holder: HashMap<u64, i64> = HashMap::new();
    let mut new_out_num = 0usize;
    for holder in outputs {
        ensure!(
            holder.is_ok(),
            "subgraph builder returned an error holder: {}",
            holder.error().unwrap_or_default()
        );
        let node = holder
            .node()
            .ok_or_else(|| anyhow!("subgraph builder returned a holder without a node"))?;
        if let Some(&index) = by_holder.get(&holder.id()) {
            index_of.push(index);
            continue;
        }
        let index = if holder.is_control_only() {
            -1
        } else {
            let wired = session
                .store()
                .out_data_consumers(node, holder.out_index() as usize)
                .into_iter()
                .find(|(consumer, _)| *consumer == netoutput)
                .map(|(_, anchor)| anchor as i64);
            match wired {
                Some(anchor) => anchor,
                None => {
                    let fresh = (base + new_out_num) as i64;
                    new_out_num += 1;
                    fresh
                }
            }
        };
        by_holder.insert(holder.id(), index);
        index_of.push(index);
    }

    session
        .store_mut()
        .append_input_anchors(netoutput, base + new_out_num)?;

    let mut guarders = Vec::new();
    let mut parent_outputs = Vec::with_capacity(outputs.len());
    for (holder, &index) in outputs.iter().zip(index_of.iter()) {
        let node = holder.node().expect("validated above");
        if index >= base as i64 {
            if session
                .store()
                .node(netoutput)
                .in_data_peer(index as usize)
                .is_none()
            {
                session.store_mut().add_data_edge(
                    node,
                    holder.out_index() as usize,
                    netoutput,
                    index as usize,
                )?;
            }
        } else if index < 0 {
            session.store_mut().add_control_edge(node, netoutput)?;
        }

        if let Some(guarder) = holder.guarder() {
            guarders.push((guarder, index));
        }

        let holder_id = session.fresh_id();
        parent_outputs.push(holder.mate_from_node(
            holder_id,
            parent_node,
            index as i32,
            ValueHolderKind::Output,
        ));
    }

    let total = base + new_out_num;
    if session.store().node(parent_node).out_num() < total {
        session.store_mut().append_output_anchors(parent_node, total)?;
    }
    for (parent, holder) in parent_outputs.iter().zip(outputs.iter()) {
        parent.set_placement(holder.placement());
    }
    Ok((guarders, parent_outputs))
}

/// Relocates guarders collected from the Init subgraph into the DeInit
/// subgraph. Each guarder loses its Init-graph in-edges and gains one
/// DeInit-stage InnerData feeding its resource anchor, wired from the Init
/// node's matching output through a fresh DeInit input anchor.
fn move_guarders_to_deinit(
    session: &mut LoweringSession,
    init_node: NodeId,
    guarders: Vec<(ValueHolder, i64)>,
) -> Result<()> {
    if guarders.is_empty() {
        return Ok(());
    }
    let root_graph = session
        .frame(0)
        .ok_or_else(|| anyhow!("no root frame exists"))?
        .graph();
    let deinit_node = session
        .store()
        .find_first_node_by_type(root_graph, ExecuteGraphType::DeInit.as_str())
        .ok_or_else(|| anyhow!("no DeInit node on the root graph"))?;
    let deinit_graph = *session
        .store()
        .node(deinit_node)
        .subgraphs()
        .first()
        .ok_or_else(|| anyhow!("DeInit node has no subgraph"))?;

    // A resource exported more than once carries its guarder more than
    // once; migrate each guarder a single time, and never re-migrate one
    // that already lives in DeInit.
    let mut pending: Vec<(NodeId, i64)> = Vec::new();
    for (guarder, out_index) in guarders {
        let guarder_node = guarder
            .node()
            .ok_or_else(|| anyhow!("guarder holder has no node"))?;
        ensure!(
            out_index >= 0,
            "guarded resource is not a data output of the Init subgraph"
        );
        if session.store().node(guarder_node).graph() == deinit_graph {
            continue;
        }
        if !pending.iter().any(|(node, _)| *node == guarder_node) {
            pending.push((guarder_node, out_index));
        }
    }
    if pending.is_empty() {
        return Ok(());
    }

    let base = session.store().node(deinit_node).in_data_num();
    session
        .store_mut()
        .append_input_anchors(deinit_node, base + pending.len())?;

    for (offset, (guarder_node, out_index)) in pending.into_iter().enumerate() {
        let init_graph = session.store().node(guarder_node).graph();
        session
            .store_mut()
            .clear_in_edges_from_graph(guarder_node, init_graph)?;
        session
            .store_mut()
            .move_node_to_graph(guarder_node, deinit_graph)?;
        session
            .store_mut()
            .add_data_edge(init_node, out_index as usize, deinit_node, base + offset)?;

        let name = session.generate_node_name(INNER_DATA);
        let inner = session
            .store_mut()
            .add_node(deinit_graph, name, INNER_DATA, 0, 1);
        {
            let attrs = session.store_mut().node_mut(inner).attrs_mut();
            attrs.set(ATTR_FEED_INDEX, AttrValue::Int((base + offset) as i64));
            attrs.set(ATTR_STAGE, AttrValue::Int(RunStage::Exit as i64));
        }
        session.annotate_adopted_node(inner)?;
        session.store_mut().add_data_edge(inner, 0, guarder_node, 0)?;
        session.store_mut().add_control_edge(inner, guarder_node)?;
    }
    Ok(())
}
