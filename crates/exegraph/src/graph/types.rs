//! Builtin node types, execute-graph stages, and well-known attribute keys.

use serde::{Deserialize, Serialize};

/// Graph output sink on the root/Main graph. Has only inputs; input `i`
/// corresponds to graph output `i`.
pub const NET_OUTPUT: &str = "NetOutput";

/// Subgraph output sink. Input `i` corresponds to output `i` of the parent
/// node owning the subgraph.
pub const INNER_NET_OUTPUT: &str = "InnerNetOutput";

/// Graph input. Carries an `index` attribute naming which feed it is.
pub const DATA: &str = "Data";

/// Subgraph input. Carries an `index` attribute naming which parent-node
/// input it mirrors.
pub const INNER_DATA: &str = "InnerData";

/// Constant node; its `value` attribute holds the payload bytes.
pub const CONST: &str = "Const";

/// Call node owning one subgraph that executes as a unit.
pub const PARTITIONED_CALL: &str = "PartitionedCall";

/// Execution stage tag carried by exe nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum RunStage {
    Init = 0,
    Main = 1,
    Exit = 2,
}

/// The three skeleton subgraphs of a lowered execute graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteGraphType {
    Init,
    DeInit,
    Main,
}

impl ExecuteGraphType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecuteGraphType::Init => "Init",
            ExecuteGraphType::DeInit => "DeInit",
            ExecuteGraphType::Main => "Main",
        }
    }
}

/// Stage slots for `FrameSelector::on_main_root_first`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum FirstExecStage {
    EventSync = 0,
}

pub const FIRST_EXEC_STAGE_COUNT: usize = 1;

/// Stage slots for `FrameSelector::on_main_root_last_event_sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum LastExecStage {
    EventSync = 0,
}

pub const LAST_EXEC_STAGE_COUNT: usize = 1;

// Attribute keys shared between the lowering layer and the runtime loader.

/// Const payload bytes, on Const nodes.
pub const ATTR_CONST_VALUE: &str = "value";
/// Whether a const payload is a string, on Const nodes.
pub const ATTR_IS_STRING: &str = "is_string";
/// Execution stage, on exe nodes.
pub const ATTR_STAGE: &str = "stage";
/// Feed index, on Data/InnerData nodes.
pub const ATTR_FEED_INDEX: &str = "index";
/// Aliased producer name, on output descriptors.
pub const ATTR_REF_FROM_NODE: &str = "RefFromNode";
/// Aliased producer output index, on output descriptors.
pub const ATTR_REF_FROM_INDEX: &str = "RefFromIndex";
/// Serialized ComputeNodeInfo pool, on the root graph.
pub const ATTR_COMPUTE_NODE_INFO: &str = "ComputeNodeInfo";
/// Index of a node's ComputeNodeInfo, on exe nodes.
pub const ATTR_COMPUTE_NODE_INDEX: &str = "ComputeNodeIndex";
/// Serialized KernelExtendInfo pool, on the root graph.
pub const ATTR_KERNEL_EXTEND_INFO: &str = "KernelExtendInfo";
/// Index of a node's KernelExtendInfo, on exe nodes.
pub const ATTR_KERNEL_EXTEND_INDEX: &str = "KernelExtendInfoIndex";
/// Serialized string/const buffer pool, on the root graph.
pub const ATTR_BUFFER: &str = "buffer";
/// Serialized model-descriptor pool, on the root graph.
pub const ATTR_MODEL_DESC: &str = "ModelDesc";
/// Which input of a release kernel is the guarded resource.
pub const ATTR_RELEASE_RESOURCE_INDEX: &str = "ReleaseResourceIndex";
