//! The binary contract consumed by the kernel-dispatch runtime.
//!
//! Every serialized structure here is a fixed header plus trailing data,
//! with all cross-references expressed as buffer-pool ids or offsets
//! relative to the blob base, so a loaded byte buffer is addressed directly
//! through the checked view types, with no deserialization pass.

pub mod compute_node_info;
pub mod context_builder;
pub mod context_extend;
pub mod continuous_buffer;
pub mod kernel_context;

pub use compute_node_info::{
    calc_size, AnchorInstanceInfo, CompileTimeTensorDesc, ComputeNodeInfo, ComputeNodeInfoBuilder,
};
pub use context_builder::{KernelContextHolder, KernelRunContextBuilder};
pub use context_extend::KernelExtendInfo;
pub use continuous_buffer::{BlobError, ContinuousBuffer};
pub use kernel_context::{Chain, KernelContext};
