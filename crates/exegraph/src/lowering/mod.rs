//! The exe-graph construction DSL.
//!
//! A [`LoweringSession`] owns the frame stack and the arena; value holders
//! created through it are the sole way to extend the graph under
//! construction. The root frame interns per-node metadata into
//! [`BufferPool`]s which serialize into the offset-addressed blobs of
//! [`crate::runtime`] when the graph is finalized.

mod buffer_pool;
pub(crate) mod context_extend;
mod dev_mem;
mod frame;
mod frame_selector;
mod session;
mod tlv;
mod value_holder;

pub use buffer_pool::BufferPool;
pub use context_extend::{create_compute_node_info, create_kernel_extend_info};
pub use frame::{FramePools, GraphFrame};
pub use frame_selector::FrameSelector;
pub use session::{ExecuteGraphBuilder, LoweringSession};
pub use tlv::{Tlv, TlvTag};
pub use value_holder::{
    MemKind, Placement, ValueHolder, ValueHolderKind, CONTROL_INDEX, MAIN_STREAM,
};
