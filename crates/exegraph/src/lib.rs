//! Lowering of compute graphs into executable graphs.
//!
//! The crate has three layers:
//!
//! - [`ir`]: the attributed compute-graph surface consumed by the lowering
//!   code: op descriptors, IR input declarations, compile-time tensor
//!   descriptors.
//! - [`lowering`]: the construction DSL. A [`lowering::LoweringSession`]
//!   owns a stack of graph frames; value holders created through the session
//!   extend the executable graph under construction, while the root frame
//!   interns every piece of per-node metadata into buffer pools.
//! - [`runtime`]: the binary contract. The pools serialize into
//!   directory-prefixed blobs that the kernel-dispatch runtime addresses
//!   directly through checked, offset-based views, with no deserialization
//!   pass and no graph walk.

pub mod graph;
pub mod ir;
pub mod logging;
pub mod lowering;
pub mod runtime;

pub use graph::{GraphId, GraphStore, NodeId};
pub use lowering::{FrameSelector, LoweringSession, ValueHolder};
