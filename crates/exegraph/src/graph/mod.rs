//! Executable-graph data structures.
//!
//! Graphs and nodes live in one arena per lowering session ([`GraphStore`]);
//! everything references everything else through plain index handles
//! ([`GraphId`], [`NodeId`]), never through back-pointers. Node identity is
//! stable for the lifetime of the store, which is what keeps value holders
//! valid when disjoint graphs are merged or nodes are relocated between
//! subgraphs.

mod dump;
mod node;
mod store;
pub mod types;

pub use dump::graph_to_json;
pub use node::{AttrMap, Endpoint, ExeNode};
pub use store::{CrossGraph, GraphId, GraphStore, NodeId};
