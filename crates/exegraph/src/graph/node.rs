use smallvec::SmallVec;

use crate::graph::{GraphId, NodeId};
use crate::ir::AttrValue;

/// Producing endpoint of a data edge: a node plus one of its out anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub node: NodeId,
    pub index: u32,
}

/// Ordered name/value attribute map.
///
/// Kept as an insertion-ordered vector: per-node attribute sets are tiny and
/// the serialization layer depends on declaration order.
#[derive(Debug, Clone, Default)]
pub struct AttrMap {
    entries: Vec<(String, AttrValue)>,
}

impl AttrMap {
    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        match self.get(name)? {
            AttrValue::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// One node of an executable graph.
///
/// In-anchors record their producing endpoint; out anchors are counted only,
/// consumers are found by scanning the owning graph. The anchor lists grow
/// exclusively through the explicit append operations on
/// [`GraphStore`](crate::graph::GraphStore).
#[derive(Debug)]
pub struct ExeNode {
    pub(crate) name: String,
    pub(crate) node_type: String,
    pub(crate) graph: GraphId,
    pub(crate) in_data: SmallVec<[Option<Endpoint>; 4]>,
    pub(crate) in_ctrl: Vec<NodeId>,
    pub(crate) out_count: usize,
    pub(crate) attrs: AttrMap,
    pub(crate) out_attrs: Vec<AttrMap>,
    pub(crate) subgraphs: Vec<GraphId>,
}

impl ExeNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Graph currently owning this node.
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn in_data_num(&self) -> usize {
        self.in_data.len()
    }

    pub fn out_num(&self) -> usize {
        self.out_count
    }

    /// Producing endpoint wired into in-anchor `index`, if any.
    pub fn in_data_peer(&self, index: usize) -> Option<Endpoint> {
        self.in_data.get(index).copied().flatten()
    }

    /// Nodes with a control edge into this node.
    pub fn in_ctrl(&self) -> &[NodeId] {
        &self.in_ctrl
    }

    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut AttrMap {
        &mut self.attrs
    }

    /// Attributes of output descriptor `index`.
    pub fn output_attrs(&self, index: usize) -> Option<&AttrMap> {
        self.out_attrs.get(index)
    }

    pub(crate) fn output_attrs_mut(&mut self, index: usize) -> Option<&mut AttrMap> {
        self.out_attrs.get_mut(index)
    }

    /// Subgraphs owned by this node, in attachment order.
    pub fn subgraphs(&self) -> &[GraphId] {
        &self.subgraphs
    }
}
