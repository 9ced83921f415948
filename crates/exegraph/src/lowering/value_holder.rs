use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::graph::NodeId;

/// Out-index marking a control-only reference.
pub const CONTROL_INDEX: i32 = -1;

/// What kind of value a holder refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueHolderKind {
    /// Constant, fixed at lowering time.
    Const,
    /// Supplied externally at execution time.
    Feed,
    /// Produced by a node; covers data and control outputs.
    Output,
}

/// Memory flavour of a holder. Device-resident values carry the logical
/// stream that produces them; holders cloned from a node keep their flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    Plain,
    DevMem { stream: i64 },
}

/// The logical stream device work defaults to.
pub const MAIN_STREAM: i64 = 0;

/// Where a value lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Unknown,
    Host,
    Device,
}

#[derive(Debug)]
struct HolderInner {
    id: u64,
    kind: ValueHolderKind,
    mem: MemKind,
    node: Option<NodeId>,
    index: i32,
    error: Option<String>,
    placement: Cell<Placement>,
    guarder: RefCell<Option<ValueHolder>>,
}

/// Shared handle to one node output or control point.
///
/// Invariant: `out_index() >= 0` implies the holder has a node and refers to
/// a data output; `out_index() == -1` is a control-only reference. A holder
/// built by `create_error` has no node and `is_ok() == false`; errors are
/// values, callers check before dereferencing.
#[derive(Debug, Clone)]
pub struct ValueHolder {
    inner: Rc<HolderInner>,
}

impl ValueHolder {
    pub(crate) fn from_node(
        id: u64,
        node: NodeId,
        index: i32,
        kind: ValueHolderKind,
        mem: MemKind,
    ) -> Self {
        Self {
            inner: Rc::new(HolderInner {
                id,
                kind,
                mem,
                node: Some(node),
                index,
                error: None,
                placement: Cell::new(Placement::Unknown),
                guarder: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn new_error(id: u64, message: String, mem: MemKind) -> Self {
        Self {
            inner: Rc::new(HolderInner {
                id,
                kind: ValueHolderKind::Output,
                mem,
                node: None,
                index: 0,
                error: Some(message),
                placement: Cell::new(Placement::Unknown),
                guarder: RefCell::new(None),
            }),
        }
    }

    /// False for error-valued holders.
    pub fn is_ok(&self) -> bool {
        self.inner.error.is_none()
    }

    pub fn error(&self) -> Option<&str> {
        self.inner.error.as_deref()
    }

    /// Session-unique id of this holder.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> ValueHolderKind {
        self.inner.kind
    }

    pub fn mem_kind(&self) -> MemKind {
        self.inner.mem
    }

    /// Logical stream id for device-resident holders.
    pub fn logic_stream(&self) -> Option<i64> {
        match self.inner.mem {
            MemKind::Plain => None,
            MemKind::DevMem { stream } => Some(stream),
        }
    }

    pub fn node(&self) -> Option<NodeId> {
        self.inner.node
    }

    /// Output index on the producing node; [`CONTROL_INDEX`] for
    /// control-only references.
    pub fn out_index(&self) -> i32 {
        self.inner.index
    }

    pub fn is_control_only(&self) -> bool {
        self.inner.index < 0
    }

    pub fn placement(&self) -> Placement {
        self.inner.placement.get()
    }

    pub fn set_placement(&self, placement: Placement) {
        self.inner.placement.set(placement);
    }

    /// Node registered to release the resource this holder carries.
    pub fn guarder(&self) -> Option<ValueHolder> {
        self.inner.guarder.borrow().clone()
    }

    pub(crate) fn set_guarder(&self, guarder: ValueHolder) {
        *self.inner.guarder.borrow_mut() = Some(guarder);
    }

    /// Holder on another node's output preserving this holder's concrete
    /// memory flavour. This is the dispatch point keeping dev-mem holders dev-mem
    /// when subgraph outputs are mirrored onto parent nodes.
    pub(crate) fn mate_from_node(
        &self,
        id: u64,
        node: NodeId,
        index: i32,
        kind: ValueHolderKind,
    ) -> ValueHolder {
        ValueHolder::from_node(id, node, index, kind, self.inner.mem)
    }

    /// Identity comparison: two clones of one holder are the same holder.
    pub fn same_holder(&self, other: &ValueHolder) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
