//! Device-memory holder factories.
//!
//! Device-resident values are ordinary holders tagged
//! [`MemKind::DevMem`](crate::lowering::MemKind) with a logical stream id;
//! the shared construction path in the session does the rest. Mirroring a
//! dev-mem holder across a subgraph boundary preserves the tag through
//! `mate_from_node`.

use anyhow::{anyhow, Result};

use crate::graph::types::ATTR_RELEASE_RESOURCE_INDEX;
use crate::ir::AttrValue;
use crate::lowering::session::LoweringSession;
use crate::lowering::value_holder::{MemKind, ValueHolder};

impl LoweringSession {
    /// `Const` node whose holder is device-resident on `stream`.
    pub fn create_dev_const(
        &mut self,
        data: &[u8],
        stream: i64,
        is_string: bool,
    ) -> Result<ValueHolder> {
        self.create_const_with(data, is_string, MemKind::DevMem { stream })
    }

    /// Like [`create_data_output`](Self::create_data_output), tagging every
    /// produced holder with `stream`.
    pub fn create_dev_data_output(
        &mut self,
        node_type: &str,
        inputs: &[ValueHolder],
        out_count: usize,
        stream: i64,
    ) -> Result<Vec<ValueHolder>> {
        self.create_data_output_with(node_type, inputs, out_count, MemKind::DevMem { stream })
    }

    pub fn create_dev_single_data_output(
        &mut self,
        node_type: &str,
        inputs: &[ValueHolder],
        stream: i64,
    ) -> Result<ValueHolder> {
        let mut holders = self.create_dev_data_output(node_type, inputs, 1, stream)?;
        Ok(holders.remove(0))
    }

    /// Builds a release kernel for `resource`: the resource becomes the
    /// kernel's input 0 (recorded in its release-index attribute) and the
    /// new node registers itself as the resource's guarder, so it is
    /// control-ordered after every later consumer and relocated into the
    /// DeInit subgraph when the resource is produced under `on_init_root`.
    pub fn create_dev_single_data_output_with_guarder(
        &mut self,
        node_type: &str,
        stream: i64,
        resource: &ValueHolder,
        inputs: &[ValueHolder],
    ) -> Result<ValueHolder> {
        let mut kernel_inputs = Vec::with_capacity(inputs.len() + 1);
        kernel_inputs.push(resource.clone());
        kernel_inputs.extend_from_slice(inputs);

        let holder = self.create_dev_single_data_output(node_type, &kernel_inputs, stream)?;
        let node = holder
            .node()
            .ok_or_else(|| anyhow!("release kernel has no node"))?;
        self.store_mut()
            .node_mut(node)
            .attrs_mut()
            .set(ATTR_RELEASE_RESOURCE_INDEX, AttrValue::Int(0));
        resource.set_guarder(holder.clone());
        Ok(holder)
    }

    /// Error-valued device holder carrying `stream`.
    pub fn create_dev_error(&mut self, stream: i64, message: impl Into<String>) -> ValueHolder {
        let id = self.fresh_id();
        ValueHolder::new_error(id, message.into(), MemKind::DevMem { stream })
    }
}
