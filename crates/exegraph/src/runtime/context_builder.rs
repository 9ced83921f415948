//! Host-side assembly of one [`KernelContext`] from a bare op descriptor,
//! for exercising kernels outside a lowered graph.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::ir::OpDesc;
use crate::lowering::context_extend::{create_compute_node_info, create_kernel_extend_info};
use crate::lowering::BufferPool;
use crate::runtime::continuous_buffer::ContinuousBuffer;
use crate::runtime::kernel_context::{Chain, KernelContext};

/// Everything a standalone context needs to stay alive: the context itself
/// plus the blobs its views address.
pub struct KernelContextHolder {
    pub context: KernelContext,
    buffer: Arc<[u8]>,
}

impl KernelContextHolder {
    fn resolve(&self, id: u64) -> Result<&str> {
        let pool = ContinuousBuffer::parse(&self.buffer).context("buffer pool blob unreadable")?;
        pool.get_str(id as usize)
            .with_context(|| format!("buffer pool has no string at id {id}"))
    }

    /// Node name recorded in the context's ComputeNodeInfo.
    pub fn node_name(&self) -> Result<&str> {
        let id = self.context.compute_node_info()?.node_name_id();
        self.resolve(id)
    }

    /// Node type recorded in the context's ComputeNodeInfo.
    pub fn node_type(&self) -> Result<&str> {
        let id = self.context.compute_node_info()?.node_type_id();
        self.resolve(id)
    }

    /// Serialized buffer pool backing the interned names.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

/// Builder collecting value slots before assembling the context.
#[derive(Default)]
pub struct KernelRunContextBuilder {
    inputs: Vec<Chain>,
    outputs: Vec<Chain>,
}

impl KernelRunContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(mut self, inputs: Vec<Chain>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn outputs(mut self, outputs: Vec<Chain>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Builds the context: both metadata records are created against a
    /// private buffer pool, which serializes into the holder.
    pub fn build(self, op: &OpDesc) -> Result<KernelContextHolder> {
        let mut pool = BufferPool::new();
        let compute_node_info: Arc<[u8]> = create_compute_node_info(op, &mut pool)?.into();
        let kernel_extend_info: Arc<[u8]> =
            create_kernel_extend_info(op.name(), op.op_type(), &mut pool).into();
        let buffer: Arc<[u8]> = pool.serialize()?.into();

        let context = KernelContext::new(
            self.inputs,
            self.outputs,
            compute_node_info,
            kernel_extend_info,
        );
        Ok(KernelContextHolder { context, buffer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, Format, TensorDesc};

    #[test]
    fn builds_a_context_with_resolvable_names() {
        let op = OpDesc::new("add_0", "Add")
            .add_input("x1", TensorDesc::new(DataType::Float, Format::Nd, Format::Nd))
            .add_input("x2", TensorDesc::new(DataType::Float, Format::Nd, Format::Nd))
            .add_output(TensorDesc::new(DataType::Float, Format::Nd, Format::Nd));

        let holder = KernelRunContextBuilder::new()
            .inputs(vec![Chain::of_value(3u64), Chain::of_value(4u64)])
            .outputs(vec![Chain::empty()])
            .build(&op)
            .unwrap();

        assert_eq!(holder.node_name().unwrap(), "add_0");
        assert_eq!(holder.node_type().unwrap(), "Add");
        assert_eq!(holder.context.input_num(), 2);
        assert_eq!(holder.context.output_num(), 1);
        assert_eq!(holder.context.get_input_value::<u64>(0), Some(3));
        assert_eq!(holder.context.get_input_value::<u64>(1), Some(4));

        let info = holder.context.compute_node_info().unwrap();
        assert_eq!(info.inputs_num(), 2);
        assert_eq!(info.outputs_num(), 1);
        let extend = holder.context.kernel_extend_info().unwrap();
        assert_eq!(extend.kernel_name_id(), info.node_name_id());
    }
}
