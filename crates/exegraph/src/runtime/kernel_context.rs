use std::any::Any;
use std::sync::Arc;

use bytemuck::Pod;

use crate::runtime::compute_node_info::ComputeNodeInfo;
use crate::runtime::context_extend::KernelExtendInfo;
use crate::runtime::continuous_buffer::BlobError;

const INLINE_LEN: usize = std::mem::size_of::<usize>();

/// Storage of one value slot: nothing, a pointer-sized inline value, or an
/// owned heap value whose drop stands in for the deleter callback.
enum ChainStorage {
    Empty,
    Inline([u8; INLINE_LEN]),
    Boxed(Box<dyn Any>),
}

/// One input or output slot of a [`KernelContext`].
///
/// Values no larger than a pointer are stored inline; anything bigger goes
/// through one heap allocation. Reads are typed and checked.
pub struct Chain {
    storage: ChainStorage,
}

impl Default for Chain {
    fn default() -> Self {
        Self {
            storage: ChainStorage::Empty,
        }
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.storage {
            ChainStorage::Empty => f.write_str("Chain(empty)"),
            ChainStorage::Inline(bytes) => write!(f, "Chain(inline {bytes:?})"),
            ChainStorage::Boxed(_) => f.write_str("Chain(boxed)"),
        }
    }
}

impl Chain {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether a value of `size` bytes takes the inline fast path.
    pub fn is_inline_size(size: usize) -> bool {
        size <= INLINE_LEN
    }

    /// Slot holding `value`, inline when it fits.
    pub fn of_value<T: Pod>(value: T) -> Self {
        let mut chain = Self::empty();
        chain.set_value(value);
        chain
    }

    /// Slot owning a heap value; dropping the chain releases it.
    pub fn of_boxed<T: Any>(value: Box<T>) -> Self {
        Self {
            storage: ChainStorage::Boxed(value),
        }
    }

    pub fn set_value<T: Pod>(&mut self, value: T) {
        if Self::is_inline_size(std::mem::size_of::<T>()) {
            let mut bytes = [0u8; INLINE_LEN];
            bytes[..std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
            self.storage = ChainStorage::Inline(bytes);
        } else {
            self.storage = ChainStorage::Boxed(Box::new(value));
        }
    }

    pub fn set_boxed<T: Any>(&mut self, value: Box<T>) {
        self.storage = ChainStorage::Boxed(value);
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.storage, ChainStorage::Empty)
    }

    /// Typed read; inline slots are decoded from the inline bytes, boxed
    /// slots are downcast.
    pub fn get_value<T: Pod>(&self) -> Option<T> {
        match &self.storage {
            ChainStorage::Empty => None,
            ChainStorage::Inline(bytes) => {
                if !Self::is_inline_size(std::mem::size_of::<T>()) {
                    return None;
                }
                Some(bytemuck::pod_read_unaligned(
                    &bytes[..std::mem::size_of::<T>()],
                ))
            }
            ChainStorage::Boxed(boxed) => boxed.downcast_ref::<T>().copied(),
        }
    }

    /// Borrow of a heap-stored value.
    pub fn get_ref<T: Any>(&self) -> Option<&T> {
        match &self.storage {
            ChainStorage::Boxed(boxed) => boxed.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// Per-invocation runtime record: the value slots of one kernel launch plus
/// shared references to the node's compiled metadata blobs.
///
/// Slots `0..input_num` are inputs, the following `output_num` are outputs.
/// Constructed by the runtime loader or by
/// [`KernelRunContextBuilder`](crate::runtime::KernelRunContextBuilder) for
/// out-of-graph testing; never by lowering code.
pub struct KernelContext {
    input_num: usize,
    output_num: usize,
    values: Vec<Chain>,
    compute_node_info: Arc<[u8]>,
    kernel_extend_info: Arc<[u8]>,
}

impl KernelContext {
    pub(crate) fn new(
        inputs: Vec<Chain>,
        outputs: Vec<Chain>,
        compute_node_info: Arc<[u8]>,
        kernel_extend_info: Arc<[u8]>,
    ) -> Self {
        let input_num = inputs.len();
        let output_num = outputs.len();
        let mut values = inputs;
        values.extend(outputs);
        Self {
            input_num,
            output_num,
            values,
            compute_node_info,
            kernel_extend_info,
        }
    }

    pub fn input_num(&self) -> usize {
        self.input_num
    }

    pub fn output_num(&self) -> usize {
        self.output_num
    }

    pub fn get_input(&self, index: usize) -> Option<&Chain> {
        if index >= self.input_num {
            return None;
        }
        self.values.get(index)
    }

    pub fn get_output(&self, index: usize) -> Option<&Chain> {
        if index >= self.output_num {
            return None;
        }
        self.values.get(self.input_num + index)
    }

    pub fn get_output_mut(&mut self, index: usize) -> Option<&mut Chain> {
        if index >= self.output_num {
            return None;
        }
        self.values.get_mut(self.input_num + index)
    }

    pub fn get_input_value<T: Pod>(&self, index: usize) -> Option<T> {
        self.get_input(index)?.get_value()
    }

    /// The node's ComputeNodeInfo record, parsed in place.
    pub fn compute_node_info(&self) -> Result<ComputeNodeInfo<'_>, BlobError> {
        ComputeNodeInfo::parse(&self.compute_node_info)
    }

    /// The node's KernelExtendInfo record, parsed in place.
    pub fn kernel_extend_info(&self) -> Result<KernelExtendInfo<'_>, BlobError> {
        KernelExtendInfo::parse(&self.kernel_extend_info)
    }

    pub fn compute_node_info_bytes(&self) -> &[u8] {
        &self.compute_node_info
    }

    pub fn kernel_extend_info_bytes(&self) -> &[u8] {
        &self.kernel_extend_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_values_round_trip_without_allocation() {
        let chain = Chain::of_value(0x1234_5678u32);
        assert_eq!(chain.get_value::<u32>(), Some(0x1234_5678));
        assert!(Chain::is_inline_size(std::mem::size_of::<u32>()));
        assert!(chain.get_ref::<u32>().is_none());
    }

    #[test]
    fn oversized_pod_values_fall_back_to_the_heap() {
        #[derive(Clone, Copy, PartialEq, Debug, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(C)]
        struct Wide([u64; 4]);

        let chain = Chain::of_value(Wide([1, 2, 3, 4]));
        assert_eq!(chain.get_value::<Wide>(), Some(Wide([1, 2, 3, 4])));
        assert!(chain.get_ref::<Wide>().is_some());
    }

    #[test]
    fn boxed_values_are_borrowable_and_dropped() {
        let chain = Chain::of_boxed(Box::new(String::from("resource")));
        assert_eq!(chain.get_ref::<String>().map(String::as_str), Some("resource"));
        assert_eq!(chain.get_value::<u64>(), None);
    }

    #[test]
    fn slot_indexing_respects_the_input_output_split() {
        let context = KernelContext::new(
            vec![Chain::of_value(1u64), Chain::of_value(2u64)],
            vec![Chain::empty()],
            Arc::from(Vec::<u8>::new()),
            Arc::from(Vec::<u8>::new()),
        );
        assert_eq!(context.input_num(), 2);
        assert_eq!(context.output_num(), 1);
        assert_eq!(context.get_input_value::<u64>(1), Some(2));
        assert!(context.get_input(2).is_none());
        assert!(context.get_output(0).is_some());
        assert!(context.get_output(1).is_none());
    }
}
