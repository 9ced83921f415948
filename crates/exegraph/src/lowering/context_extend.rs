//! Builders turning a compute-graph op descriptor into the serialized
//! ComputeNodeInfo / KernelExtendInfo records, interning every string into
//! the session's buffer pool.

use anyhow::{anyhow, Result};

use crate::ir::{AttrValue, IrInputKind, OpDesc};
use crate::lowering::buffer_pool::BufferPool;
use crate::lowering::tlv::Tlv;
use crate::runtime::compute_node_info::{
    AnchorInstanceInfo, CompileTimeTensorDesc, ComputeNodeInfoBuilder,
};
use crate::runtime::context_extend::build_kernel_extend_info;
use crate::warning;

/// Number of anchors IR input `ir_name` instantiated, starting at
/// `start_index` of the node's instantiated inputs. `None` means the
/// prototype and the instantiation disagree and the entry is skipped.
fn instance_num(
    op: &OpDesc,
    ir_name: &str,
    kind: IrInputKind,
    start_index: usize,
) -> Option<usize> {
    match kind {
        IrInputKind::Required => {
            if op.input_name(start_index) == Some(ir_name) {
                Some(1)
            } else {
                None
            }
        }
        IrInputKind::Optional => {
            if op.input_name(start_index) == Some(ir_name) {
                Some(1)
            } else {
                Some(0)
            }
        }
        IrInputKind::Dynamic => {
            let mut count = 0usize;
            while let Some(name) = op.input_name(start_index + count) {
                if name != format!("{ir_name}{count}") {
                    break;
                }
                count += 1;
            }
            Some(count)
        }
    }
}

/// Serializes the IR-declared attributes in declaration order as TLV
/// records; the names are implied by the order, only values are stored.
fn create_attr_section(op: &OpDesc) -> Result<Vec<u8>> {
    let mut tlv = Tlv::new();
    for (_, value) in op.attrs() {
        match value {
            AttrValue::Bool(b) => tlv.append_int(i64::from(*b)),
            AttrValue::Int(i) => tlv.append_int(*i),
            AttrValue::Float(f) => tlv.append_float(*f),
            AttrValue::Str(s) => tlv.append_string(s),
            AttrValue::IntList(values) => tlv.append_list_int(values),
            AttrValue::Bytes(bytes) => tlv.append_bytes(bytes),
        };
    }
    tlv.serialize()
}

/// Builds one node's ComputeNodeInfo record: IR instantiation, compile-time
/// tensor descriptors for every instantiated input/output, and the attr
/// section. Name and type are interned into `pool`.
pub fn create_compute_node_info(op: &OpDesc, pool: &mut BufferPool) -> Result<Vec<u8>> {
    let name_id = pool.add_str(op.name()) as u64;
    let type_id = pool.add_str(op.op_type()) as u64;
    let mut builder = ComputeNodeInfoBuilder::new(name_id, type_id);

    let mut input_index = 0usize;
    for (ir_name, kind) in op.ir_inputs() {
        match instance_num(op, ir_name, *kind, input_index) {
            Some(num) => {
                builder.push_instance(AnchorInstanceInfo {
                    instance_start: input_index as u32,
                    instantiation_num: num as u32,
                });
                input_index += num;
            }
            None => {
                warning!(
                    "node {}: no instantiated input found for required ir input {}",
                    op.name(),
                    ir_name
                );
                builder.push_instance(AnchorInstanceInfo::default());
            }
        }
    }

    for index in 0..op.inputs_num() {
        let desc = op
            .input_desc(index)
            .ok_or_else(|| anyhow!("node {} has no input desc {}", op.name(), index))?;
        builder.push_input(CompileTimeTensorDesc::from_desc(desc));
    }
    for index in 0..op.outputs_num() {
        let desc = op
            .output_desc(index)
            .ok_or_else(|| anyhow!("node {} has no output desc {}", op.name(), index))?;
        builder.push_output(CompileTimeTensorDesc::from_desc(desc));
    }

    builder.set_attrs(create_attr_section(op)?);
    builder.build()
}

/// Builds one exe node's KernelExtendInfo record, interning its name and
/// type into `pool`.
pub fn create_kernel_extend_info(name: &str, node_type: &str, pool: &mut BufferPool) -> Vec<u8> {
    let name_id = pool.add_str(name) as u64;
    let type_id = pool.add_str(node_type) as u64;
    build_kernel_extend_info(name_id, type_id)
}
