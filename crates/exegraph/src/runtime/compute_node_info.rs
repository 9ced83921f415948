use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};

use crate::ir::{DataType, ExpandDimsType, Format, StorageFormat, TensorDesc};
use crate::lowering::Tlv;
use crate::runtime::continuous_buffer::BlobError;

/// Instantiation of one IR-prototype input: where its anchors start and how
/// many were instantiated (0 for an omitted optional, N for a dynamic run).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct AnchorInstanceInfo {
    pub instance_start: u32,
    pub instantiation_num: u32,
}

/// Compile-time tensor descriptor in its serialized form. All fields are
/// plain integers so the record stays relocatable; the typed accessors
/// validate on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CompileTimeTensorDesc {
    data_type: i32,
    origin_format: i32,
    storage_format: i32,
    reserved: i32,
    expand_dims: i64,
}

impl CompileTimeTensorDesc {
    pub fn from_desc(desc: &TensorDesc) -> Self {
        Self {
            data_type: desc.data_type as i32,
            origin_format: desc.format.origin as i32,
            storage_format: desc.format.storage as i32,
            reserved: 0,
            expand_dims: desc.format.expand_dims.0,
        }
    }

    pub fn data_type(&self) -> Option<DataType> {
        DataType::from_raw(self.data_type)
    }

    pub fn origin_format(&self) -> Option<Format> {
        Format::from_raw(self.origin_format)
    }

    pub fn storage_format(&self) -> Option<Format> {
        Format::from_raw(self.storage_format)
    }

    pub fn expand_dims_type(&self) -> ExpandDimsType {
        ExpandDimsType(self.expand_dims)
    }

    pub fn storage(&self) -> Option<StorageFormat> {
        Some(StorageFormat {
            origin: self.origin_format()?,
            storage: self.storage_format()?,
            expand_dims: self.expand_dims_type(),
        })
    }
}

/// Fixed header of a serialized ComputeNodeInfo record. Name and type are
/// buffer-pool ids, never pointers, so a loaded record is addressed in
/// place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ComputeNodeInfoHeader {
    pub node_type_id: u64,
    pub node_name_id: u64,
    pub ir_inputs_num: u64,
    pub inputs_num: u64,
    pub outputs_num: u64,
}

const HEADER_LEN: usize = std::mem::size_of::<ComputeNodeInfoHeader>();
const INSTANCE_LEN: usize = std::mem::size_of::<AnchorInstanceInfo>();
const TD_LEN: usize = std::mem::size_of::<CompileTimeTensorDesc>();

/// Exact byte size of the fixed part of a record with the given arities:
/// header, one instance entry per IR input, one tensor descriptor per
/// instantiated input and output. The trailing attribute section is not
/// included. Fails on arithmetic overflow rather than wrapping.
pub fn calc_size(ir_inputs_num: usize, inputs_num: usize, outputs_num: usize) -> Result<usize> {
    let ir_size = ir_inputs_num
        .checked_mul(INSTANCE_LEN)
        .ok_or_else(|| anyhow!("ir input section size overflow"))?;
    let io_size = inputs_num
        .checked_add(outputs_num)
        .and_then(|n| n.checked_mul(TD_LEN))
        .ok_or_else(|| anyhow!("tensor descriptor section size overflow"))?;
    HEADER_LEN
        .checked_add(ir_size)
        .and_then(|n| n.checked_add(io_size))
        .ok_or_else(|| anyhow!("compute node info size overflow"))
}

/// Assembles one record: exact size first, one allocation, then fill.
#[derive(Debug, Default)]
pub struct ComputeNodeInfoBuilder {
    node_type_id: u64,
    node_name_id: u64,
    instances: Vec<AnchorInstanceInfo>,
    input_tds: Vec<CompileTimeTensorDesc>,
    output_tds: Vec<CompileTimeTensorDesc>,
    attrs: Vec<u8>,
}

impl ComputeNodeInfoBuilder {
    pub fn new(node_name_id: u64, node_type_id: u64) -> Self {
        Self {
            node_type_id,
            node_name_id,
            ..Self::default()
        }
    }

    pub fn push_instance(&mut self, instance: AnchorInstanceInfo) -> &mut Self {
        self.instances.push(instance);
        self
    }

    pub fn push_input(&mut self, td: CompileTimeTensorDesc) -> &mut Self {
        self.input_tds.push(td);
        self
    }

    pub fn push_output(&mut self, td: CompileTimeTensorDesc) -> &mut Self {
        self.output_tds.push(td);
        self
    }

    /// Sets the serialized attribute section appended after the fixed part.
    pub fn set_attrs(&mut self, attrs: Vec<u8>) -> &mut Self {
        self.attrs = attrs;
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let fixed = calc_size(
            self.instances.len(),
            self.input_tds.len(),
            self.output_tds.len(),
        )?;
        let total = fixed
            .checked_add(self.attrs.len())
            .ok_or_else(|| anyhow!("compute node info attr section overflow"))?;

        let mut blob = vec![0u8; total];
        let header = ComputeNodeInfoHeader {
            node_type_id: self.node_type_id,
            node_name_id: self.node_name_id,
            ir_inputs_num: self.instances.len() as u64,
            inputs_num: self.input_tds.len() as u64,
            outputs_num: self.output_tds.len() as u64,
        };
        blob[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&header));

        let mut pos = HEADER_LEN;
        for instance in &self.instances {
            blob[pos..pos + INSTANCE_LEN].copy_from_slice(bytemuck::bytes_of(instance));
            pos += INSTANCE_LEN;
        }
        for td in self.input_tds.iter().chain(self.output_tds.iter()) {
            blob[pos..pos + TD_LEN].copy_from_slice(bytemuck::bytes_of(td));
            pos += TD_LEN;
        }
        blob[pos..].copy_from_slice(&self.attrs);
        Ok(blob)
    }
}

/// Checked view over one serialized ComputeNodeInfo record.
#[derive(Debug, Clone, Copy)]
pub struct ComputeNodeInfo<'a> {
    bytes: &'a [u8],
    header: ComputeNodeInfoHeader,
}

impl<'a> ComputeNodeInfo<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BlobError> {
        if bytes.len() < HEADER_LEN {
            return Err(BlobError::Truncated {
                len: bytes.len(),
                needed: HEADER_LEN,
            });
        }
        let header: ComputeNodeInfoHeader =
            bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]);
        let fixed = calc_size(
            header.ir_inputs_num as usize,
            header.inputs_num as usize,
            header.outputs_num as usize,
        )
        .map_err(|_| BlobError::BadCount {
            num: header.ir_inputs_num,
            len: bytes.len(),
        })?;
        if bytes.len() < fixed {
            return Err(BlobError::Truncated {
                len: bytes.len(),
                needed: fixed,
            });
        }
        Ok(Self { bytes, header })
    }

    pub fn node_type_id(&self) -> u64 {
        self.header.node_type_id
    }

    pub fn node_name_id(&self) -> u64 {
        self.header.node_name_id
    }

    pub fn ir_inputs_num(&self) -> usize {
        self.header.ir_inputs_num as usize
    }

    pub fn inputs_num(&self) -> usize {
        self.header.inputs_num as usize
    }

    pub fn outputs_num(&self) -> usize {
        self.header.outputs_num as usize
    }

    /// Instantiation record of IR input `ir_index`.
    pub fn input_instance_info(&self, ir_index: usize) -> Option<AnchorInstanceInfo> {
        if ir_index >= self.ir_inputs_num() {
            return None;
        }
        let start = HEADER_LEN + ir_index * INSTANCE_LEN;
        Some(bytemuck::pod_read_unaligned(
            self.bytes.get(start..start + INSTANCE_LEN)?,
        ))
    }

    /// Compile-time descriptor of instantiated input `index`.
    pub fn input_td(&self, index: usize) -> Option<CompileTimeTensorDesc> {
        if index >= self.inputs_num() {
            return None;
        }
        let base = HEADER_LEN + self.ir_inputs_num() * INSTANCE_LEN;
        let start = base + index * TD_LEN;
        Some(bytemuck::pod_read_unaligned(
            self.bytes.get(start..start + TD_LEN)?,
        ))
    }

    /// Compile-time descriptor of output `index`.
    pub fn output_td(&self, index: usize) -> Option<CompileTimeTensorDesc> {
        if index >= self.outputs_num() {
            return None;
        }
        let base = HEADER_LEN
            + self.ir_inputs_num() * INSTANCE_LEN
            + self.inputs_num() * TD_LEN;
        let start = base + index * TD_LEN;
        Some(bytemuck::pod_read_unaligned(
            self.bytes.get(start..start + TD_LEN)?,
        ))
    }

    /// The trailing attribute section as TLV records.
    pub fn attrs(&self) -> Tlv {
        let fixed = calc_size(
            self.ir_inputs_num(),
            self.inputs_num(),
            self.outputs_num(),
        )
        .unwrap_or(self.bytes.len());
        Tlv::deserialize_from(&self.bytes[fixed.min(self.bytes.len())..])
    }
}
