//! Compute-graph collaborator surface.
//!
//! The lowering layer does not own the source compute graph; it consumes a
//! narrow capability from it: per-node op descriptors carrying the IR input
//! prototype, the instantiated input/output tensor descriptors, and the
//! IR-ordered attribute values. This module defines exactly that surface.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Element type of a tensor, stable numeric tags for the binary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum DataType {
    Float = 0,
    Float16 = 1,
    Int8 = 2,
    Int32 = 3,
    Uint8 = 4,
    Int16 = 6,
    Uint16 = 7,
    Uint32 = 8,
    Int64 = 9,
    Uint64 = 10,
    Double = 11,
    Bool = 12,
    Undefined = -1,
}

impl DataType {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(DataType::Float),
            1 => Some(DataType::Float16),
            2 => Some(DataType::Int8),
            3 => Some(DataType::Int32),
            4 => Some(DataType::Uint8),
            6 => Some(DataType::Int16),
            7 => Some(DataType::Uint16),
            8 => Some(DataType::Uint32),
            9 => Some(DataType::Int64),
            10 => Some(DataType::Uint64),
            11 => Some(DataType::Double),
            12 => Some(DataType::Bool),
            -1 => Some(DataType::Undefined),
            _ => None,
        }
    }
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Undefined
    }
}

/// Memory layout of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Format {
    Nchw = 0,
    Nhwc = 1,
    Nd = 2,
    Nc1hwc0 = 3,
    FractalZ = 4,
    Undefined = -1,
}

impl Format {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Format::Nchw),
            1 => Some(Format::Nhwc),
            2 => Some(Format::Nd),
            3 => Some(Format::Nc1hwc0),
            4 => Some(Format::FractalZ),
            -1 => Some(Format::Undefined),
            _ => None,
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::Undefined
    }
}

/// Axis-padding rule applied when converting between origin and storage
/// formats. The mask encoding is opaque to this layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandDimsType(pub i64);

/// Origin/storage format pair plus the padding rule between them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFormat {
    pub origin: Format,
    pub storage: Format,
    pub expand_dims: ExpandDimsType,
}

/// Compile-time tensor descriptor of one instantiated input or output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub data_type: DataType,
    pub format: StorageFormat,
}

impl TensorDesc {
    pub fn new(data_type: DataType, origin: Format, storage: Format) -> Self {
        Self {
            data_type,
            format: StorageFormat {
                origin,
                storage,
                expand_dims: ExpandDimsType::default(),
            },
        }
    }
}

/// Arity class of one input in the op prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrInputKind {
    Required,
    Optional,
    Dynamic,
}

/// Attribute value attached to an op descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Str(String),
    IntList(Vec<i64>),
    Bytes(Vec<u8>),
}

/// Attributed descriptor of one compute-graph node.
///
/// `inputs` holds the instantiated inputs in anchor order; each carries the
/// valid input name used to resolve IR instantiation (a dynamic input `x`
/// instantiates as `x0`, `x1`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDesc {
    name: String,
    op_type: String,
    ir_inputs: Vec<(String, IrInputKind)>,
    inputs: Vec<(String, TensorDesc)>,
    outputs: Vec<TensorDesc>,
    attrs: Vec<(String, AttrValue)>,
}

impl OpDesc {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            ir_inputs: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: Vec::new(),
        }
    }

    pub fn add_ir_input(mut self, name: impl Into<String>, kind: IrInputKind) -> Self {
        self.ir_inputs.push((name.into(), kind));
        self
    }

    pub fn add_input(mut self, name: impl Into<String>, desc: TensorDesc) -> Self {
        self.inputs.push((name.into(), desc));
        self
    }

    pub fn add_output(mut self, desc: TensorDesc) -> Self {
        self.outputs.push(desc);
        self
    }

    /// Appends an attribute; attribute order is the IR declaration order.
    pub fn set_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.push((name.into(), value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn ir_inputs(&self) -> &[(String, IrInputKind)] {
        &self.ir_inputs
    }

    pub fn inputs_num(&self) -> usize {
        self.inputs.len()
    }

    pub fn outputs_num(&self) -> usize {
        self.outputs.len()
    }

    /// Valid name of the instantiated input at `index`, if present.
    pub fn input_name(&self, index: usize) -> Option<&str> {
        self.inputs.get(index).map(|(name, _)| name.as_str())
    }

    pub fn input_desc(&self, index: usize) -> Option<&TensorDesc> {
        self.inputs.get(index).map(|(_, desc)| desc)
    }

    pub fn output_desc(&self, index: usize) -> Option<&TensorDesc> {
        self.outputs.get(index)
    }

    pub fn attrs(&self) -> &[(String, AttrValue)] {
        &self.attrs
    }
}

/// Shared handle to one compute-graph node descriptor.
pub type ComputeNode = Rc<OpDesc>;
