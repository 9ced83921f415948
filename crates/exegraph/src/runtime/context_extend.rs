use bytemuck::{Pod, Zeroable};

use crate::runtime::continuous_buffer::BlobError;

/// Fixed header of a serialized KernelExtendInfo record: the exe node's own
/// interned name and type as buffer-pool ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct KernelExtendInfoHeader {
    pub kernel_name_id: u64,
    pub kernel_type_id: u64,
}

const HEADER_LEN: usize = std::mem::size_of::<KernelExtendInfoHeader>();

/// Builds the serialized form of one record.
pub fn build_kernel_extend_info(kernel_name_id: u64, kernel_type_id: u64) -> Vec<u8> {
    bytemuck::bytes_of(&KernelExtendInfoHeader {
        kernel_name_id,
        kernel_type_id,
    })
    .to_vec()
}

/// Checked view over one serialized KernelExtendInfo record.
#[derive(Debug, Clone, Copy)]
pub struct KernelExtendInfo<'a> {
    header: KernelExtendInfoHeader,
    _bytes: &'a [u8],
}

impl<'a> KernelExtendInfo<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BlobError> {
        if bytes.len() < HEADER_LEN {
            return Err(BlobError::Truncated {
                len: bytes.len(),
                needed: HEADER_LEN,
            });
        }
        Ok(Self {
            header: bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]),
            _bytes: bytes,
        })
    }

    pub fn kernel_name_id(&self) -> u64 {
        self.header.kernel_name_id
    }

    pub fn kernel_type_id(&self) -> u64 {
        self.header.kernel_type_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_returns_the_ids() {
        let blob = build_kernel_extend_info(11, 22);
        let view = KernelExtendInfo::parse(&blob).unwrap();
        assert_eq!(view.kernel_name_id(), 11);
        assert_eq!(view.kernel_type_id(), 22);
    }

    #[test]
    fn parse_rejects_short_buffers() {
        let err = KernelExtendInfo::parse(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, BlobError::Truncated { .. }));
    }
}
