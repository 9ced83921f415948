use thiserror::Error;

/// Decode failures of the offset-addressed blob views.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob of {len} bytes is shorter than the {needed} bytes required")]
    Truncated { len: usize, needed: usize },
    #[error("offset table entry {index} ({offset}) exceeds blob length {len}")]
    BadOffset {
        index: usize,
        offset: u64,
        len: usize,
    },
    #[error("offset table is not monotonically non-decreasing at entry {index}")]
    UnorderedOffsets { index: usize },
    #[error("count field {num} is implausible for blob length {len}")]
    BadCount { num: u64, len: usize },
}

pub(crate) fn read_u64(bytes: &[u8], pos: usize) -> Option<u64> {
    let end = pos.checked_add(8)?;
    let slice = bytes.get(pos..end)?;
    Some(u64::from_le_bytes(slice.try_into().ok()?))
}

pub(crate) fn write_u64(bytes: &mut [u8], pos: usize, value: u64) {
    bytes[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
}

/// Directory-prefixed concatenation of buffers, addressed by index.
///
/// Layout: `num: u64`, then `num + 1` offsets (relative to the blob base,
/// little-endian u64), then the buffer bytes back to back. Entry `i` spans
/// `offsets[i]..offsets[i + 1]`; the final offset doubles as the total
/// length. The view validates the whole directory once at parse time so the
/// per-entry accessors stay cheap.
#[derive(Debug, Clone, Copy)]
pub struct ContinuousBuffer<'a> {
    bytes: &'a [u8],
    num: usize,
}

impl<'a> ContinuousBuffer<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BlobError> {
        let num = read_u64(bytes, 0).ok_or(BlobError::Truncated {
            len: bytes.len(),
            needed: 8,
        })?;
        let num_usize = usize::try_from(num).map_err(|_| BlobError::BadCount {
            num,
            len: bytes.len(),
        })?;
        let table_len = num_usize
            .checked_add(1)
            .and_then(|entries| entries.checked_mul(8))
            .and_then(|table| table.checked_add(8))
            .ok_or(BlobError::BadCount {
                num,
                len: bytes.len(),
            })?;
        if bytes.len() < table_len {
            return Err(BlobError::Truncated {
                len: bytes.len(),
                needed: table_len,
            });
        }

        let mut prev = table_len as u64;
        for index in 0..=num_usize {
            let offset = read_u64(bytes, 8 + index * 8).ok_or(BlobError::Truncated {
                len: bytes.len(),
                needed: 8 + index * 8 + 8,
            })?;
            if offset < prev {
                return Err(BlobError::UnorderedOffsets { index });
            }
            if offset > bytes.len() as u64 {
                return Err(BlobError::BadOffset {
                    index,
                    offset,
                    len: bytes.len(),
                });
            }
            prev = offset;
        }

        Ok(Self {
            bytes,
            num: num_usize,
        })
    }

    pub fn num(&self) -> usize {
        self.num
    }

    /// Total length recorded by the directory (the final offset).
    pub fn total_length(&self) -> u64 {
        read_u64(self.bytes, 8 + self.num * 8).unwrap_or(0)
    }

    /// Bytes of entry `index`, or `None` when out of range.
    pub fn get(&self, index: usize) -> Option<&'a [u8]> {
        if index >= self.num {
            return None;
        }
        let start = read_u64(self.bytes, 8 + index * 8)? as usize;
        let end = read_u64(self.bytes, 8 + (index + 1) * 8)? as usize;
        self.bytes.get(start..end)
    }

    /// Entry `index` interpreted as UTF-8.
    pub fn get_str(&self, index: usize) -> Option<&'a str> {
        std::str::from_utf8(self.get(index)?).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowering::BufferPool;

    #[test]
    fn parse_round_trips_pool_entries() {
        let mut pool = BufferPool::new();
        let a = pool.add_str("alpha");
        let b = pool.add_buf(&[1, 2, 3]);
        let blob = pool.serialize().unwrap();

        let view = ContinuousBuffer::parse(&blob).unwrap();
        assert_eq!(view.num(), 2);
        assert_eq!(view.get_str(a), Some("alpha"));
        assert_eq!(view.get(b), Some(&[1u8, 2, 3][..]));
        assert_eq!(view.get(2), None);
        assert_eq!(view.total_length(), blob.len() as u64);
    }

    #[test]
    fn parse_rejects_truncated_directory() {
        let mut pool = BufferPool::new();
        pool.add_str("payload");
        let blob = pool.serialize().unwrap();

        let err = ContinuousBuffer::parse(&blob[..12]).unwrap_err();
        assert!(matches!(err, BlobError::Truncated { .. }));
    }

    #[test]
    fn parse_rejects_offsets_past_the_end() {
        let mut pool = BufferPool::new();
        pool.add_str("payload");
        let mut blob = pool.serialize().unwrap();
        let len = blob.len();
        blob.truncate(len - 2);

        let err = ContinuousBuffer::parse(&blob).unwrap_err();
        assert!(matches!(err, BlobError::BadOffset { .. }));
    }

    #[test]
    fn empty_pool_serializes_to_an_empty_directory() {
        let pool = BufferPool::new();
        let blob = pool.serialize().unwrap();
        let view = ContinuousBuffer::parse(&blob).unwrap();
        assert_eq!(view.num(), 0);
        assert_eq!(view.get(0), None);
    }
}
