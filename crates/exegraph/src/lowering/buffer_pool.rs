use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::runtime::continuous_buffer::write_u64;

/// Content-addressed byte-buffer interning table.
///
/// Identical contents intern to one stable id in first-seen order. The whole
/// table serializes into the directory-prefixed contiguous layout read back
/// by [`ContinuousBuffer`](crate::runtime::ContinuousBuffer), so an id is
/// usable both in-process (via [`get_buf_by_id`](Self::get_buf_by_id)) and
/// post-serialization (as a directory index).
#[derive(Debug, Default)]
pub struct BufferPool {
    bufs: Vec<Vec<u8>>,
    ids: HashMap<Vec<u8>, usize>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `bytes`, returning the existing id when the content was seen
    /// before.
    pub fn add_buf(&mut self, bytes: &[u8]) -> usize {
        if let Some(&id) = self.ids.get(bytes) {
            return id;
        }
        let id = self.bufs.len();
        self.bufs.push(bytes.to_vec());
        self.ids.insert(bytes.to_vec(), id);
        id
    }

    /// Interns a string's bytes.
    pub fn add_str(&mut self, value: &str) -> usize {
        self.add_buf(value.as_bytes())
    }

    /// Number of distinct buffers.
    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    /// In-pool bytes of `id`, valid until the next insertion.
    pub fn get_buf_by_id(&self, id: usize) -> Option<&[u8]> {
        self.bufs.get(id).map(Vec::as_slice)
    }

    /// Serializes all buffers into one directory-prefixed contiguous blob:
    /// `num`, `num + 1` offsets, then the buffer bytes in id order.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let num = self.bufs.len();
        let header = (num + 1)
            .checked_mul(8)
            .and_then(|table| table.checked_add(8))
            .ok_or_else(|| anyhow!("buffer pool directory size overflow"))?;
        let mut total = header;
        for buf in &self.bufs {
            total = total
                .checked_add(buf.len())
                .ok_or_else(|| anyhow!("buffer pool payload size overflow"))?;
        }

        let mut blob = vec![0u8; total];
        write_u64(&mut blob, 0, num as u64);
        let mut offset = header;
        for (index, buf) in self.bufs.iter().enumerate() {
            write_u64(&mut blob, 8 + index * 8, offset as u64);
            blob[offset..offset + buf.len()].copy_from_slice(buf);
            offset += buf.len();
        }
        write_u64(&mut blob, 8 + num * 8, offset as u64);
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_str_is_idempotent() {
        let mut pool = BufferPool::new();
        let first = pool.add_str("foo");
        let second = pool.add_str("foo");
        assert_eq!(first, second);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_contents_get_fresh_ids_in_order() {
        let mut pool = BufferPool::new();
        assert_eq!(pool.add_str("a"), 0);
        assert_eq!(pool.add_buf(&[7u8; 3]), 1);
        assert_eq!(pool.add_str("b"), 2);
        assert_eq!(pool.add_buf(b"a"), 0);
    }

    #[test]
    fn get_buf_by_id_resolves_pre_serialization() {
        let mut pool = BufferPool::new();
        let id = pool.add_buf(&[9, 8, 7]);
        assert_eq!(pool.get_buf_by_id(id), Some(&[9u8, 8, 7][..]));
        assert_eq!(pool.get_buf_by_id(id + 1), None);
    }
}
