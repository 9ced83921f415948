use anyhow::{anyhow, Result};

use crate::runtime::continuous_buffer::{read_u64, write_u64};

const TLV_VERSION: u64 = 1;
const BUFF_HEAD_LEN: usize = 16;
const RECORD_HEAD_LEN: usize = 16;

/// Tag of one TLV record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum TlvTag {
    Bytes = 0,
    Int64 = 1,
    String = 2,
    ListInt64 = 3,
    Float = 4,
}

impl TlvTag {
    fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(TlvTag::Bytes),
            1 => Some(TlvTag::Int64),
            2 => Some(TlvTag::String),
            3 => Some(TlvTag::ListInt64),
            4 => Some(TlvTag::Float),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TlvRecord {
    tag: TlvTag,
    bytes: Vec<u8>,
}

/// Append-only tag/length/value record list.
///
/// Serialized form: a `version, length` buffer head followed by each record
/// as `tag, len` plus `len` payload bytes. [`Tlv::deserialize_from`] walks
/// the records by `head + len` strides and fails closed: any length or
/// offset inconsistency yields an empty list rather than a partial one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv {
    records: Vec<TlvRecord>,
}

impl Tlv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.records.push(TlvRecord {
            tag: TlvTag::Bytes,
            bytes: bytes.to_vec(),
        });
        self
    }

    pub fn append_int(&mut self, value: i64) -> &mut Self {
        self.records.push(TlvRecord {
            tag: TlvTag::Int64,
            bytes: value.to_le_bytes().to_vec(),
        });
        self
    }

    pub fn append_string(&mut self, value: &str) -> &mut Self {
        self.records.push(TlvRecord {
            tag: TlvTag::String,
            bytes: value.as_bytes().to_vec(),
        });
        self
    }

    pub fn append_float(&mut self, value: f32) -> &mut Self {
        self.records.push(TlvRecord {
            tag: TlvTag::Float,
            bytes: value.to_le_bytes().to_vec(),
        });
        self
    }

    /// Appends an integer list as a count prefix followed by the raw
    /// payload.
    pub fn append_list_int(&mut self, values: &[i64]) -> &mut Self {
        let mut bytes = Vec::with_capacity(8 + values.len() * 8);
        bytes.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        self.records.push(TlvRecord {
            tag: TlvTag::ListInt64,
            bytes,
        });
        self
    }

    pub fn tag(&self, index: usize) -> Option<TlvTag> {
        self.records.get(index).map(|record| record.tag)
    }

    fn get(&self, index: usize, tag: TlvTag) -> Option<&[u8]> {
        let record = self.records.get(index)?;
        if record.tag != tag {
            return None;
        }
        Some(&record.bytes)
    }

    pub fn get_int(&self, index: usize) -> Option<i64> {
        let bytes = self.get(index, TlvTag::Int64)?;
        Some(i64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn get_float(&self, index: usize) -> Option<f32> {
        let bytes = self.get(index, TlvTag::Float)?;
        Some(f32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn get_string(&self, index: usize) -> Option<&str> {
        std::str::from_utf8(self.get(index, TlvTag::String)?).ok()
    }

    pub fn get_bytes(&self, index: usize) -> Option<&[u8]> {
        self.get(index, TlvTag::Bytes)
    }

    pub fn get_list_int(&self, index: usize) -> Option<Vec<i64>> {
        let bytes = self.get(index, TlvTag::ListInt64)?;
        let count = read_u64(bytes, 0)? as usize;
        let payload = bytes.get(8..)?;
        if payload.len() != count.checked_mul(8)? {
            return None;
        }
        Some(
            payload
                .chunks_exact(8)
                .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
                .collect(),
        )
    }

    /// Serializes the record list behind a `version, length` head.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut total = BUFF_HEAD_LEN;
        for record in &self.records {
            total = total
                .checked_add(RECORD_HEAD_LEN)
                .and_then(|t| t.checked_add(record.bytes.len()))
                .ok_or_else(|| anyhow!("tlv total length overflow"))?;
        }

        let mut blob = vec![0u8; total];
        write_u64(&mut blob, 0, TLV_VERSION);
        write_u64(&mut blob, 8, total as u64);
        let mut pos = BUFF_HEAD_LEN;
        for record in &self.records {
            write_u64(&mut blob, pos, record.tag as u64);
            write_u64(&mut blob, pos + 8, record.bytes.len() as u64);
            pos += RECORD_HEAD_LEN;
            blob[pos..pos + record.bytes.len()].copy_from_slice(&record.bytes);
            pos += record.bytes.len();
        }
        Ok(blob)
    }

    /// Walks the serialized records. Fails closed: any overflow, unknown
    /// tag, or truncated record yields an empty list.
    pub fn deserialize_from(bytes: &[u8]) -> Tlv {
        let Some(version) = read_u64(bytes, 0) else {
            return Tlv::new();
        };
        let Some(length) = read_u64(bytes, 8) else {
            return Tlv::new();
        };
        if version != TLV_VERSION || length as usize > bytes.len() {
            return Tlv::new();
        }
        let length = length as usize;

        let mut tlv = Tlv::new();
        let mut pos = BUFF_HEAD_LEN;
        while pos < length {
            let Some(raw_tag) = read_u64(bytes, pos) else {
                return Tlv::new();
            };
            let Some(tag) = TlvTag::from_raw(raw_tag) else {
                return Tlv::new();
            };
            let Some(len) = read_u64(bytes, pos + 8) else {
                return Tlv::new();
            };
            let Some(start) = pos.checked_add(RECORD_HEAD_LEN) else {
                return Tlv::new();
            };
            let Some(end) = start.checked_add(len as usize) else {
                return Tlv::new();
            };
            if end > length {
                return Tlv::new();
            }
            tlv.records.push(TlvRecord {
                tag,
                bytes: bytes[start..end].to_vec(),
            });
            pos = end;
        }
        tlv
    }

    /// Total length recorded in a serialized TLV head, 0 when unreadable.
    pub fn buff_length(bytes: &[u8]) -> usize {
        read_u64(bytes, 8).unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_reproduces_every_record_kind() {
        let mut tlv = Tlv::new();
        tlv.append_int(-42)
            .append_string("kernel")
            .append_bytes(&[0xde, 0xad])
            .append_list_int(&[1, 2, 3])
            .append_float(0.5);

        let blob = tlv.serialize().unwrap();
        let parsed = Tlv::deserialize_from(&blob);
        assert_eq!(parsed, tlv);
        assert_eq!(parsed.get_int(0), Some(-42));
        assert_eq!(parsed.get_string(1), Some("kernel"));
        assert_eq!(parsed.get_bytes(2), Some(&[0xde, 0xad][..]));
        assert_eq!(parsed.get_list_int(3), Some(vec![1, 2, 3]));
        assert_eq!(parsed.get_float(4), Some(0.5));
    }

    #[test]
    fn round_trip_of_the_empty_list() {
        let tlv = Tlv::new();
        let blob = tlv.serialize().unwrap();
        let parsed = Tlv::deserialize_from(&blob);
        assert!(parsed.is_empty());
        assert_eq!(parsed, tlv);
    }

    #[test]
    fn typed_getters_reject_mismatched_tags() {
        let mut tlv = Tlv::new();
        tlv.append_int(7);
        assert_eq!(tlv.get_string(0), None);
        assert_eq!(tlv.get_int(0), Some(7));
        assert_eq!(tlv.get_int(1), None);
    }

    #[test]
    fn deserialize_fails_closed_on_truncated_record() {
        let mut tlv = Tlv::new();
        tlv.append_bytes(&[1, 2, 3, 4]);
        let mut blob = tlv.serialize().unwrap();
        // Claim a record longer than the buffer actually is.
        write_u64(&mut blob, BUFF_HEAD_LEN + 8, 1 << 40);
        assert!(Tlv::deserialize_from(&blob).is_empty());
    }

    #[test]
    fn deserialize_fails_closed_on_over_long_head() {
        let mut tlv = Tlv::new();
        tlv.append_int(1);
        let mut blob = tlv.serialize().unwrap();
        let over_long = (blob.len() + 1) as u64;
        write_u64(&mut blob, 8, over_long);
        assert!(Tlv::deserialize_from(&blob).is_empty());
    }
}
