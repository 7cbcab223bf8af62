//! Self-describing recovery marker
//!
//! Every chain's first cluster begins with a `MARKER_LEN`-byte marker naming
//! the file and its size, so a heap scan can find files after the chain
//! table, bitmap and directory are lost. File payload starts after it.
//!
//! ```text
//! @0   magic "XFSMARK\x01"
//! @8   crc32 of bytes 12..22+name_len
//! @12  size (u64)
//! @20  name length (u16)
//! @22  name (UTF-8)
//! ```

use crate::directory::{FileEntry, MAX_NAME_LEN};
use crate::header::{le_u16, le_u32, le_u64, put_u16, put_u32, put_u64};

pub const MARKER_LEN: usize = 128;

const MARKER_MAGIC: [u8; 8] = *b"XFSMARK\x01";
const CRC_OFFSET: usize = 8;
const SIZE_OFFSET: usize = 12;
const NAME_LEN_OFFSET: usize = 20;
const NAME_OFFSET: usize = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryMarker {
    pub name: String,
    pub size: u64,
}

impl RecoveryMarker {
    pub fn for_entry(entry: &FileEntry) -> Self {
        RecoveryMarker {
            name: entry.name.clone(),
            size: entry.size,
        }
    }

    pub fn describes(&self, entry: &FileEntry) -> bool {
        self.name == entry.name && self.size == entry.size
    }

    pub fn encode(&self) -> [u8; MARKER_LEN] {
        let mut bytes = [0u8; MARKER_LEN];
        let name = &self.name.as_bytes()[..self.name.len().min(MAX_NAME_LEN)];

        bytes[..8].copy_from_slice(&MARKER_MAGIC);
        put_u64(&mut bytes, SIZE_OFFSET, self.size);
        put_u16(&mut bytes, NAME_LEN_OFFSET, name.len() as u16);
        bytes[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);

        let crc = crc32fast::hash(&bytes[SIZE_OFFSET..NAME_OFFSET + name.len()]);
        put_u32(&mut bytes, CRC_OFFSET, crc);

        bytes
    }

    /// Parse a marker from the start of a cluster; `None` if absent or damaged
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MARKER_LEN || bytes[..8] != MARKER_MAGIC {
            return None;
        }

        let name_len = le_u16(bytes, NAME_LEN_OFFSET) as usize;
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return None;
        }

        let crc = crc32fast::hash(&bytes[SIZE_OFFSET..NAME_OFFSET + name_len]);
        if crc != le_u32(bytes, CRC_OFFSET) {
            return None;
        }

        let name = std::str::from_utf8(&bytes[NAME_OFFSET..NAME_OFFSET + name_len]).ok()?;
        Some(RecoveryMarker {
            name: name.to_string(),
            size: le_u64(bytes, SIZE_OFFSET),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_decodes() {
        let marker = RecoveryMarker {
            name: "photo.jpg".to_string(),
            size: 123_456,
        };
        let bytes = marker.encode();
        assert_eq!(&bytes[..8], b"XFSMARK\x01");
        assert_eq!(RecoveryMarker::decode(&bytes), Some(marker));
    }

    #[test]
    fn test_checksum_rejects_damage() {
        let marker = RecoveryMarker {
            name: "a.txt".to_string(),
            size: 10,
        };
        let mut bytes = marker.encode();
        bytes[SIZE_OFFSET] ^= 0x01;
        assert_eq!(RecoveryMarker::decode(&bytes), None);
    }

    #[test]
    fn test_plain_data_is_not_a_marker() {
        assert_eq!(RecoveryMarker::decode(&[0u8; MARKER_LEN]), None);
        assert_eq!(RecoveryMarker::decode(&[b'X'; MARKER_LEN]), None);
        assert_eq!(RecoveryMarker::decode(b"XFSMARK\x01"), None);
    }

    #[test]
    fn test_describes() {
        let entry = FileEntry::new("a.txt", 10, vec![1]);
        let marker = RecoveryMarker::for_entry(&entry);
        assert!(marker.describes(&entry));
        assert!(!marker.describes(&FileEntry::new("a.txt", 11, vec![1])));
    }
}
