//! Directory entries and their fixed-width slot encoding
//!
//! Each directory slot is `ENTRY_SIZE` bytes:
//!
//! ```text
//! @0   tag (u8)            0 = empty, 1 = occupied
//! @1   flags (u8)          bit 0 deleted, bit 1 readonly
//! @2   name length (u16)
//! @4   name (64 bytes, UTF-8, zero padded)
//! @68  size (u64)
//! @76  start cluster (u32)
//! @80  extent count (u16)
//! @82  reserved (u16)
//! @84  extents: 21 x (first cluster u32, length u32)
//! ```
//!
//! The chain is stored as runs of consecutive clusters so a contiguous file
//! costs one extent no matter how long it is.

use crate::error::{Result, VolumeError};
use crate::header::{le_u16, le_u32, le_u64, put_u16, put_u32, put_u64};
use serde::{Deserialize, Serialize};

pub const ENTRY_SIZE: usize = 256;
pub const MAX_NAME_LEN: usize = 64;

const TAG_EMPTY: u8 = 0;
const TAG_OCCUPIED: u8 = 1;

const FLAG_DELETED: u8 = 0b01;
const FLAG_READONLY: u8 = 0b10;

const NAME_OFFSET: usize = 4;
const SIZE_OFFSET: usize = NAME_OFFSET + MAX_NAME_LEN;
const START_OFFSET: usize = SIZE_OFFSET + 8;
const EXTENT_COUNT_OFFSET: usize = START_OFFSET + 4;
const EXTENTS_OFFSET: usize = EXTENT_COUNT_OFFSET + 4;

/// Most extents a single slot can hold
pub const MAX_EXTENTS: usize = (ENTRY_SIZE - EXTENTS_OFFSET) / 8;

/// Attribute bag carried by every entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub readonly: bool,
}

/// One file in the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,

    /// Logical size in bytes
    pub size: u64,

    /// First cluster of the chain
    pub start: u32,

    /// Materialized chain, kept as a cache next to the chain table
    pub chain: Vec<u32>,

    pub deleted: bool,

    pub attrs: FileAttributes,
}

impl FileEntry {
    /// Create an active entry for `chain`
    pub fn new(name: impl Into<String>, size: u64, chain: Vec<u32>) -> Self {
        FileEntry {
            name: name.into(),
            size,
            start: chain.first().copied().unwrap_or(0),
            chain,
            deleted: false,
            attrs: FileAttributes::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Chain as (first cluster, run length) pairs
    pub fn extents(&self) -> Vec<(u32, u32)> {
        extent_runs(&self.chain)
    }

    /// True if the entry can be encoded into one slot
    pub fn fits_slot(&self) -> bool {
        self.name.len() <= MAX_NAME_LEN && self.extents().len() <= MAX_EXTENTS
    }
}

/// Collapse a chain into (first cluster, run length) pairs
pub fn extent_runs(chain: &[u32]) -> Vec<(u32, u32)> {
    let mut extents: Vec<(u32, u32)> = Vec::new();
    for &cluster in chain {
        if let Some((first, len)) = extents.last_mut() {
            if first.checked_add(*len) == Some(cluster) {
                *len += 1;
                continue;
            }
        }
        extents.push((cluster, 1));
    }
    extents
}

/// Expand extents back into a chain
///
/// `None` if any run is empty, starts at cluster 0, or ends past
/// `cluster_count`.
pub fn expand_extents(extents: &[(u32, u32)], cluster_count: u32) -> Option<Vec<u32>> {
    let mut chain = Vec::new();
    for &(first, len) in extents {
        if first == 0 || len == 0 {
            return None;
        }
        let last = first.checked_add(len - 1)?;
        if last > cluster_count {
            return None;
        }
        chain.extend(first..=last);
    }
    Some(chain)
}

/// Check a name is storable in a slot and a recovery marker
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name.contains('\0') {
        return Err(VolumeError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Contents of one directory slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Slot {
    #[default]
    Empty,
    Occupied(FileEntry),
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn entry(&self) -> Option<&FileEntry> {
        match self {
            Slot::Occupied(entry) => Some(entry),
            Slot::Empty => None,
        }
    }

    pub fn entry_mut(&mut self) -> Option<&mut FileEntry> {
        match self {
            Slot::Occupied(entry) => Some(entry),
            Slot::Empty => None,
        }
    }

    /// Encode to exactly `ENTRY_SIZE` bytes
    ///
    /// An empty slot is all zeros. Fails with `CapacityExceeded` if the name
    /// or the chain's extent list does not fit.
    pub fn encode(&self) -> Result<[u8; ENTRY_SIZE]> {
        let mut bytes = [0u8; ENTRY_SIZE];
        let entry = match self {
            Slot::Empty => return Ok(bytes),
            Slot::Occupied(entry) => entry,
        };

        let extents = entry.extents();
        if entry.name.len() > MAX_NAME_LEN || extents.len() > MAX_EXTENTS {
            return Err(VolumeError::CapacityExceeded(format!(
                "entry {} needs {} extents, a slot holds {}",
                entry.name,
                extents.len(),
                MAX_EXTENTS
            )));
        }

        let mut flags = 0;
        if entry.deleted {
            flags |= FLAG_DELETED;
        }
        if entry.attrs.readonly {
            flags |= FLAG_READONLY;
        }

        bytes[0] = TAG_OCCUPIED;
        bytes[1] = flags;
        put_u16(&mut bytes, 2, entry.name.len() as u16);
        bytes[NAME_OFFSET..NAME_OFFSET + entry.name.len()].copy_from_slice(entry.name.as_bytes());
        put_u64(&mut bytes, SIZE_OFFSET, entry.size);
        put_u32(&mut bytes, START_OFFSET, entry.start);
        put_u16(&mut bytes, EXTENT_COUNT_OFFSET, extents.len() as u16);

        for (i, (first, len)) in extents.iter().enumerate() {
            let offset = EXTENTS_OFFSET + i * 8;
            put_u32(&mut bytes, offset, *first);
            put_u32(&mut bytes, offset + 4, *len);
        }

        Ok(bytes)
    }

    /// Decode a slot; anything malformed reads as `Empty`
    ///
    /// Extents reaching past `cluster_count` count as malformed.
    pub fn decode(bytes: &[u8], cluster_count: u32) -> Slot {
        if bytes.len() < ENTRY_SIZE || bytes[0] == TAG_EMPTY {
            return Slot::Empty;
        }

        match Self::decode_entry(bytes, cluster_count) {
            Some(entry) => Slot::Occupied(entry),
            None => {
                tracing::debug!("Treating malformed directory slot as empty");
                Slot::Empty
            }
        }
    }

    fn decode_entry(bytes: &[u8], cluster_count: u32) -> Option<FileEntry> {
        if bytes[0] != TAG_OCCUPIED {
            return None;
        }

        let flags = bytes[1];
        let name_len = le_u16(bytes, 2) as usize;
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return None;
        }
        let name = std::str::from_utf8(&bytes[NAME_OFFSET..NAME_OFFSET + name_len]).ok()?;

        let extent_count = le_u16(bytes, EXTENT_COUNT_OFFSET) as usize;
        if extent_count > MAX_EXTENTS {
            return None;
        }

        let extents: Vec<(u32, u32)> = (0..extent_count)
            .map(|i| {
                let offset = EXTENTS_OFFSET + i * 8;
                (le_u32(bytes, offset), le_u32(bytes, offset + 4))
            })
            .collect();
        let chain = expand_extents(&extents, cluster_count)?;

        let start = le_u32(bytes, START_OFFSET);
        if chain.first().copied().unwrap_or(0) != start {
            return None;
        }

        Some(FileEntry {
            name: name.to_string(),
            size: le_u64(bytes, SIZE_OFFSET),
            start,
            chain,
            deleted: flags & FLAG_DELETED != 0,
            attrs: FileAttributes {
                readonly: flags & FLAG_READONLY != 0,
            },
        })
    }
}
