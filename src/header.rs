//! Volume header (boot region)
//!
//! The header occupies `HEADER_SIZE` bytes and is written twice, at the
//! partition base and right after it. Fixed fields are little-endian at fixed
//! offsets; the tail carries the [`RecoverySnapshot`] as zero-terminated JSON.
//!
//! ```text
//! @0    magic "XFATSIM\0"        @48  bitmap offset/length
//! @8    version (u32)            @64  directory offset/length
//! @12   volume size (u64)        @80  heap offset/length
//! @20   bytes per sector (u32)   @96  root directory capacity (u64)
//! @24   sectors per cluster      @104 partition offset (u64)
//! @28   cluster count (u32)      @112 reserved
//! @32   chain table offset/len   @120 snapshot blob, zero-terminated
//! ```

use crate::config::FormatOptions;
use crate::directory::{expand_extents, FileAttributes, FileEntry, ENTRY_SIZE};
use crate::error::{Result, VolumeError};
use serde::{Deserialize, Serialize};

pub const MAGIC: [u8; 8] = *b"XFATSIM\x00";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 4096;

/// Byte offset of the snapshot blob inside the header
pub const SNAPSHOT_OFFSET: usize = 120;

/// Longest snapshot text that still leaves room for the terminator
pub const SNAPSHOT_MAX_LEN: usize = HEADER_SIZE - SNAPSHOT_OFFSET - 1;

const REGION_ALIGN: u64 = 512;

// Cluster counts are multiples of this so the chain table needs no padding.
const CLUSTER_GRANULE: u64 = 128;

const MIN_CLUSTER_ESTIMATE: u64 = 256;

/// A contiguous byte range, relative to the partition base
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub offset: u64,
    pub length: u64,
}

impl Region {
    pub fn new(offset: u64, length: u64) -> Self {
        Region { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Geometry parameters that are needed to address clusters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_count: u32,
    pub root_dir_entries: u64,
}

impl Geometry {
    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }
}

/// Directory entry as kept in the shadow, chain stored as extents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowEntry {
    pub name: String,
    pub size: u64,

    /// (first cluster, run length) pairs
    pub extents: Vec<(u32, u32)>,

    #[serde(default)]
    pub deleted: bool,

    #[serde(default)]
    pub attrs: FileAttributes,
}

impl ShadowEntry {
    pub fn from_entry(entry: &FileEntry) -> Self {
        ShadowEntry {
            name: entry.name.clone(),
            size: entry.size,
            extents: entry.extents(),
            deleted: entry.deleted,
            attrs: entry.attrs,
        }
    }

    /// Rebuild the directory entry; `None` if an extent runs past `cluster_count`
    pub fn to_entry(&self, cluster_count: u32) -> Option<FileEntry> {
        let chain = expand_extents(&self.extents, cluster_count)?;
        let mut entry = FileEntry::new(self.name.clone(), self.size, chain);
        entry.deleted = self.deleted;
        entry.attrs = self.attrs;
        Some(entry)
    }
}

/// Recovery metadata embedded in the header
///
/// `geometry` is the last geometry known to be good. `directory_shadow` is a
/// copy of every occupied directory slot, taken on each directory flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    #[serde(default)]
    pub geometry: Option<Geometry>,

    #[serde(default)]
    pub directory_shadow: Vec<ShadowEntry>,
}

impl RecoverySnapshot {
    pub fn new(geometry: Geometry) -> Self {
        RecoverySnapshot {
            geometry: Some(geometry),
            directory_shadow: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.is_none() && self.directory_shadow.is_empty()
    }

    /// Serialize into at most `max_len` bytes of JSON
    ///
    /// The geometry is always kept. Shadow entries are kept in order; any
    /// entry that would overflow is skipped and later, smaller ones still fit.
    pub fn encode_bounded(&self, max_len: usize) -> Vec<u8> {
        let full = serde_json::to_vec(self).unwrap_or_default();
        if full.len() <= max_len {
            return full;
        }

        let mut kept = RecoverySnapshot {
            geometry: self.geometry,
            directory_shadow: Vec::new(),
        };
        let mut len = serde_json::to_vec(&kept).map(|v| v.len()).unwrap_or(usize::MAX);

        for entry in &self.directory_shadow {
            let entry_len = serde_json::to_vec(entry)
                .map(|v| v.len())
                .unwrap_or(usize::MAX);
            let separator = usize::from(!kept.directory_shadow.is_empty());
            let grown = len.saturating_add(entry_len).saturating_add(separator);
            if grown > max_len {
                continue;
            }
            len = grown;
            kept.directory_shadow.push(entry.clone());
        }

        tracing::warn!(
            "Directory shadow truncated to {} of {} entries to fit the header",
            kept.directory_shadow.len(),
            self.directory_shadow.len()
        );

        let encoded = serde_json::to_vec(&kept).unwrap_or_default();
        if encoded.len() > max_len {
            return Vec::new();
        }
        encoded
    }

    /// Decode a zero-terminated blob; anything malformed yields an empty snapshot
    pub fn decode(blob: &[u8]) -> Self {
        let end = blob.iter().position(|&b| b == 0).unwrap_or(blob.len());
        if end == 0 {
            return RecoverySnapshot::default();
        }

        match serde_json::from_slice(&blob[..end]) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!("Discarding unreadable recovery snapshot: {}", e);
                RecoverySnapshot::default()
            }
        }
    }
}

/// Volume header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    pub volume_size: u64,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_count: u32,
    pub chain_table: Region,
    pub bitmap: Region,
    pub directory: Region,
    pub heap: Region,
    pub root_dir_entries: u64,

    /// Base address added to every region offset
    pub partition_offset: u64,

    pub snapshot: RecoverySnapshot,
}

impl Header {
    /// Lay out a fresh volume for the given options
    ///
    /// Regions follow the two header copies in order: chain table, bitmap,
    /// directory, heap. Metadata regions are 512-byte aligned.
    pub fn format(options: &FormatOptions) -> Result<Self> {
        options.validate()?;

        let total = options.volume_size();
        let cluster_size = options.cluster_size();

        let estimate = (total / cluster_size)
            .saturating_sub(8)
            .max(MIN_CLUSTER_ESTIMATE);
        let chain_len = align(estimate * 4);
        let bitmap_len = align(estimate.div_ceil(8));
        let dir_len = align(options.root_dir_entries * ENTRY_SIZE as u64);

        let chain_off = HEADER_SIZE as u64 * 2;
        let bitmap_off = chain_off + chain_len;
        let dir_off = bitmap_off + bitmap_len;
        let heap_off = dir_off + dir_len;

        if heap_off >= total {
            return Err(VolumeError::InvalidGeometry(format!(
                "{} bytes of metadata leave no room for a heap in a {} byte volume",
                heap_off, total
            )));
        }

        let cluster_count = ((total - heap_off) / cluster_size) / CLUSTER_GRANULE * CLUSTER_GRANULE;
        if cluster_count == 0 {
            return Err(VolumeError::InvalidGeometry(format!(
                "volume of {} bytes holds fewer than {} clusters of {} bytes",
                total, CLUSTER_GRANULE, cluster_size
            )));
        }
        let cluster_count = u32::try_from(cluster_count).map_err(|_| {
            VolumeError::InvalidGeometry(format!("too many clusters: {}", cluster_count))
        })?;

        let mut header = Header {
            magic: MAGIC,
            version: VERSION,
            volume_size: total,
            bytes_per_sector: options.bytes_per_sector,
            sectors_per_cluster: options.sectors_per_cluster,
            cluster_count,
            chain_table: Region::new(chain_off, cluster_count as u64 * 4),
            bitmap: Region::new(bitmap_off, bitmap_len),
            directory: Region::new(dir_off, dir_len),
            heap: Region::new(heap_off, cluster_count as u64 * cluster_size),
            root_dir_entries: options.root_dir_entries,
            partition_offset: 0,
            snapshot: RecoverySnapshot::default(),
        };
        header.snapshot = RecoverySnapshot::new(header.geometry());

        Ok(header)
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Live geometry as recorded in the fixed fields
    pub fn geometry(&self) -> Geometry {
        Geometry {
            bytes_per_sector: self.bytes_per_sector,
            sectors_per_cluster: self.sectors_per_cluster,
            cluster_count: self.cluster_count,
            root_dir_entries: self.root_dir_entries,
        }
    }

    pub fn cluster_size(&self) -> u64 {
        self.geometry().cluster_size()
    }

    /// Serialize to exactly `HEADER_SIZE` bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];

        bytes[0..8].copy_from_slice(&self.magic);
        put_u32(&mut bytes, 8, self.version);
        put_u64(&mut bytes, 12, self.volume_size);
        put_u32(&mut bytes, 20, self.bytes_per_sector);
        put_u32(&mut bytes, 24, self.sectors_per_cluster);
        put_u32(&mut bytes, 28, self.cluster_count);
        put_u64(&mut bytes, 32, self.chain_table.offset);
        put_u64(&mut bytes, 40, self.chain_table.length);
        put_u64(&mut bytes, 48, self.bitmap.offset);
        put_u64(&mut bytes, 56, self.bitmap.length);
        put_u64(&mut bytes, 64, self.directory.offset);
        put_u64(&mut bytes, 72, self.directory.length);
        put_u64(&mut bytes, 80, self.heap.offset);
        put_u64(&mut bytes, 88, self.heap.length);
        put_u64(&mut bytes, 96, self.root_dir_entries);
        put_u64(&mut bytes, 104, self.partition_offset);

        let snapshot = self.snapshot.encode_bounded(SNAPSHOT_MAX_LEN);
        bytes[SNAPSHOT_OFFSET..SNAPSHOT_OFFSET + snapshot.len()].copy_from_slice(&snapshot);

        bytes
    }

    /// Parse a header from raw bytes
    ///
    /// Never fails: short input is zero-padded and an unreadable snapshot
    /// becomes empty. Callers decide validity by checking the magic.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut bytes = [0u8; HEADER_SIZE];
        let len = raw.len().min(HEADER_SIZE);
        bytes[..len].copy_from_slice(&raw[..len]);

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);

        Header {
            magic,
            version: le_u32(&bytes, 8),
            volume_size: le_u64(&bytes, 12),
            bytes_per_sector: le_u32(&bytes, 20),
            sectors_per_cluster: le_u32(&bytes, 24),
            cluster_count: le_u32(&bytes, 28),
            chain_table: Region::new(le_u64(&bytes, 32), le_u64(&bytes, 40)),
            bitmap: Region::new(le_u64(&bytes, 48), le_u64(&bytes, 56)),
            directory: Region::new(le_u64(&bytes, 64), le_u64(&bytes, 72)),
            heap: Region::new(le_u64(&bytes, 80), le_u64(&bytes, 88)),
            root_dir_entries: le_u64(&bytes, 96),
            partition_offset: le_u64(&bytes, 104),
            snapshot: RecoverySnapshot::decode(&bytes[SNAPSHOT_OFFSET..]),
        }
    }
}

fn align(value: u64) -> u64 {
    value.div_ceil(REGION_ALIGN) * REGION_ALIGN
}

pub(crate) fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&bytes[offset..offset + 2]);
    u16::from_le_bytes(buf)
}

pub(crate) fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}
