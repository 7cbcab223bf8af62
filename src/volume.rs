//! Volume engine
//!
//! [`Volume`] owns the in-memory mirror of the header, allocation bitmap,
//! chain table and directory, and mediates every read and write to the
//! backing store. Mutations land in the mirror first; each region is then
//! persisted by its own `flush_*` call. There is no cross-region atomicity:
//! a crash between flushes can leave the regions disagreeing, which is the
//! damage the [`recovery`](crate::recovery) module repairs.

use crate::allocator::{bitmap::AllocationMap, chain::ChainTable, ClusterAllocator};
use crate::config::FormatOptions;
use crate::directory::{validate_name, DirectoryTable, FileEntry, ENTRY_SIZE};
use crate::error::{Result, VolumeError};
use crate::header::{Header, Region, HEADER_SIZE, VERSION};
use crate::recovery::check::{check_consistency, ConsistencyReport};
use crate::recovery::marker::{RecoveryMarker, MARKER_LEN};
use crate::store::{BackingStore, FileStore};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Offsets probed, in order, when looking for a header
pub const PARTITION_CANDIDATES: [u64; 4] = [0, HEADER_SIZE as u64, 4096, 1024 * 1024];

/// A mounted volume
///
/// The engine holds its store exclusively; there is no internal locking.
pub struct Volume<S: BackingStore> {
    store: S,
    header: Header,
    allocator: ClusterAllocator,
    directory: DirectoryTable,
}

/// Volume usage summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeStats {
    pub cluster_size: u64,
    pub total_clusters: u32,
    pub free_clusters: usize,
    pub used_clusters: usize,
    pub active_files: usize,
    pub deleted_files: usize,
}

impl Volume<FileStore> {
    /// Create a volume in a host file (truncating it)
    pub fn create_file<P: AsRef<Path>>(path: P, options: &FormatOptions) -> Result<Self> {
        let store = FileStore::create(path)?;
        Self::create(store, options)
    }

    /// Open a volume stored in a host file
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = FileStore::open(path)?;
        Self::open(store)
    }
}

impl<S: BackingStore> Volume<S> {
    /// Format `store` as a new, empty volume
    pub fn create(mut store: S, options: &FormatOptions) -> Result<Self> {
        let header = Header::format(options)?;
        info!(
            "Creating volume: {} bytes, {} clusters of {} bytes, {} directory slots",
            header.volume_size,
            header.cluster_count,
            header.cluster_size(),
            header.root_dir_entries
        );

        // Drop whatever was there before so no stale marker survives.
        store.set_len(0)?;
        store.set_len(header.volume_size)?;

        let mut volume = Volume {
            allocator: ClusterAllocator::new(header.cluster_count, header.bitmap.length as usize),
            directory: DirectoryTable::new(header.root_dir_entries as usize),
            header,
            store,
        };
        volume.flush_all()?;

        Ok(volume)
    }

    /// Mount an existing volume
    ///
    /// The header is read from offset 0; if the magic is missing there, the
    /// other partition candidates are tried and the first header found is
    /// used as-is, so a damaged volume can still be mounted for recovery.
    pub fn open(mut store: S) -> Result<Self> {
        let header = Self::locate_header(&mut store)?;
        if header.version != VERSION {
            return Err(VolumeError::UnsupportedVersion(header.version));
        }

        let (allocator, directory) = Self::load_metadata(&mut store, &header)?;
        info!(
            "Opened volume: {} clusters, {} directory entries in use",
            header.cluster_count,
            directory.len()
        );

        Ok(Volume {
            store,
            header,
            allocator,
            directory,
        })
    }

    fn locate_header(store: &mut S) -> Result<Header> {
        for &offset in &PARTITION_CANDIDATES {
            let header = probe_header(store, offset)?;
            if header.has_valid_magic() {
                if offset != 0 {
                    warn!("No header at offset 0, using the copy found at {}", offset);
                }
                return Ok(header);
            }
        }
        Err(VolumeError::InvalidMagic)
    }

    fn load_metadata(store: &mut S, header: &Header) -> Result<(ClusterAllocator, DirectoryTable)> {
        let store_len = store.len()?;
        let regions = [header.chain_table, header.bitmap, header.directory];
        let dir_bytes = header.root_dir_entries.saturating_mul(ENTRY_SIZE as u64);
        if regions.iter().any(|r| r.length > store_len)
            || header.cluster_count as u64 > store_len
            || dir_bytes > store_len
        {
            return Err(VolumeError::CorruptionDetected(format!(
                "header describes regions larger than the {} byte store",
                store_len
            )));
        }

        let base = header.partition_offset;
        let chains = ChainTable::from_bytes(
            &read_region(store, base, header.chain_table)?,
            header.cluster_count,
        );
        let map = AllocationMap::from_bytes(read_region(store, base, header.bitmap)?, header.cluster_count);
        let directory = DirectoryTable::from_bytes(
            &read_region(store, base, header.directory)?,
            header.root_dir_entries as usize,
            header.cluster_count,
        );

        Ok((ClusterAllocator::from_parts(map, chains), directory))
    }

    /// Re-read chain table, bitmap and directory from the store
    pub fn reload(&mut self) -> Result<()> {
        let (allocator, directory) = Self::load_metadata(&mut self.store, &self.header)?;
        self.allocator = allocator;
        self.directory = directory;
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn directory(&self) -> &DirectoryTable {
        &self.directory
    }

    pub fn allocator(&self) -> &ClusterAllocator {
        &self.allocator
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Unmount, handing back the store
    pub fn into_store(self) -> S {
        self.store
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub(crate) fn allocator_mut(&mut self) -> &mut ClusterAllocator {
        &mut self.allocator
    }

    pub(crate) fn directory_mut(&mut self) -> &mut DirectoryTable {
        &mut self.directory
    }

    /// Swap in rebuilt metadata (not persisted)
    pub(crate) fn replace_metadata(&mut self, allocator: ClusterAllocator, directory: DirectoryTable) {
        self.allocator = allocator;
        self.directory = directory;
    }

    pub fn cluster_size(&self) -> u64 {
        self.header.cluster_size()
    }

    /// Cluster size, checked against the heap it has to address
    pub(crate) fn usable_cluster_size(&self) -> Result<u64> {
        let size = self.header.cluster_size();
        let span = size.checked_mul(self.header.cluster_count as u64);
        if size <= MARKER_LEN as u64 || span.map_or(true, |s| s > self.header.heap.length) {
            return Err(VolumeError::InvalidGeometry(format!(
                "{} clusters of {} bytes do not fit a {} byte heap",
                self.header.cluster_count, size, self.header.heap.length
            )));
        }
        Ok(size)
    }

    /// Absolute store offset of a cluster
    pub(crate) fn cluster_offset(&self, cluster: u32) -> Result<u64> {
        if cluster == 0 || cluster > self.header.cluster_count {
            return Err(VolumeError::ClusterOutOfRange(cluster));
        }
        Ok(self.header.partition_offset
            + self.header.heap.offset
            + (cluster as u64 - 1) * self.cluster_size())
    }

    /// Absolute store offset of a region
    pub(crate) fn region_offset(&self, region: Region) -> u64 {
        self.header.partition_offset + region.offset
    }

    /// Write both header copies
    pub fn flush_header(&mut self) -> Result<()> {
        let bytes = self.header.to_bytes();
        let base = self.header.partition_offset;
        self.store.write_at(base, &bytes)?;
        self.store.write_at(base + HEADER_SIZE as u64, &bytes)?;
        debug!("Flushed header at base {}", base);
        Ok(())
    }

    pub fn flush_chain_table(&mut self) -> Result<()> {
        let bytes = self.allocator.chains().to_bytes();
        self.write_region(self.header.chain_table, &bytes)
    }

    pub fn flush_bitmap(&mut self) -> Result<()> {
        let bytes = self.allocator.map().as_bytes().to_vec();
        self.write_region(self.header.bitmap, &bytes)
    }

    /// Write every directory slot, refreshing the header's shadow copy first
    pub fn flush_directory(&mut self) -> Result<()> {
        self.header.snapshot.directory_shadow = self.directory.shadow();
        self.flush_header()?;

        let mut bytes = Vec::with_capacity(self.directory.capacity() * ENTRY_SIZE);
        for slot in self.directory.slots() {
            bytes.extend_from_slice(&slot.encode()?);
        }
        self.write_region(self.header.directory, &bytes)
    }

    /// Persist header, chain table, bitmap and directory, then sync
    ///
    /// Four independent writes; not atomic.
    pub fn flush_all(&mut self) -> Result<()> {
        self.flush_header()?;
        self.flush_chain_table()?;
        self.flush_bitmap()?;
        self.flush_directory()?;
        self.store.sync()
    }

    fn write_region(&mut self, region: Region, bytes: &[u8]) -> Result<()> {
        let len = bytes.len().min(region.length as usize);
        let offset = self.region_offset(region);
        self.store.write_at(offset, &bytes[..len])
    }

    /// Import `source` as a new file named `name`
    ///
    /// The first cluster holds the recovery marker followed by the start of
    /// the payload; the final cluster is zero-padded.
    pub fn import<R: Read>(&mut self, name: &str, mut source: R) -> Result<FileEntry> {
        validate_name(name)?;
        if self.directory.contains(name) {
            return Err(VolumeError::AlreadyExists(name.to_string()));
        }
        let cluster_size = self.usable_cluster_size()?;
        if self.directory.first_empty().is_none() {
            return Err(VolumeError::CapacityExceeded(format!(
                "directory full ({} slots)",
                self.directory.capacity()
            )));
        }

        let mut data = Vec::new();
        source.read_to_end(&mut data)?;

        let need = clusters_for(data.len() as u64, cluster_size) as usize;
        let chain = self.allocator.allocate(need)?;
        let entry = FileEntry::new(name, data.len() as u64, chain);
        if !entry.fits_slot() {
            self.allocator.release(entry.start);
            return Err(VolumeError::CapacityExceeded(format!(
                "{} would span {} extents; free space is too fragmented",
                name,
                entry.extents().len()
            )));
        }

        if let Err(e) = self.write_payload(&entry.chain, &data, cluster_size) {
            self.allocator.release(entry.start);
            return Err(e);
        }
        self.directory.insert(entry.clone())?;

        self.flush_chain_table()?;
        self.flush_bitmap()?;
        self.flush_directory()?;
        self.embed_marker(&entry)?;

        debug!(
            "Imported {} ({} bytes, {} clusters starting at {})",
            name,
            entry.size,
            entry.chain.len(),
            entry.start
        );
        Ok(entry)
    }

    pub fn import_bytes(&mut self, name: &str, data: &[u8]) -> Result<FileEntry> {
        self.import(name, data)
    }

    /// Import a host file
    pub fn import_file<P: AsRef<Path>>(&mut self, name: &str, path: P) -> Result<FileEntry> {
        let file = std::fs::File::open(path)?;
        self.import(name, file)
    }

    fn write_payload(&mut self, chain: &[u32], data: &[u8], cluster_size: u64) -> Result<()> {
        let cluster_size = cluster_size as usize;
        let mut remaining = data;

        for (i, &cluster) in chain.iter().enumerate() {
            let skip = if i == 0 { MARKER_LEN } else { 0 };
            let capacity = cluster_size - skip;
            let take = remaining.len().min(capacity);

            let mut buf = vec![0u8; capacity];
            buf[..take].copy_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            let offset = self.cluster_offset(cluster)? + skip as u64;
            self.store.write_at(offset, &buf)?;
        }

        Ok(())
    }

    /// Write the marker for `entry` unless the first cluster already holds it
    fn embed_marker(&mut self, entry: &FileEntry) -> Result<bool> {
        let marker = RecoveryMarker::for_entry(entry).encode();
        let offset = self.cluster_offset(entry.start)?;

        let mut current = [0u8; MARKER_LEN];
        self.store.read_at(offset, &mut current)?;
        if current == marker {
            return Ok(false);
        }

        self.store.write_at(offset, &marker)?;
        Ok(true)
    }

    /// Marker at the start of `cluster`, if any
    pub(crate) fn read_marker(&mut self, cluster: u32) -> Result<Option<RecoveryMarker>> {
        let offset = match self.cluster_offset(cluster) {
            Ok(offset) => offset,
            Err(VolumeError::ClusterOutOfRange(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut buf = [0u8; MARKER_LEN];
        self.store.read_at(offset, &mut buf)?;
        Ok(RecoveryMarker::decode(&buf))
    }

    /// Stream the file named `name` (deleted or not) into `sink`
    ///
    /// Walks the chain table from the entry's start cluster. A chain that
    /// ends before the recorded size is reached is `CorruptionDetected`.
    pub fn export<W: Write>(&mut self, name: &str, mut sink: W) -> Result<u64> {
        let entry = self
            .directory
            .find(name)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        let cluster_size = self.usable_cluster_size()? as usize;

        let clusters: Vec<u32> = self.allocator.chains().walk(entry.start).collect();
        let mut remaining = entry.size;
        let mut buf = vec![0u8; cluster_size];

        for (i, &cluster) in clusters.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let skip = if i == 0 { MARKER_LEN } else { 0 };
            let take = remaining.min((cluster_size - skip) as u64) as usize;

            let offset = self.cluster_offset(cluster)? + skip as u64;
            self.store.read_at(offset, &mut buf[..take])?;
            sink.write_all(&buf[..take])?;
            remaining -= take as u64;
        }

        if remaining > 0 {
            return Err(VolumeError::CorruptionDetected(format!(
                "chain of {} ends {} bytes short of its recorded size {}",
                name, remaining, entry.size
            )));
        }

        sink.flush()?;
        debug!("Exported {} ({} bytes)", name, entry.size);
        Ok(entry.size)
    }

    pub fn export_bytes(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.export(name, &mut data)?;
        Ok(data)
    }

    /// Export to a host file; nothing is written if the export fails
    pub fn export_file<P: AsRef<Path>>(&mut self, name: &str, path: P) -> Result<u64> {
        let data = self.export_bytes(name)?;
        std::fs::write(path, &data)?;
        Ok(data.len() as u64)
    }

    /// Soft-delete: set the deleted flag, keep clusters allocated
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let entry = self
            .directory
            .find_mut(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        entry.deleted = true;

        self.flush_directory()?;
        debug!("Removed {}", name);
        Ok(())
    }

    /// Release the file's clusters and clear its slot
    ///
    /// Clusters are only released while the chain table and the marker still
    /// show they belong to this entry; otherwise just the slot is cleared.
    pub fn purge(&mut self, name: &str) -> Result<()> {
        let (index, entry) = self
            .directory
            .find(name)
            .map(|(i, e)| (i, e.clone()))
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        let walked: Vec<u32> = self.allocator.chains().walk(entry.start).collect();
        let owned = walked == entry.chain
            && self
                .read_marker(entry.start)?
                .is_some_and(|marker| marker.describes(&entry));

        if owned {
            let offset = self.cluster_offset(entry.start)?;
            self.store.write_at(offset, &[0u8; MARKER_LEN])?;
            let released = self.allocator.release(entry.start);
            debug!("Purged {}, released {} clusters", name, released);
        } else {
            warn!(
                "Clusters of {} now belong elsewhere; clearing the entry without releasing them",
                name
            );
        }

        self.directory.clear_slot(index);
        self.flush_chain_table()?;
        self.flush_bitmap()?;
        self.flush_directory()
    }

    /// Bring a soft-deleted entry back
    ///
    /// Fails with `Conflict` if the entry is not deleted, or if any of its
    /// clusters was freed or relinked since it was deleted.
    pub fn restore(&mut self, name: &str) -> Result<()> {
        let entry = self
            .directory
            .find(name)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        if !entry.deleted {
            return Err(VolumeError::Conflict(format!("{} is not deleted", name)));
        }

        let walked: Vec<u32> = self.allocator.chains().walk(entry.start).collect();
        if !self.allocator.is_chain_allocated(&entry.chain) || walked != entry.chain {
            return Err(VolumeError::Conflict(format!(
                "{} was partially overwritten and cannot be restored intact",
                name
            )));
        }

        if let Some(live) = self.directory.find_mut(name) {
            live.deleted = false;
        }
        self.flush_directory()?;
        debug!("Restored {}", name);
        Ok(())
    }

    /// Every occupied slot, deleted entries included
    pub fn list(&self) -> Vec<FileEntry> {
        self.directory.entries().cloned().collect()
    }

    pub fn stat(&self, name: &str) -> Option<&FileEntry> {
        self.directory.find(name).map(|(_, e)| e)
    }

    pub fn stats(&self) -> VolumeStats {
        let free = self.allocator.free_clusters();
        let deleted = self.directory.entries().filter(|e| e.deleted).count();

        VolumeStats {
            cluster_size: self.cluster_size(),
            total_clusters: self.allocator.cluster_count(),
            free_clusters: free,
            used_clusters: self.allocator.cluster_count() as usize - free,
            active_files: self.directory.len() - deleted,
            deleted_files: deleted,
        }
    }

    /// Cross-check bitmap, chain table and directory
    pub fn check(&self) -> ConsistencyReport {
        check_consistency(&self.allocator, &self.directory)
    }
}

/// Clusters needed for a payload of `size` bytes plus the marker
pub(crate) fn clusters_for(size: u64, cluster_size: u64) -> u64 {
    (MARKER_LEN as u64).saturating_add(size).div_ceil(cluster_size)
}

/// Read a header-sized block at `offset`
pub(crate) fn probe_header<S: BackingStore>(store: &mut S, offset: u64) -> Result<Header> {
    let mut buf = vec![0u8; HEADER_SIZE];
    store.read_at(offset, &mut buf)?;
    Ok(Header::from_bytes(&buf))
}

fn read_region<S: BackingStore>(store: &mut S, base: u64, region: Region) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; region.length as usize];
    store.read_at(base + region.offset, &mut buf)?;
    Ok(buf)
}
