//! Damage induction and repair
//!
//! Four scenarios, each an (induce, recover) pair operating on a mounted
//! [`Volume`]:
//!
//! | Scenario            | Induce                        | Recover                          |
//! |---------------------|-------------------------------|----------------------------------|
//! | Misaligned partition| [`induce_wrong_partition`]    | [`recover_wrong_partition`]      |
//! | Bad geometry        | [`induce_bad_params`]         | [`recover_params`]               |
//! | Lost directory/FAT  | [`induce_bad_dir_fat`]        | [`recover_dir_fat`]              |
//! | Lost entry          | (purge or slot damage)        | [`recover_deleted_from_shadow`]  |
//!
//! Recoveries report partial success through their return value (a flag or
//! a count). `Err` is reserved for I/O failures, and for a partition scan
//! that finds no header at all.

pub mod check;
pub mod marker;

pub use check::{check_consistency, ConsistencyReport};
pub use marker::{RecoveryMarker, MARKER_LEN};

use crate::allocator::ClusterAllocator;
use crate::directory::{validate_name, DirectoryTable, FileEntry, ENTRY_SIZE};
use crate::error::{Result, VolumeError};
use crate::header::{Geometry, Header};
use crate::store::BackingStore;
use crate::volume::{clusters_for, probe_header, Volume, PARTITION_CANDIDATES};
use tracing::{info, warn};

/// Leading directory slots destroyed by [`induce_bad_dir_fat`]
pub const WIPED_DIRECTORY_SLOTS: usize = 5;

/// Sector size assumed when geometry has to be derived from region lengths
const NOMINAL_SECTOR: u64 = 512;

/// Move the persisted image so it starts `offset` bytes into the store
///
/// The vacated prefix is zeroed. The live header, and the copy written in the
/// moved image, keep the old partition offset, so file access breaks until
/// [`recover_wrong_partition`] runs.
pub fn induce_wrong_partition<S: BackingStore>(volume: &mut Volume<S>, offset: u64) -> Result<()> {
    let base = volume.header().partition_offset;
    let store = volume.store_mut();

    let len = store.len()?;
    let mut image = vec![0u8; len.saturating_sub(base) as usize];
    store.read_at(base, &mut image)?;

    store.set_len(0)?;
    store.set_len(offset + image.len() as u64)?;
    store.write_at(offset, &image)?;
    store.sync()?;

    warn!("Induced misaligned partition: image moved from {} to {}", base, offset);
    Ok(())
}

/// Find the header among the candidate offsets and adopt its base
///
/// Accepts the first candidate carrying the magic and a snapshot geometry
/// with clusters; failing that, the second candidate on magic alone.
/// Returns the adopted partition offset.
pub fn recover_wrong_partition<S: BackingStore>(volume: &mut Volume<S>) -> Result<u64> {
    let mut found: Option<(u64, Header)> = None;

    for &offset in &PARTITION_CANDIDATES {
        let header = probe_header(volume.store_mut(), offset)?;
        let has_geometry = header
            .snapshot
            .geometry
            .is_some_and(|g| g.cluster_count > 0);
        if header.has_valid_magic() && has_geometry {
            found = Some((offset, header));
            break;
        }
    }

    if found.is_none() {
        let fallback = PARTITION_CANDIDATES[1];
        let header = probe_header(volume.store_mut(), fallback)?;
        if header.has_valid_magic() {
            warn!("Falling back to header at {} without snapshot geometry", fallback);
            found = Some((fallback, header));
        }
    }

    let (offset, mut header) = found.ok_or_else(|| {
        VolumeError::CorruptionDetected("no candidate offset holds a volume header".to_string())
    })?;

    header.partition_offset = offset;
    *volume.header_mut() = header;
    volume.flush_header()?;
    volume.reload()?;

    info!("Recovered partition at offset {}", offset);
    Ok(offset)
}

/// Overwrite the sector size and sectors per cluster with unusable values
pub fn induce_bad_params<S: BackingStore>(volume: &mut Volume<S>) -> Result<()> {
    let header = volume.header_mut();
    header.bytes_per_sector = 256;
    header.sectors_per_cluster = 1;
    volume.flush_header()?;

    warn!("Induced bad geometry: 256 bytes per sector, 1 sector per cluster");
    Ok(())
}

/// Restore geometry from the snapshot, or derive it from region lengths
///
/// Returns `false` when neither source yields a plausible geometry.
pub fn recover_params<S: BackingStore>(volume: &mut Volume<S>) -> Result<bool> {
    let header = volume.header().clone();

    let geometry = match header.snapshot.geometry {
        Some(g) if g.cluster_count > 0 && g.cluster_size() > 0 => g,
        _ => match derive_geometry(&header) {
            Some(g) => g,
            None => {
                warn!("Geometry recovery failed: no snapshot and region lengths disagree");
                return Ok(false);
            }
        },
    };

    let cluster_count_changed = geometry.cluster_count != header.cluster_count;
    let live = volume.header_mut();
    live.bytes_per_sector = geometry.bytes_per_sector;
    live.sectors_per_cluster = geometry.sectors_per_cluster;
    live.cluster_count = geometry.cluster_count;
    live.snapshot.geometry = Some(live.geometry());

    volume.flush_header()?;
    if cluster_count_changed {
        volume.reload()?;
    }

    info!(
        "Recovered geometry: {} bytes per sector, {} sectors per cluster, {} clusters",
        geometry.bytes_per_sector, geometry.sectors_per_cluster, geometry.cluster_count
    );
    Ok(true)
}

/// Geometry implied by the chain table, bitmap and heap lengths
fn derive_geometry(header: &Header) -> Option<Geometry> {
    let cluster_count = header.chain_table.length / 4;
    if cluster_count == 0 || cluster_count > u32::MAX as u64 {
        return None;
    }
    if header.bitmap.length.saturating_mul(8) < cluster_count {
        return None;
    }

    let per_cluster = header.heap.length / cluster_count;
    if per_cluster < NOMINAL_SECTOR || per_cluster % NOMINAL_SECTOR != 0 {
        return None;
    }

    Some(Geometry {
        bytes_per_sector: NOMINAL_SECTOR as u32,
        sectors_per_cluster: u32::try_from(per_cluster / NOMINAL_SECTOR).ok()?,
        cluster_count: cluster_count as u32,
        root_dir_entries: header.root_dir_entries,
    })
}

/// Zero the chain table, the bitmap and the leading directory slots
///
/// The in-memory directory loses the same slots but is not flushed, so the
/// header's directory shadow survives. Returns how many occupied slots were
/// destroyed.
pub fn induce_bad_dir_fat<S: BackingStore>(volume: &mut Volume<S>) -> Result<usize> {
    let header = volume.header().clone();

    let chain_offset = volume.region_offset(header.chain_table);
    let bitmap_offset = volume.region_offset(header.bitmap);
    let dir_offset = volume.region_offset(header.directory);

    let store = volume.store_mut();
    store.write_at(chain_offset, &vec![0u8; header.chain_table.length as usize])?;
    store.write_at(bitmap_offset, &vec![0u8; header.bitmap.length as usize])?;
    volume.allocator_mut().reset();

    let slots = WIPED_DIRECTORY_SLOTS.min(volume.directory().capacity());
    let mut wiped = 0;
    for index in 0..slots {
        if volume.directory_mut().clear_slot(index).is_some() {
            wiped += 1;
        }
        let offset = dir_offset + (index * ENTRY_SIZE) as u64;
        volume.store_mut().write_at(offset, &[0u8; ENTRY_SIZE])?;
    }
    volume.store_mut().sync()?;

    warn!(
        "Induced metadata loss: chain table and bitmap zeroed, {} directory entries wiped",
        wiped
    );
    Ok(wiped)
}

/// Rebuild chain table, bitmap and directory by scanning the heap for markers
///
/// Every cluster carrying a valid marker starts a file whose chain is taken
/// to be contiguous. Fragmented files come back with the wrong tail; that
/// limitation is inherent to the scan. Returns the number of files rebuilt.
pub fn recover_dir_fat<S: BackingStore>(volume: &mut Volume<S>) -> Result<usize> {
    let cluster_size = match volume.usable_cluster_size() {
        Ok(size) => size,
        Err(e) => {
            warn!("Heap scan skipped: {}", e);
            return Ok(0);
        }
    };
    let header = volume.header().clone();
    let cluster_count = header.cluster_count;

    let mut allocator = ClusterAllocator::new(cluster_count, header.bitmap.length as usize);
    let mut directory = DirectoryTable::new(header.root_dir_entries as usize);
    let mut rebuilt = 0;

    let mut cluster = 1u32;
    while cluster <= cluster_count {
        let marker = match volume.read_marker(cluster)? {
            Some(marker) => marker,
            None => {
                cluster += 1;
                continue;
            }
        };

        if validate_name(&marker.name).is_err() || directory.contains(&marker.name) {
            warn!("Ignoring marker for {} at cluster {}", marker.name, cluster);
            cluster += 1;
            continue;
        }
        if directory.first_empty().is_none() {
            warn!("Directory full, heap scan stopped at cluster {}", cluster);
            break;
        }

        let need = clusters_for(marker.size, cluster_size);
        if need > cluster_count as u64 {
            warn!(
                "Ignoring marker for {} at cluster {}: {} bytes cannot fit the heap",
                marker.name, cluster, marker.size
            );
            cluster += 1;
            continue;
        }
        let last = (cluster as u64 + need - 1).min(cluster_count as u64) as u32;
        let chain: Vec<u32> = (cluster..=last).collect();
        if (chain.len() as u64) < need {
            warn!(
                "{} needs {} clusters but the heap ends after {}",
                marker.name,
                need,
                chain.len()
            );
        }

        allocator.claim(&chain);
        directory.insert(FileEntry::new(marker.name, marker.size, chain))?;
        rebuilt += 1;

        cluster = match last.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }

    volume.replace_metadata(allocator, directory);
    volume.flush_all()?;

    info!("Heap scan rebuilt {} files", rebuilt);
    Ok(rebuilt)
}

/// Reinstall `name` from the header's directory shadow
///
/// Succeeds only if the live directory no longer holds the name and every
/// cluster of the shadowed chain is still allocated.
pub fn recover_deleted_from_shadow<S: BackingStore>(volume: &mut Volume<S>, name: &str) -> Result<bool> {
    if volume.directory().contains(name) {
        warn!("{} is still in the directory, nothing to recover", name);
        return Ok(false);
    }

    let cluster_count = volume.header().cluster_count;
    let candidate = volume
        .header()
        .snapshot
        .directory_shadow
        .iter()
        .filter(|shadow| shadow.name == name)
        .filter_map(|shadow| shadow.to_entry(cluster_count))
        .find(|e| !e.chain.is_empty() && volume.allocator().is_chain_allocated(&e.chain));

    let Some(entry) = candidate else {
        warn!("No intact shadow copy of {}", name);
        return Ok(false);
    };

    if volume.directory_mut().insert(entry).is_err() {
        warn!("Directory full, cannot reinstall {}", name);
        return Ok(false);
    }
    volume.flush_directory()?;

    info!("Recovered {} from the directory shadow", name);
    Ok(true)
}
