//! Disaster recovery scenarios
//!
//! Each test damages a populated volume with one of the induce helpers (or
//! by hand), runs the matching recovery, and checks that files read back
//! and the metadata is self-consistent.

use tempfile::TempDir;
use xfatsim::recovery::{
    induce_bad_dir_fat, induce_bad_params, induce_wrong_partition, recover_deleted_from_shadow,
    recover_dir_fat, recover_params, recover_wrong_partition,
};
use xfatsim::{BackingStore, FileStore, FormatOptions, MemoryStore, Volume, VolumeError};

fn options() -> FormatOptions {
    FormatOptions::new()
        .with_size_mb(2)
        .with_sectors_per_cluster(2)
        .with_root_dir_entries(32)
}

fn populated() -> (Volume<MemoryStore>, Vec<(String, Vec<u8>)>) {
    let mut vol = Volume::create(MemoryStore::new(), &options()).unwrap();
    let mut files = Vec::new();

    for i in 0..8u8 {
        let name = format!("file{}.dat", i);
        let data = vec![i.wrapping_mul(31); 700 * (i as usize + 1)];
        vol.import_bytes(&name, &data).unwrap();
        files.push((name, data));
    }

    (vol, files)
}

fn assert_files<S: BackingStore>(vol: &mut Volume<S>, files: &[(String, Vec<u8>)]) {
    for (name, data) in files {
        assert_eq!(&vol.export_bytes(name).unwrap(), data, "{}", name);
    }
}

#[test]
fn test_misaligned_partition() {
    let (mut vol, files) = populated();

    induce_wrong_partition(&mut vol, 4096).unwrap();
    let offset = recover_wrong_partition(&mut vol).unwrap();

    assert_eq!(offset, 4096);
    assert_eq!(vol.header().partition_offset, 4096);
    assert_files(&mut vol, &files);
    assert!(vol.check().is_consistent());
}

#[test]
fn test_misaligned_partition_persists_after_reopen() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("disk.img");

    let mut vol = Volume::create_file(&image, &options()).unwrap();
    vol.import_bytes("a.txt", b"moved and found").unwrap();
    induce_wrong_partition(&mut vol, 4096).unwrap();
    recover_wrong_partition(&mut vol).unwrap();
    drop(vol);

    // offset 0 is empty now, so open finds the header by probing
    let mut vol = Volume::<FileStore>::open_file(&image).unwrap();
    assert_eq!(vol.header().partition_offset, 4096);
    assert_eq!(vol.export_bytes("a.txt").unwrap(), b"moved and found");
}

#[test]
fn test_misaligned_partition_unrecoverable() {
    let (mut vol, _) = populated();
    induce_wrong_partition(&mut vol, 777).unwrap();

    assert!(matches!(
        recover_wrong_partition(&mut vol),
        Err(VolumeError::CorruptionDetected(_))
    ));
}

#[test]
fn test_bad_geometry_params() {
    let (mut vol, files) = populated();
    let cluster_size = vol.cluster_size();

    induce_bad_params(&mut vol).unwrap();
    assert_ne!(vol.cluster_size(), cluster_size);

    assert!(recover_params(&mut vol).unwrap());
    assert_eq!(vol.cluster_size(), cluster_size);
    assert_files(&mut vol, &files);
}

#[test]
fn test_bad_geometry_survives_reopen() {
    let (mut vol, files) = populated();
    induce_bad_params(&mut vol).unwrap();

    let mut vol = Volume::open(vol.into_store()).unwrap();
    assert_eq!(vol.header().bytes_per_sector, 256);
    assert!(recover_params(&mut vol).unwrap());

    let mut vol = Volume::open(vol.into_store()).unwrap();
    assert_files(&mut vol, &files);
}

#[test]
fn test_lost_directory_and_chain_table() {
    let (mut vol, files) = populated();
    vol.purge("file3.dat").unwrap();
    vol.remove("file5.dat").unwrap();
    let survivors: Vec<_> = files
        .iter()
        .filter(|(name, _)| name != "file3.dat")
        .cloned()
        .collect();

    let wiped = induce_bad_dir_fat(&mut vol).unwrap();
    assert_eq!(wiped, 4);
    assert_eq!(vol.stats().used_clusters, 0);

    let rebuilt = recover_dir_fat(&mut vol).unwrap();
    assert_eq!(rebuilt, survivors.len());
    assert!(vol.stat("file3.dat").is_none());
    assert!(vol.check().is_consistent());

    let mut vol = Volume::open(vol.into_store()).unwrap();
    assert_files(&mut vol, &survivors);
    assert!(vol.check().is_consistent());
}

#[test]
fn test_rebuild_frees_orphaned_clusters() {
    let (mut vol, files) = populated();
    let used = vol.stats().used_clusters;

    induce_bad_dir_fat(&mut vol).unwrap();
    recover_dir_fat(&mut vol).unwrap();

    assert_eq!(vol.stats().used_clusters, used);
    assert_eq!(vol.list().len(), files.len());
}

#[test]
fn test_entry_lost_on_disk_recovered_from_shadow() {
    let (vol, files) = populated();
    let directory = vol.header().directory;

    // destroy the first slot on disk; the header shadow still lists it
    let mut store = vol.into_store();
    store.write_at(directory.offset, &[0u8; 256]).unwrap();

    let mut vol = Volume::open(store).unwrap();
    let (name, data) = &files[0];
    assert!(vol.stat(name).is_none());

    assert!(recover_deleted_from_shadow(&mut vol, name).unwrap());
    assert_eq!(&vol.export_bytes(name).unwrap(), data);
    assert!(vol.check().is_consistent());

    let mut vol = Volume::open(vol.into_store()).unwrap();
    assert_files(&mut vol, &files);
}

#[test]
fn test_shadow_covers_entries_after_large_file() {
    let mut vol = Volume::create(MemoryStore::new(), &FormatOptions::default()).unwrap();
    let big = vec![0x5Au8; 5 * 1024 * 1024];
    vol.import_bytes("big.bin", &big).unwrap();
    vol.import_bytes("small.txt", b"after the big one").unwrap();
    let directory = vol.header().directory;

    let mut store = vol.into_store();
    store.write_at(directory.offset + 256, &[0u8; 256]).unwrap();

    let mut vol = Volume::open(store).unwrap();
    assert!(vol.stat("small.txt").is_none());

    assert!(recover_deleted_from_shadow(&mut vol, "small.txt").unwrap());
    assert_eq!(vol.export_bytes("small.txt").unwrap(), b"after the big one");
    assert_eq!(vol.export_bytes("big.bin").unwrap(), big);
    assert!(vol.check().is_consistent());
}

#[test]
fn test_shadow_cannot_resurrect_purged_file() {
    let (mut vol, _) = populated();
    vol.purge("file0.dat").unwrap();

    assert!(!recover_deleted_from_shadow(&mut vol, "file0.dat").unwrap());
}

#[test]
fn test_damaged_primary_header_uses_copy() {
    let (vol, files) = populated();
    let mut store = vol.into_store();
    store.write_at(0, &[0xFF; 64]).unwrap();

    let mut vol = Volume::open(store).unwrap();
    assert_eq!(vol.header().partition_offset, 0);
    assert_files(&mut vol, &files);
}
