//! Flat, fixed-capacity directory table

pub mod entry;

pub use entry::{
    expand_extents, extent_runs, validate_name, FileAttributes, FileEntry, Slot, ENTRY_SIZE,
    MAX_NAME_LEN,
};

use crate::error::{Result, VolumeError};
use crate::header::ShadowEntry;

/// Array of directory slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTable {
    slots: Vec<Slot>,
}

impl DirectoryTable {
    pub fn new(capacity: usize) -> Self {
        DirectoryTable {
            slots: vec![Slot::Empty; capacity],
        }
    }

    /// Decode `capacity` slots from raw region bytes
    ///
    /// Slots whose chains reach past `cluster_count` read as empty.
    pub fn from_bytes(bytes: &[u8], capacity: usize, cluster_count: u32) -> Self {
        let mut table = Self::new(capacity);
        for (slot, raw) in table.slots.iter_mut().zip(bytes.chunks(ENTRY_SIZE)) {
            *slot = Slot::decode(raw, cluster_count);
        }
        table
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// First entry named `name`, with its slot index
    pub fn find(&self, name: &str) -> Option<(usize, &FileEntry)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.entry().filter(|e| e.name == name).map(|e| (i, e)))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut FileEntry> {
        self.slots
            .iter_mut()
            .filter_map(Slot::entry_mut)
            .find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn first_empty(&self) -> Option<usize> {
        self.slots.iter().position(Slot::is_empty)
    }

    /// Place `entry` in the first empty slot
    pub fn insert(&mut self, entry: FileEntry) -> Result<usize> {
        let index = self.first_empty().ok_or_else(|| {
            VolumeError::CapacityExceeded(format!(
                "directory full ({} slots), cannot add {}",
                self.slots.len(),
                entry.name
            ))
        })?;
        self.slots[index] = Slot::Occupied(entry);
        Ok(index)
    }

    /// Empty a slot, returning what it held
    pub fn clear_slot(&mut self, index: usize) -> Option<FileEntry> {
        let slot = self.slots.get_mut(index)?;
        match std::mem::take(slot) {
            Slot::Occupied(entry) => Some(entry),
            Slot::Empty => None,
        }
    }

    /// Occupied entries in slot order
    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.slots.iter().filter_map(Slot::entry)
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Copy of every occupied entry, for the header shadow
    pub fn shadow(&self) -> Vec<ShadowEntry> {
        self.entries().map(ShadowEntry::from_entry).collect()
    }
}
