//! Cluster chain table
//!
//! Slot `i` holds the cluster that follows `i` in its file, [`END_OF_CHAIN`]
//! for a file's last cluster, or [`FREE`]. Nothing guarantees the links are
//! acyclic once the table has been damaged, so every walk goes through
//! [`ChainWalk`], which stops on a revisit.

use crate::header::le_u32;
use std::collections::HashSet;

pub const FREE: u32 = 0;
pub const END_OF_CHAIN: u32 = 0xFFFF_FFFF;

/// Per-cluster "next" links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTable {
    /// Index 0 is unused so cluster numbers index directly
    links: Vec<u32>,
}

impl ChainTable {
    pub fn new(cluster_count: u32) -> Self {
        ChainTable {
            links: vec![FREE; cluster_count as usize + 1],
        }
    }

    /// Decode little-endian u32 links; missing trailing entries read as free
    pub fn from_bytes(bytes: &[u8], cluster_count: u32) -> Self {
        let mut table = Self::new(cluster_count);
        for (i, slot) in table.links.iter_mut().skip(1).enumerate() {
            let offset = i * 4;
            if offset + 4 > bytes.len() {
                break;
            }
            *slot = le_u32(bytes, offset);
        }
        table
    }

    /// Encode clusters `1..=cluster_count` as little-endian u32s
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity((self.links.len() - 1) * 4);
        for link in &self.links[1..] {
            bytes.extend_from_slice(&link.to_le_bytes());
        }
        bytes
    }

    pub fn cluster_count(&self) -> u32 {
        (self.links.len() - 1) as u32
    }

    /// Link stored for `cluster` (`FREE` when out of range)
    pub fn get(&self, cluster: u32) -> u32 {
        self.links.get(cluster as usize).copied().unwrap_or(FREE)
    }

    pub fn set(&mut self, cluster: u32, next: u32) {
        if cluster != 0 {
            if let Some(slot) = self.links.get_mut(cluster as usize) {
                *slot = next;
            }
        }
    }

    /// Link clusters in order, terminating the last with `END_OF_CHAIN`
    pub fn link(&mut self, chain: &[u32]) {
        for pair in chain.windows(2) {
            self.set(pair[0], pair[1]);
        }
        if let Some(&last) = chain.last() {
            self.set(last, END_OF_CHAIN);
        }
    }

    /// Walk the chain starting at `start`
    pub fn walk(&self, start: u32) -> ChainWalk<'_> {
        ChainWalk {
            table: self,
            next: Some(start),
            visited: HashSet::new(),
        }
    }

    pub fn clear(&mut self) {
        self.links.fill(FREE);
    }
}

/// Cycle-safe iterator over a chain
///
/// Yields clusters until the end marker, a free link, an out-of-range index,
/// or a cluster that was already visited.
pub struct ChainWalk<'a> {
    table: &'a ChainTable,
    next: Option<u32>,
    visited: HashSet<u32>,
}

impl Iterator for ChainWalk<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let cluster = self.next.take()?;
        if cluster == FREE || cluster > self.table.cluster_count() {
            return None;
        }
        if !self.visited.insert(cluster) {
            tracing::warn!("Cycle detected in chain table at cluster {}", cluster);
            return None;
        }

        let link = self.table.get(cluster);
        if link != END_OF_CHAIN && link != FREE {
            self.next = Some(link);
        }
        Some(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_and_walk() {
        let mut table = ChainTable::new(10);
        table.link(&[3, 4, 7]);

        assert_eq!(table.get(3), 4);
        assert_eq!(table.get(4), 7);
        assert_eq!(table.get(7), END_OF_CHAIN);
        assert_eq!(table.walk(3).collect::<Vec<_>>(), vec![3, 4, 7]);
        assert_eq!(table.walk(4).collect::<Vec<_>>(), vec![4, 7]);
    }

    #[test]
    fn test_walk_stops_on_cycle() {
        let mut table = ChainTable::new(5);
        table.set(1, 2);
        table.set(2, 3);
        table.set(3, 1);

        assert_eq!(table.walk(1).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_walk_stops_on_free_or_out_of_range() {
        let mut table = ChainTable::new(5);
        table.set(1, 2);
        // cluster 2 left free
        assert_eq!(table.walk(1).collect::<Vec<_>>(), vec![1, 2]);

        table.set(4, 99);
        assert_eq!(table.walk(4).collect::<Vec<_>>(), vec![4]);

        assert_eq!(table.walk(0).count(), 0);
        assert_eq!(table.walk(6).count(), 0);
    }

    #[test]
    fn test_byte_layout() {
        let mut table = ChainTable::new(3);
        table.link(&[1, 3]);

        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0xFF; 4]);

        assert_eq!(ChainTable::from_bytes(&bytes, 3), table);
    }

    #[test]
    fn test_from_short_bytes() {
        let table = ChainTable::from_bytes(&5u32.to_le_bytes(), 4);
        assert_eq!(table.get(1), 5);
        assert_eq!(table.get(2), FREE);
        assert_eq!(table.cluster_count(), 4);
    }

    #[test]
    fn test_set_ignores_out_of_range() {
        let mut table = ChainTable::new(2);
        table.set(0, 5);
        table.set(3, 5);
        assert_eq!(table.to_bytes(), vec![0u8; 8]);
    }
}
