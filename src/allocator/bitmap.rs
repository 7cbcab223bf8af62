//! Allocation bitmap
//!
//! One bit per cluster, clusters numbered from 1. Cluster `i` lives in byte
//! `(i - 1) / 8`, bit `(i - 1) % 8`:
//! - 0 = free cluster
//! - 1 = allocated cluster
//!
//! The in-memory layout is the on-disk layout, so flushing is a straight copy.

/// Allocation state of every cluster in the heap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationMap {
    /// Raw bitmap bytes (region-sized, may extend past `cluster_count`)
    bits: Vec<u8>,

    /// Number of clusters tracked
    cluster_count: u32,
}

impl AllocationMap {
    /// Create an all-free map backed by `region_len` bytes
    pub fn new(cluster_count: u32, region_len: usize) -> Self {
        let len = region_len.max((cluster_count as usize).div_ceil(8));
        AllocationMap {
            bits: vec![0u8; len],
            cluster_count,
        }
    }

    /// Load a map from raw region bytes
    pub fn from_bytes(bytes: Vec<u8>, cluster_count: u32) -> Self {
        let mut bits = bytes;
        let needed = (cluster_count as usize).div_ceil(8);
        if bits.len() < needed {
            bits.resize(needed, 0);
        }
        AllocationMap {
            bits,
            cluster_count,
        }
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Check if a cluster is allocated (out-of-range clusters read as free)
    pub fn is_allocated(&self, cluster: u32) -> bool {
        if cluster == 0 || cluster > self.cluster_count {
            return false;
        }

        let bit = (cluster - 1) as usize;
        (self.bits[bit / 8] >> (bit % 8)) & 1 == 1
    }

    /// Set or clear a cluster's bit; returns false if out of range
    pub fn set(&mut self, cluster: u32, allocated: bool) -> bool {
        if cluster == 0 || cluster > self.cluster_count {
            return false;
        }

        let bit = (cluster - 1) as usize;
        if allocated {
            self.bits[bit / 8] |= 1 << (bit % 8);
        } else {
            self.bits[bit / 8] &= !(1 << (bit % 8));
        }
        true
    }

    /// Free clusters in ascending order
    pub fn free_clusters(&self) -> impl Iterator<Item = u32> + '_ {
        (1..=self.cluster_count).filter(move |&c| !self.is_allocated(c))
    }

    pub fn free_count(&self) -> usize {
        self.free_clusters().count()
    }

    pub fn allocated_count(&self) -> usize {
        self.cluster_count as usize - self.free_count()
    }

    /// Mark every cluster free
    pub fn clear(&mut self) {
        self.bits.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_creation() {
        let map = AllocationMap::new(1000, 512);
        assert_eq!(map.cluster_count(), 1000);
        assert_eq!(map.free_count(), 1000);
        assert_eq!(map.as_bytes().len(), 512);
    }

    #[test]
    fn test_bit_layout_is_one_indexed() {
        let mut map = AllocationMap::new(16, 2);
        map.set(1, true);
        map.set(9, true);
        assert_eq!(map.as_bytes(), &[0b0000_0001, 0b0000_0001]);

        map.set(8, true);
        assert_eq!(map.as_bytes()[0], 0b1000_0001);
    }

    #[test]
    fn test_set_and_clear() {
        let mut map = AllocationMap::new(100, 13);
        assert!(map.set(42, true));
        assert!(map.is_allocated(42));
        assert_eq!(map.allocated_count(), 1);

        assert!(map.set(42, false));
        assert!(!map.is_allocated(42));
        assert_eq!(map.free_count(), 100);
    }

    #[test]
    fn test_out_of_range() {
        let mut map = AllocationMap::new(10, 2);
        assert!(!map.set(0, true));
        assert!(!map.set(11, true));
        assert!(!map.is_allocated(0));
        assert!(!map.is_allocated(11));
        assert_eq!(map.free_count(), 10);
    }

    #[test]
    fn test_free_clusters_ascending() {
        let mut map = AllocationMap::new(6, 1);
        map.set(2, true);
        map.set(5, true);
        let free: Vec<u32> = map.free_clusters().collect();
        assert_eq!(free, vec![1, 3, 4, 6]);
    }

    #[test]
    fn test_from_bytes_pads_short_region() {
        let map = AllocationMap::from_bytes(vec![0xFF], 20);
        assert_eq!(map.as_bytes().len(), 3);
        assert!(map.is_allocated(8));
        assert!(!map.is_allocated(9));
        assert_eq!(map.allocated_count(), 8);
    }

    #[test]
    fn test_clear() {
        let mut map = AllocationMap::new(8, 1);
        for c in 1..=8 {
            map.set(c, true);
        }
        map.clear();
        assert_eq!(map.free_count(), 8);
    }
}
