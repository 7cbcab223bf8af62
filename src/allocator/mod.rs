//! Cluster allocation
//!
//! [`ClusterAllocator`] keeps the allocation bitmap and the chain table side
//! by side and hands out linked chains:
//! - Prefer the longest contiguous free run when it can hold the request
//! - Otherwise take the lowest free clusters, contiguous or not
//!
//! The two structures are only brought back into agreement by recovery; the
//! allocator itself never cross-checks them.

pub mod bitmap;
pub mod chain;

use crate::error::{Result, VolumeError};
use bitmap::AllocationMap;
use chain::ChainTable;

/// Bitmap + chain table pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAllocator {
    map: AllocationMap,
    chains: ChainTable,
}

impl ClusterAllocator {
    /// Create an allocator with every cluster free
    pub fn new(cluster_count: u32, bitmap_len: usize) -> Self {
        ClusterAllocator {
            map: AllocationMap::new(cluster_count, bitmap_len),
            chains: ChainTable::new(cluster_count),
        }
    }

    pub fn from_parts(map: AllocationMap, chains: ChainTable) -> Self {
        ClusterAllocator { map, chains }
    }

    pub fn map(&self) -> &AllocationMap {
        &self.map
    }

    pub fn chains(&self) -> &ChainTable {
        &self.chains
    }

    pub fn cluster_count(&self) -> u32 {
        self.map.cluster_count()
    }

    pub fn free_clusters(&self) -> usize {
        self.map.free_count()
    }

    pub fn is_allocated(&self, cluster: u32) -> bool {
        self.map.is_allocated(cluster)
    }

    /// True if every cluster of `chain` is marked allocated
    pub fn is_chain_allocated(&self, chain: &[u32]) -> bool {
        chain.iter().all(|&c| self.map.is_allocated(c))
    }

    /// Allocate and link `need` clusters
    ///
    /// Returns the chain in link order. Fails with `CapacityExceeded` only
    /// when fewer than `need` clusters are free.
    pub fn allocate(&mut self, need: usize) -> Result<Vec<u32>> {
        if need == 0 {
            return Ok(Vec::new());
        }

        let free: Vec<u32> = self.map.free_clusters().collect();
        if free.len() < need {
            return Err(VolumeError::CapacityExceeded(format!(
                "need {} clusters, only {} free",
                need,
                free.len()
            )));
        }

        let run = longest_run(&free);
        let chosen: Vec<u32> = if run.len() >= need {
            run[..need].to_vec()
        } else {
            free[..need].to_vec()
        };

        self.claim(&chosen);
        Ok(chosen)
    }

    /// Mark `chain` allocated and link it, whatever its previous state
    pub fn claim(&mut self, chain: &[u32]) {
        for &cluster in chain {
            self.map.set(cluster, true);
        }
        self.chains.link(chain);
    }

    /// Free the chain starting at `start`
    ///
    /// Clears the bit and the link of every visited cluster and returns how
    /// many were released. Terminates on cycles.
    pub fn release(&mut self, start: u32) -> usize {
        let visited: Vec<u32> = self.chains.walk(start).collect();
        for &cluster in &visited {
            self.map.set(cluster, false);
            self.chains.set(cluster, chain::FREE);
        }
        visited.len()
    }

    /// Forget every allocation and link
    pub fn reset(&mut self) {
        self.map.clear();
        self.chains.clear();
    }
}

/// First longest run of consecutive indices in an ascending list
fn longest_run(free: &[u32]) -> &[u32] {
    let mut best = (0, 0);
    let mut start = 0;

    for i in 1..=free.len() {
        let broken = i == free.len() || free[i] != free[i - 1] + 1;
        if broken {
            if i - start > best.1 - best.0 {
                best = (start, i);
            }
            start = i;
        }
    }

    &free[best.0..best.1]
}
