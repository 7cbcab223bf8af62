//! Consistency check across bitmap, chain table and directory
//!
//! Every occupied entry, deleted or not, owns the clusters reached by
//! walking the chain table from its start. Against that:
//! - `leaked`: allocated but owned by no entry
//! - `missing`: owned by an entry but marked free
//! - `cross_linked`: owned by more than one entry
//! - `broken`: entries whose walk differs from their recorded chain

use crate::allocator::ClusterAllocator;
use crate::directory::DirectoryTable;
use std::collections::HashMap;

/// Result of [`check_consistency`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub leaked: Vec<u32>,
    pub missing: Vec<u32>,
    pub cross_linked: Vec<u32>,
    pub broken: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.leaked.is_empty()
            && self.missing.is_empty()
            && self.cross_linked.is_empty()
            && self.broken.is_empty()
    }
}

pub fn check_consistency(allocator: &ClusterAllocator, directory: &DirectoryTable) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();
    let mut owners: HashMap<u32, usize> = HashMap::new();

    for entry in directory.entries() {
        let walked: Vec<u32> = allocator.chains().walk(entry.start).collect();
        if walked != entry.chain {
            report.broken.push(entry.name.clone());
        }
        for cluster in walked {
            *owners.entry(cluster).or_insert(0) += 1;
        }
    }

    for cluster in 1..=allocator.cluster_count() {
        let owned = owners.get(&cluster).copied().unwrap_or(0);
        let allocated = allocator.is_allocated(cluster);

        if allocated && owned == 0 {
            report.leaked.push(cluster);
        }
        if !allocated && owned > 0 {
            report.missing.push(cluster);
        }
        if owned > 1 {
            report.cross_linked.push(cluster);
        }
    }

    if !report.is_consistent() {
        tracing::debug!(
            "Consistency check: {} leaked, {} missing, {} cross-linked, {} broken",
            report.leaked.len(),
            report.missing.len(),
            report.cross_linked.len(),
            report.broken.len()
        );
    }

    report
}
