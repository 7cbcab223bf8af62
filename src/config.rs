//! Volume creation parameters
//!
//! [`FormatOptions`] carries everything [`Volume::create`](crate::Volume::create)
//! needs to lay out a new volume. Options can be built in code or loaded from
//! TOML; missing keys fall back to the defaults.
//!
//! ```toml
//! size_mb = 64
//! bytes_per_sector = 512
//! sectors_per_cluster = 8
//! root_dir_entries = 1024
//! ```

use crate::error::{Result, VolumeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default volume size in MiB
pub const DEFAULT_SIZE_MB: u64 = 32;

/// Default sector size in bytes
pub const DEFAULT_BYTES_PER_SECTOR: u32 = 512;

/// Default cluster size in sectors (4 KiB clusters with 512-byte sectors)
pub const DEFAULT_SECTORS_PER_CLUSTER: u32 = 8;

/// Default directory capacity
pub const DEFAULT_ROOT_DIR_ENTRIES: u64 = 1024;

const MAX_ROOT_DIR_ENTRIES: u64 = 65_536;

/// Parameters for creating a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    /// Total volume size in MiB
    pub size_mb: u64,

    /// Sector size in bytes (power of two, 512..=4096)
    pub bytes_per_sector: u32,

    /// Sectors per cluster (power of two, 1..=128)
    pub sectors_per_cluster: u32,

    /// Number of directory slots
    pub root_dir_entries: u64,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            size_mb: DEFAULT_SIZE_MB,
            bytes_per_sector: DEFAULT_BYTES_PER_SECTOR,
            sectors_per_cluster: DEFAULT_SECTORS_PER_CLUSTER,
            root_dir_entries: DEFAULT_ROOT_DIR_ENTRIES,
        }
    }
}

impl FormatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size_mb(mut self, size_mb: u64) -> Self {
        self.size_mb = size_mb;
        self
    }

    pub fn with_bytes_per_sector(mut self, bytes_per_sector: u32) -> Self {
        self.bytes_per_sector = bytes_per_sector;
        self
    }

    pub fn with_sectors_per_cluster(mut self, sectors_per_cluster: u32) -> Self {
        self.sectors_per_cluster = sectors_per_cluster;
        self
    }

    pub fn with_root_dir_entries(mut self, root_dir_entries: u64) -> Self {
        self.root_dir_entries = root_dir_entries;
        self
    }

    /// Parse and validate options from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: FormatOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    /// Load and validate options from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Total volume size in bytes
    pub fn volume_size(&self) -> u64 {
        self.size_mb.saturating_mul(1024 * 1024)
    }

    /// Cluster size in bytes
    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_mb == 0 {
            return Err(VolumeError::InvalidGeometry(
                "volume size must be at least 1 MiB".to_string(),
            ));
        }

        if !self.bytes_per_sector.is_power_of_two()
            || !(512..=4096).contains(&self.bytes_per_sector)
        {
            return Err(VolumeError::InvalidGeometry(format!(
                "bytes per sector must be a power of two in 512..=4096, got {}",
                self.bytes_per_sector
            )));
        }

        if !self.sectors_per_cluster.is_power_of_two() || self.sectors_per_cluster > 128 {
            return Err(VolumeError::InvalidGeometry(format!(
                "sectors per cluster must be a power of two in 1..=128, got {}",
                self.sectors_per_cluster
            )));
        }

        if self.root_dir_entries == 0 || self.root_dir_entries > MAX_ROOT_DIR_ENTRIES {
            return Err(VolumeError::InvalidGeometry(format!(
                "root directory entries must be in 1..={}, got {}",
                MAX_ROOT_DIR_ENTRIES, self.root_dir_entries
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = FormatOptions::default();
        assert_eq!(options.size_mb, 32);
        assert_eq!(options.cluster_size(), 4096);
        assert_eq!(options.volume_size(), 32 * 1024 * 1024);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let options = FormatOptions::from_toml_str("size_mb = 8\nroot_dir_entries = 64").unwrap();
        assert_eq!(options.size_mb, 8);
        assert_eq!(options.root_dir_entries, 64);
        assert_eq!(options.bytes_per_sector, DEFAULT_BYTES_PER_SECTOR);
        assert_eq!(options.sectors_per_cluster, DEFAULT_SECTORS_PER_CLUSTER);
    }

    #[test]
    fn test_invalid_toml() {
        let result = FormatOptions::from_toml_str("size_mb = \"big\"");
        assert!(matches!(result, Err(VolumeError::Config(_))));
    }

    #[test]
    fn test_invalid_sector_size() {
        let result = FormatOptions::from_toml_str("bytes_per_sector = 1000");
        assert!(matches!(result, Err(VolumeError::InvalidGeometry(_))));

        let options = FormatOptions::new().with_bytes_per_sector(256);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_invalid_cluster_and_directory() {
        assert!(FormatOptions::new()
            .with_sectors_per_cluster(3)
            .validate()
            .is_err());
        assert!(FormatOptions::new()
            .with_sectors_per_cluster(256)
            .validate()
            .is_err());
        assert!(FormatOptions::new()
            .with_root_dir_entries(0)
            .validate()
            .is_err());
        assert!(FormatOptions::new().with_size_mb(0).validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("volume.toml");
        std::fs::write(&path, "size_mb = 4\nsectors_per_cluster = 1\n").unwrap();

        let options = FormatOptions::from_file(&path).unwrap();
        assert_eq!(options.size_mb, 4);
        assert_eq!(options.cluster_size(), 512);
    }
}
