//! # xfatsim - Single-File exFAT-Style Volume
//!
//! `xfatsim` keeps a whole volume inside one flat backing store (a host file
//! or a byte buffer) and can damage and repair it on purpose:
//!
//! - **Volume engine**: create/open, import/export, soft-delete, purge, restore
//! - **Cluster allocation** through a bitmap and a linked chain table
//! - **Recovery**: misaligned partition, bad geometry, lost directory/FAT,
//!   lost directory entries
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────┬─────────────┬─────────────┬────────┬───────────┬──────────────┐
//! │ Header      │ Header copy │ Chain table │ Bitmap │ Directory │ Heap         │
//! │ 4 KiB       │ 4 KiB       │ 4 B/cluster │ 1 b/cl │ 256 B/slot│ clusters 1.. │
//! └─────────────┴─────────────┴─────────────┴────────┴───────────┴──────────────┘
//!   ^ partition offset (all region offsets are relative to it)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use xfatsim::{FormatOptions, Result, Volume};
//!
//! # fn main() -> Result<()> {
//! let mut vol = Volume::create_file("disk.img", &FormatOptions::default())?;
//!
//! vol.import_bytes("a.txt", b"Hello, World!")?;
//! assert_eq!(vol.export_bytes("a.txt")?, b"Hello, World!");
//!
//! vol.remove("a.txt")?;
//! vol.restore("a.txt")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Recovery
//!
//! ```rust,no_run
//! use xfatsim::{recovery, Volume};
//!
//! # fn main() -> xfatsim::Result<()> {
//! let mut vol = Volume::open_file("disk.img")?;
//!
//! recovery::induce_bad_dir_fat(&mut vol)?;
//! let rebuilt = recovery::recover_dir_fat(&mut vol)?;
//! println!("rebuilt {} files", rebuilt);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
pub mod directory;
pub mod error;
pub mod header;
pub mod recovery;
pub mod store;
pub mod volume;

pub use allocator::ClusterAllocator;
pub use config::FormatOptions;
pub use directory::{DirectoryTable, FileAttributes, FileEntry, Slot};
pub use error::{Result, VolumeError};
pub use header::{Geometry, Header, RecoverySnapshot, Region};
pub use recovery::ConsistencyReport;
pub use store::{BackingStore, FileStore, MemoryStore};
pub use volume::{Volume, VolumeStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
