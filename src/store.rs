//! Backing stores for volume images
//!
//! A volume lives in one flat, byte-addressable store. Reads past the end of
//! the store return zeros: recovery probes offsets that may lie beyond a
//! small image, and a short read there simply means "nothing found".

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random-access byte store holding a volume image
pub trait BackingStore {
    /// Fill `buf` from `offset`; bytes beyond the end of the store read as zero
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset`, growing the store if needed
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Truncate or extend (with zeros) to exactly `len` bytes
    fn set_len(&mut self, len: u64) -> Result<()>;

    /// Current size in bytes
    fn len(&mut self) -> Result<u64>;

    fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Push buffered writes down to durable storage
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Host file backing a volume
pub struct FileStore {
    file: File,
    path: PathBuf,
}

impl FileStore {
    /// Create (or truncate) a host file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(FileStore {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing host file read-write
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(FileStore {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);

        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory store, mostly for tests and scratch volumes
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        MemoryStore { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl BackingStore for MemoryStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        buf.fill(0);
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start < self.data.len() {
            let available = (self.data.len() - start).min(buf.len());
            buf[..available].copy_from_slice(&self.data[start..start + available]);
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_store_write_and_read() {
        let temp = NamedTempFile::new().unwrap();
        let mut store = FileStore::create(temp.path()).unwrap();
        store.set_len(8192).unwrap();

        store.write_at(4096, b"Hello").unwrap();

        let mut buf = [0u8; 5];
        store.read_at(4096, &mut buf).unwrap();
        assert_eq!(&buf, b"Hello");
        assert_eq!(store.len().unwrap(), 8192);
    }

    #[test]
    fn test_file_store_read_past_end_is_zero() {
        let temp = NamedTempFile::new().unwrap();
        let mut store = FileStore::create(temp.path()).unwrap();
        store.write_at(0, b"abcd").unwrap();

        let mut buf = [0xFFu8; 8];
        store.read_at(2, &mut buf).unwrap();
        assert_eq!(&buf, b"cd\0\0\0\0\0\0");

        let mut far = [0xFFu8; 4];
        store.read_at(1 << 20, &mut far).unwrap();
        assert_eq!(far, [0u8; 4]);
    }

    #[test]
    fn test_file_store_reopen() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_path_buf();

        {
            let mut store = FileStore::create(&path).unwrap();
            store.write_at(10, b"persist").unwrap();
            store.sync().unwrap();
        }

        let mut store = FileStore::open(&path).unwrap();
        let mut buf = [0u8; 7];
        store.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"persist");
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_memory_store_grows_on_write() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty().unwrap());

        store.write_at(100, b"xyz").unwrap();
        assert_eq!(store.len().unwrap(), 103);

        let mut buf = [0u8; 5];
        store.read_at(99, &mut buf).unwrap();
        assert_eq!(&buf, b"\0xyz\0");
    }

    #[test]
    fn test_memory_store_set_len() {
        let mut store = MemoryStore::from_vec(vec![1, 2, 3, 4]);
        store.set_len(2).unwrap();
        assert_eq!(store.as_bytes(), &[1, 2]);
        store.set_len(4).unwrap();
        assert_eq!(store.into_inner(), vec![1, 2, 0, 0]);
    }
}
