use thiserror::Error;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corruption detected: {0}")]
    CorruptionDetected(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid file name: {0:?} (must be 1-64 bytes, no NUL)")]
    InvalidName(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Cluster index out of range: {0}")]
    ClusterOutOfRange(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, VolumeError>;
