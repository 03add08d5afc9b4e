//! Error types for the fat32-vdisk library

use std::fmt;
use std::io;

/// Result type for fat32-vdisk operations
pub type Result<T> = std::result::Result<T, Fat32Error>;

/// Main error type for fat32-vdisk operations
#[derive(Debug)]
pub enum Fat32Error {
    /// I/O error from underlying file operations
    Io(io::Error),

    /// Image or boot sector that this crate cannot interpret
    InvalidFat32 { message: String },

    /// Disk size outside the supported geometry tiers
    InvalidGeometry { disk_size: u64, reason: String },

    /// Cluster id below 2 or past the end of the table
    InvalidCluster { cluster: u32 },

    /// File not found in the root directory
    NotFound { path: String },

    /// A live file with this name already exists
    AlreadyExists { path: String },

    /// Not enough free clusters for an allocation
    NoFreeSpace { required: u32, available: u32 },

    /// Main and backup FAT produced different chains for the same request
    FatDivergence { main: Vec<u32>, backup: Vec<u32> },

    /// Invalid file name
    InvalidFileName { name: String, reason: String },

    /// Serialized root directory no longer fits in its cluster
    DirectoryOverflow { size: usize, capacity: usize },

    /// Image length differs from the configured disk size
    SizeMismatch { expected: u64, actual: u64 },

    /// Chain that runs into a free, bad, out-of-range or already visited cluster
    CorruptChain { start: u32 },

    /// Root directory bytes that cannot be parsed back into records
    CorruptDirectory { message: String },
}

impl fmt::Display for Fat32Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::InvalidFat32 { message } => write!(f, "Invalid FAT32: {}", message),
            Self::InvalidGeometry { disk_size, reason } => {
                write!(f, "Invalid geometry for {} bytes: {}", disk_size, reason)
            }
            Self::InvalidCluster { cluster } => write!(f, "Invalid cluster id: {}", cluster),
            Self::NotFound { path } => write!(f, "Not found: {}", path),
            Self::AlreadyExists { path } => write!(f, "Already exists: {}", path),
            Self::NoFreeSpace {
                required,
                available,
            } => write!(
                f,
                "No free space available: {} clusters required, {} free",
                required, available
            ),
            Self::FatDivergence { main, backup } => write!(
                f,
                "Main and backup FAT diverged: main chain {:?}, backup chain {:?}",
                main, backup
            ),
            Self::InvalidFileName { name, reason } => {
                write!(f, "Invalid file name '{}': {}", name, reason)
            }
            Self::DirectoryOverflow { size, capacity } => write!(
                f,
                "Root directory needs {} bytes but its cluster holds {}",
                size, capacity
            ),
            Self::SizeMismatch { expected, actual } => write!(
                f,
                "Image is {} bytes, expected {}",
                actual, expected
            ),
            Self::CorruptChain { start } => {
                write!(f, "Corrupt cluster chain starting at {}", start)
            }
            Self::CorruptDirectory { message } => {
                write!(f, "Corrupt root directory: {}", message)
            }
        }
    }
}

impl std::error::Error for Fat32Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Fat32Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Fat32Error {
    fn from(err: serde_json::Error) -> Self {
        Self::CorruptDirectory {
            message: err.to_string(),
        }
    }
}

// Convenience constructors
impl Fat32Error {
    pub fn invalid_fat32(message: impl Into<String>) -> Self {
        Self::InvalidFat32 {
            message: message.into(),
        }
    }

    pub fn invalid_geometry(disk_size: u64, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            disk_size,
            reason: reason.into(),
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    pub fn invalid_file_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFileName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt_directory(message: impl Into<String>) -> Self {
        Self::CorruptDirectory {
            message: message.into(),
        }
    }

    /// Whether the caller can retry with different parameters.
    ///
    /// Geometry, image-shape and divergence errors describe the disk itself
    /// and will not go away on retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AlreadyExists { .. }
                | Self::NoFreeSpace { .. }
                | Self::InvalidFileName { .. }
                | Self::DirectoryOverflow { .. }
                | Self::InvalidCluster { .. }
        )
    }
}
