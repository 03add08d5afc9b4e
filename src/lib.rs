//! fat32-vdisk: an in-memory FAT32 disk image for file-system and forensics experiments

pub mod error;
pub mod fat32;

// Re-export main types
pub use error::{Fat32Error, Result};
pub use fat32::boot_sector::BootSector;
pub use fat32::cluster::{Cluster, ClusterMap};
pub use fat32::directory::{DirectoryRecord, RootDirectory};
pub use fat32::fat_entry::FatEntry;
pub use fat32::fat_table::FatTable;
pub use fat32::geometry::Geometry;
pub use fat32::volume::VirtualDisk;
