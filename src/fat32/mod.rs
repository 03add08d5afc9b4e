pub mod boot_sector;
pub mod cluster;
pub mod directory;
pub mod fat_entry;
pub mod fat_table;
pub mod geometry;
pub mod volume;

/// Bytes per sector, fixed for every disk this crate builds
pub const SECTOR_SIZE: usize = 512;

/// Sectors before the main FAT (boot sector, FS info, backup boot sector)
pub const RESERVED_SECTORS: u32 = 32;

/// Main FAT plus one backup
pub const FAT_COUNT: u8 = 2;

pub(crate) const FAT_ENTRY_SIZE: usize = 4;

/// Clusters 0 and 1 are reserved by FAT32
pub const FIRST_CLUSTER: u32 = 2;

/// Cluster that stores the serialized root directory
pub const ROOT_DIR_CLUSTER: u32 = 2;
