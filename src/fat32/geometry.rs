//! Disk geometry: the size tier decision and the layout derived from it

use crate::error::{Fat32Error, Result};

use super::{FAT_COUNT, FAT_ENTRY_SIZE, RESERVED_SECTORS, SECTOR_SIZE};

/// Upper bounds (exclusive) of each size tier and the cluster size used below them.
const SIZE_TIERS: [(u64, u32); 4] = [
    (272_629_760, 1),     // 260 MiB
    (8_589_934_592, 8),   // 8 GiB
    (17_179_869_184, 16), // 16 GiB
    (34_359_738_368, 32), // 32 GiB
];

/// Largest disk size (exclusive) any tier covers.
pub const MAX_DISK_SIZE: u64 = SIZE_TIERS[SIZE_TIERS.len() - 1].0;

/// Sectors per cluster for a disk of `disk_size` bytes.
pub fn sectors_per_cluster_for(disk_size: u64) -> Result<u32> {
    SIZE_TIERS
        .iter()
        .find(|(limit, _)| disk_size < *limit)
        .map(|&(_, spc)| spc)
        .ok_or_else(|| {
            Fat32Error::invalid_geometry(
                disk_size,
                format!("no size tier covers disks of {} bytes or more", MAX_DISK_SIZE),
            )
        })
}

/// The single geometry decision shared by the boot sector, both FAT tables
/// and the cluster map of one disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    disk_size: u64,
    sectors_per_cluster: u32,
    total_sectors: u64,
    cluster_count: u32,
}

impl Geometry {
    pub fn for_disk_size(disk_size: u64) -> Result<Self> {
        let sectors_per_cluster = sectors_per_cluster_for(disk_size)?;
        let total_sectors = disk_size / SECTOR_SIZE as u64;
        // Bounded by MAX_DISK_SIZE / 512, far below u32::MAX.
        let cluster_count = (total_sectors / sectors_per_cluster as u64) as u32;
        Ok(Self {
            disk_size,
            sectors_per_cluster,
            total_sectors,
            cluster_count,
        })
    }

    pub fn disk_size(&self) -> u64 {
        self.disk_size
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        self.sectors_per_cluster
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    /// Number of FAT entries, one per addressable cluster.
    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn cluster_size_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    /// Sectors occupied by one FAT: `ceil(cluster_count * 4 / 512)`.
    pub fn fat_size_sectors(&self) -> u32 {
        let bytes = self.cluster_count as u64 * FAT_ENTRY_SIZE as u64;
        bytes.div_ceil(SECTOR_SIZE as u64) as u32
    }

    pub fn fat_size_bytes(&self) -> usize {
        self.fat_size_sectors() as usize * SECTOR_SIZE
    }

    pub fn main_fat_offset(&self) -> u64 {
        RESERVED_SECTORS as u64 * SECTOR_SIZE as u64
    }

    pub fn backup_fat_offset(&self) -> u64 {
        self.main_fat_offset() + self.fat_size_bytes() as u64
    }

    /// First LBA after the reserved area and both FATs.
    pub fn data_start_lba(&self) -> u64 {
        RESERVED_SECTORS as u64 + FAT_COUNT as u64 * self.fat_size_sectors() as u64
    }

    pub fn data_offset(&self) -> u64 {
        self.data_start_lba() * SECTOR_SIZE as u64
    }

    /// Sectors between the start of the data region and the end of the disk.
    pub fn data_sectors(&self) -> u64 {
        self.total_sectors.saturating_sub(self.data_start_lba())
    }

    /// Clusters whose every sector lies inside the image.
    pub fn usable_cluster_count(&self) -> u32 {
        let usable = self.data_sectors() / self.sectors_per_cluster as u64;
        usable.min(self.cluster_count as u64) as u32
    }

    /// Highest cluster id the FAT addresses.
    pub fn max_cluster_id(&self) -> u32 {
        self.cluster_count + 1
    }
}
