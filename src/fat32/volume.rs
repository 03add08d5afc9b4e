//! The virtual disk: one in-memory FAT32 image and the state that describes it

use std::fs;
use std::ops::Range;
use std::path::Path;

use chrono::{Local, NaiveDateTime, SubsecRound};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::error::{Fat32Error, Result};

use super::boot_sector::{BOOT_SECTOR_SIZE, BootSector};
use super::cluster::{Cluster, ClusterMap};
use super::directory::{DirectoryRecord, RootDirectory};
use super::fat_entry::{FAT32_BAD_CLUSTER, FAT32_EOC_MAX};
use super::fat_table::FatTable;
use super::geometry::Geometry;
use super::{FIRST_CLUSTER, ROOT_DIR_CLUSTER};

/// A FAT32 disk image held in memory.
///
/// Every mutation keeps the main and backup FAT identical and rewrites the
/// FAT regions and the root directory cluster of `content`, so the image
/// bytes always describe the current state.
#[derive(Debug, Clone)]
pub struct VirtualDisk {
    name: String,
    geometry: Geometry,
    boot_sector: BootSector,
    main_fat: FatTable,
    backup_fat: FatTable,
    root: RootDirectory,
    clusters: ClusterMap,
    content: Vec<u8>,
}

impl VirtualDisk {
    /// Create an empty disk with a random volume id
    pub fn create(name: &str, disk_size: u64) -> Result<Self> {
        let mut rng = StdRng::from_entropy();
        Self::create_with_rng(name, disk_size, &mut rng)
    }

    /// Create an empty disk, drawing the volume id from `rng`
    pub fn create_with_rng<R: RngCore + ?Sized>(name: &str, disk_size: u64, rng: &mut R) -> Result<Self> {
        let geometry = checked_geometry(disk_size)?;
        let len = usize::try_from(disk_size)
            .map_err(|_| Fat32Error::invalid_geometry(disk_size, "image does not fit in memory"))?;

        let boot_sector = BootSector::with_geometry(&geometry, name, rng);
        let mut disk = Self {
            name: name.to_string(),
            geometry,
            main_fat: FatTable::with_geometry(&geometry, geometry.main_fat_offset()),
            backup_fat: FatTable::with_geometry(&geometry, geometry.backup_fat_offset()),
            root: RootDirectory::new(),
            clusters: ClusterMap::new(&geometry),
            content: vec![0u8; len],
            boot_sector,
        };
        disk.content[..BOOT_SECTOR_SIZE].copy_from_slice(disk.boot_sector.get_bytes());
        disk.reserve_system_clusters()?;
        disk.persist_directory()?;
        disk.persist_fats();

        log::info!(
            "create: '{}' {} bytes, {} sectors/cluster, {} usable clusters",
            name,
            disk_size,
            geometry.sectors_per_cluster(),
            geometry.usable_cluster_count()
        );
        Ok(disk)
    }

    /// Open an image file written by [`VirtualDisk::save`].
    ///
    /// The disk takes its name from the boot sector label.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read(path.as_ref())?;
        let geometry = checked_geometry(content.len() as u64)?;
        let disk = Self::decode(geometry, content, None)?;
        log::info!(
            "open: '{}' from {}, {} files",
            disk.name,
            path.as_ref().display(),
            disk.root.live_records().count()
        );
        Ok(disk)
    }

    /// Rebuild every piece of state from raw image bytes
    fn decode(geometry: Geometry, content: Vec<u8>, name: Option<String>) -> Result<Self> {
        let boot_sector = BootSector::from_bytes(&content)?;
        if boot_sector.sectors_per_cluster() as u32 != geometry.sectors_per_cluster()
            || boot_sector.sectors_per_fat() != geometry.fat_size_sectors()
        {
            return Err(Fat32Error::invalid_fat32(format!(
                "boot sector describes {} sectors/cluster and {} sectors/FAT, a {} byte disk uses {} and {}",
                boot_sector.sectors_per_cluster(),
                boot_sector.sectors_per_fat(),
                geometry.disk_size(),
                geometry.sectors_per_cluster(),
                geometry.fat_size_sectors()
            )));
        }

        let main_fat = read_fat(&geometry, geometry.main_fat_offset(), &content)?;
        let backup_fat = read_fat(&geometry, geometry.backup_fat_offset(), &content)?;
        let clusters = ClusterMap::new(&geometry);
        let root = RootDirectory::from_bytes(&content[clusters.byte_range(ROOT_DIR_CLUSTER)?])?;

        Ok(Self {
            name: name.unwrap_or_else(|| boot_sector.volume_label()),
            geometry,
            boot_sector,
            main_fat,
            backup_fat,
            root,
            clusters,
            content,
        })
    }

    /// Mark the root directory cluster as end-of-chain and every cluster
    /// the FAT addresses beyond the end of the image as bad.
    fn reserve_system_clusters(&mut self) -> Result<()> {
        let first_unusable = FIRST_CLUSTER + self.geometry.usable_cluster_count();
        let last = self.geometry.max_cluster_id();

        for fat in [&mut self.main_fat, &mut self.backup_fat] {
            fat.set_entry(ROOT_DIR_CLUSTER, FAT32_EOC_MAX)?;
            for cluster_id in first_unusable..=last {
                fat.set_entry(cluster_id, FAT32_BAD_CLUSTER)?;
            }
        }
        if first_unusable <= last {
            log::debug!(
                "reserve: clusters {}..={} lie past the end of the image, marked bad",
                first_unusable,
                last
            );
        }
        Ok(())
    }

    fn persist_fats(&mut self) {
        for fat in [&self.main_fat, &self.backup_fat] {
            let bytes = fat.to_bytes();
            let start = fat.offset() as usize;
            self.content[start..start + bytes.len()].copy_from_slice(&bytes);
        }
    }

    /// Serialize the directory into its cluster, zero-filling the rest.
    fn persist_directory(&mut self) -> Result<()> {
        let bytes = self.root.to_bytes()?;
        let range = self.clusters.byte_range(ROOT_DIR_CLUSTER)?;
        if bytes.len() > range.len() {
            return Err(Fat32Error::DirectoryOverflow {
                size: bytes.len(),
                capacity: range.len(),
            });
        }
        let region = &mut self.content[range];
        region[..bytes.len()].copy_from_slice(&bytes);
        region[bytes.len()..].fill(0);
        Ok(())
    }

    /// Store `data` as a new file stamped with the current local time.
    ///
    /// Returns the allocated cluster chain.
    pub fn write_file(&mut self, name: &str, data: &[u8]) -> Result<Vec<u32>> {
        let now = Local::now().naive_local().trunc_subsecs(0);
        self.write_file_at(name, data, now)
    }

    /// Store `data` as a new file with the given timestamps.
    ///
    /// On any error the FATs, the directory and the image are left as they
    /// were. The unused tail of the last cluster is not cleared.
    pub fn write_file_at(&mut self, name: &str, data: &[u8], timestamp: NaiveDateTime) -> Result<Vec<u32>> {
        if self.root.find_by_name(name).is_some() {
            return Err(Fat32Error::already_exists(name));
        }
        let size = data.len() as u64;
        let mut record = DirectoryRecord::new(name, 0, size, timestamp)?;

        let cluster_bytes = self.geometry.cluster_size_bytes();
        let main = self.main_fat.allocate_chain(size, cluster_bytes);
        let backup = self.backup_fat.allocate_chain(size, cluster_bytes);
        let chain = match (main, backup) {
            (Ok(main), Ok(backup)) if main == backup => main,
            (Err(err), Err(_)) => {
                log::warn!("write_file: '{}' ({} bytes) rejected: {}", name, size, err);
                return Err(err);
            }
            (main, backup) => {
                let main = main.unwrap_or_default();
                let backup = backup.unwrap_or_default();
                self.release(&main, &backup);
                log::error!(
                    "write_file: main and backup FAT allocated different chains for '{}': {:?} vs {:?}",
                    name,
                    main,
                    backup
                );
                return Err(Fat32Error::FatDivergence { main, backup });
            }
        };

        record.set_start_cluster(chain.first().copied().unwrap_or(0));
        if let Err(err) = self.commit(record, &chain, data) {
            self.release(&chain, &chain);
            return Err(err);
        }

        log::debug!("write_file: '{}' {} bytes in clusters {:?}", name, size, chain);
        Ok(chain)
    }

    /// Append the record, then copy the data and rewrite both FATs. The
    /// directory is checked for overflow before any image byte changes.
    ///
    /// When the directory cluster is full, deleted records are dropped
    /// oldest first until the new record fits.
    fn commit(&mut self, record: DirectoryRecord, chain: &[u32], data: &[u8]) -> Result<()> {
        let ranges = chain
            .iter()
            .map(|&cluster_id| self.clusters.byte_range(cluster_id))
            .collect::<Result<Vec<Range<usize>>>>()?;

        let previous = self.root.clone();
        self.root.append(record)?;
        while let Err(err) = self.persist_directory() {
            let overflow = matches!(err, Fat32Error::DirectoryOverflow { .. });
            match self.root.remove_oldest_tombstone() {
                Some(dropped) if overflow => {
                    log::debug!("write_file: directory full, dropped deleted record '{}'", dropped.name());
                }
                _ => {
                    self.root = previous;
                    return Err(err);
                }
            }
        }

        let cluster_bytes = self.geometry.cluster_size_bytes();
        for (range, chunk) in ranges.into_iter().zip(data.chunks(cluster_bytes)) {
            self.content[range.start..range.start + chunk.len()].copy_from_slice(chunk);
        }
        self.persist_fats();
        Ok(())
    }

    fn release(&mut self, main: &[u32], backup: &[u32]) {
        if let Some(&start) = main.first() {
            self.main_fat.free_chain(start);
        }
        if let Some(&start) = backup.first() {
            self.backup_fat.free_chain(start);
        }
    }

    /// Contents of the live file `name`.
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let record = self
            .root
            .find_by_name(name)
            .ok_or_else(|| Fat32Error::not_found(name))?;
        let size = record.size();
        if size == 0 {
            return Ok(Vec::new());
        }

        let cluster_bytes = self.geometry.cluster_size_bytes();
        let needed = size.div_ceil(cluster_bytes as u64) as usize;
        let chain = self.main_fat.chain(record.start_cluster())?;
        if chain.len() < needed {
            return Err(Fat32Error::CorruptChain {
                start: record.start_cluster(),
            });
        }

        let mut remaining = size as usize;
        let mut data = Vec::with_capacity(remaining);
        for &cluster_id in &chain[..needed] {
            let range = self.clusters.byte_range(cluster_id)?;
            let take = remaining.min(range.len());
            data.extend_from_slice(&self.content[range.start..range.start + take]);
            remaining -= take;
        }
        Ok(data)
    }

    /// Delete the live file `name`, returning how many clusters were freed.
    ///
    /// The data clusters keep their bytes; only the FATs and the directory
    /// record change.
    pub fn delete_file(&mut self, name: &str) -> Result<u32> {
        let start = self
            .root
            .find_by_name(name)
            .map(DirectoryRecord::start_cluster)
            .ok_or_else(|| Fat32Error::not_found(name))?;

        let (freed, freed_backup) = if start >= FIRST_CLUSTER && start != ROOT_DIR_CLUSTER {
            (self.main_fat.free_chain(start), self.backup_fat.free_chain(start))
        } else {
            (0, 0)
        };
        if freed != freed_backup {
            log::error!(
                "delete_file: '{}' freed {} clusters in the main FAT but {} in the backup",
                name,
                freed,
                freed_backup
            );
        }

        self.root.tombstone(name)?;
        self.persist_directory()?;
        self.persist_fats();

        log::debug!("delete_file: '{}' released {} clusters from {}", name, freed, start);
        Ok(freed)
    }

    /// Bytes allocated to live files but not used by them.
    pub fn slack_space(&self) -> u64 {
        let cluster_bytes = self.geometry.cluster_size_bytes() as u64;
        self.root
            .live_records()
            .filter(|record| record.start_cluster() >= FIRST_CLUSTER)
            .map(|record| {
                let clusters = self
                    .main_fat
                    .chain_length(record.start_cluster())
                    .unwrap_or_else(|err| {
                        log::warn!("slack_space: skipping '{}': {}", record.name(), err);
                        0
                    });
                (clusters as u64 * cluster_bytes).saturating_sub(record.size())
            })
            .sum()
    }

    /// Free every cluster and empty the directory. Data bytes are left in place.
    pub fn format(&mut self) -> Result<()> {
        self.main_fat.format();
        self.backup_fat.format();
        self.root.clear();
        self.reserve_system_clusters()?;
        self.persist_directory()?;
        self.persist_fats();
        log::info!("format: '{}' reset to an empty volume", self.name);
        Ok(())
    }

    /// Verify both FATs agree with each other and with their free counters.
    pub fn check_consistency(&self) -> Result<()> {
        for (label, fat) in [("main", &self.main_fat), ("backup", &self.backup_fat)] {
            let counted = fat.recount_free();
            if counted != fat.free_cluster_count() {
                return Err(Fat32Error::invalid_fat32(format!(
                    "{} FAT free counter is {} but {} entries are free",
                    label,
                    fat.free_cluster_count(),
                    counted
                )));
            }
        }

        let mismatch = self
            .main_fat
            .entries()
            .iter()
            .zip(self.backup_fat.entries())
            .position(|(main, backup)| main != backup);
        if let Some(index) = mismatch {
            let cluster_id = index as u32 + FIRST_CLUSTER;
            return Err(Fat32Error::invalid_fat32(format!(
                "main and backup FAT differ at cluster {}: {} vs {}",
                cluster_id,
                self.main_fat.entries()[index],
                self.backup_fat.entries()[index]
            )));
        }
        Ok(())
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.root.find_by_name(name).is_some()
    }

    /// Names of live files in creation order
    pub fn list_files(&self) -> Vec<String> {
        self.root.live_records().map(|r| r.name().to_string()).collect()
    }

    /// Data region clusters, marked occupied where the main FAT allocates them
    pub fn clusters(&self) -> Vec<Cluster> {
        let mut clusters = self.clusters.clusters();
        for cluster in &mut clusters {
            cluster.occupied = self
                .main_fat
                .lookup(cluster.id)
                .map(|entry| !entry.is_free() && !entry.is_bad())
                .unwrap_or(false);
        }
        clusters
    }

    /// The raw image
    pub fn to_image_bytes(&self) -> &[u8] {
        &self.content
    }

    /// Replace the whole state with the image in `bytes`.
    ///
    /// The image must be exactly as large as this disk. Nothing changes
    /// when it cannot be parsed.
    pub fn from_image_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        let expected = self.geometry.disk_size();
        if bytes.len() as u64 != expected {
            return Err(Fat32Error::SizeMismatch {
                expected,
                actual: bytes.len() as u64,
            });
        }
        *self = Self::decode(self.geometry, bytes, Some(self.name.clone()))?;
        Ok(())
    }

    /// Write the image to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), &self.content)?;
        log::info!("save: '{}' written to {}", self.name, path.as_ref().display());
        Ok(())
    }

    /// Replace the state with the image stored at `path`
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let bytes = fs::read(path.as_ref())?;
        self.from_image_bytes(bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn disk_size(&self) -> u64 {
        self.geometry.disk_size()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    pub fn main_fat(&self) -> &FatTable {
        &self.main_fat
    }

    pub fn backup_fat(&self) -> &FatTable {
        &self.backup_fat
    }

    pub fn root_directory(&self) -> &RootDirectory {
        &self.root
    }

    pub fn cluster_map(&self) -> &ClusterMap {
        &self.clusters
    }
}

/// Geometry for `disk_size`, refusing disks without room for the root
/// directory plus one data cluster.
fn checked_geometry(disk_size: u64) -> Result<Geometry> {
    let geometry = Geometry::for_disk_size(disk_size)?;
    if geometry.usable_cluster_count() < 2 {
        return Err(Fat32Error::invalid_geometry(
            disk_size,
            format!(
                "only {} clusters fit after the reserved area and both FATs",
                geometry.usable_cluster_count()
            ),
        ));
    }
    Ok(geometry)
}

fn read_fat(geometry: &Geometry, offset: u64, content: &[u8]) -> Result<FatTable> {
    let start = offset as usize;
    let region = content
        .get(start..start + geometry.fat_size_bytes())
        .ok_or_else(|| Fat32Error::invalid_fat32("FAT region lies past the end of the image"))?;
    FatTable::from_bytes(geometry.disk_size(), offset, region)
}
