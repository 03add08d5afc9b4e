//! FAT table management for FAT32

use crate::error::{Fat32Error, Result};

use super::fat_entry::FatEntry;
use super::geometry::Geometry;
use super::{FAT_ENTRY_SIZE, FIRST_CLUSTER, SECTOR_SIZE};

/// FAT table manager
///
/// Cluster id `c` lives at position `c - 2`; ids 0 and 1 are never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatTable {
    entries: Vec<FatEntry>,
    /// Offset of the table inside the image
    offset: u64,
    fat_size_sectors: u32,
    free_cluster_count: u32,
}

impl FatTable {
    /// Create an all-free table for a disk of `disk_size` bytes
    pub fn new(disk_size: u64, table_offset: u64) -> Result<Self> {
        let geometry = Geometry::for_disk_size(disk_size)?;
        Ok(Self::with_geometry(&geometry, table_offset))
    }

    pub fn with_geometry(geometry: &Geometry, table_offset: u64) -> Self {
        let cluster_count = geometry.cluster_count();
        Self {
            entries: vec![FatEntry::new(); cluster_count as usize],
            offset: table_offset,
            fat_size_sectors: geometry.fat_size_sectors(),
            free_cluster_count: cluster_count,
        }
    }

    /// Rebuild a table from its on-image bytes
    pub fn from_bytes(disk_size: u64, table_offset: u64, data: &[u8]) -> Result<Self> {
        let geometry = Geometry::for_disk_size(disk_size)?;
        let needed = geometry.cluster_count() as usize * FAT_ENTRY_SIZE;
        if data.len() < needed {
            return Err(Fat32Error::invalid_fat32(format!(
                "FAT region holds {} bytes, {} needed",
                data.len(),
                needed
            )));
        }

        let entries: Vec<FatEntry> = data[..needed]
            .chunks_exact(FAT_ENTRY_SIZE)
            .map(|chunk| FatEntry::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let free_cluster_count = entries.iter().filter(|e| e.is_free()).count() as u32;

        Ok(Self {
            entries,
            offset: table_offset,
            fat_size_sectors: geometry.fat_size_sectors(),
            free_cluster_count,
        })
    }

    fn index(&self, cluster_id: u32) -> Result<usize> {
        if cluster_id < FIRST_CLUSTER {
            return Err(Fat32Error::InvalidCluster {
                cluster: cluster_id,
            });
        }
        let index = (cluster_id - FIRST_CLUSTER) as usize;
        if index >= self.entries.len() {
            return Err(Fat32Error::InvalidCluster {
                cluster: cluster_id,
            });
        }
        Ok(index)
    }

    /// Entry for `cluster_id`
    pub fn lookup(&self, cluster_id: u32) -> Result<&FatEntry> {
        let index = self.index(cluster_id)?;
        Ok(&self.entries[index])
    }

    /// Get a FAT entry value
    pub fn get_entry(&self, cluster_id: u32) -> Result<u32> {
        self.lookup(cluster_id).map(FatEntry::value)
    }

    /// Set a FAT entry value, keeping the free counter in step
    pub fn set_entry(&mut self, cluster_id: u32, value: u32) -> Result<()> {
        let index = self.index(cluster_id)?;
        let entry = &mut self.entries[index];
        let was_free = entry.is_free();
        entry.set_value(value);
        match (was_free, entry.is_free()) {
            (true, false) => self.free_cluster_count -= 1,
            (false, true) => self.free_cluster_count += 1,
            _ => {}
        }
        Ok(())
    }

    /// Allocate a chain large enough for `byte_size` bytes.
    ///
    /// Free clusters are taken first-fit in ascending id order. Nothing is
    /// modified when the table cannot satisfy the request.
    pub fn allocate_chain(&mut self, byte_size: u64, cluster_size_bytes: usize) -> Result<Vec<u32>> {
        if cluster_size_bytes == 0 {
            return Err(Fat32Error::invalid_fat32("cluster size must be non-zero"));
        }

        let required = byte_size.div_ceil(cluster_size_bytes as u64);
        if required > self.free_cluster_count as u64 {
            return Err(Fat32Error::NoFreeSpace {
                required: u32::try_from(required).unwrap_or(u32::MAX),
                available: self.free_cluster_count,
            });
        }
        let required = required as usize;

        let clusters: Vec<u32> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_free())
            .map(|(index, _)| index as u32 + FIRST_CLUSTER)
            .take(required)
            .collect();

        if clusters.len() < required {
            // Counter and entries disagree; refuse rather than over-allocate
            return Err(Fat32Error::NoFreeSpace {
                required: required as u32,
                available: clusters.len() as u32,
            });
        }

        // Link the chain
        for (i, &cluster) in clusters.iter().enumerate() {
            let index = (cluster - FIRST_CLUSTER) as usize;
            match clusters.get(i + 1) {
                Some(&next) => self.entries[index].set_value(next),
                None => self.entries[index].set_end_of_chain(),
            }
            self.free_cluster_count -= 1;
        }

        log::debug!(
            "allocate_chain: {} bytes -> {} clusters {:?}",
            byte_size,
            clusters.len(),
            clusters.first()
        );
        Ok(clusters)
    }

    /// Free a cluster chain, returning how many clusters were released.
    ///
    /// Stops at end-of-chain, at a self-referential pointer, at an entry that
    /// is already free or bad, and at the first id the table cannot address.
    pub fn free_chain(&mut self, start_cluster: u32) -> u32 {
        let mut current = start_cluster;
        let mut freed = 0u32;

        while let Ok(index) = self.index(current) {
            let entry = self.entries[index];
            if entry.is_free() || entry.is_bad() {
                break;
            }

            self.entries[index].set_free();
            self.free_cluster_count += 1;
            freed += 1;

            match entry.next_cluster() {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }

        log::debug!("free_chain: released {} clusters from {}", freed, start_cluster);
        freed
    }

    /// Reset every entry to free
    pub fn format(&mut self) {
        for entry in &mut self.entries {
            entry.set_free();
        }
        self.free_cluster_count = self.cluster_count();
    }

    /// Cluster ids of the chain starting at `cluster_id`, in order.
    ///
    /// A free start yields an empty chain.
    pub fn chain(&self, cluster_id: u32) -> Result<Vec<u32>> {
        let mut clusters = Vec::new();
        let mut current = cluster_id;

        loop {
            let entry = self.lookup(current)?;
            if entry.is_free() {
                if clusters.is_empty() {
                    return Ok(clusters);
                }
                return Err(Fat32Error::CorruptChain { start: cluster_id });
            }
            if clusters.len() >= self.entries.len() {
                // Longer than the table itself: there is a cycle
                return Err(Fat32Error::CorruptChain { start: cluster_id });
            }
            clusters.push(current);

            if entry.is_end_of_chain() {
                return Ok(clusters);
            }
            current = entry
                .next_cluster()
                .ok_or(Fat32Error::CorruptChain { start: cluster_id })?;
            if self.lookup(current).is_err() {
                return Err(Fat32Error::CorruptChain { start: cluster_id });
            }
        }
    }

    /// Count clusters in a chain, 0 when the start entry is free
    pub fn chain_length(&self, cluster_id: u32) -> Result<u32> {
        self.chain(cluster_id).map(|chain| chain.len() as u32)
    }

    /// Serialize every entry, padded to whole sectors
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.size_bytes()];
        for (slot, entry) in data.chunks_exact_mut(FAT_ENTRY_SIZE).zip(&self.entries) {
            slot.copy_from_slice(&entry.to_bytes());
        }
        data
    }

    /// Count free entries from scratch
    pub fn recount_free(&self) -> u32 {
        self.entries.iter().filter(|e| e.is_free()).count() as u32
    }

    pub fn free_cluster_count(&self) -> u32 {
        self.free_cluster_count
    }

    pub fn cluster_count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn fat_size_sectors(&self) -> u32 {
        self.fat_size_sectors
    }

    pub fn size_bytes(&self) -> usize {
        self.fat_size_sectors as usize * SECTOR_SIZE
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn entries(&self) -> &[FatEntry] {
        &self.entries
    }
}
