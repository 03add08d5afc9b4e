//! Cluster view over sector LBAs

use std::ops::Range;

use crate::error::{Fat32Error, Result};

use super::geometry::Geometry;
use super::{FIRST_CLUSTER, SECTOR_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: u32,
    pub sectors: Vec<u64>,
    pub occupied: bool,
}

/// Split `[0, disk_size / 512)` into consecutive groups of
/// `sectors_per_cluster` LBAs. The last group is shorter when the sector
/// count is not a multiple of the cluster size.
pub fn sectors_for_clusters(sectors_per_cluster: u32, disk_size: u64) -> Vec<Vec<u64>> {
    if sectors_per_cluster == 0 {
        return Vec::new();
    }
    let total_sectors = disk_size / SECTOR_SIZE as u64;
    let step = sectors_per_cluster as u64;

    (0..total_sectors)
        .step_by(step as usize)
        .map(|first| (first..(first + step).min(total_sectors)).collect())
        .collect()
}

/// One unoccupied cluster per group, numbered from 2.
pub fn clusters_from_groups(groups: Vec<Vec<u64>>) -> Vec<Cluster> {
    groups
        .into_iter()
        .zip(FIRST_CLUSTER..)
        .map(|(sectors, id)| Cluster {
            id,
            sectors,
            occupied: false,
        })
        .collect()
}

/// Cluster addressing for the data region of one disk.
///
/// Nothing is materialized up front; clusters are computed when asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterMap {
    data_start_lba: u64,
    data_sectors: u64,
    sectors_per_cluster: u32,
    usable_clusters: u32,
}

impl ClusterMap {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            data_start_lba: geometry.data_start_lba(),
            data_sectors: geometry.data_sectors(),
            sectors_per_cluster: geometry.sectors_per_cluster(),
            usable_clusters: geometry.usable_cluster_count(),
        }
    }

    /// Clusters that lie entirely inside the image.
    pub fn usable_clusters(&self) -> u32 {
        self.usable_clusters
    }

    pub fn contains(&self, cluster_id: u32) -> bool {
        cluster_id >= FIRST_CLUSTER && cluster_id - FIRST_CLUSTER < self.usable_clusters
    }

    pub fn first_sector(&self, cluster_id: u32) -> Result<u64> {
        if !self.contains(cluster_id) {
            return Err(Fat32Error::InvalidCluster {
                cluster: cluster_id,
            });
        }
        Ok(self.data_start_lba + (cluster_id - FIRST_CLUSTER) as u64 * self.sectors_per_cluster as u64)
    }

    pub fn cluster(&self, cluster_id: u32) -> Result<Cluster> {
        let first = self.first_sector(cluster_id)?;
        Ok(Cluster {
            id: cluster_id,
            sectors: (first..first + self.sectors_per_cluster as u64).collect(),
            occupied: false,
        })
    }

    /// Byte range of `cluster_id` inside the image buffer.
    pub fn byte_range(&self, cluster_id: u32) -> Result<Range<usize>> {
        let start = self.first_sector(cluster_id)? as usize * SECTOR_SIZE;
        Ok(start..start + self.sectors_per_cluster as usize * SECTOR_SIZE)
    }

    /// Every cluster of the data region with absolute LBAs, including a
    /// trailing partial cluster if the region does not divide evenly.
    pub fn clusters(&self) -> Vec<Cluster> {
        let groups: Vec<Vec<u64>> = sectors_for_clusters(self.sectors_per_cluster, self.data_sectors * SECTOR_SIZE as u64)
            .into_iter()
            .map(|group| group.into_iter().map(|lba| lba + self.data_start_lba).collect())
            .collect();
        clusters_from_groups(groups)
    }
}
