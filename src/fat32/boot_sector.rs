//! Boot sector construction and parsing

use rand::RngCore;

use crate::error::{Fat32Error, Result};

use super::geometry::Geometry;
use super::{FAT_COUNT, RESERVED_SECTORS, ROOT_DIR_CLUSTER, SECTOR_SIZE};

pub const BOOT_SECTOR_SIZE: usize = 512;

const JUMP: [u8; 3] = [0xEB, 0x58, 0x90];
const OEM_NAME: &[u8; 8] = b"MSWIN4.1";
const MEDIA_DESCRIPTOR: u8 = 0xF8;
const SECTORS_PER_TRACK: u16 = 63;
const HEADS: u16 = 255;
const FS_INFO_SECTOR: u16 = 1;
const BACKUP_BOOT_SECTOR: u16 = 6;
const DRIVE_NUMBER: u8 = 0x80;
const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;
const FS_TYPE: &[u8; 8] = b"FAT32   ";
/// cli; hlt
const BOOT_CODE: [u8; 2] = [0xFA, 0xF4];
const SIGNATURE: [u8; 2] = [0x55, 0xAA];

pub const VOLUME_LABEL_LEN: usize = 11;

const OFF_OEM_NAME: usize = 0x03;
const OFF_BYTES_PER_SECTOR: usize = 0x0B;
const OFF_SECTORS_PER_CLUSTER: usize = 0x0D;
const OFF_RESERVED_SECTORS: usize = 0x0E;
const OFF_FAT_COUNT: usize = 0x10;
const OFF_MEDIA: usize = 0x15;
const OFF_SECTORS_PER_TRACK: usize = 0x18;
const OFF_HEADS: usize = 0x1A;
const OFF_TOTAL_SECTORS: usize = 0x20;
const OFF_SECTORS_PER_FAT: usize = 0x24;
const OFF_ROOT_CLUSTER: usize = 0x2C;
const OFF_FS_INFO: usize = 0x30;
const OFF_BACKUP_BOOT: usize = 0x32;
const OFF_DRIVE_NUMBER: usize = 0x42;
const OFF_EXT_SIGNATURE: usize = 0x44;
const OFF_VOLUME_ID: usize = 0x45;
const OFF_VOLUME_LABEL: usize = 0x49;
const OFF_FS_TYPE: usize = 0x54;
const OFF_BOOT_CODE: usize = 0x5C;
const OFF_SIGNATURE: usize = 0x1FE;

/// The 512-byte record at LBA 0. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSector {
    bytes: [u8; BOOT_SECTOR_SIZE],
}

impl BootSector {
    /// Build the boot sector for a disk of `disk_size` bytes.
    ///
    /// The volume id is drawn from `rng`; pass a seeded generator for
    /// reproducible images.
    pub fn new<R: RngCore + ?Sized>(disk_size: u64, disk_name: &str, rng: &mut R) -> Result<Self> {
        let geometry = Geometry::for_disk_size(disk_size)?;
        Ok(Self::with_geometry(&geometry, disk_name, rng))
    }

    pub fn with_geometry<R: RngCore + ?Sized>(geometry: &Geometry, disk_name: &str, rng: &mut R) -> Self {
        let mut b = [0u8; BOOT_SECTOR_SIZE];

        b[..3].copy_from_slice(&JUMP);
        b[OFF_OEM_NAME..OFF_OEM_NAME + 8].copy_from_slice(OEM_NAME);
        // Big endian on purpose: kept from the legacy layout of these images
        b[OFF_BYTES_PER_SECTOR..OFF_BYTES_PER_SECTOR + 2]
            .copy_from_slice(&(SECTOR_SIZE as u16).to_be_bytes());
        b[OFF_SECTORS_PER_CLUSTER] = geometry.sectors_per_cluster() as u8;
        b[OFF_RESERVED_SECTORS..OFF_RESERVED_SECTORS + 2]
            .copy_from_slice(&(RESERVED_SECTORS as u16).to_le_bytes());
        b[OFF_FAT_COUNT] = FAT_COUNT;
        b[OFF_MEDIA] = MEDIA_DESCRIPTOR;
        b[OFF_SECTORS_PER_TRACK..OFF_SECTORS_PER_TRACK + 2]
            .copy_from_slice(&SECTORS_PER_TRACK.to_le_bytes());
        b[OFF_HEADS..OFF_HEADS + 2].copy_from_slice(&HEADS.to_le_bytes());
        b[OFF_TOTAL_SECTORS..OFF_TOTAL_SECTORS + 4]
            .copy_from_slice(&(geometry.total_sectors() as u32).to_le_bytes());
        b[OFF_SECTORS_PER_FAT..OFF_SECTORS_PER_FAT + 4]
            .copy_from_slice(&geometry.fat_size_sectors().to_le_bytes());
        b[OFF_ROOT_CLUSTER..OFF_ROOT_CLUSTER + 4].copy_from_slice(&ROOT_DIR_CLUSTER.to_le_bytes());
        b[OFF_FS_INFO..OFF_FS_INFO + 2].copy_from_slice(&FS_INFO_SECTOR.to_le_bytes());
        b[OFF_BACKUP_BOOT..OFF_BACKUP_BOOT + 2].copy_from_slice(&BACKUP_BOOT_SECTOR.to_le_bytes());
        b[OFF_DRIVE_NUMBER] = DRIVE_NUMBER;
        b[OFF_EXT_SIGNATURE] = EXTENDED_BOOT_SIGNATURE;
        rng.fill_bytes(&mut b[OFF_VOLUME_ID..OFF_VOLUME_ID + 4]);
        b[OFF_VOLUME_LABEL..OFF_VOLUME_LABEL + VOLUME_LABEL_LEN].copy_from_slice(&volume_label(disk_name));
        b[OFF_FS_TYPE..OFF_FS_TYPE + 8].copy_from_slice(FS_TYPE);
        b[OFF_BOOT_CODE..OFF_BOOT_CODE + 2].copy_from_slice(&BOOT_CODE);
        b[OFF_SIGNATURE..OFF_SIGNATURE + 2].copy_from_slice(&SIGNATURE);

        log::debug!(
            "boot_sector: {} sectors, {} sectors/cluster, {} sectors/FAT",
            geometry.total_sectors(),
            geometry.sectors_per_cluster(),
            geometry.fat_size_sectors()
        );
        Self { bytes: b }
    }

    /// Parse a boot sector previously written by [`BootSector::new`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; BOOT_SECTOR_SIZE] = bytes
            .get(..BOOT_SECTOR_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Fat32Error::invalid_fat32("boot sector shorter than 512 bytes"))?;
        let sector = Self { bytes };

        if bytes[OFF_SIGNATURE..OFF_SIGNATURE + 2] != SIGNATURE {
            return Err(Fat32Error::invalid_fat32("missing 0x55AA boot signature"));
        }
        if sector.bytes_per_sector() as usize != SECTOR_SIZE {
            return Err(Fat32Error::invalid_fat32(format!(
                "unsupported bytes per sector {}",
                sector.bytes_per_sector()
            )));
        }
        if sector.fat_count() != FAT_COUNT {
            return Err(Fat32Error::invalid_fat32(format!(
                "expected {} FATs, found {}",
                FAT_COUNT,
                sector.fat_count()
            )));
        }
        Ok(sector)
    }

    pub fn get_bytes(&self) -> &[u8; BOOT_SECTOR_SIZE] {
        &self.bytes
    }

    pub fn oem_name(&self) -> String {
        String::from_utf8_lossy(&self.bytes[OFF_OEM_NAME..OFF_OEM_NAME + 8]).into_owned()
    }

    pub fn bytes_per_sector(&self) -> u16 {
        u16::from_be_bytes([self.bytes[OFF_BYTES_PER_SECTOR], self.bytes[OFF_BYTES_PER_SECTOR + 1]])
    }

    pub fn sectors_per_cluster(&self) -> u8 {
        self.bytes[OFF_SECTORS_PER_CLUSTER]
    }

    pub fn reserved_sectors(&self) -> u16 {
        u16::from_le_bytes([self.bytes[OFF_RESERVED_SECTORS], self.bytes[OFF_RESERVED_SECTORS + 1]])
    }

    pub fn fat_count(&self) -> u8 {
        self.bytes[OFF_FAT_COUNT]
    }

    pub fn media_descriptor(&self) -> u8 {
        self.bytes[OFF_MEDIA]
    }

    pub fn total_sectors(&self) -> u32 {
        read_u32(&self.bytes, OFF_TOTAL_SECTORS)
    }

    pub fn sectors_per_fat(&self) -> u32 {
        read_u32(&self.bytes, OFF_SECTORS_PER_FAT)
    }

    pub fn root_cluster(&self) -> u32 {
        read_u32(&self.bytes, OFF_ROOT_CLUSTER)
    }

    pub fn volume_id(&self) -> [u8; 4] {
        [
            self.bytes[OFF_VOLUME_ID],
            self.bytes[OFF_VOLUME_ID + 1],
            self.bytes[OFF_VOLUME_ID + 2],
            self.bytes[OFF_VOLUME_ID + 3],
        ]
    }

    /// Volume label with the space padding removed.
    pub fn volume_label(&self) -> String {
        String::from_utf8_lossy(&self.bytes[OFF_VOLUME_LABEL..OFF_VOLUME_LABEL + VOLUME_LABEL_LEN])
            .trim_end()
            .to_string()
    }

    pub fn filesystem_type(&self) -> String {
        String::from_utf8_lossy(&self.bytes[OFF_FS_TYPE..OFF_FS_TYPE + 8]).into_owned()
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Disk name as an 11-byte, space-padded label. Non-ASCII characters become '_'.
fn volume_label(name: &str) -> [u8; VOLUME_LABEL_LEN] {
    let mut label = [b' '; VOLUME_LABEL_LEN];
    for (slot, c) in label.iter_mut().zip(name.chars()) {
        *slot = if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'_' };
    }
    label
}
