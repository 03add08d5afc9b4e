//! Single FAT32 allocation-table slot

use std::fmt;

/// Only the low 28 bits of a FAT32 entry carry meaning
pub const FAT32_VALUE_MASK: u32 = 0x0FFFFFFF;

/// FAT32 free cluster marker
pub const FAT32_FREE_CLUSTER: u32 = 0x00000000;

/// FAT32 bad cluster marker
pub const FAT32_BAD_CLUSTER: u32 = 0x0FFFFFF7;

/// Lowest FAT32 end-of-chain marker
pub const FAT32_EOC: u32 = 0x0FFFFFF8;

/// Highest FAT32 end-of-chain marker, the one written by this crate
pub const FAT32_EOC_MAX: u32 = 0x0FFFFFFF;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FatEntry {
    value: u32,
}

impl FatEntry {
    /// A free entry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: u32) -> Self {
        Self {
            value: value & FAT32_VALUE_MASK,
        }
    }

    pub fn is_free(&self) -> bool {
        self.value == FAT32_FREE_CLUSTER
    }

    pub fn is_bad(&self) -> bool {
        self.value == FAT32_BAD_CLUSTER
    }

    /// True for the whole `0x0FFFFFF8..=0x0FFFFFFF` range.
    pub fn is_end_of_chain(&self) -> bool {
        (FAT32_EOC..=FAT32_EOC_MAX).contains(&self.value)
    }

    pub fn set_free(&mut self) {
        self.value = FAT32_FREE_CLUSTER;
    }

    pub fn set_bad(&mut self) {
        self.value = FAT32_BAD_CLUSTER;
    }

    pub fn set_end_of_chain(&mut self) {
        self.value = FAT32_EOC_MAX;
    }

    pub fn value(&self) -> u32 {
        self.value & FAT32_VALUE_MASK
    }

    pub fn set_value(&mut self, value: u32) {
        self.value = value & FAT32_VALUE_MASK;
    }

    /// The next cluster id when this entry is a chain pointer.
    ///
    /// Free, bad, end-of-chain and the reserved values 1 yield `None`.
    pub fn next_cluster(&self) -> Option<u32> {
        match self.value {
            2..FAT32_BAD_CLUSTER => Some(self.value),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        self.value.to_le_bytes()
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::with_value(u32::from_le_bytes(bytes))
    }
}

impl fmt::Display for FatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.value)
    }
}
