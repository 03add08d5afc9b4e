//! Root directory table: fixed-size file records kept in creation order
//!
//! Historically this table was called the "journal". It is a directory, not
//! a recovery log: nothing here is replayed.

use std::fmt;
use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Fat32Error, Result};

/// Size of the binary rendering of one record
pub const DIR_RECORD_SIZE: usize = 4096;

/// Attribute placeholder width that follows the name
const ATTRIBUTE_PLACEHOLDER_LEN: usize = 8;

/// Bytes after the name: placeholder, five 1-byte time fields, cluster, size
const FIXED_FIELDS_LEN: usize = ATTRIBUTE_PLACEHOLDER_LEN + 5 + 4 + 8;

pub const MAX_NAME_LEN: usize = DIR_RECORD_SIZE - FIXED_FIELDS_LEN;

/// Archive attribute, the only one files get
pub const ATTR_ARCHIVE: &str = "A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    name: String,
    attribute: String,
    created: NaiveDateTime,
    accessed: NaiveDate,
    modified: NaiveDateTime,
    start_cluster: u32,
    size: u64,
    deleted: bool,
}

impl DirectoryRecord {
    pub fn new(name: &str, start_cluster: u32, size: u64, timestamp: NaiveDateTime) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            attribute: ATTR_ARCHIVE.to_string(),
            created: timestamp,
            accessed: timestamp.date(),
            modified: timestamp,
            start_cluster,
            size,
            deleted: false,
        })
    }

    pub(crate) fn set_start_cluster(&mut self, start_cluster: u32) {
        self.start_cluster = start_cluster;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn created(&self) -> NaiveDateTime {
        self.created
    }

    pub fn accessed(&self) -> NaiveDate {
        self.accessed
    }

    pub fn modified(&self) -> NaiveDateTime {
        self.modified
    }

    /// First cluster of the file, 0 for an empty file.
    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Binary rendering.
    ///
    /// The name starts at offset 0 and every later field follows it, so
    /// offsets shift with the name length. Day-of-year fields keep only the
    /// low 8 bits.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut record = vec![0u8; DIR_RECORD_SIZE];
        let name = self.name.as_bytes();
        record[..name.len()].copy_from_slice(name);

        let mut offset = name.len() + ATTRIBUTE_PLACEHOLDER_LEN;
        for byte in [
            self.created.hour() as u8,
            self.created.ordinal() as u8,
            self.accessed.ordinal() as u8,
            self.modified.hour() as u8,
            self.modified.ordinal() as u8,
        ] {
            record[offset] = byte;
            offset += 1;
        }
        record[offset..offset + 4].copy_from_slice(&self.start_cluster.to_le_bytes());
        offset += 4;
        record[offset..offset + 8].copy_from_slice(&self.size.to_le_bytes());
        record
    }
}

impl fmt::Display for DirectoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<20} {} cluster={} size={} created={} accessed={} modified={}{}",
            self.name,
            self.attribute,
            self.start_cluster,
            self.size,
            self.created,
            self.accessed,
            self.modified,
            if self.deleted { " <deleted>" } else { "" }
        )
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Fat32Error::invalid_file_name(name, "name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Fat32Error::invalid_file_name(
            name,
            format!("longer than {} bytes", MAX_NAME_LEN),
        ));
    }
    if let Some(c) = name.chars().find(|&c| c == '\0' || c == '/' || c == '\\' || c.is_control()) {
        return Err(Fat32Error::invalid_file_name(
            name,
            format!("contains forbidden character {:?}", c),
        ));
    }
    Ok(())
}

/// The root directory of a disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootDirectory {
    records: Vec<DirectoryRecord>,
}

impl RootDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; a live record with the same name must not exist.
    pub fn append(&mut self, record: DirectoryRecord) -> Result<()> {
        validate_name(&record.name)?;
        if record.deleted {
            return Err(Fat32Error::invalid_file_name(&record.name, "record is already deleted"));
        }
        if self.find_by_name(&record.name).is_some() {
            return Err(Fat32Error::already_exists(&record.name));
        }
        self.records.push(record);
        Ok(())
    }

    /// Remove the oldest deleted record, if any
    pub fn remove_oldest_tombstone(&mut self) -> Option<DirectoryRecord> {
        let index = self.records.iter().position(|r| r.deleted)?;
        Some(self.records.remove(index))
    }

    /// First live record named `name`
    pub fn find_by_name(&self, name: &str) -> Option<&DirectoryRecord> {
        self.records.iter().find(|r| !r.deleted && r.name == name)
    }

    /// Mark the live record named `name` as deleted and return a copy of it.
    pub fn tombstone(&mut self, name: &str) -> Result<DirectoryRecord> {
        let record = self
            .records
            .iter_mut()
            .find(|r| !r.deleted && r.name == name)
            .ok_or_else(|| Fat32Error::not_found(name))?;
        record.deleted = true;
        Ok(record.clone())
    }

    /// Every record, tombstones included.
    pub fn records(&self) -> &[DirectoryRecord] {
        &self.records
    }

    pub fn live_records(&self) -> impl Iterator<Item = &DirectoryRecord> {
        self.records.iter().filter(|r| !r.deleted)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// On-disk rendering: one JSON object per line.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for record in &self.records {
            serde_json::to_writer(&mut out, record)?;
            out.push(b'\n');
        }
        Ok(out)
    }

    /// Parse [`RootDirectory::to_bytes`] output. Reading stops at the first
    /// NUL, so a whole zero-padded cluster can be passed in.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let text = std::str::from_utf8(&bytes[..end])
            .map_err(|e| Fat32Error::corrupt_directory(e.to_string()))?;

        let mut records = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let record: DirectoryRecord = serde_json::from_str(line)?;
            validate_name(&record.name)?;
            records.push(record);
        }
        Ok(Self { records })
    }

    /// Write the human-readable listing to a text file
    pub fn export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_string())?;
        log::info!("export: root directory written to {}", path.as_ref().display());
        Ok(())
    }
}

impl fmt::Display for RootDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Directory entries:")?;
        for record in &self.records {
            writeln!(f, "{}", record)?;
        }
        Ok(())
    }
}
