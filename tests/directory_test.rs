use chrono::{NaiveDate, NaiveDateTime};
use fat32_vdisk::fat32::directory::{ATTR_ARCHIVE, DIR_RECORD_SIZE, MAX_NAME_LEN};
use fat32_vdisk::{DirectoryRecord, Fat32Error, RootDirectory};

fn stamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 2, 10)
        .unwrap()
        .and_hms_opt(14, 30, 5)
        .unwrap()
}

#[test]
fn record_takes_timestamps_from_one_instant() {
    let record = DirectoryRecord::new("notes.txt", 3, 1200, stamp()).unwrap();
    assert_eq!(record.name(), "notes.txt");
    assert_eq!(record.attribute(), ATTR_ARCHIVE);
    assert_eq!(record.created(), stamp());
    assert_eq!(record.modified(), stamp());
    assert_eq!(record.accessed(), stamp().date());
    assert_eq!(record.start_cluster(), 3);
    assert_eq!(record.size(), 1200);
    assert!(!record.is_deleted());
}

#[test]
fn record_binary_layout() {
    let record = DirectoryRecord::new("a.bin", 0x0102_0304, 0x0506, stamp()).unwrap();
    let bytes = record.to_bytes();
    assert_eq!(bytes.len(), DIR_RECORD_SIZE);
    assert_eq!(&bytes[..5], b"a.bin");

    // name, 8-byte attribute placeholder, then the time fields
    let t = 5 + 8;
    assert_eq!(bytes[t], 14);
    assert_eq!(bytes[t + 1], 41);
    assert_eq!(bytes[t + 2], 41);
    assert_eq!(bytes[t + 3], 14);
    assert_eq!(bytes[t + 4], 41);
    assert_eq!(&bytes[t + 5..t + 9], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&bytes[t + 9..t + 17], &0x0506u64.to_le_bytes());
}

#[test]
fn record_names_are_validated() {
    let long = "x".repeat(MAX_NAME_LEN + 1);
    for name in ["", "dir/file", "back\\slash", "nul\0", long.as_str()] {
        let err = DirectoryRecord::new(name, 0, 0, stamp()).unwrap_err();
        assert!(matches!(err, Fat32Error::InvalidFileName { .. }), "{:?} accepted", name);
    }
    assert!(DirectoryRecord::new(&"x".repeat(MAX_NAME_LEN), 0, 0, stamp()).is_ok());
}

#[test]
fn append_keeps_creation_order_and_rejects_duplicates() {
    let mut root = RootDirectory::new();
    root.append(DirectoryRecord::new("b", 3, 1, stamp()).unwrap()).unwrap();
    root.append(DirectoryRecord::new("a", 4, 1, stamp()).unwrap()).unwrap();

    let names: Vec<&str> = root.records().iter().map(|r| r.name()).collect();
    assert_eq!(names, ["b", "a"]);

    let err = root
        .append(DirectoryRecord::new("a", 5, 1, stamp()).unwrap())
        .unwrap_err();
    assert!(matches!(err, Fat32Error::AlreadyExists { .. }));
    assert_eq!(root.len(), 2);
}

#[test]
fn tombstone_hides_record_but_keeps_it_listed() {
    let mut root = RootDirectory::new();
    root.append(DirectoryRecord::new("gone", 3, 10, stamp()).unwrap()).unwrap();

    let removed = root.tombstone("gone").unwrap();
    assert!(removed.is_deleted());
    assert!(root.find_by_name("gone").is_none());
    assert_eq!(root.live_records().count(), 0);
    assert_eq!(root.len(), 1);
    assert!(matches!(root.tombstone("gone"), Err(Fat32Error::NotFound { .. })));

    // the name is free again
    root.append(DirectoryRecord::new("gone", 4, 10, stamp()).unwrap()).unwrap();
    assert_eq!(root.find_by_name("gone").unwrap().start_cluster(), 4);
}

#[test]
fn oldest_tombstone_is_removed_first() {
    let mut root = RootDirectory::new();
    for (name, cluster) in [("a", 3), ("b", 4), ("c", 5)] {
        root.append(DirectoryRecord::new(name, cluster, 1, stamp()).unwrap()).unwrap();
    }
    assert!(root.remove_oldest_tombstone().is_none());

    root.tombstone("c").unwrap();
    root.tombstone("a").unwrap();
    assert_eq!(root.remove_oldest_tombstone().unwrap().name(), "a");
    assert_eq!(root.remove_oldest_tombstone().unwrap().name(), "c");
    assert!(root.remove_oldest_tombstone().is_none());

    let names: Vec<&str> = root.records().iter().map(|r| r.name()).collect();
    assert_eq!(names, ["b"]);
}

#[test]
fn serialized_directory_round_trip() {
    let mut root = RootDirectory::new();
    root.append(DirectoryRecord::new("one", 3, 100, stamp()).unwrap()).unwrap();
    root.append(DirectoryRecord::new("two words.txt", 4, 5000, stamp()).unwrap()).unwrap();
    root.tombstone("one").unwrap();

    let mut cluster = root.to_bytes().unwrap();
    cluster.resize(4096, 0);
    let parsed = RootDirectory::from_bytes(&cluster).unwrap();
    assert_eq!(parsed, root);

    assert!(RootDirectory::from_bytes(&[0u8; 512]).unwrap().is_empty());
}

#[test]
fn garbage_directory_is_corrupt() {
    let err = RootDirectory::from_bytes(b"{not json}\n").unwrap_err();
    assert!(matches!(err, Fat32Error::CorruptDirectory { .. }));
}

#[test]
fn export_writes_listing() {
    let mut root = RootDirectory::new();
    root.append(DirectoryRecord::new("report.pdf", 3, 77, stamp()).unwrap()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("listing.txt");
    root.export(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("Directory entries:"));
    assert!(text.contains("report.pdf"));
    assert!(text.contains("size=77"));
}
