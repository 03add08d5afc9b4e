use chrono::{NaiveDate, NaiveDateTime};
use fat32_vdisk::fat32::fat_entry::FAT32_EOC_MAX;
use fat32_vdisk::{Fat32Error, VirtualDisk};
use rand::SeedableRng;
use rand::rngs::StdRng;

const MIB: u64 = 1024 * 1024;

/// 512-byte clusters, 16 sectors per FAT, data region at LBA 64
fn small_disk() -> VirtualDisk {
    let mut rng = StdRng::seed_from_u64(7);
    VirtualDisk::create_with_rng("scratch", MIB, &mut rng).unwrap()
}

fn stamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 11, 5)
        .unwrap()
        .and_hms_opt(9, 15, 0)
        .unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn new_disk_layout() {
    let disk = small_disk();
    let image = disk.to_image_bytes();

    assert_eq!(image.len() as u64, MIB);
    assert_eq!(&image[..512], disk.boot_sector().get_bytes());
    assert_eq!(disk.name(), "scratch");
    assert_eq!(disk.boot_sector().volume_label(), "scratch");

    // root directory cluster reserved in both tables
    assert_eq!(disk.main_fat().get_entry(2).unwrap(), FAT32_EOC_MAX);
    assert_eq!(disk.backup_fat().get_entry(2).unwrap(), FAT32_EOC_MAX);
    // entries past the end of the image are bad
    assert!(disk.main_fat().lookup(2049).unwrap().is_bad());
    assert!(disk.main_fat().lookup(1985).unwrap().is_free());
    assert_eq!(disk.main_fat().free_cluster_count(), 1983);

    // FAT regions in the image mirror the tables
    let main = disk.main_fat().to_bytes();
    assert_eq!(&image[32 * 512..32 * 512 + main.len()], main.as_slice());
    let backup_start = 48 * 512;
    assert_eq!(&image[backup_start..backup_start + main.len()], main.as_slice());

    assert!(disk.list_files().is_empty());
    assert_eq!(disk.slack_space(), 0);
    disk.check_consistency().unwrap();
}

#[test]
fn tiny_and_oversized_disks_are_rejected() {
    for size in [0, 512, 32 * 512, 35 * 512] {
        let err = VirtualDisk::create("tiny", size).unwrap_err();
        assert!(matches!(err, Fat32Error::InvalidGeometry { .. }), "size {}", size);
    }
    let err = VirtualDisk::create("huge", 32 * 1024 * MIB).unwrap_err();
    assert!(matches!(err, Fat32Error::InvalidGeometry { .. }));
}

#[test]
fn write_and_read_files_of_every_shape() {
    let mut disk = small_disk();

    let one = pattern(512);
    let many = pattern(512 * 3 + 17);
    let partial = b"hello fat32".to_vec();

    assert_eq!(disk.write_file_at("one.bin", &one, stamp()).unwrap(), vec![3]);
    assert_eq!(disk.write_file_at("many.bin", &many, stamp()).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(disk.write_file_at("partial.txt", &partial, stamp()).unwrap(), vec![8]);

    assert_eq!(disk.read_file("one.bin").unwrap(), one);
    assert_eq!(disk.read_file("many.bin").unwrap(), many);
    assert_eq!(disk.read_file("partial.txt").unwrap(), partial);
    assert_eq!(disk.list_files(), ["one.bin", "many.bin", "partial.txt"]);

    let record = disk.root_directory().find_by_name("many.bin").unwrap();
    assert_eq!(record.start_cluster(), 4);
    assert_eq!(record.size(), many.len() as u64);
    assert_eq!(record.created(), stamp());

    assert_eq!(disk.main_fat().chain(4).unwrap(), vec![4, 5, 6, 7]);
    assert_eq!(disk.main_fat().entries(), disk.backup_fat().entries());
    disk.check_consistency().unwrap();
}

#[test]
fn file_data_lands_in_its_cluster() {
    let mut disk = small_disk();
    disk.write_file("marker", b"ABCD").unwrap();

    // cluster 3 starts one cluster after the data region at LBA 64
    let offset = (64 + 1) * 512;
    assert_eq!(&disk.to_image_bytes()[offset..offset + 4], b"ABCD");
    assert_eq!(disk.cluster_map().first_sector(3).unwrap(), 65);
}

#[test]
fn empty_file_has_no_clusters() {
    let mut disk = small_disk();
    let free = disk.main_fat().free_cluster_count();

    assert!(disk.write_file("empty", b"").unwrap().is_empty());
    assert!(disk.file_exists("empty"));
    assert_eq!(disk.root_directory().find_by_name("empty").unwrap().start_cluster(), 0);
    assert!(disk.read_file("empty").unwrap().is_empty());
    assert_eq!(disk.main_fat().free_cluster_count(), free);
    assert_eq!(disk.slack_space(), 0);
    assert_eq!(disk.delete_file("empty").unwrap(), 0);
}

#[test]
fn delete_frees_clusters_for_reuse() {
    let mut disk = small_disk();
    disk.write_file("first", &pattern(1024)).unwrap();
    disk.write_file("second", &pattern(100)).unwrap();

    assert_eq!(disk.delete_file("first").unwrap(), 2);
    assert!(!disk.file_exists("first"));
    assert!(disk.main_fat().lookup(3).unwrap().is_free());
    assert!(disk.backup_fat().lookup(4).unwrap().is_free());
    assert!(matches!(disk.read_file("first"), Err(Fat32Error::NotFound { .. })));

    // tombstone stays in the directory
    assert_eq!(disk.root_directory().len(), 2);
    assert!(disk.root_directory().records()[0].is_deleted());

    let reused = disk.write_file("third", &pattern(10)).unwrap();
    assert_eq!(reused, vec![3]);
    assert_eq!(disk.read_file("second").unwrap(), pattern(100));
    disk.check_consistency().unwrap();
}

#[test]
fn deleted_data_stays_on_the_image() {
    let mut disk = small_disk();
    disk.write_file("secret", b"evidence").unwrap();
    disk.delete_file("secret").unwrap();

    let offset = 65 * 512;
    assert_eq!(&disk.to_image_bytes()[offset..offset + 8], b"evidence");
}

#[test]
fn missing_files_are_not_found() {
    let mut disk = small_disk();
    assert!(matches!(disk.read_file("nope"), Err(Fat32Error::NotFound { .. })));
    assert!(matches!(disk.delete_file("nope"), Err(Fat32Error::NotFound { .. })));
}

#[test]
fn duplicate_and_invalid_names_change_nothing() {
    let mut disk = small_disk();
    disk.write_file("dup", b"1").unwrap();
    let free = disk.main_fat().free_cluster_count();

    let err = disk.write_file("dup", b"2").unwrap_err();
    assert!(matches!(err, Fat32Error::AlreadyExists { .. }));
    let err = disk.write_file("a/b", b"2").unwrap_err();
    assert!(matches!(err, Fat32Error::InvalidFileName { .. }));

    assert_eq!(disk.main_fat().free_cluster_count(), free);
    assert_eq!(disk.read_file("dup").unwrap(), b"1");
}

#[test]
fn file_larger_than_free_space_is_refused() {
    let mut disk = small_disk();
    let before = disk.to_image_bytes().to_vec();

    let err = disk.write_file("big", &vec![1u8; 1984 * 512]).unwrap_err();
    assert!(matches!(err, Fat32Error::NoFreeSpace { required: 1984, available: 1983 }));
    assert!(err.is_recoverable());
    assert_eq!(disk.to_image_bytes(), before.as_slice());
    assert!(!disk.file_exists("big"));

    // exactly the free space fits
    let chain = disk.write_file("fits", &vec![2u8; 1983 * 512]).unwrap();
    assert_eq!(chain.len(), 1983);
    assert_eq!(disk.main_fat().free_cluster_count(), 0);
}

#[test]
fn directory_overflow_rolls_back() {
    let mut disk = small_disk();
    let mut written = 0;
    let err = loop {
        match disk.write_file(&format!("file{:03}", written), b"x") {
            Ok(_) => written += 1,
            Err(err) => break err,
        }
    };
    assert!(matches!(err, Fat32Error::DirectoryOverflow { capacity: 512, .. }));
    assert!(written > 0);
    assert_eq!(disk.list_files().len(), written);
    assert_eq!(disk.main_fat().free_cluster_count(), 1983 - written as u32);
    disk.check_consistency().unwrap();
}

#[test]
fn repeated_write_delete_keeps_directory_usable() {
    let mut disk = small_disk();
    for cycle in 0..12 {
        disk.write_file("f", b"x")
            .unwrap_or_else(|e| panic!("cycle {}: {}", cycle, e));
        assert_eq!(disk.delete_file("f").unwrap(), 1);
    }

    assert!(disk.list_files().is_empty());
    assert_eq!(disk.main_fat().free_cluster_count(), 1983);
    assert!(disk.root_directory().len() < 12);
    assert!(disk.root_directory().records().iter().all(|r| r.is_deleted()));
    disk.check_consistency().unwrap();

    let mut restored = small_disk();
    restored.from_image_bytes(disk.to_image_bytes().to_vec()).unwrap();
    assert_eq!(restored.root_directory(), disk.root_directory());
}

#[test]
fn failed_write_keeps_deleted_records() {
    let mut disk = small_disk();
    disk.write_file("old", b"1").unwrap();
    disk.delete_file("old").unwrap();
    disk.write_file("live", b"2").unwrap();
    let directory = disk.root_directory().clone();
    let image = disk.to_image_bytes().to_vec();

    // one record with this name is larger than the whole directory cluster
    let err = disk.write_file(&"n".repeat(400), b"3").unwrap_err();
    assert!(matches!(err, Fat32Error::DirectoryOverflow { capacity: 512, .. }));
    assert_eq!(disk.root_directory(), &directory);
    assert_eq!(disk.to_image_bytes(), image.as_slice());
    assert_eq!(disk.main_fat().free_cluster_count(), 1982);
}

#[test]
fn slack_space_counts_the_unused_tail() {
    let mut disk = small_disk();
    disk.write_file("a", &pattern(100)).unwrap();
    assert_eq!(disk.slack_space(), 412);

    disk.write_file("b", &pattern(512)).unwrap();
    assert_eq!(disk.slack_space(), 412);

    disk.write_file("c", &pattern(513)).unwrap();
    assert_eq!(disk.slack_space(), 412 + 511);

    disk.delete_file("a").unwrap();
    assert_eq!(disk.slack_space(), 511);
}

#[test]
fn slack_space_with_eight_sector_clusters() {
    let mut disk = VirtualDisk::create("forensics", 300 * MIB).unwrap();
    assert_eq!(disk.geometry().sectors_per_cluster(), 8);

    disk.write_file("small.txt", &pattern(100)).unwrap();
    assert_eq!(disk.slack_space(), 3996);
}

#[test]
fn format_empties_the_volume() {
    let mut disk = small_disk();
    disk.write_file("a", &pattern(2000)).unwrap();
    disk.write_file("b", &pattern(10)).unwrap();

    disk.format().unwrap();
    assert!(disk.list_files().is_empty());
    assert!(disk.root_directory().is_empty());
    assert_eq!(disk.main_fat().free_cluster_count(), 1983);
    assert_eq!(disk.main_fat().get_entry(2).unwrap(), FAT32_EOC_MAX);
    assert_eq!(disk.write_file("c", b"c").unwrap(), vec![3]);
    disk.check_consistency().unwrap();
}

#[test]
fn cluster_listing_reports_occupancy() {
    let mut disk = small_disk();
    disk.write_file("a", &pattern(600)).unwrap();

    let clusters = disk.clusters();
    assert_eq!(clusters.len(), 1984);
    assert_eq!(clusters[0].id, 2);
    assert_eq!(clusters[0].sectors, vec![64]);
    let occupied: Vec<u32> = clusters.iter().filter(|c| c.occupied).map(|c| c.id).collect();
    assert_eq!(occupied, vec![2, 3, 4]);
}

#[test]
fn partial_trailing_cluster_is_not_occupied() {
    // three sectors left over after the last whole 8-sector cluster
    let disk = VirtualDisk::create("partial", 300 * MIB + 3 * 512).unwrap();
    let clusters = disk.clusters();

    let last = clusters.last().unwrap();
    assert_eq!(last.sectors.len(), 3);
    assert!(disk.main_fat().lookup(last.id).unwrap().is_bad());
    assert!(!last.occupied);

    let occupied: Vec<u32> = clusters.iter().filter(|c| c.occupied).map(|c| c.id).collect();
    assert_eq!(occupied, vec![2]);
}

#[test]
fn image_round_trip_restores_state() {
    let mut disk = small_disk();
    disk.write_file_at("keep", &pattern(1500), stamp()).unwrap();
    disk.write_file_at("drop", &pattern(20), stamp()).unwrap();
    disk.delete_file("drop").unwrap();

    let image = disk.to_image_bytes().to_vec();
    let mut restored = small_disk();
    restored.from_image_bytes(image).unwrap();

    assert_eq!(restored.read_file("keep").unwrap(), pattern(1500));
    assert!(!restored.file_exists("drop"));
    assert_eq!(restored.root_directory(), disk.root_directory());
    assert_eq!(restored.main_fat(), disk.main_fat());
    assert_eq!(restored.backup_fat(), disk.backup_fat());
    assert_eq!(restored.slack_space(), disk.slack_space());
    assert_eq!(restored.to_image_bytes(), disk.to_image_bytes());
}

#[test]
fn image_of_the_wrong_size_is_refused() {
    let mut disk = small_disk();
    disk.write_file("a", b"a").unwrap();

    let err = disk.from_image_bytes(vec![0u8; 1000]).unwrap_err();
    assert!(matches!(err, Fat32Error::SizeMismatch { expected, actual: 1000 } if expected == MIB));
    assert!(disk.file_exists("a"));

    let err = disk.from_image_bytes(vec![0u8; MIB as usize]).unwrap_err();
    assert!(matches!(err, Fat32Error::InvalidFat32 { .. }));
    assert!(disk.file_exists("a"));
}

#[test]
fn save_open_and_load_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.img");

    let mut disk = small_disk();
    disk.write_file("report.txt", b"quarterly numbers").unwrap();
    disk.save(&path).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), MIB);

    let opened = VirtualDisk::open(&path).unwrap();
    assert_eq!(opened.name(), "scratch");
    assert_eq!(opened.read_file("report.txt").unwrap(), b"quarterly numbers");
    assert_eq!(opened.boot_sector(), disk.boot_sector());

    let mut other = small_disk();
    other.load(&path).unwrap();
    assert!(other.file_exists("report.txt"));

    let missing = dir.path().join("missing.img");
    assert!(matches!(other.load(&missing), Err(Fat32Error::Io(_))));
}

#[test]
fn tampered_backup_fat_is_detected() {
    let mut disk = small_disk();
    disk.write_file("a", b"a").unwrap();

    // mark cluster 4 used in the backup FAT only
    let mut image = disk.to_image_bytes().to_vec();
    let entry = 48 * 512 + (4 - 2) * 4;
    image[entry..entry + 4].copy_from_slice(&FAT32_EOC_MAX.to_le_bytes());
    disk.from_image_bytes(image).unwrap();

    let err = disk.check_consistency().unwrap_err();
    assert!(err.to_string().contains("cluster 4"), "{}", err);

    let err = disk.write_file("b", b"b").unwrap_err();
    match err {
        Fat32Error::FatDivergence { main, backup } => {
            assert_eq!(main, vec![4]);
            assert_eq!(backup, vec![5]);
        }
        other => panic!("unexpected error: {}", other),
    }
    // both allocations were rolled back
    assert!(disk.main_fat().lookup(4).unwrap().is_free());
    assert!(disk.backup_fat().lookup(5).unwrap().is_free());
    assert!(!disk.file_exists("b"));
}
