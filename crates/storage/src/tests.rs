use super::*;
use common::StoreConfig;
use serde::Deserialize;
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    id: i64,
    score: i32,
}

impl Record for Sample {
    fn record_len() -> usize {
        12
    }
}

fn sample(id: i64) -> Sample {
    Sample {
        id,
        score: (id % 7) as i32,
    }
}

#[test]
fn new_file_gets_zeroed_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &StoreConfig::default()).unwrap();

    assert_eq!(disk.file_len().unwrap(), 12 * 8);
    for idx in 1..=12 {
        assert_eq!(disk.info(idx).unwrap(), 0);
    }
}

#[test]
fn write_read_update_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &StoreConfig::default()).unwrap();

    let a = disk.write(&sample(1)).unwrap();
    let b = disk.write(&sample(2)).unwrap();
    assert_eq!(b - a, Sample::record_len() as DiskPos);

    assert_eq!(disk.read(a).unwrap(), sample(1));
    assert_eq!(disk.read(b).unwrap(), sample(2));

    disk.update(a, &sample(99)).unwrap();
    assert_eq!(disk.read(a).unwrap(), sample(99));
    assert_eq!(disk.read(b).unwrap(), sample(2));
}

#[test]
fn info_slots_are_bounds_checked() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &StoreConfig::default()).unwrap();

    disk.set_info(1, 42).unwrap();
    assert_eq!(disk.info(1).unwrap(), 42);

    assert!(matches!(disk.info(0), Err(StoreError::Storage(_))));
    assert!(matches!(disk.info(13), Err(StoreError::Storage(_))));
    assert!(matches!(disk.set_info(13, 1), Err(StoreError::Storage(_))));
}

#[test]
fn erased_slots_are_recycled_before_growth() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &StoreConfig::default()).unwrap();

    let a = disk.write(&sample(1)).unwrap();
    let _b = disk.write(&sample(2)).unwrap();
    let len_before = disk.file_len().unwrap();

    disk.erase(a);
    assert_eq!(disk.free_len(), 1);

    let c = disk.write(&sample(3)).unwrap();
    assert_eq!(c, a);
    assert_eq!(disk.file_len().unwrap(), len_before);
    assert_eq!(disk.read(c).unwrap(), sample(3));
}

#[test]
fn reuse_disabled_leaks_freed_slots() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let config = StoreConfig::builder().reuse_freed_pages(false).build();
    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &config).unwrap();

    let a = disk.write(&sample(1)).unwrap();
    disk.erase(a);
    assert_eq!(disk.free_len(), 0);

    let b = disk.write(&sample(2)).unwrap();
    assert_ne!(b, a);
}

#[test]
fn free_list_survives_reopen_inline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");

    let erased = {
        let mut disk: DiskFile<Sample> = DiskFile::open(&path, &StoreConfig::default()).unwrap();
        let a = disk.write(&sample(1)).unwrap();
        let _ = disk.write(&sample(2)).unwrap();
        disk.erase(a);
        a
    };

    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &StoreConfig::default()).unwrap();
    assert_eq!(disk.free_len(), 1);
    assert_eq!(disk.write(&sample(3)).unwrap(), erased);
}

#[test]
fn free_list_overflows_into_side_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    // 4 info slots leave room for 2 inline entries, so 5 freed pages overflow.
    let config = StoreConfig::builder().info_slots(4).build();

    let mut freed = Vec::new();
    {
        let mut disk: DiskFile<Sample> = DiskFile::open(&path, &config).unwrap();
        for i in 0..8 {
            let pos = disk.write(&sample(i)).unwrap();
            if i < 5 {
                freed.push(pos);
            }
        }
        for &pos in &freed {
            disk.erase(pos);
        }
    }
    assert!(dir.path().join("data.dat.free_list.dat").exists());

    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &config).unwrap();
    assert_eq!(disk.free_len(), 5);
    let reused = disk.write(&sample(100)).unwrap();
    assert!(freed.contains(&reused));
}

#[test]
fn clear_truncates_and_resets() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &StoreConfig::default()).unwrap();

    let a = disk.write(&sample(1)).unwrap();
    disk.erase(a);
    disk.set_info(1, 7).unwrap();

    disk.clear().unwrap();
    assert_eq!(disk.file_len().unwrap(), 12 * 8);
    assert_eq!(disk.info(1).unwrap(), 0);
    assert_eq!(disk.free_len(), 0);
}

#[test]
fn oversized_record_is_rejected() {
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tight(i64, i64);
    impl Record for Tight {
        fn record_len() -> usize {
            8
        }
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let mut disk: DiskFile<Tight> = DiskFile::open(&path, &StoreConfig::default()).unwrap();
    assert!(matches!(
        disk.write(&Tight(1, 2)),
        Err(StoreError::Storage(_))
    ));
}

#[test]
fn record_offsets_inside_header_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.dat");
    let mut disk: DiskFile<Sample> = DiskFile::open(&path, &StoreConfig::default()).unwrap();

    assert!(matches!(disk.read(0), Err(StoreError::Storage(_))));
    assert!(matches!(
        disk.update(8, &sample(1)),
        Err(StoreError::Storage(_))
    ));
}
