use byteorder::{BigEndian, ByteOrder};
use hayloft::{Error, StoreConfig, StoreEngine};
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

const FILE_HEAD_SIZE: u64 = 16;
const INDEX_RECORD_SIZE: u64 = 20;

fn test_config(data: &TempDir, index: &TempDir) -> StoreConfig {
    let mut config = StoreConfig::new(data.path(), index.path());
    // Free-space gating off so tests run on small filesystems.
    config.data_free_mb = 0;
    config.index_free_mb = 0;
    config.stats_refresh = Duration::from_millis(50);
    config
}

// Should get previously stored values, including across a restart.
#[test]
fn get_stored_values() {
    let data = TempDir::new().expect("unable to create temporary working directory");
    let index = TempDir::new().expect("unable to create temporary working directory");
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();

    engine.write(1, b"m1", b"value1").unwrap();
    engine.write(2, b"m2", b"value2").unwrap();

    let one = engine.read(1).unwrap();
    assert_eq!(one.meta, b"m1");
    assert_eq!(one.data, b"value1");
    assert_eq!(engine.read(2).unwrap().data, b"value2");

    // Open from disk again and check persistent data.
    engine.close();
    drop(engine);
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    assert_eq!(engine.read(1).unwrap().data, b"value1");
    assert_eq!(engine.read(2).unwrap().data, b"value2");
}

#[test]
fn duplicate_key_is_rejected() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();

    engine.write(7, b"", b"first").unwrap();
    assert!(matches!(
        engine.write(7, b"", b"second"),
        Err(Error::KeyExists)
    ));
    // Neither cache nor disk moved.
    assert_eq!(engine.read(7).unwrap().data, b"first");
}

#[test]
fn read_non_existent_key() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    assert!(matches!(engine.read(42), Err(Error::NotExists)));
}

#[test]
fn delete_is_idempotent() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();

    engine.write(9, b"", b"gone").unwrap();
    engine.delete(9).unwrap();
    assert!(matches!(engine.read(9), Err(Error::NotExists)));
    engine.delete(9).unwrap();
    assert!(matches!(engine.read(9), Err(Error::NotExists)));

    // The tombstone survives a restart.
    engine.close();
    drop(engine);
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    assert!(matches!(engine.read(9), Err(Error::NotExists)));
    engine.delete(9).unwrap();
}

// One written object, byte-for-byte on-disk expectations.
#[test]
fn on_disk_layout() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();

    engine.write(0xDEAD, b"m", b"hello").unwrap();
    let object = engine.read(0xDEAD).unwrap();
    assert_eq!(object.meta, b"m");
    assert_eq!(object.data, b"hello");
    // head 20 + meta 1 + data 5 + pad 6.
    assert_eq!(object.size, 32);
    engine.close();

    let data_bytes = std::fs::read(data.path().join("vdata-100000000")).unwrap();
    assert_eq!(data_bytes.len() as u64, FILE_HEAD_SIZE + 32);
    assert_eq!(data_bytes.len() % 8, 0);

    let index_bytes = std::fs::read(index.path().join("vindex-100000000")).unwrap();
    assert_eq!(index_bytes.len() as u64, FILE_HEAD_SIZE + INDEX_RECORD_SIZE);
    let record = &index_bytes[FILE_HEAD_SIZE as usize..];
    assert_eq!(BigEndian::read_u64(&record[0..8]), 0xDEAD);
    assert_eq!(BigEndian::read_u64(&record[8..16]), 16);
    assert_eq!(BigEndian::read_u32(&record[16..20]), 32);
}

// Losing the index tail must not lose objects: the data scan rebuilds it.
#[test]
fn restart_rebuilds_truncated_index() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    engine.write(1, b"", b"one").unwrap();
    engine.write(2, b"", b"two").unwrap();
    engine.close();
    drop(engine);

    // As if the process was killed before any index write hit the disk.
    let index_path = index.path().join("vindex-100000000");
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&index_path)
        .unwrap();
    file.set_len(FILE_HEAD_SIZE).unwrap();
    drop(file);

    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    assert_eq!(engine.read(1).unwrap().data, b"one");
    assert_eq!(engine.read(2).unwrap().data, b"two");
    engine.close();

    assert_eq!(
        std::fs::metadata(&index_path).unwrap().len(),
        FILE_HEAD_SIZE + 2 * INDEX_RECORD_SIZE
    );
}

// A torn final append: the data tail is garbage and the index never saw
// the block. Restart keeps everything before the tear.
#[test]
fn restart_truncates_corrupt_data_tail() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    engine.write(1, b"", b"keep").unwrap();
    let first_end = FILE_HEAD_SIZE + engine.read(1).unwrap().size as u64;
    engine.write(2, b"", b"lost").unwrap();
    engine.close();
    drop(engine);

    // Flip the second block's first magic byte and drop its index record.
    let data_path = data.path().join("vdata-100000000");
    let mut bytes = std::fs::read(&data_path).unwrap();
    bytes[first_end as usize] = 0x00;
    std::fs::write(&data_path, &bytes).unwrap();
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(index.path().join("vindex-100000000"))
        .unwrap();
    file.set_len(FILE_HEAD_SIZE + INDEX_RECORD_SIZE).unwrap();
    drop(file);

    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    assert_eq!(engine.read(1).unwrap().data, b"keep");
    assert!(matches!(engine.read(2), Err(Error::NotExists)));
    engine.close();

    assert_eq!(std::fs::metadata(&data_path).unwrap().len(), first_end);
}

#[test]
fn restart_rebuilds_deleted_index_file() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    engine.write(1, b"", b"one").unwrap();
    engine.write(2, b"", b"two").unwrap();
    engine.close();
    drop(engine);

    let index_path = index.path().join("vindex-100000000");
    std::fs::remove_file(&index_path).unwrap();

    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    assert_eq!(engine.read(1).unwrap().data, b"one");
    assert_eq!(engine.read(2).unwrap().data, b"two");
    engine.close();

    assert_eq!(
        std::fs::metadata(&index_path).unwrap().len(),
        FILE_HEAD_SIZE + 2 * INDEX_RECORD_SIZE
    );
}

// A full volume stops taking writes but keeps serving reads and deletes.
#[test]
fn full_volume_rotates() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let mut config = test_config(&data, &index);
    // Every ~32-byte block fills a volume on its own.
    config.max_volume_size = FILE_HEAD_SIZE + 32;
    let engine = StoreEngine::open(config.clone()).unwrap();

    let dir_size = || {
        let entries = WalkDir::new(data.path()).into_iter();
        let len: walkdir::Result<u64> = entries
            .map(|res| {
                res.and_then(|entry| entry.metadata())
                    .map(|metadata| metadata.len())
            })
            .sum();
        len.expect("fail to get directory size")
    };

    engine.write(1, b"", b"first").unwrap();
    let after_first = dir_size();
    engine.write(2, b"", b"second").unwrap();
    assert!(dir_size() > after_first);

    assert!(data.path().join("vdata-100000000").exists());
    assert!(data.path().join("vdata-100000001").exists());

    // The sealed volume still serves reads and deletes.
    assert_eq!(engine.read(1).unwrap().data, b"first");
    engine.delete(1).unwrap();
    assert!(matches!(engine.read(1), Err(Error::NotExists)));

    // Volume ids keep increasing across a restart.
    engine.close();
    drop(engine);
    let engine = StoreEngine::open(config).unwrap();
    engine.write(3, b"", b"third").unwrap();
    assert!(data.path().join("vdata-100000002").exists());
    assert_eq!(engine.read(2).unwrap().data, b"second");
    assert_eq!(engine.read(3).unwrap().data, b"third");
}

// Index record offsets advance monotonically and block sizes are aligned.
#[test]
fn index_records_are_monotonic_and_aligned() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    for key in 0..32u64 {
        let body = vec![b'v'; 1 + (key as usize * 7) % 96];
        engine.write(key, b"meta", &body).unwrap();
    }
    engine.close();

    let bytes = std::fs::read(index.path().join("vindex-100000000")).unwrap();
    let mut last_end = FILE_HEAD_SIZE;
    for record in bytes[FILE_HEAD_SIZE as usize..].chunks(INDEX_RECORD_SIZE as usize) {
        let offset = BigEndian::read_u64(&record[8..16]);
        let size = BigEndian::read_u32(&record[16..20]);
        assert!(offset >= last_end);
        assert_eq!(size % 8, 0);
        last_end = offset + size as u64;
    }
}

#[test]
fn second_engine_is_locked_out() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();

    match StoreEngine::open(test_config(&data, &index)) {
        Err(Error::Locked(holder)) => {
            assert!(holder.starts_with("store data pid="));
            assert!(holder.contains(&std::process::id().to_string()));
        }
        other => panic!("expected Locked, got {:?}", other.map(|_| ())),
    }

    // Closing the first engine releases the directories.
    engine.close();
    drop(engine);
    StoreEngine::open(test_config(&data, &index)).unwrap();
}

#[test]
fn writes_are_gated_on_free_space() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let mut config = test_config(&data, &index);
    config.data_free_mb = u64::MAX;
    let engine = StoreEngine::open(config).unwrap();
    assert!(matches!(
        engine.write(1, b"", b"blocked"),
        Err(Error::DataNoSpace)
    ));
    assert!(matches!(engine.read(1), Err(Error::NotExists)));
}

#[test]
fn stats_report_free_space_and_file_count() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    engine.write(1, b"", b"x").unwrap();
    std::thread::sleep(Duration::from_millis(150));

    let stats = engine.stats();
    assert!(stats.data_free_mb > 0);
    assert!(stats.index_free_mb > 0);
    assert_eq!(stats.counters.file_count, 1);
}

// Ensure that we can conduct random operations and retrieve the correct
// values, as opposed to always setting sequential keys and values.
#[test]
fn randomised_retrieval() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();

    let mut value_tracker = HashMap::new();
    let mut rng = rand::thread_rng();
    for key in 1..=500u64 {
        let value = format!("value{}", rng.gen::<u32>());
        if rng.gen::<usize>() % 3 != 0 {
            engine.write(key, b"", value.as_bytes()).unwrap();
            value_tracker.insert(key, value);
        } else {
            engine.delete(key).unwrap();
        }
    }
    engine.close();
    drop(engine);

    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    for (key, value) in &value_tracker {
        assert_eq!(engine.read(*key).unwrap().data, value.as_bytes());
    }
    assert!(matches!(engine.read(10_000), Err(Error::NotExists)));
}

#[test]
fn closed_engine_rejects_writes() {
    let data = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    let engine = StoreEngine::open(test_config(&data, &index)).unwrap();
    engine.write(1, b"", b"x").unwrap();
    engine.close();
    engine.close();
    assert!(matches!(
        engine.write(2, b"", b"y"),
        Err(Error::VolumeClosed)
    ));
}
