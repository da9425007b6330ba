use std::fs;
use std::path::Path;

use larder::{JsonCodec, LarderError, OpenMode, Result, Store, StoreOptions};
use serde::{Deserialize, Serialize};
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    id: u64,
    value: i64,
    station: String,
}

fn reading(id: u64, value: i64, station: &str) -> Reading {
    Reading {
        id,
        value,
        station: station.to_string(),
    }
}

fn open_store(dir: &Path, mode: OpenMode) -> Result<Store<u64, Reading>> {
    Store::open(dir, "readings", JsonCodec, |r: &Reading| r.id, mode)
}

#[test]
fn create_fails_when_store_exists() -> Result<()> {
    let dir = tempdir()?;
    open_store(dir.path(), OpenMode::Create)?.close()?;
    let err = open_store(dir.path(), OpenMode::Create).unwrap_err();
    assert!(matches!(err, LarderError::AlreadyExists(_)));
    Ok(())
}

#[test]
fn open_fails_when_store_missing() {
    let dir = tempdir().unwrap();
    let err = open_store(dir.path(), OpenMode::Open).unwrap_err();
    assert!(matches!(err, LarderError::NotFound(_)));
}

#[test]
fn overwrite_resets_existing_store() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.insert(&reading(1, 10, "north"))?;
    store.close()?;

    let store = open_store(dir.path(), OpenMode::Overwrite)?;
    assert!(store.is_empty(), "overwrite must discard previous records");
    store.close()?;
    Ok(())
}

#[test]
fn open_or_create_rejects_half_missing_pair() -> Result<()> {
    let dir = tempdir()?;
    open_store(dir.path(), OpenMode::Create)?.close()?;
    fs::remove_file(dir.path().join("readings.db"))?;
    let err = open_store(dir.path(), OpenMode::OpenOrCreate).unwrap_err();
    assert!(matches!(err, LarderError::Corruption(_)));
    Ok(())
}

#[test]
fn insert_then_read_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    let record = reading(42, -7, "east");
    store.insert(&record)?;
    assert_eq!(store.read(&42)?, record);
    assert_eq!(store.len(), 1);
    store.close()?;
    Ok(())
}

#[test]
fn read_missing_key_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let store = open_store(dir.path(), OpenMode::Create)?;
    assert!(matches!(store.read(&1), Err(LarderError::NotFound(_))));
    store.close()?;
    Ok(())
}

#[test]
fn duplicate_insert_rejected_in_same_session() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.insert(&reading(5, 1, "west"))?;
    let err = store.insert(&reading(5, 2, "west")).unwrap_err();
    assert!(matches!(err, LarderError::DuplicateKey(_)));
    // The original record is untouched.
    assert_eq!(store.read(&5)?.value, 1);
    store.close()?;
    Ok(())
}

#[test]
fn read_many_yields_input_order() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    for id in 1..=5 {
        store.insert(&reading(id, id as i64 * 10, "south"))?;
    }
    let values: Vec<i64> = store
        .read_many(vec![4, 2, 2, 1])
        .map(|r| r.map(|rec| rec.value))
        .collect::<Result<_>>()?;
    assert_eq!(values, vec![40, 20, 20, 10]);

    // A missing key fails in place without poisoning the rest.
    let results: Vec<Result<Reading>> = store.read_many(vec![3, 99, 5]).collect();
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(LarderError::NotFound(_))));
    assert!(results[2].is_ok());
    store.close()?;
    Ok(())
}

#[test]
fn update_replaces_record_and_orphans_old_bytes() -> Result<()> {
    let dir = tempdir()?;
    let data_path = dir.path().join("readings.db");
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.insert(&reading(9, 100, "north"))?;
    let len_after_insert = fs::metadata(&data_path)?.len();

    store.update(&reading(9, 200, "north"))?;
    assert_eq!(store.read(&9)?.value, 200);
    assert_eq!(store.len(), 1, "update must not duplicate the key");

    // The new frame is appended; the old frame's bytes stay behind.
    let len_after_update = fs::metadata(&data_path)?.len();
    assert!(len_after_update > len_after_insert);
    store.close()?;
    Ok(())
}

#[test]
fn update_missing_key_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    let err = store.update(&reading(1, 0, "x")).unwrap_err();
    assert!(matches!(err, LarderError::NotFound(_)));
    store.close()?;
    Ok(())
}

#[test]
fn delete_then_reinsert_same_key() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.insert(&reading(7, 1, "a"))?;
    store.delete(&7)?;
    assert!(matches!(store.read(&7), Err(LarderError::NotFound(_))));
    store.insert(&reading(7, 2, "b"))?;
    assert_eq!(store.read(&7)?.value, 2);
    store.close()?;
    Ok(())
}

#[test]
fn secondary_indexes_stay_consistent_with_mutations() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.insert(&reading(1, 10, "north"))?;
    store.insert(&reading(2, 20, "north"))?;
    store.insert(&reading(3, 30, "south"))?;

    store.create_index("by_station", |r: &Reading| r.station.clone(), false)?;
    store.create_index("by_value", |r: &Reading| r.value, true)?;

    let north = store.query_index("by_station", &"north".to_string())?;
    assert_eq!(north.len(), 2);
    assert_eq!(
        store.query_index("by_value", &20i64)?,
        vec![reading(2, 20, "north")]
    );

    // Records inserted after index creation are picked up too.
    store.insert(&reading(4, 40, "north"))?;
    assert_eq!(store.query_index("by_station", &"north".to_string())?.len(), 3);

    // Deletion unlinks from every index.
    store.delete(&2)?;
    assert_eq!(store.query_index("by_station", &"north".to_string())?.len(), 2);
    assert!(matches!(
        store.query_index("by_value", &20i64),
        Err(LarderError::NotFound(_))
    ));

    // Non-unique bucket for an unknown key is empty, not an error.
    assert!(store
        .query_index("by_station", &"nowhere".to_string())?
        .is_empty());
    store.close()?;
    Ok(())
}

#[test]
fn create_index_rejects_duplicate_name() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.create_index("by_value", |r: &Reading| r.value, true)?;
    let err = store
        .create_index("by_value", |r: &Reading| r.value, false)
        .unwrap_err();
    assert!(matches!(err, LarderError::AlreadyExists(_)));
    store.close()?;
    Ok(())
}

#[test]
fn unique_index_build_fails_on_collision_and_stays_unregistered() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.insert(&reading(1, 5, "north"))?;
    store.insert(&reading(2, 5, "south"))?;

    let err = store
        .create_index("by_value", |r: &Reading| r.value, true)
        .unwrap_err();
    assert!(matches!(err, LarderError::DuplicateKey(_)));
    assert!(matches!(
        store.query_index("by_value", &5i64),
        Err(LarderError::NotFound(_))
    ));
    store.close()?;
    Ok(())
}

#[test]
fn query_unknown_index_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let store = open_store(dir.path(), OpenMode::Create)?;
    assert!(matches!(
        store.query_index("nope", &0i64),
        Err(LarderError::NotFound(_))
    ));
    store.close()?;
    Ok(())
}

#[test]
fn secondary_indexes_do_not_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.insert(&reading(1, 10, "north"))?;
    store.create_index("by_value", |r: &Reading| r.value, true)?;
    store.close()?;

    let store = open_store(dir.path(), OpenMode::Open)?;
    assert!(matches!(
        store.query_index("by_value", &10i64),
        Err(LarderError::NotFound(_))
    ));
    store.close()?;
    Ok(())
}

#[test]
fn reopen_recovers_all_written_keys() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    for id in 0..25 {
        store.insert(&reading(id, id as i64, "ring"))?;
    }
    store.close()?;

    let store = open_store(dir.path(), OpenMode::Open)?;
    let mut keys: Vec<u64> = store.keys().copied().collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..25).collect::<Vec<u64>>());
    store.close()?;
    Ok(())
}

#[test]
fn cursor_recovery_allows_appending_across_sessions() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::Create)?;
    store.insert(&reading(1, 10, "a"))?;
    store.insert(&reading(2, 20, "bb"))?;
    store.close()?;

    let mut store = open_store(dir.path(), OpenMode::Open)?;
    store.insert(&reading(3, 30, "ccc"))?;
    store.close()?;

    let store = open_store(dir.path(), OpenMode::Open)?;
    assert_eq!(store.len(), 3);
    for (id, value) in [(1u64, 10i64), (2, 20), (3, 30)] {
        assert_eq!(store.read(&id)?.value, value);
    }
    store.close()?;
    Ok(())
}

#[test]
fn truncated_index_file_is_corruption() -> Result<()> {
    let dir = tempdir()?;
    open_store(dir.path(), OpenMode::Create)?.close()?;
    let index_path = dir.path().join("readings.idx");
    let file = fs::OpenOptions::new().write(true).open(&index_path)?;
    file.set_len(2)?;
    drop(file);

    let err = open_store(dir.path(), OpenMode::Open).unwrap_err();
    assert!(matches!(err, LarderError::Corruption(_)));
    Ok(())
}

#[test]
fn free_space_tree_is_session_scoped_and_caller_driven() -> Result<()> {
    let dir = tempdir()?;
    let options = StoreOptions::new().free_space_blocks(128);
    let mut store: Store<u64, Reading> = Store::open_with(
        dir.path(),
        "readings",
        JsonCodec,
        |r: &Reading| r.id,
        OpenMode::Create,
        options.clone(),
    )?;

    let tree = store.free_space().expect("free tree was configured");
    assert_eq!(tree.capacity(), 128);
    let offset = tree.allocate(16).expect("fresh tree satisfies 16 blocks");
    assert_eq!(tree.free_blocks(), 112);

    // Record traffic does not touch the tree: placement is append-only.
    store.insert(&reading(1, 1, "x"))?;
    assert_eq!(store.free_space().unwrap().free_blocks(), 112);
    store.free_space().unwrap().free(offset, 16)?;
    store.close()?;

    // The tree is never persisted; a new session starts from all-free.
    let mut store: Store<u64, Reading> = Store::open_with(
        dir.path(),
        "readings",
        JsonCodec,
        |r: &Reading| r.id,
        OpenMode::Open,
        options,
    )?;
    assert_eq!(store.free_space().unwrap().free_blocks(), 128);
    store.close()?;
    Ok(())
}

#[test]
fn scenario_hundred_keys_reopen() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path(), OpenMode::OpenOrCreate)?;
    for key in 1..=100u64 {
        store.insert(&reading(key, 17 + key as i64, "grid"))?;
    }
    store.close()?;

    let store = open_store(dir.path(), OpenMode::Open)?;
    assert_eq!(store.read(&1)?.value, 18);
    assert_eq!(store.keys().count(), 100);
    store.close()?;
    Ok(())
}
