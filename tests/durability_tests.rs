// Durability Tests for mdbx-lua
// Reopen persistence, torn commit recovery and corruption detection

use mdbx_lua::engine::codes;
use mdbx_lua::{EnvFlags, EnvOptions, Environment, Error, TableFlags, TxnFlags, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

const MAGIC_LEN: usize = 8;
const HEADER_LEN: usize = 8;

fn open(path: &Path) -> Environment {
    Environment::open(path, EnvOptions::default()).unwrap()
}

/// Test that committed data survives close and reopen
#[test]
fn test_reopen_keeps_commits() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");

    {
        let env = open(&path);
        env.set("text", &Value::from("kept")).unwrap();
        env.set("number", &Value::from(42)).unwrap();

        let mut txn = env.begin(TxnFlags::READWRITE).unwrap();
        let users = txn.open_table(Some("users"), TableFlags::CREATE | TableFlags::REVERSEKEY).unwrap();
        users.put(&mut txn, b"alice", &Value::from(true)).unwrap();
        txn.commit().unwrap();

        // Never committed.
        let mut txn = env.begin(TxnFlags::READWRITE).unwrap();
        let main = txn.open_table(None, TableFlags::empty()).unwrap();
        main.put(&mut txn, b"lost", &Value::from(1)).unwrap();
        txn.abort().unwrap();
        env.close();
    }

    let env = open(&path);
    assert_eq!(env.get_one("text").unwrap(), Some(Value::from("kept")));
    assert_eq!(env.get_one("number").unwrap(), Some(Value::from(42)));
    assert_eq!(env.get_one("lost").unwrap(), None);

    let mut reader = env.begin_read().unwrap();
    let users = reader.open_table(Some("users"), TableFlags::empty()).unwrap_err();
    assert_eq!(users.engine_code(), Some(codes::INCOMPATIBLE), "stored flags survive reopen");
    let users = reader.open_table(Some("users"), TableFlags::REVERSEKEY).unwrap();
    assert_eq!(users.get(&reader, b"alice").unwrap().into_value(), Some(Value::Boolean(true)));
}

/// Test that deletes are replayed too
#[test]
fn test_reopen_replays_deletes() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");

    {
        let env = open(&path);
        env.set("gone", &Value::from(1)).unwrap();
        let mut txn = env.begin(TxnFlags::READWRITE).unwrap();
        let main = txn.open_table(None, TableFlags::empty()).unwrap();
        main.delete(&mut txn, b"gone").unwrap();
        txn.commit().unwrap();
        env.close();
    }

    let env = open(&path);
    assert_eq!(env.get_one("gone").unwrap(), None);
}

/// Test that a commit cut short at the end of the file is dropped
#[test]
fn test_torn_tail_is_truncated() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");

    {
        let env = open(&path);
        env.set("a", &Value::from("committed")).unwrap();
        env.close();
    }
    let intact = std::fs::metadata(&path).unwrap().len();

    // A partial record header from an interrupted commit.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xde, 0xad, 0xbe]).unwrap();
    drop(file);

    let env = open(&path);
    assert_eq!(env.get_one("a").unwrap(), Some(Value::from("committed")));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);

    // The file accepts new commits after recovery.
    env.set("b", &Value::from(2)).unwrap();
    env.close();
    let env = open(&path);
    assert_eq!(env.get_one("b").unwrap(), Some(Value::from(2)));
}

/// Test that a read-only open tolerates a torn tail without repairing it
#[test]
fn test_read_only_open_leaves_torn_tail() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");

    {
        let env = open(&path);
        env.set("a", &Value::from(1)).unwrap();
        env.close();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);
    let torn = std::fs::metadata(&path).unwrap().len();

    let env = Environment::open(&path, EnvOptions::default().flags(EnvFlags::NOSUBDIR | EnvFlags::RDONLY)).unwrap();
    assert_eq!(env.get_one("a").unwrap(), Some(Value::from(1)));
    assert!(env.begin(TxnFlags::READWRITE).is_err());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), torn);
}

/// Test that a file without the expected header is refused
#[test]
fn test_bad_magic() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("foreign.mdbx");
    std::fs::write(&path, b"definitely not a data file").unwrap();

    let err = Environment::open(&path, EnvOptions::default()).unwrap_err();
    assert!(matches!(err, Error::OpenFailed(_)));
    assert_eq!(err.engine_code(), Some(codes::INVALID));

    // The failed open released everything: a valid file at another path opens.
    open(&dir.path().join("fresh.mdbx"));
}

/// Test that a damaged record before the tail is reported as corruption
#[test]
fn test_mid_file_corruption() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");

    {
        let env = open(&path);
        env.set("first", &Value::from(1)).unwrap();
        env.set("second", &Value::from(2)).unwrap();
        env.close();
    }

    // Flip a payload byte of the first commit record.
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[MAGIC_LEN + HEADER_LEN] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let err = Environment::open(&path, EnvOptions::default()).unwrap_err();
    assert!(matches!(err, Error::OpenFailed(_)));
    assert_eq!(err.engine_code(), Some(codes::CORRUPTED));
    assert!(err.to_string().contains("checksum mismatch"));
}

/// Test that sync flushes commits made without per-commit fsync
#[test]
fn test_sync_after_nosync_commits() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");
    let options = EnvOptions::default().flags(EnvFlags::NOSUBDIR | EnvFlags::SAFE_NOSYNC);

    {
        let env = Environment::open(&path, options.clone()).unwrap();
        for i in 0..10 {
            env.set(format!("key{}", i), &Value::from(i)).unwrap();
        }
        env.sync(true).unwrap();
        env.close();
    }

    let env = Environment::open(&path, options).unwrap();
    for i in 0..10 {
        assert_eq!(env.get_one(format!("key{}", i)).unwrap(), Some(Value::from(i)));
    }
}

/// Test that compaction rewrites the file and keeps every live entry
#[test]
fn test_compact_then_reopen() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");
    let options = EnvOptions::default().flags(EnvFlags::NOSUBDIR | EnvFlags::SAFE_NOSYNC);

    {
        let env = Environment::open(&path, options.clone()).unwrap();
        let mut txn = env.begin(TxnFlags::READWRITE).unwrap();
        let users = txn.open_table(Some("users"), TableFlags::CREATE | TableFlags::REVERSEKEY).unwrap();
        users.put(&mut txn, b"alice", &Value::from("admin")).unwrap();
        txn.commit().unwrap();

        for i in 0..5000 {
            env.set("counter", &Value::from(i)).unwrap();
        }
        env.set("gone", &Value::from(true)).unwrap();
        let mut txn = env.begin(TxnFlags::READWRITE).unwrap();
        let main = txn.open_table(None, TableFlags::empty()).unwrap();
        main.delete(&mut txn, b"gone").unwrap();
        txn.commit().unwrap();

        let before = env.info().unwrap();
        env.compact().unwrap();
        let after = env.info().unwrap();
        assert!(after.data_size < before.data_size / 10);
        assert_eq!(after.last_txn_id, before.last_txn_id);
        env.close();
    }

    let env = open(&path);
    assert_eq!(env.info().unwrap().last_txn_id, 5003);
    assert_eq!(env.get_one("counter").unwrap(), Some(Value::from(4999)));
    assert_eq!(env.get_one("gone").unwrap(), None);
    let mut reader = env.begin_read().unwrap();
    let users = reader.open_table(Some("users"), TableFlags::REVERSEKEY).unwrap();
    assert_eq!(users.get(&reader, b"alice").unwrap().into_value(), Some(Value::from("admin")));
}

/// Test that a growing log of overwrites is compacted without being asked
#[test]
fn test_overwrites_compact_automatically() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");
    let env = Environment::open(&path, EnvOptions::default().flags(EnvFlags::NOSUBDIR | EnvFlags::SAFE_NOSYNC)).unwrap();

    let blob = "x".repeat(8 * 1024);
    for i in 0..300 {
        env.set("blob", &Value::from(format!("{}{}", i, blob))).unwrap();
    }
    let size = std::fs::metadata(&path).unwrap().len();
    assert!(size < 1_200_000, "data file grew to {} bytes", size);
    assert_eq!(env.info().unwrap().data_size, size);
    env.close();

    let env = open(&path);
    assert_eq!(env.get_one("blob").unwrap(), Some(Value::from(format!("299{}", blob))));
    assert_eq!(env.info().unwrap().last_txn_id, 300);
}

/// Test that a read-only environment refuses to compact
#[test]
fn test_compact_read_only() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.mdbx");
    open(&path).close();

    let env = Environment::open(&path, EnvOptions::default().flags(EnvFlags::NOSUBDIR | EnvFlags::RDONLY)).unwrap();
    let err = env.compact().unwrap_err();
    assert!(matches!(err, Error::CompactFailed(_)));
    assert_eq!(err.engine_code(), Some(codes::EACCES));
}
