//! Integration tests for the garbage collector.

use std::time::Duration;

use quiver_common::types::PropertyValue;
use quiver_engine::{Config, Storage, View};
use tempfile::{TempDir, tempdir};

fn open_storage(dir: &TempDir) -> Storage {
    let config = Config::new(dir.path())
        .with_snapshot_interval(Duration::from_secs(3600))
        .with_gc_interval(Duration::from_secs(3600));
    Storage::open(config).unwrap()
}

#[test]
fn exclusive_gc_reclaims_everything_when_idle() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let p = txn.property_id("x");
    let gid = {
        let v = txn.create_vertex();
        v.set_property(p, PropertyValue::Int(1)).unwrap();
        v.gid()
    };
    txn.commit().unwrap();

    let mut txn = storage.access();
    {
        let v = txn.find_vertex(gid, View::New).unwrap();
        v.set_property(p, PropertyValue::Int(2)).unwrap();
    }
    txn.commit().unwrap();

    // Nothing is live, so the fast path runs and reclaims both commits.
    let stats = storage.run_gc();
    assert!(stats.exclusive);
    assert_eq!(stats.reclaimed_transactions, 2);

    // A second cycle finds nothing left.
    let stats = storage.run_gc();
    assert_eq!(stats.reclaimed_transactions, 0);
    assert_eq!(stats.removed_vertices, 0);

    // The data itself is untouched.
    let reader = storage.access();
    let v = reader.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(p, View::New).unwrap(), PropertyValue::Int(2));
}

#[test]
fn deleted_objects_are_physically_removed() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let t = txn.edge_type_id("T");
    let a = {
        let v1 = txn.create_vertex();
        let v2 = txn.create_vertex();
        txn.create_edge(&v1, &v2, t).unwrap();
        v1.gid()
    };
    txn.commit().unwrap();

    let mut txn = storage.access();
    {
        let v1 = txn.find_vertex(a, View::New).unwrap();
        txn.detach_delete_vertex(&v1).unwrap();
    }
    txn.commit().unwrap();

    let stats = storage.run_gc();
    assert!(stats.exclusive);
    assert_eq!(stats.removed_vertices, 1);
    assert_eq!(stats.removed_edges, 1);

    assert!(storage.access().find_vertex(a, View::New).is_none());
}

#[test]
fn cooperative_gc_spares_versions_a_live_reader_needs() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let p = txn.property_id("x");
    let gid = {
        let v = txn.create_vertex();
        v.set_property(p, PropertyValue::Int(1)).unwrap();
        v.gid()
    };
    txn.commit().unwrap();

    // Reader pins the old version.
    let reader = storage.access();

    let mut writer = storage.access();
    {
        let v = writer.find_vertex(gid, View::New).unwrap();
        v.set_property(p, PropertyValue::Int(2)).unwrap();
    }
    writer.commit().unwrap();

    // A live transaction exists: the cycle degrades to cooperative and
    // must not reclaim the overwrite the reader still needs.
    let stats = storage.run_gc();
    assert!(!stats.exclusive);

    let v = reader.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(p, View::New).unwrap(), PropertyValue::Int(1));
    drop(reader);

    // Reader gone: everything is reclaimable.
    let stats = storage.run_gc();
    assert!(stats.exclusive);
    let access = storage.access();
    let v = access.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(p, View::New).unwrap(), PropertyValue::Int(2));
}

#[test]
fn aborted_creation_tombstones_are_swept() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    txn.create_vertex();
    txn.create_vertex();
    txn.abort();

    let stats = storage.run_gc();
    assert_eq!(stats.removed_vertices, 2);
    assert_eq!(storage.access().vertices(View::New).count(), 0);
}

#[test]
fn periodic_gc_runs_without_explicit_trigger() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path())
        .with_snapshot_interval(Duration::from_secs(3600))
        .with_gc_interval(Duration::from_millis(50));
    let storage = Storage::open(config).unwrap();

    let mut txn = storage.access();
    let gid = {
        let v = txn.create_vertex();
        v.gid()
    };
    txn.commit().unwrap();

    let mut txn = storage.access();
    {
        let v = txn.find_vertex(gid, View::New).unwrap();
        txn.delete_vertex(&v).unwrap();
    }
    txn.commit().unwrap();

    // Give the background collector a few ticks.
    std::thread::sleep(Duration::from_secs(1));

    let stats = storage.run_gc();
    assert_eq!(stats.reclaimed_transactions, 0);
    assert_eq!(stats.removed_vertices, 0);
}
