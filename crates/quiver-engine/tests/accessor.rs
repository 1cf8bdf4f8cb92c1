//! Integration tests for the transactional accessor API.

use std::time::Duration;

use quiver_common::types::PropertyValue;
use quiver_engine::{Config, IsolationLevel, Storage, StorageMode, View};
use tempfile::{TempDir, tempdir};

fn open_storage(dir: &TempDir) -> Storage {
    // Background jobs stay out of the way; tests drive GC and snapshots
    // explicitly.
    let config = Config::new(dir.path())
        .with_snapshot_interval(Duration::from_secs(3600))
        .with_gc_interval(Duration::from_secs(3600));
    Storage::open(config).unwrap()
}

#[test]
fn create_and_read() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let person = txn.label_id("Person");
    let name = txn.property_id("name");
    let gid = {
        let v = txn.create_vertex();
        v.add_label(person).unwrap();
        v.set_property(name, "Alice".into()).unwrap();
        v.gid()
    };
    txn.commit().unwrap();

    let reader = storage.access();
    let v = reader.find_vertex(gid, View::New).expect("must be visible");
    assert_eq!(v.labels(View::New).unwrap(), vec![person]);
    assert_eq!(
        v.property(name, View::New).unwrap(),
        PropertyValue::from("Alice")
    );
}

#[test]
fn abort_discards_creation() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let gid = txn.create_vertex().gid();
    txn.abort();

    let reader = storage.access();
    assert!(reader.find_vertex(gid, View::New).is_none());
}

#[test]
fn abort_restores_previous_state() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut setup = storage.access();
    let label = setup.label_id("Thing");
    let count = setup.property_id("count");
    let gid = {
        let v = setup.create_vertex();
        v.add_label(label).unwrap();
        v.set_property(count, PropertyValue::Int(1)).unwrap();
        v.gid()
    };
    setup.commit().unwrap();

    let mut txn = storage.access();
    {
        let v = txn.find_vertex(gid, View::New).unwrap();
        v.set_property(count, PropertyValue::Int(99)).unwrap();
        v.remove_label(label).unwrap();
    }
    txn.abort();

    let reader = storage.access();
    let v = reader.find_vertex(gid, View::New).unwrap();
    assert_eq!(
        v.property(count, View::New).unwrap(),
        PropertyValue::Int(1)
    );
    assert_eq!(v.labels(View::New).unwrap(), vec![label]);
}

#[test]
fn concurrent_writers_conflict() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut setup = storage.access();
    let gid = setup.create_vertex().gid();
    setup.commit().unwrap();

    let mut t1 = storage.access();
    let t2 = storage.access();
    let x = t1.property_id("x");

    {
        let v = t1.find_vertex(gid, View::New).unwrap();
        v.set_property(x, PropertyValue::Int(1)).unwrap();
    }
    {
        // The chain head now belongs to t1: t2 must fail and retry.
        let v = t2.find_vertex(gid, View::New).unwrap();
        let err = v.set_property(x, PropertyValue::Int(2)).unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }
    t1.commit().unwrap();

    let reader = storage.access();
    let v = reader.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(x, View::New).unwrap(), PropertyValue::Int(1));
}

#[test]
fn exactly_one_of_two_writers_commits() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut setup = storage.access();
    let gid = setup.create_vertex().gid();
    setup.commit().unwrap();

    let x = storage.access().property_id("x");
    let mut winners = 0;
    let mut losers = 0;
    let t1 = storage.access();
    let t2 = storage.access();
    for t in [&t1, &t2] {
        let v = t.find_vertex(gid, View::New).unwrap();
        match v.set_property(x, PropertyValue::Int(7)) {
            Ok(_) => winners += 1,
            Err(e) => {
                assert_eq!(e.code(), "SERIALIZATION_ERROR");
                losers += 1;
            }
        }
    }
    assert_eq!((winners, losers), (1, 1));
}

#[test]
fn snapshot_isolation_fixes_the_view_at_start() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut setup = storage.access();
    let x = setup.property_id("x");
    let gid = {
        let v = setup.create_vertex();
        v.set_property(x, PropertyValue::Int(1)).unwrap();
        v.gid()
    };
    setup.commit().unwrap();

    // Reader starts now; a later commit must stay invisible.
    let reader = storage.access_with_isolation(IsolationLevel::SnapshotIsolation);

    let mut writer = storage.access();
    {
        let v = writer.find_vertex(gid, View::New).unwrap();
        v.set_property(x, PropertyValue::Int(2)).unwrap();
    }
    writer.commit().unwrap();

    let v = reader.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(x, View::New).unwrap(), PropertyValue::Int(1));

    // A transaction started after the commit sees the new value.
    let late = storage.access();
    let v = late.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(x, View::New).unwrap(), PropertyValue::Int(2));
}

#[test]
fn read_committed_sees_later_commits() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut setup = storage.access();
    let x = setup.property_id("x");
    let gid = {
        let v = setup.create_vertex();
        v.set_property(x, PropertyValue::Int(1)).unwrap();
        v.gid()
    };
    setup.commit().unwrap();

    let reader = storage.access_with_isolation(IsolationLevel::ReadCommitted);
    {
        let v = reader.find_vertex(gid, View::New).unwrap();
        assert_eq!(v.property(x, View::New).unwrap(), PropertyValue::Int(1));
    }

    let mut writer = storage.access();
    {
        let v = writer.find_vertex(gid, View::New).unwrap();
        v.set_property(x, PropertyValue::Int(2)).unwrap();
    }
    writer.commit().unwrap();

    let v = reader.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(x, View::New).unwrap(), PropertyValue::Int(2));
}

#[test]
fn read_uncommitted_sees_dirty_writes() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut setup = storage.access();
    let x = setup.property_id("x");
    let gid = {
        let v = setup.create_vertex();
        v.set_property(x, PropertyValue::Int(1)).unwrap();
        v.gid()
    };
    setup.commit().unwrap();

    let writer = storage.access();
    {
        let v = writer.find_vertex(gid, View::New).unwrap();
        v.set_property(x, PropertyValue::Int(2)).unwrap();
    }

    // Uncommitted write is visible to a dirty reader, invisible to a
    // snapshot reader.
    let dirty = storage.access_with_isolation(IsolationLevel::ReadUncommitted);
    let v = dirty.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(x, View::New).unwrap(), PropertyValue::Int(2));

    let clean = storage.access();
    let v = clean.find_vertex(gid, View::New).unwrap();
    assert_eq!(v.property(x, View::New).unwrap(), PropertyValue::Int(1));
}

#[test]
fn edges_maintain_bidirectional_adjacency() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let knows = txn.edge_type_id("KNOWS");
    let (a, b) = {
        let v1 = txn.create_vertex();
        let v2 = txn.create_vertex();
        txn.create_edge(&v1, &v2, knows).unwrap();
        (v1.gid(), v2.gid())
    };
    txn.commit().unwrap();

    let reader = storage.access();
    let va = reader.find_vertex(a, View::New).unwrap();
    let vb = reader.find_vertex(b, View::New).unwrap();

    let out = va.out_edges(View::New).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].edge_type(), knows);
    assert_eq!(out[0].from_gid(), a);
    assert_eq!(out[0].to_gid(), b);

    let incoming = vb.in_edges(View::New).unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].gid(), out[0].gid());
    assert!(va.in_edges(View::New).unwrap().is_empty());
    assert!(vb.out_edges(View::New).unwrap().is_empty());
}

#[test]
fn delete_vertex_with_edges_fails() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let link = txn.edge_type_id("LINK");
    let a = {
        let v1 = txn.create_vertex();
        let v2 = txn.create_vertex();
        txn.create_edge(&v1, &v2, link).unwrap();
        v1.gid()
    };
    txn.commit().unwrap();

    let t = storage.access();
    let v = t.find_vertex(a, View::New).unwrap();
    let err = t.delete_vertex(&v).unwrap_err();
    assert_eq!(err.code(), "VERTEX_HAS_EDGES");
}

#[test]
fn detach_delete_removes_vertex_and_edges() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let knows = txn.edge_type_id("KNOWS");
    let (a, b) = {
        let v1 = txn.create_vertex();
        let v2 = txn.create_vertex();
        txn.create_edge(&v1, &v2, knows).unwrap();
        (v1.gid(), v2.gid())
    };
    txn.commit().unwrap();

    let mut t = storage.access();
    {
        let v1 = t.find_vertex(a, View::New).unwrap();
        let removed = t.detach_delete_vertex(&v1).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].from_gid(), a);
    }
    t.commit().unwrap();

    let reader = storage.access();
    assert!(reader.find_vertex(a, View::New).is_none());
    let v2 = reader.find_vertex(b, View::New).unwrap();
    assert!(v2.in_edges(View::New).unwrap().is_empty());
}

#[test]
fn detach_delete_handles_self_loops() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let loops = txn.edge_type_id("LOOPS");
    let a = {
        let v = txn.create_vertex();
        txn.create_edge(&v, &v, loops).unwrap();
        v.gid()
    };
    txn.commit().unwrap();

    let mut t = storage.access();
    {
        let v = t.find_vertex(a, View::New).unwrap();
        let removed = t.detach_delete_vertex(&v).unwrap();
        assert_eq!(removed.len(), 1);
    }
    t.commit().unwrap();

    assert!(storage.access().find_vertex(a, View::New).is_none());
}

#[test]
fn vertices_scan_in_gid_order() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    for _ in 0..5 {
        txn.create_vertex();
    }
    txn.commit().unwrap();

    let reader = storage.access();
    let gids: Vec<u64> = reader
        .vertices(View::New)
        .map(|v| v.gid().as_u64())
        .collect();
    assert_eq!(gids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn label_scan_with_and_without_index() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let person = txn.label_id("Person");
    let animal = txn.label_id("Animal");
    for i in 0..6 {
        let v = txn.create_vertex();
        v.add_label(if i % 2 == 0 { person } else { animal })
            .unwrap();
    }
    txn.commit().unwrap();

    // Non-indexed: full scan with a filter.
    let reader = storage.access();
    assert_eq!(reader.vertices_by_label(person, View::New).count(), 3);

    // Indexed: same answer.
    storage.create_label_index("Person").unwrap();
    let reader = storage.access();
    assert_eq!(reader.vertices_by_label(person, View::New).count(), 3);
}

#[test]
fn label_property_scan_filters_by_value() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    storage.create_label_property_index("Person", "age").unwrap();

    let mut txn = storage.access();
    let person = txn.label_id("Person");
    let age = txn.property_id("age");
    for n in [30i64, 40, 30] {
        let v = txn.create_vertex();
        v.add_label(person).unwrap();
        v.set_property(age, PropertyValue::Int(n)).unwrap();
    }
    txn.commit().unwrap();

    let reader = storage.access();
    let thirty = reader
        .vertices_by_label_property(person, age, PropertyValue::Int(30), View::New)
        .count();
    assert_eq!(thirty, 2);
}

#[test]
fn existence_constraint_blocks_commit() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    storage.create_existence_constraint("Person", "name").unwrap();

    let mut txn = storage.access();
    let person = txn.label_id("Person");
    {
        let v = txn.create_vertex();
        v.add_label(person).unwrap();
    }
    let err = txn.commit().unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");

    // The transaction stayed abortable.
    txn.abort();
    assert_eq!(storage.access().vertices(View::New).count(), 0);
}

#[test]
fn unique_constraint_blocks_duplicate_commit() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    storage
        .create_unique_constraint("Person", &["email"])
        .unwrap();

    let mut first = storage.access();
    let person = first.label_id("Person");
    let email = first.property_id("email");
    {
        let v = first.create_vertex();
        v.add_label(person).unwrap();
        v.set_property(email, "a@example.com".into()).unwrap();
    }
    first.commit().unwrap();

    let mut dup = storage.access();
    {
        let v = dup.create_vertex();
        v.add_label(person).unwrap();
        v.set_property(email, "a@example.com".into()).unwrap();
    }
    let err = dup.commit().unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    dup.abort();

    let mut ok = storage.access();
    {
        let v = ok.create_vertex();
        v.add_label(person).unwrap();
        v.set_property(email, "b@example.com".into()).unwrap();
    }
    ok.commit().unwrap();
}

#[test]
fn commit_twice_is_an_error() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    txn.create_vertex();
    txn.commit().unwrap();
    assert_eq!(txn.commit().unwrap_err().code(), "TRANSACTION_NOT_ACTIVE");
}

#[test]
fn edge_properties_roundtrip() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);

    let mut txn = storage.access();
    let knows = txn.edge_type_id("KNOWS");
    let since = txn.property_id("since");
    let (a, _b) = {
        let v1 = txn.create_vertex();
        let v2 = txn.create_vertex();
        let e = txn.create_edge(&v1, &v2, knows).unwrap();
        e.set_property(since, PropertyValue::Int(2020)).unwrap();
        (v1.gid(), v2.gid())
    };
    txn.commit().unwrap();

    let reader = storage.access();
    let v = reader.find_vertex(a, View::New).unwrap();
    let out = v.out_edges(View::New).unwrap();
    assert_eq!(
        out[0].property(since, View::New).unwrap(),
        PropertyValue::Int(2020)
    );
}

#[test]
fn edge_properties_disabled_fails_fast() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path())
        .without_properties_on_edges()
        .with_snapshot_interval(Duration::from_secs(3600))
        .with_gc_interval(Duration::from_secs(3600));
    let storage = Storage::open(config).unwrap();

    let mut txn = storage.access();
    let t = txn.edge_type_id("T");
    let p = txn.property_id("p");
    {
        let v1 = txn.create_vertex();
        let v2 = txn.create_vertex();
        let e = txn.create_edge(&v1, &v2, t).unwrap();
        let err = e.set_property(p, PropertyValue::Int(1)).unwrap_err();
        assert_eq!(err.code(), "PROPERTIES_DISABLED");
    }
    txn.commit().unwrap();
}

#[test]
fn analytical_mode_writes_in_place() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path())
        .with_storage_mode(StorageMode::InMemoryAnalytical)
        .with_snapshot_interval(Duration::from_secs(3600))
        .with_gc_interval(Duration::from_secs(3600));
    let storage = Storage::open(config).unwrap();

    let mut txn = storage.access();
    let label = txn.label_id("Bulk");
    let gid = {
        let v = txn.create_vertex();
        v.add_label(label).unwrap();
        v.gid()
    };
    txn.commit().unwrap();
    assert_eq!(storage.vertex_count(), 1);

    // No version records exist, so there is nothing for the collector.
    let stats = storage.run_gc();
    assert_eq!(stats.reclaimed_transactions, 0);

    // Deletion is immediate and physical.
    let mut txn = storage.access();
    {
        let v = txn.find_vertex(gid, View::New).unwrap();
        txn.delete_vertex(&v).unwrap();
    }
    txn.commit().unwrap();
    assert_eq!(storage.vertex_count(), 0);
    assert!(storage.access().find_vertex(gid, View::New).is_none());
}

#[test]
fn oversized_property_is_rejected() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path())
        .with_snapshot_interval(Duration::from_secs(3600))
        .with_gc_interval(Duration::from_secs(3600))
        .with_max_property_value_bytes(64);
    let storage = Storage::open(config).unwrap();

    let txn = storage.access();
    let p = txn.property_id("blob");
    let v = txn.create_vertex();
    let err = v
        .set_property(p, PropertyValue::from("x".repeat(1000).as_str()))
        .unwrap_err();
    assert_eq!(err.code(), "PROPERTY_VALUE_TOO_LARGE");
}
