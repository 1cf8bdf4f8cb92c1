//! Integration tests for snapshots, the WAL, and recovery.

use std::time::Duration;

use quiver_common::types::{Gid, PropertyValue};
use quiver_engine::durability::snapshot;
use quiver_engine::{Config, Storage, View};
use tempfile::{TempDir, tempdir};

fn quiet_config(dir: &TempDir) -> Config {
    Config::new(dir.path())
        .with_snapshot_interval(Duration::from_secs(3600))
        .with_gc_interval(Duration::from_secs(3600))
        .with_wal_flush_every(64)
}

fn snapshot_files(config: &Config) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(config.snapshots_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "snapshot"))
        .collect();
    files.sort();
    files
}

#[test]
fn empty_database_snapshot_cycle() {
    let dir = tempdir().unwrap();
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        storage.create_snapshot().unwrap();
    }
    let storage = Storage::open(quiet_config(&dir)).unwrap();
    assert_eq!(storage.vertex_count(), 0);
    assert_eq!(storage.edge_count(), 0);

    // Counters start at 1 even after an empty recovery cycle.
    let txn = storage.access();
    assert_eq!(txn.create_vertex().gid(), Gid::new(1));
}

#[test]
fn crash_recovery_replays_wal_after_snapshot() {
    let dir = tempdir().unwrap();
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();

        let mut txn = storage.access();
        for _ in 0..1000 {
            txn.create_vertex();
        }
        txn.commit().unwrap();

        storage.create_snapshot().unwrap();

        let mut txn = storage.access();
        for _ in 0..500 {
            txn.create_vertex();
        }
        txn.commit().unwrap();
    }

    let storage = Storage::open(quiet_config(&dir)).unwrap();
    assert_eq!(storage.vertex_count(), 1500);

    let reader = storage.access();
    assert!(reader.find_vertex(Gid::new(1), View::New).is_some());
    assert!(reader.find_vertex(Gid::new(1000), View::New).is_some());
    assert!(reader.find_vertex(Gid::new(1500), View::New).is_some());
    assert!(reader.find_vertex(Gid::new(1501), View::New).is_none());

    // The GID counter continues past everything recovered.
    assert_eq!(reader.create_vertex().gid(), Gid::new(1501));
}

#[test]
fn recovery_restores_labels_properties_and_edges() {
    let dir = tempdir().unwrap();
    let (a, b);
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        let mut txn = storage.access();
        let person = txn.label_id("Person");
        let name = txn.property_id("name");
        let knows = txn.edge_type_id("KNOWS");
        let since = txn.property_id("since");
        let pair = {
            let v1 = txn.create_vertex();
            v1.add_label(person).unwrap();
            v1.set_property(name, "Alice".into()).unwrap();
            let v2 = txn.create_vertex();
            v2.add_label(person).unwrap();
            v2.set_property(name, "Bob".into()).unwrap();
            let e = txn.create_edge(&v1, &v2, knows).unwrap();
            e.set_property(since, PropertyValue::Int(2020)).unwrap();
            (v1.gid(), v2.gid())
        };
        txn.commit().unwrap();
        (a, b) = pair;
    }

    let storage = Storage::open(quiet_config(&dir)).unwrap();
    let reader = storage.access();
    let person = reader.label_id("Person");
    let name = reader.property_id("name");
    let since = reader.property_id("since");

    let va = reader.find_vertex(a, View::New).unwrap();
    assert_eq!(va.labels(View::New).unwrap(), vec![person]);
    assert_eq!(
        va.property(name, View::New).unwrap(),
        PropertyValue::from("Alice")
    );

    let out = va.out_edges(View::New).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to_gid(), b);
    assert_eq!(
        out[0].property(since, View::New).unwrap(),
        PropertyValue::Int(2020)
    );
}

#[test]
fn recovery_replays_deletions() {
    let dir = tempdir().unwrap();
    let (a, b);
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        let mut txn = storage.access();
        let t = txn.edge_type_id("T");
        let pair = {
            let v1 = txn.create_vertex();
            let v2 = txn.create_vertex();
            txn.create_edge(&v1, &v2, t).unwrap();
            (v1.gid(), v2.gid())
        };
        txn.commit().unwrap();
        (a, b) = pair;

        let mut txn = storage.access();
        {
            let v1 = txn.find_vertex(a, View::New).unwrap();
            txn.detach_delete_vertex(&v1).unwrap();
        }
        txn.commit().unwrap();
    }

    let storage = Storage::open(quiet_config(&dir)).unwrap();
    let reader = storage.access();
    assert!(reader.find_vertex(a, View::New).is_none());
    let v2 = reader.find_vertex(b, View::New).unwrap();
    assert!(v2.in_edges(View::New).unwrap().is_empty());
    assert_eq!(storage.vertex_count(), 1);
    assert_eq!(storage.edge_count(), 0);
}

#[test]
fn recovery_is_idempotent() {
    let dir = tempdir().unwrap();
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        let mut txn = storage.access();
        let label = txn.label_id("Node");
        let n = txn.property_id("n");
        for i in 0..50 {
            let v = txn.create_vertex();
            v.add_label(label).unwrap();
            v.set_property(n, PropertyValue::Int(i)).unwrap();
        }
        txn.commit().unwrap();
        storage.create_snapshot().unwrap();
    }

    let counts = |storage: &Storage| {
        let reader = storage.access();
        let label = reader.label_id("Node");
        (
            storage.vertex_count(),
            reader.vertices_by_label(label, View::New).count(),
        )
    };

    let first = {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        counts(&storage)
    };
    let second = {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        counts(&storage)
    };
    assert_eq!(first, second);
    assert_eq!(first, (50, 50));
}

#[test]
fn snapshot_roundtrip_is_deterministic_over_data_sections() {
    let dir = tempdir().unwrap();
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        let mut txn = storage.access();
        let person = txn.label_id("Person");
        let name = txn.property_id("name");
        let knows = txn.edge_type_id("KNOWS");
        {
            let v1 = txn.create_vertex();
            v1.add_label(person).unwrap();
            v1.set_property(name, "Alice".into()).unwrap();
            let v2 = txn.create_vertex();
            v2.add_label(person).unwrap();
            v2.set_property(name, "Bob".into()).unwrap();
            txn.create_edge(&v1, &v2, knows).unwrap();
        }
        txn.commit().unwrap();
        storage.create_snapshot().unwrap();
    }

    let config = quiet_config(&dir);
    let first = snapshot_files(&config);
    assert_eq!(first.len(), 1);
    let bytes_a = std::fs::read(&first[0]).unwrap();

    // Load into a fresh engine (same directory) and snapshot again.
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        storage.create_snapshot().unwrap();
    }
    let files = snapshot_files(&config);
    assert_eq!(files.len(), 2);
    let bytes_b = std::fs::read(files.last().unwrap()).unwrap();

    // The data sections (everything between the offset table and the
    // epoch history) must agree byte for byte; timestamps, uuid, and
    // epochs live in the later sections.
    let info_a = snapshot::read_info(&bytes_a).unwrap();
    let info_b = snapshot::read_info(&bytes_b).unwrap();
    let start_a = info_a.offset_edges.min(info_a.offset_vertices) as usize;
    let start_b = info_b.offset_edges.min(info_b.offset_vertices) as usize;
    assert_eq!(
        &bytes_a[start_a..info_a.offset_epoch_history as usize],
        &bytes_b[start_b..info_b.offset_epoch_history as usize],
    );
    assert_eq!(info_a.vertices_count, info_b.vertices_count);
    assert_eq!(info_a.edges_count, info_b.edges_count);
}

#[test]
fn retention_keeps_configured_snapshot_count() {
    let dir = tempdir().unwrap();
    let config = quiet_config(&dir).with_snapshot_retention(2);
    let storage = Storage::open(config.clone()).unwrap();

    for i in 0..4 {
        let mut txn = storage.access();
        let p = txn.property_id("i");
        {
            let v = txn.create_vertex();
            v.set_property(p, PropertyValue::Int(i)).unwrap();
        }
        txn.commit().unwrap();
        storage.create_snapshot().unwrap();
    }

    assert_eq!(snapshot_files(&config).len(), 2);
}

#[test]
fn recovery_skips_corrupt_snapshot_with_older_valid_one() {
    let dir = tempdir().unwrap();
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        let mut txn = storage.access();
        txn.create_vertex();
        txn.commit().unwrap();
        storage.create_snapshot().unwrap();

        let mut txn = storage.access();
        txn.create_vertex();
        txn.commit().unwrap();
        storage.create_snapshot().unwrap();
    }

    // Corrupt the newest snapshot; recovery must fall back to the older
    // one and then replay the WAL past it.
    let config = quiet_config(&dir);
    let files = snapshot_files(&config);
    assert_eq!(files.len(), 2);
    let newest = files.last().unwrap();
    let mut bytes = std::fs::read(newest).unwrap();
    let mid = bytes.len() / 2;
    bytes.truncate(mid);
    std::fs::write(newest, &bytes).unwrap();

    let storage = Storage::open(config).unwrap();
    assert_eq!(storage.vertex_count(), 2);
}

#[test]
fn max_length_string_property_roundtrips() {
    let dir = tempdir().unwrap();
    let big = "x".repeat(1024 * 1024);
    let gid;
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        let mut txn = storage.access();
        let p = txn.property_id("blob");
        gid = {
            let v = txn.create_vertex();
            v.set_property(p, PropertyValue::from(big.as_str())).unwrap();
            v.gid()
        };
        txn.commit().unwrap();
        storage.create_snapshot().unwrap();
    }

    let storage = Storage::open(quiet_config(&dir)).unwrap();
    let reader = storage.access();
    let p = reader.property_id("blob");
    let v = reader.find_vertex(gid, View::New).unwrap();
    assert_eq!(
        v.property(p, View::New).unwrap(),
        PropertyValue::from(big.as_str())
    );
}

#[test]
fn edge_property_snapshot_rejected_without_properties_on_edges() {
    let dir = tempdir().unwrap();
    {
        let storage = Storage::open(quiet_config(&dir)).unwrap();
        let mut txn = storage.access();
        let t = txn.edge_type_id("T");
        let w = txn.property_id("w");
        {
            let v1 = txn.create_vertex();
            let v2 = txn.create_vertex();
            let e = txn.create_edge(&v1, &v2, t).unwrap();
            e.set_property(w, PropertyValue::Int(1)).unwrap();
        }
        txn.commit().unwrap();
        storage.create_snapshot().unwrap();
        // Leave only the snapshot behind so recovery exercises it.
        for entry in std::fs::read_dir(quiet_config(&dir).wal_dir()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
    }

    let config = quiet_config(&dir).without_properties_on_edges();
    let err = Storage::open(config).unwrap_err();
    assert_eq!(err.code(), "RECOVERY_FAILURE");
}

#[test]
fn snapshot_without_edge_section_loads_into_properties_on_mode() {
    let dir = tempdir().unwrap();
    let (a, b);
    {
        let config = quiet_config(&dir).without_properties_on_edges();
        let storage = Storage::open(config).unwrap();
        let mut txn = storage.access();
        let t = txn.edge_type_id("T");
        let pair = {
            let v1 = txn.create_vertex();
            let v2 = txn.create_vertex();
            txn.create_edge(&v1, &v2, t).unwrap();
            (v1.gid(), v2.gid())
        };
        txn.commit().unwrap();
        (a, b) = pair;
        storage.create_snapshot().unwrap();
        for entry in std::fs::read_dir(quiet_config(&dir).wal_dir()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
    }

    // Properties on: the edge records are materialized from adjacency.
    let storage = Storage::open(quiet_config(&dir)).unwrap();
    let reader = storage.access();
    let va = reader.find_vertex(a, View::New).unwrap();
    let out = va.out_edges(View::New).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].to_gid(), b);
    assert!(out[0].properties(View::New).unwrap().is_empty());
}

#[test]
fn wal_retention_preserves_boundary_file() {
    let dir = tempdir().unwrap();
    let config = quiet_config(&dir)
        .with_snapshot_retention(1)
        .with_wal_file_size(4096);
    let storage = Storage::open(config.clone()).unwrap();

    // Fat commits force WAL rotation, snapshots trigger retention.
    let blob = "y".repeat(2000);
    for _ in 0..3 {
        let mut txn = storage.access();
        let p = txn.property_id("blob");
        {
            let v = txn.create_vertex();
            v.set_property(p, PropertyValue::from(blob.as_str())).unwrap();
        }
        txn.commit().unwrap();
        storage.create_snapshot().unwrap();
    }

    // At least one finalized WAL file must survive to cover the span up
    // to the kept snapshot.
    let wal_files: Vec<_> = std::fs::read_dir(config.wal_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
        .collect();
    assert!(!wal_files.is_empty());

    drop(storage);
    let storage = Storage::open(config).unwrap();
    assert_eq!(storage.vertex_count(), 3);
}
