//! Integration tests for the full store lifecycle.
//!
//! These tests exercise the flow from store creation through ingestion,
//! close and reopen, including schema handling on existing databases.

use meterdb::error::{ConfigError, SchemaError};
use meterdb::schema::CURRENT_VERSION;
use meterdb::{
    JournalMode, MeterError, NewSeries, SeriesFilter, Store, StoreConfig, TsType,
};
use rusqlite::Connection;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_full_store_lifecycle() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("lifecycle.db");

    let base_time = 1_700_000_000_000_000_000_i64;
    let ten_min = 600_000_000_000_i64;

    // Phase 1: create the store, register series and write
    let (temp, energy) = {
        let store = Store::open(StoreConfig::new(&db_path)).unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_VERSION);

        let temp = store
            .create_series(
                &NewSeries::new("Lab 3 temperature", Duration::from_secs(600))
                    .ts_type("mean")
                    .unit("C"),
            )
            .unwrap();
        let energy = store
            .create_series(
                &NewSeries::new("Main meter", Duration::from_secs(1800))
                    .ts_type("count")
                    .unit("kWh"),
            )
            .unwrap();

        for i in 0..12 {
            assert!(store.add_value(temp, base_time + i * ten_min, 20.0 + i as f64 / 10.0));
        }
        for i in 0..4 {
            assert!(store.add_value(energy, base_time + i * 3 * ten_min, 1_000.0 + i as f64));
        }

        store.close();
        (temp, energy)
    };

    // Phase 2: reopen and read everything back
    let store = Store::open(StoreConfig::new(&db_path)).unwrap();
    assert_eq!(store.schema_version().unwrap(), CURRENT_VERSION);

    let all = store.list_series(&SeriesFilter::all()).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[&energy].ts_type, TsType::Count);
    assert_eq!(all[&temp].period, Duration::from_secs(600));

    assert_eq!(store.point_count(temp).unwrap(), 12);
    let points = store
        .get_series_values(temp, base_time..base_time + 6 * ten_min)
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(points.len(), 6);
    assert_eq!(points[0].value, 20.0);

    let rows = store.crosstab(&[temp, energy], ..).unwrap().collect_rows().unwrap();
    assert_eq!(rows.len(), 12);
    assert_eq!(rows.iter().filter(|r| r.values[1].is_some()).count(), 4);

    // Phase 3: ids keep increasing across reopen
    let third = store
        .create_series(&NewSeries::new("late", Duration::from_secs(60)))
        .unwrap();
    assert!(third > energy);
}

#[test]
fn test_open_upgrades_older_database() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("legacy.db");

    // A database written by a build that only knew the first schema version.
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(meterdb::schema::MIGRATIONS[0].sql).unwrap();
        conn.execute("UPDATE version SET version = 1", []).unwrap();
        conn.execute(
            "INSERT INTO series (period, epoch, ts_type, get_limit) VALUES (600000000000, 0, 'point', 1000)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO data (series_id, stamp, ingest, value) VALUES (1, 42, 43, 134.6)",
            [],
        )
        .unwrap();
    }

    let store = Store::open(StoreConfig::new(&db_path)).unwrap();
    assert_eq!(store.schema_version().unwrap(), CURRENT_VERSION);

    let all = store.list_series(&SeriesFilter::all()).unwrap();
    let info = all.values().next().unwrap();
    assert_eq!(info.name, "");
    assert_eq!(info.unit, "");

    let stored = store.get_point(info.id, 42).unwrap().unwrap();
    assert_eq!(stored.value, 134.6);
    assert_eq!(stored.ingest_time, 43);
}

#[test]
fn test_open_refuses_newer_database() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("future.db");

    Store::open(StoreConfig::new(&db_path)).unwrap().close();
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute("UPDATE version SET version = ?1", [CURRENT_VERSION + 1])
            .unwrap();
    }

    match Store::open(StoreConfig::new(&db_path)) {
        Err(MeterError::Schema(SchemaError::UnsupportedVersion { found, .. })) => {
            assert_eq!(found, CURRENT_VERSION + 1);
        }
        other => panic!("expected UnsupportedVersion, got {other:?}"),
    }
}

#[test]
fn test_wipe_and_reopen() {
    let temp_dir = tempdir().unwrap();
    let config = StoreConfig::new(temp_dir.path().join("wipe.db"));

    let store = Store::open(config.clone()).unwrap();
    let id = store
        .create_series(&NewSeries::new("doomed", Duration::from_secs(60)))
        .unwrap();
    assert!(store.add_value(id, 1, 1.0));

    store.wipe().unwrap();
    assert_eq!(store.schema_version().unwrap(), 0);
    // The tables are gone until the next open.
    assert!(store.list_series(&SeriesFilter::all()).is_err());
    store.close();

    let store = Store::open(config).unwrap();
    assert!(store.list_series(&SeriesFilter::all()).unwrap().is_empty());
    assert!(!store.is_series(id).unwrap());
}

#[test]
fn test_open_from_config_file() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("from_file.db");
    let config_path = temp_dir.path().join("meterdb.json");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "path": db_path,
            "max_connections": 2,
            "journal_mode": "delete",
            "fetch_batch_size": 16,
        })
        .to_string(),
    )
    .unwrap();

    let config = StoreConfig::from_file(&config_path).unwrap();
    assert_eq!(config.journal_mode, JournalMode::Delete);
    assert_eq!(config.fetch_batch_size, 16);

    let store = Store::open(config).unwrap();
    assert_eq!(store.config().max_connections, 2);
    assert!(db_path.exists());
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("bad.json");
    std::fs::write(&config_path, r#"{ "fetch_batch_size": 0 }"#).unwrap();

    assert!(matches!(
        StoreConfig::from_file(&config_path),
        Err(MeterError::Config(ConfigError::Invalid { .. }))
    ));
    assert!(matches!(
        StoreConfig::from_file(temp_dir.path().join("missing.json")),
        Err(MeterError::Config(ConfigError::Read { .. }))
    ));
}

#[test]
fn test_clones_share_one_database() {
    let temp_dir = tempdir().unwrap();
    let store = Store::open(StoreConfig::new(temp_dir.path().join("shared.db"))).unwrap();
    let other = store.clone();

    let id = store
        .create_series(&NewSeries::new("shared", Duration::from_secs(60)))
        .unwrap();
    assert!(other.add_value(id, 7, 7.0));
    assert_eq!(store.point_count(id).unwrap(), 1);
}

#[test]
fn test_concurrent_first_opens_all_succeed() {
    let temp_dir = tempdir().unwrap();

    for round in 0..10 {
        let db_path = temp_dir.path().join(format!("race_{round}.db"));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db_path = db_path.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    Store::open(StoreConfig::new(&db_path)).map(|store| store.schema_version())
                })
            })
            .collect();

        for handle in handles {
            let version = handle.join().unwrap().unwrap().unwrap();
            assert_eq!(version, CURRENT_VERSION);
        }
    }
}
