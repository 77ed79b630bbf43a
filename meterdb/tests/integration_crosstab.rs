//! Integration tests for multi-series crosstab reads.

use meterdb::error::{StoreError, ValidationError};
use meterdb::{
    CrosstabRow, MeterError, NewSeries, SeriesId, Store, StoreConfig, TsType, Values,
};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

const T1: i64 = 1_700_000_000_000_000_000;
const T2: i64 = T1 + 600_000_000_000;
const T3: i64 = T2 + 600_000_000_000;

fn open_store(fetch_batch_size: usize) -> (TempDir, Store) {
    let temp_dir = tempdir().unwrap();
    let config = StoreConfig {
        fetch_batch_size,
        ..StoreConfig::new(temp_dir.path().join("crosstab.db"))
    };
    (temp_dir, Store::open(config).unwrap())
}

/// Series A has points at T1 and T2, series B at T1 and T3.
fn two_series(store: &Store) -> (SeriesId, SeriesId) {
    let a = store
        .create_series(
            &NewSeries::new("A", Duration::from_secs(600))
                .ts_type("mean")
                .unit("C"),
        )
        .unwrap();
    let b = store
        .create_series(&NewSeries::new("B", Duration::from_secs(600)).unit("kWh"))
        .unwrap();

    assert!(store.add_value(a, T1, 1.0));
    assert!(store.add_value(a, T2, 2.0));
    assert!(store.add_value(b, T1, 10.0));
    assert!(store.add_value(b, T3, 30.0));
    (a, b)
}

fn row(timestamp: i64, values: &[Option<f64>]) -> CrosstabRow {
    CrosstabRow {
        timestamp,
        values: values.to_vec(),
    }
}

#[test]
fn test_rows_align_on_timestamp() {
    let (_dir, store) = open_store(1000);
    let (a, b) = two_series(&store);

    let table = store.crosstab(&[a, b], ..).unwrap();
    let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    assert_eq!(table.columns()[0].ts_type, TsType::Mean);
    assert_eq!(table.columns()[1].unit, "kWh");

    assert_eq!(
        table.collect_rows().unwrap(),
        vec![
            row(T1, &[Some(1.0), Some(10.0)]),
            row(T2, &[Some(2.0), None]),
            row(T3, &[None, Some(30.0)]),
        ]
    );
}

#[test]
fn test_columns_follow_request_order() {
    let (_dir, store) = open_store(1000);
    let (a, b) = two_series(&store);

    let table = store.crosstab(&[b, a], ..).unwrap();
    assert_eq!(table.columns()[0].id, b);
    assert_eq!(
        table.collect_rows().unwrap(),
        vec![
            row(T1, &[Some(10.0), Some(1.0)]),
            row(T2, &[None, Some(2.0)]),
            row(T3, &[Some(30.0), None]),
        ]
    );
}

#[test]
fn test_range_applies_to_every_column() {
    let (_dir, store) = open_store(1000);
    let (a, b) = two_series(&store);

    let rows = store.crosstab(&[a, b], T2..T3).unwrap().collect_rows().unwrap();
    assert_eq!(rows, vec![row(T2, &[Some(2.0), None])]);

    let rows = store.crosstab(&[a, b], T3..).unwrap().collect_rows().unwrap();
    assert_eq!(rows, vec![row(T3, &[None, Some(30.0)])]);
}

#[test]
fn test_get_values_with_several_ids_is_a_crosstab() {
    let (_dir, store) = open_store(1000);
    let (a, b) = two_series(&store);

    match store.get_values(&[a, b], ..).unwrap() {
        Values::Crosstab(table) => assert_eq!(table.count(), 3),
        Values::Series(_) => panic!("expected a crosstab"),
    }
}

#[test]
fn test_rows_span_page_boundaries() {
    let (_dir, store) = open_store(2);
    let ids: Vec<SeriesId> = (0..3)
        .map(|i| {
            store
                .create_series(&NewSeries::new(format!("s{i}"), Duration::from_secs(1)))
                .unwrap()
        })
        .collect();

    // Three points per timestamp with a page size of two: every row is split
    // across pages.
    for t in 0..5_i64 {
        for (i, &id) in ids.iter().enumerate() {
            assert!(store.add_value(id, t, (t * 10) as f64 + i as f64));
        }
    }

    let rows = store.crosstab(&ids, ..).unwrap().collect_rows().unwrap();
    assert_eq!(rows.len(), 5);
    for (t, row) in rows.iter().enumerate() {
        let t = t as i64;
        assert_eq!(row.timestamp, t);
        let expected: Vec<Option<f64>> = (0..3).map(|i| Some((t * 10) as f64 + i as f64)).collect();
        assert_eq!(row.values, expected);
    }
}

#[test]
fn test_sparse_series_across_pages() {
    let (_dir, store) = open_store(3);
    let (a, b) = two_series(&store);
    for i in 0..10_i64 {
        assert!(store.add_value(a, T3 + (i + 1) * 1_000, i as f64));
    }

    let rows = store.crosstab(&[a, b], ..).unwrap().collect_rows().unwrap();
    assert_eq!(rows.len(), 13);
    assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(rows[3..].iter().all(|r| r.values[1].is_none()));
}

#[test]
fn test_empty_window_yields_no_rows() {
    let (_dir, store) = open_store(1000);
    let (a, b) = two_series(&store);

    let table = store.crosstab(&[a, b], 0..T1).unwrap();
    assert_eq!(table.columns().len(), 2);
    assert!(table.collect_rows().unwrap().is_empty());
}

#[test]
fn test_unknown_id_is_reported() {
    let (_dir, store) = open_store(1000);
    let (a, b) = two_series(&store);
    let ghost = SeriesId(b.0 + 50);

    match store.crosstab(&[a, ghost], ..) {
        Err(MeterError::Store(StoreError::SeriesNotFound { id })) => assert_eq!(id, ghost),
        other => panic!("expected SeriesNotFound, got {other:?}"),
    }
}

#[test]
fn test_duplicate_and_empty_id_lists_are_rejected() {
    let (_dir, store) = open_store(1000);
    let (a, b) = two_series(&store);

    assert!(matches!(
        store.crosstab(&[a, b, a], ..),
        Err(MeterError::Validation(ValidationError::DuplicateSeries { id })) if id == a
    ));
    assert!(matches!(
        store.crosstab(&[], ..),
        Err(MeterError::Validation(ValidationError::EmptySeriesList))
    ));
}
