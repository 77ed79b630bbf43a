//! Point storage: one value per (series, timestamp).
//!
//! Writes are idempotent. A second write to the same key replaces the value
//! and the ingest time; it never creates a second row.
//!
//! # Upsert under concurrent writers
//!
//! Two writers may both find a key absent and both try to insert it. The
//! write path therefore never does check-then-insert. It loops:
//!
//! 1. `UPDATE` the row by key. One row changed: done.
//! 2. Otherwise `INSERT` it. Success: done.
//! 3. The insert hit the primary key, so another writer created the row
//!    between steps 1 and 2. Go back to step 1, which now updates it.
//! 4. Any other failure aborts the write.
//!
//! At most one writer can win a given insert, so every loser converges on
//! its next update. The loop ends only when a write lands or a non-conflict
//! error occurs.
//!
//! Writers going through one [`Store`](crate::Store) hold an IMMEDIATE
//! transaction, so SQLite's write lock already keeps them apart. Step 3 is
//! only reached when a writer outside that lock creates the key between the
//! two statements.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Transaction, ffi, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;
use crate::series::SeriesId;

/// One observation in a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// The measured value.
    pub value: f64,
}

impl From<(i64, f64)> for Point {
    fn from((timestamp, value): (i64, f64)) -> Self {
        Self { timestamp, value }
    }
}

/// A stored point together with the time the store accepted it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredPoint {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// The measured value.
    pub value: f64,
    /// Wall-clock nanoseconds at which the last write was accepted.
    pub ingest_time: i64,
}

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The key was new.
    Inserted,
    /// An existing value was replaced.
    Replaced,
}

/// Rejects values that are not numbers.
///
/// NaN cannot be stored (SQLite reads it back as NULL) and infinities are
/// not measurements.
pub(crate) fn check_value(value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NonNumericValue {
            value: value.to_string(),
        })
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| i64::try_from(elapsed.as_nanos()).ok())
        .unwrap_or(0)
}

/// Records `value` at `(series, timestamp)`, replacing any previous value.
///
/// The caller owns the transaction and must have validated `value`.
pub(crate) fn upsert(
    tx: &Transaction<'_>,
    series: SeriesId,
    timestamp: i64,
    value: f64,
    ingest_time: i64,
) -> rusqlite::Result<UpsertOutcome> {
    let (outcome, attempts) = converge(
        || {
            tx.execute(
                "UPDATE data SET value = ?3, ingest = ?4 WHERE series_id = ?1 AND stamp = ?2",
                params![series, timestamp, value, ingest_time],
            )
        },
        || {
            tx.execute(
                "INSERT INTO data (series_id, stamp, ingest, value) VALUES (?1, ?2, ?3, ?4)",
                params![series, timestamp, ingest_time, value],
            )
        },
    )?;
    if attempts > 1 {
        debug!(%series, timestamp, attempts, "insert lost a race; converged as update");
    }
    Ok(outcome)
}

/// Runs the update-then-insert loop and returns the outcome with the number
/// of attempts it took.
fn converge(
    mut update: impl FnMut() -> rusqlite::Result<usize>,
    mut insert: impl FnMut() -> rusqlite::Result<usize>,
) -> rusqlite::Result<(UpsertOutcome, u32)> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        if update()? > 0 {
            return Ok((UpsertOutcome::Replaced, attempt));
        }

        match insert() {
            Ok(_) => return Ok((UpsertOutcome::Inserted, attempt)),
            Err(err) if is_key_conflict(&err) => {}
            Err(err) => return Err(err),
        }
    }
}

/// True only for a primary-key or unique violation. Foreign-key and CHECK
/// failures are not races and must not be retried.
fn is_key_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

pub(crate) fn fetch(
    conn: &Connection,
    series: SeriesId,
    timestamp: i64,
) -> rusqlite::Result<Option<StoredPoint>> {
    conn.query_row(
        "SELECT stamp, value, ingest FROM data WHERE series_id = ?1 AND stamp = ?2",
        params![series, timestamp],
        |row| {
            Ok(StoredPoint {
                timestamp: row.get(0)?,
                value: row.get(1)?,
                ingest_time: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Number of stored points in a series.
pub(crate) fn count(conn: &Connection, series: SeriesId) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM data WHERE series_id = ?1",
        params![series],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}
