//! Range queries and crosstab assembly.
//!
//! Reads never materialise a whole result. Points are pulled from SQLite a
//! page at a time, ordered by `(timestamp, series id)`, and each page resumes
//! strictly after the last key of the previous one. A cursor owns a clone of
//! the [`Store`] handle, so it can outlive the call that created it.
//!
//! # Single series
//!
//! [`PointCursor`] yields `(timestamp, value)` pairs in ascending timestamp
//! order, honouring a half-open [`TimeRange`].
//!
//! # Crosstab
//!
//! For several series the points of all of them arrive as one stream sorted
//! by `(timestamp, series id)`. [`Crosstab`] walks it once, left to right,
//! and groups each run of equal timestamps into a [`CrosstabRow`] with one
//! column per requested series. A series without a point at that timestamp
//! leaves its column `None`. The grouping is only correct because the input
//! is sorted; nothing here re-sorts it.
//!
//! If reading fails part way through a timestamp, the row assembled so far
//! is yielded first and the error after it. The crosstab ends there.
//!
//! # Consistency
//!
//! Pages are separate statements, not one snapshot. Writes landing behind
//! the cursor are not seen; writes ahead of it may be.
//!
//! # Example
//!
//! ```rust,no_run
//! use meterdb::{Store, StoreConfig, SeriesId, Values};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open(StoreConfig::new("./meter.db"))?;
//! match store.get_values(&[SeriesId(1), SeriesId(2)], 1_000..)? {
//!     Values::Series(points) => {
//!         for point in points {
//!             let point = point?;
//!             println!("{} {}", point.timestamp, point.value);
//!         }
//!     }
//!     Values::Crosstab(table) => {
//!         let names: Vec<_> = table.columns().iter().map(|c| c.name.clone()).collect();
//!         println!("{names:?}");
//!         for row in table {
//!             println!("{:?}", row?);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use rusqlite::Connection;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MeterError, Result, StoreError, ValidationError};
use crate::point::Point;
use crate::series::{self, SeriesId, TsType};
use crate::store::Store;

/// Half-open time window: `from <= timestamp < to`.
///
/// A missing bound leaves that side open. Converts from Rust range syntax:
/// `..`, `a..`, `..b` and `a..b`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound, nanoseconds since the Unix epoch.
    pub from: Option<i64>,
    /// Exclusive upper bound, nanoseconds since the Unix epoch.
    pub to: Option<i64>,
}

impl TimeRange {
    /// The unbounded window.
    pub fn all() -> Self {
        Self::default()
    }

    /// A window with optional bounds.
    pub fn new(from: Option<i64>, to: Option<i64>) -> Self {
        Self { from, to }
    }

    /// Returns `true` if `timestamp` falls inside the window.
    pub fn contains(&self, timestamp: i64) -> bool {
        self.from.is_none_or(|from| timestamp >= from)
            && self.to.is_none_or(|to| timestamp < to)
    }
}

impl From<RangeFull> for TimeRange {
    fn from(_: RangeFull) -> Self {
        Self::all()
    }
}

impl From<Range<i64>> for TimeRange {
    fn from(range: Range<i64>) -> Self {
        Self::new(Some(range.start), Some(range.end))
    }
}

impl From<RangeFrom<i64>> for TimeRange {
    fn from(range: RangeFrom<i64>) -> Self {
        Self::new(Some(range.start), None)
    }
}

impl From<RangeTo<i64>> for TimeRange {
    fn from(range: RangeTo<i64>) -> Self {
        Self::new(None, Some(range.end))
    }
}

/// A point tagged with the series it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SeriesPoint {
    pub series: SeriesId,
    pub timestamp: i64,
    pub value: f64,
}

/// Paged stream of points from a set of series, ordered by
/// `(timestamp, series id)`.
pub(crate) struct MergedStream {
    store: Store,
    ids: Vec<SeriesId>,
    range: TimeRange,
    batch_size: usize,
    after: Option<(i64, SeriesId)>,
    page: std::vec::IntoIter<SeriesPoint>,
    exhausted: bool,
}

impl MergedStream {
    pub(crate) fn new(store: Store, ids: Vec<SeriesId>, range: TimeRange) -> Self {
        let batch_size = store.config().fetch_batch_size;
        Self {
            store,
            ids,
            range,
            batch_size,
            after: None,
            page: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    fn fetch_page(&self) -> Result<Vec<SeriesPoint>> {
        let conn = self.store.connection()?;
        let page = fetch_page(&conn, &self.ids, self.range, self.after, self.batch_size)?;
        debug!(rows = page.len(), after = ?self.after, "fetched point page");
        Ok(page)
    }
}

impl Iterator for MergedStream {
    type Item = Result<SeriesPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(point) = self.page.next() {
            return Some(Ok(point));
        }
        if self.exhausted {
            return None;
        }

        match self.fetch_page() {
            Ok(page) => {
                if page.len() < self.batch_size {
                    self.exhausted = true;
                }
                if let Some(last) = page.last() {
                    self.after = Some((last.timestamp, last.series));
                }
                self.page = page.into_iter();
                self.page.next().map(Ok)
            }
            Err(err) => {
                self.exhausted = true;
                Some(Err(err))
            }
        }
    }
}

/// One page of the merged stream.
fn fetch_page(
    conn: &Connection,
    ids: &[SeriesId],
    range: TimeRange,
    after: Option<(i64, SeriesId)>,
    limit: usize,
) -> rusqlite::Result<Vec<SeriesPoint>> {
    let placeholders = vec!["?"; ids.len()].join(", ");
    let mut sql =
        format!("SELECT series_id, stamp, value FROM data WHERE series_id IN ({placeholders})");
    let mut values: Vec<Value> = ids.iter().map(|id| Value::Integer(id.0)).collect();

    if let Some(from) = range.from {
        sql.push_str(" AND stamp >= ?");
        values.push(Value::Integer(from));
    }
    if let Some(to) = range.to {
        sql.push_str(" AND stamp < ?");
        values.push(Value::Integer(to));
    }
    if let Some((stamp, series)) = after {
        sql.push_str(" AND (stamp, series_id) > (?, ?)");
        values.push(Value::Integer(stamp));
        values.push(Value::Integer(series.0));
    }
    sql.push_str(" ORDER BY stamp, series_id LIMIT ?");
    values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), |row| {
        Ok(SeriesPoint {
            series: row.get(0)?,
            timestamp: row.get(1)?,
            value: row.get(2)?,
        })
    })?;
    rows.collect()
}

/// Lazy, single-pass sequence of points from one series, in ascending
/// timestamp order.
///
/// Items are `Result`s because each page is a fresh store round trip. After
/// an error the cursor yields nothing more.
pub struct PointCursor {
    series: SeriesId,
    range: TimeRange,
    stream: MergedStream,
}

impl PointCursor {
    pub(crate) fn new(store: Store, series: SeriesId, range: TimeRange) -> Self {
        Self {
            series,
            range,
            stream: MergedStream::new(store, vec![series], range),
        }
    }

    /// Returns the series being read.
    pub fn series(&self) -> SeriesId {
        self.series
    }

    /// Returns the window being read.
    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// Collects the remaining points into a vector.
    ///
    /// For large ranges prefer iterating directly.
    ///
    /// # Errors
    ///
    /// Returns the first store error hit while paging.
    pub fn collect_all(self) -> Result<Vec<Point>> {
        self.collect()
    }
}

impl std::fmt::Debug for PointCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointCursor")
            .field("series", &self.series)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl Iterator for PointCursor {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next().map(|point| {
            point.map(|p| Point {
                timestamp: p.timestamp,
                value: p.value,
            })
        })
    }
}

/// Describes one crosstab column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Series id.
    pub id: SeriesId,
    /// Series name.
    pub name: String,
    /// Series type.
    pub ts_type: TsType,
    /// Series unit.
    pub unit: String,
}

/// One crosstab row: a timestamp and one value slot per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosstabRow {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    /// Values in column order; `None` where that series has no point.
    pub values: Vec<Option<f64>>,
}

/// Groups a `(timestamp, series id)`-sorted stream into crosstab rows.
///
/// A source error in the middle of a timestamp group first yields the row
/// built so far, then the error. Nothing follows the error.
pub(crate) struct RowGrouper<I> {
    source: I,
    columns: HashMap<SeriesId, usize>,
    width: usize,
    pending: Option<SeriesPoint>,
    failed: Option<MeterError>,
    done: bool,
}

impl<I> RowGrouper<I>
where
    I: Iterator<Item = Result<SeriesPoint>>,
{
    pub(crate) fn new(source: I, columns: HashMap<SeriesId, usize>) -> Self {
        let width = columns.len();
        Self {
            source,
            columns,
            width,
            pending: None,
            failed: None,
            done: false,
        }
    }

    fn place(&self, row: &mut CrosstabRow, point: SeriesPoint) {
        if let Some(&column) = self.columns.get(&point.series) {
            row.values[column] = Some(point.value);
        }
    }
}

impl<I> Iterator for RowGrouper<I>
where
    I: Iterator<Item = Result<SeriesPoint>>,
{
    type Item = Result<CrosstabRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.failed.take() {
            self.done = true;
            return Some(Err(err));
        }
        if self.done {
            return None;
        }

        let first = match self.pending.take() {
            Some(point) => point,
            None => match self.source.next() {
                Some(Ok(point)) => point,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    return None;
                }
            },
        };

        let mut row = CrosstabRow {
            timestamp: first.timestamp,
            values: vec![None; self.width],
        };
        self.place(&mut row, first);

        loop {
            match self.source.next() {
                Some(Ok(point)) if point.timestamp == row.timestamp => self.place(&mut row, point),
                Some(Ok(point)) => {
                    self.pending = Some(point);
                    break;
                }
                Some(Err(err)) => {
                    self.failed = Some(err);
                    break;
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        Some(Ok(row))
    }
}

/// Multi-series result: column metadata plus a lazy sequence of rows.
pub struct Crosstab {
    columns: Vec<ColumnInfo>,
    rows: RowGrouper<MergedStream>,
}

impl Crosstab {
    /// Builds a crosstab over `ids`, in request order.
    pub(crate) fn build(store: &Store, ids: &[SeriesId], range: TimeRange) -> Result<Self> {
        if ids.is_empty() {
            return Err(ValidationError::EmptySeriesList.into());
        }

        let mut index = HashMap::with_capacity(ids.len());
        for (column, &id) in ids.iter().enumerate() {
            if index.insert(id, column).is_some() {
                return Err(ValidationError::DuplicateSeries { id }.into());
            }
        }

        let conn = store.connection()?;
        let mut columns = Vec::with_capacity(ids.len());
        for &id in ids {
            let info = series::fetch(&conn, id)?.ok_or(StoreError::SeriesNotFound { id })?;
            columns.push(ColumnInfo {
                id: info.id,
                name: info.name,
                ts_type: info.ts_type,
                unit: info.unit,
            });
        }
        drop(conn);

        let stream = MergedStream::new(store.clone(), ids.to_vec(), range);
        Ok(Self {
            columns,
            rows: RowGrouper::new(stream, index),
        })
    }

    /// Returns one descriptor per column, in request order.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Collects the remaining rows into a vector.
    ///
    /// # Errors
    ///
    /// Returns the first store error hit while paging.
    pub fn collect_rows(self) -> Result<Vec<CrosstabRow>> {
        self.rows.collect()
    }
}

impl std::fmt::Debug for Crosstab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crosstab")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl Iterator for Crosstab {
    type Item = Result<CrosstabRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

/// Result of [`Store::get_values`]: a point sequence for one series, a
/// crosstab for several.
#[derive(Debug)]
pub enum Values {
    /// Exactly one series was requested.
    Series(PointCursor),
    /// Two or more series were requested.
    Crosstab(Crosstab),
}

impl Values {
    /// Returns the point cursor, if one series was requested.
    pub fn into_series(self) -> Option<PointCursor> {
        match self {
            Self::Series(cursor) => Some(cursor),
            Self::Crosstab(_) => None,
        }
    }

    /// Returns the crosstab, if several series were requested.
    pub fn into_crosstab(self) -> Option<Crosstab> {
        match self {
            Self::Series(_) => None,
            Self::Crosstab(table) => Some(table),
        }
    }
}
