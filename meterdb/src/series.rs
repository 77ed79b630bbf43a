//! Series identity, metadata and registry storage.
//!
//! A series is a named, typed collection of timestamped scalar measurements.
//! The store assigns each series an integer [`SeriesId`] when it is created.
//! Ids increase monotonically and are never handed out again, even after
//! the series is dropped.
//!
//! # Registration Flow
//!
//! 1. Caller builds a [`NewSeries`] (name and period required)
//! 2. [`NewSeries::validate`] checks `ts_type`, `get_limit` and the period range
//! 3. The row is inserted inside a write transaction; store-level CHECK
//!    constraints reject anything validation let through (e.g. a zero period)
//! 4. The new id is returned, or the transaction is rolled back
//!
//! # Example
//!
//! ```rust,no_run
//! use meterdb::{NewSeries, Store, StoreConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open(StoreConfig::new("./meter.db"))?;
//! let id = store.try_create_series(
//!     &NewSeries::new("Building 32 electricity", Duration::from_secs(1800))
//!         .ts_type("mean")
//!         .unit("kWh"),
//! )?;
//! assert!(store.is_series(id)?);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, Transaction, params};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::filter::SeriesFilter;

/// Default retrieval cap for a new series.
pub const DEFAULT_GET_LIMIT: u32 = 1000;

/// Store-assigned identity of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(pub i64);

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SeriesId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl ToSql for SeriesId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for SeriesId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

/// What each value in a series represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TsType {
    /// An instantaneous reading.
    Point,
    /// The mean over the preceding period.
    Mean,
    /// The standard deviation over the preceding period.
    Stdev,
    /// An event count over the preceding period.
    Count,
}

impl TsType {
    /// Every series type, in declaration order.
    pub const ALL: [TsType; 4] = [Self::Point, Self::Mean, Self::Stdev, Self::Count];

    /// Returns the stored name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Mean => "mean",
            Self::Stdev => "stdev",
            Self::Count => "count",
        }
    }
}

impl fmt::Display for TsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TsType {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidTsType {
                value: s.to_string(),
            })
    }
}

impl ToSql for TsType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TsType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Request to create a series.
///
/// `ts_type` is carried as text so that callers passing through untrusted
/// input get a typed rejection at create time rather than a parse error
/// somewhere upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSeries {
    /// Free-text name, searchable by substring.
    pub name: String,
    /// Nominal spacing between samples.
    pub period: Duration,
    /// One of `point`, `mean`, `stdev`, `count`.
    #[serde(default = "default_ts_type")]
    pub ts_type: String,
    /// Unit of measurement.
    #[serde(default)]
    pub unit: String,
    /// Reference instant in nanoseconds since the Unix epoch.
    #[serde(default)]
    pub epoch: i64,
    /// Cap on retrieval without pagination.
    #[serde(default = "default_get_limit")]
    pub get_limit: u32,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
}

fn default_ts_type() -> String {
    TsType::Point.as_str().to_string()
}

fn default_get_limit() -> u32 {
    DEFAULT_GET_LIMIT
}

impl NewSeries {
    /// Creates a request with the given name and period and defaults for
    /// everything else: `point` type, empty unit and description, the Unix
    /// epoch, and a `get_limit` of [`DEFAULT_GET_LIMIT`].
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            ts_type: default_ts_type(),
            unit: String::new(),
            epoch: 0,
            get_limit: DEFAULT_GET_LIMIT,
            description: String::new(),
        }
    }

    /// Sets the series type.
    #[must_use]
    pub fn ts_type(mut self, ts_type: impl Into<String>) -> Self {
        self.ts_type = ts_type.into();
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Sets the reference epoch, in nanoseconds since the Unix epoch.
    #[must_use]
    pub fn epoch(mut self, epoch: i64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Sets the retrieval cap.
    #[must_use]
    pub fn get_limit(mut self, get_limit: u32) -> Self {
        self.get_limit = get_limit;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Checks the request against the rules the store cannot express in
    /// its column types.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidTsType`] for an unknown `ts_type`
    /// - [`ValidationError::InvalidGetLimit`] for a zero `get_limit`
    /// - [`ValidationError::PeriodOutOfRange`] if the period overflows
    pub fn validate(&self) -> Result<ValidatedSeries<'_>> {
        let ts_type: TsType = self.ts_type.parse()?;
        if self.get_limit == 0 {
            return Err(ValidationError::InvalidGetLimit {
                limit: self.get_limit,
            }
            .into());
        }
        let period_ns = duration_to_nanos(self.period).ok_or(ValidationError::PeriodOutOfRange {
            period: self.period,
        })?;
        Ok(ValidatedSeries {
            series: self,
            ts_type,
            period_ns,
        })
    }
}

/// A [`NewSeries`] that passed validation, ready to insert.
#[derive(Debug)]
pub struct ValidatedSeries<'a> {
    series: &'a NewSeries,
    ts_type: TsType,
    period_ns: i64,
}

/// Registered series metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    /// Store-assigned id.
    pub id: SeriesId,
    /// Free-text name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Unit of measurement.
    pub unit: String,
    /// Nominal spacing between samples.
    pub period: Duration,
    /// Reference instant in nanoseconds since the Unix epoch.
    pub epoch: i64,
    /// What each value represents.
    pub ts_type: TsType,
    /// Cap on retrieval without pagination.
    pub get_limit: u32,
}

/// Converts a duration to whole nanoseconds, if it fits in an `i64`.
pub(crate) fn duration_to_nanos(duration: Duration) -> Option<i64> {
    i64::try_from(duration.as_nanos()).ok()
}

/// Reads a nanosecond column back into a duration.
pub(crate) fn duration_from_nanos(row: &Row<'_>, index: usize) -> rusqlite::Result<Duration> {
    let nanos: i64 = row.get(index)?;
    u64::try_from(nanos)
        .map(Duration::from_nanos)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(index, nanos))
}

const SELECT_SERIES: &str =
    "SELECT id, name, description, unit, period, epoch, ts_type, get_limit FROM series";

fn series_from_row(row: &Row<'_>) -> rusqlite::Result<SeriesInfo> {
    Ok(SeriesInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        unit: row.get(3)?,
        period: duration_from_nanos(row, 4)?,
        epoch: row.get(5)?,
        ts_type: row.get(6)?,
        get_limit: row.get(7)?,
    })
}

/// Inserts a validated series and returns its new id.
pub(crate) fn insert(
    tx: &Transaction<'_>,
    new: &ValidatedSeries<'_>,
) -> rusqlite::Result<SeriesId> {
    tx.execute(
        "INSERT INTO series (name, description, unit, period, epoch, ts_type, get_limit)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.series.name,
            new.series.description,
            new.series.unit,
            new.period_ns,
            new.series.epoch,
            new.ts_type,
            new.series.get_limit,
        ],
    )?;
    Ok(SeriesId(tx.last_insert_rowid()))
}

/// Deletes a series; its points go with it through the cascade.
pub(crate) fn delete(tx: &Transaction<'_>, id: SeriesId) -> rusqlite::Result<bool> {
    Ok(tx.execute("DELETE FROM series WHERE id = ?1", params![id])? > 0)
}

pub(crate) fn exists(conn: &Connection, id: SeriesId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM series WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )
}

pub(crate) fn fetch(conn: &Connection, id: SeriesId) -> rusqlite::Result<Option<SeriesInfo>> {
    conn.query_row(
        &format!("{SELECT_SERIES} WHERE id = ?1"),
        params![id],
        series_from_row,
    )
    .optional()
}

/// Returns every series matching `filter`, keyed by id.
pub(crate) fn select(
    conn: &Connection,
    filter: &SeriesFilter,
) -> rusqlite::Result<BTreeMap<SeriesId, SeriesInfo>> {
    let (clause, values) = filter.to_sql();
    let sql = format!("{SELECT_SERIES}{clause} ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), series_from_row)?;

    let mut series = BTreeMap::new();
    for info in rows {
        let info = info?;
        series.insert(info.id, info);
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeterError;

    #[test]
    fn test_ts_type_parse() {
        for ts_type in TsType::ALL {
            assert_eq!(ts_type.as_str().parse::<TsType>().unwrap(), ts_type);
        }
        assert!(matches!(
            "bogus".parse::<TsType>(),
            Err(ValidationError::InvalidTsType { value }) if value == "bogus"
        ));
        // Stored names are exact.
        assert!("Point".parse::<TsType>().is_err());
    }

    #[test]
    fn test_new_series_defaults() {
        let new = NewSeries::new("meter", Duration::from_secs(900));
        assert_eq!(new.ts_type, "point");
        assert_eq!(new.get_limit, DEFAULT_GET_LIMIT);
        assert_eq!(new.epoch, 0);
        assert!(new.unit.is_empty());
    }

    #[test]
    fn test_new_series_from_json_uses_defaults() {
        let new: NewSeries =
            serde_json::from_str(r#"{ "name": "gas", "period": { "secs": 600, "nanos": 0 } }"#)
                .unwrap();
        assert_eq!(new, NewSeries::new("gas", Duration::from_secs(600)));
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let bad_type = NewSeries::new("x", Duration::from_secs(1)).ts_type("bogus");
        assert!(matches!(
            bad_type.validate(),
            Err(MeterError::Validation(ValidationError::InvalidTsType { .. }))
        ));

        let bad_limit = NewSeries::new("x", Duration::from_secs(1)).get_limit(0);
        assert!(matches!(
            bad_limit.validate(),
            Err(MeterError::Validation(ValidationError::InvalidGetLimit { limit: 0 }))
        ));

        let huge = NewSeries::new("x", Duration::from_secs(u64::MAX));
        assert!(matches!(
            huge.validate(),
            Err(MeterError::Validation(ValidationError::PeriodOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_series_id_parse_and_display() {
        let id: SeriesId = " 17 ".parse().unwrap();
        assert_eq!(id, SeriesId(17));
        assert_eq!(id.to_string(), "17");
        assert!("seventeen".parse::<SeriesId>().is_err());
    }
}
