//! Store module for the meterdb time-series store.
//!
//! This module provides the top-level API that ties all components together.
//! A [`Store`] owns the connection pool over the SQLite database and exposes
//! the registry, point and query operations on it.
//!
//! # Design
//!
//! The Store acts as the central coordinator:
//! - Builds the connection pool once, at open, and brings the schema up to
//!   date before any other operation can run
//! - Wraps every logical operation in its own transaction; transactions never
//!   span calls
//! - Holds no in-process locks and no shared mutable state. Concurrent
//!   callers are serialised by SQLite's own locking
//! - Is cheap to clone; clones share the pool
//!
//! # Lifecycle
//!
//! ```rust,no_run
//! use meterdb::{NewSeries, Store, StoreConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Startup: open and migrate. Failure here must stop the process.
//! let store = Store::open(StoreConfig::new("./meter.db"))?;
//!
//! let id = store
//!     .create_series(&NewSeries::new("Lab 3 temperature", Duration::from_secs(600)).unit("C"))
//!     .ok_or("series creation failed")?;
//!
//! assert!(store.add_value(id, 1_700_000_000_000_000_000, 21.5));
//! let points = store.get_series_values(id, ..)?.collect_all()?;
//! assert_eq!(points.len(), 1);
//!
//! // Shutdown.
//! store.close();
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::TransactionBehavior;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::StoreConfig;
use crate::error::{MeterError, Result, StoreError};
use crate::facet::{self, FacetColumn, FacetCount};
use crate::filter::SeriesFilter;
use crate::ingest::{self, IngestReport};
use crate::point::{self, StoredPoint, UpsertOutcome};
use crate::query::{Crosstab, PointCursor, TimeRange, Values};
use crate::schema;
use crate::series::{self, NewSeries, SeriesId, SeriesInfo};

/// Connection checked out of the store's pool.
pub(crate) type Connection = PooledConnection<SqliteConnectionManager>;

/// Top-level handle for a meterdb store.
///
/// # Thread Safety
///
/// `Store` is `Send + Sync` and `Clone`. Each operation checks a connection
/// out of the pool for its own duration, so clones may be used from as many
/// threads as the pool has connections; further callers wait up to
/// `connection_timeout`.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    config: Arc<StoreConfig>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.config.path)
            .field("connections", &self.pool.state().connections)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens the database named by `config`, creating it if needed, and
    /// migrates it to [`schema::CURRENT_VERSION`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Invalid`](crate::error::ConfigError::Invalid) if the config is unusable
    /// - [`StoreError::Pool`] if no connection can be opened
    /// - [`SchemaError`](crate::error::SchemaError) if the schema cannot be read or upgraded;
    ///   the database is left as it was
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let init = config.clone();
        let manager = SqliteConnectionManager::file(&config.path)
            .with_init(move |conn| init.apply_pragmas(conn));
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(config.connection_timeout)
            .build(manager)?;

        let store = Self {
            pool,
            config: Arc::new(config),
        };
        store.migrate()?;

        info!(path = %store.config.path.display(), "store opened");
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let found = schema::current_version(&conn)?;
        if found != schema::CURRENT_VERSION {
            schema::upgrade(&mut conn, found)?;
        }
        Ok(())
    }

    /// Closes the store. Pooled connections are released once every clone
    /// and every live cursor has been dropped.
    pub fn close(self) {
        info!(path = %self.config.path.display(), "store closed");
    }

    /// Returns the configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the schema version recorded in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<u32> {
        schema::current_version(&*self.connection()?)
    }

    pub(crate) fn connection(&self) -> Result<Connection> {
        Ok(self.pool.get()?)
    }

    /// Creates a series and returns its id, or `None` if the request was
    /// invalid or the store refused it. The failure is logged; nothing is
    /// written.
    pub fn create_series(&self, new: &NewSeries) -> Option<SeriesId> {
        match self.try_create_series(new) {
            Ok(id) => Some(id),
            Err(err) => {
                if err.is_validation() {
                    warn!(name = %new.name, ts_type = %new.ts_type, "series rejected: {err}");
                } else {
                    error!(
                        name = %new.name,
                        period = ?new.period,
                        ts_type = %new.ts_type,
                        get_limit = new.get_limit,
                        "series creation failed: {err}"
                    );
                }
                None
            }
        }
    }

    /// Creates a series and returns its id.
    ///
    /// # Errors
    ///
    /// - [`ValidationError`](crate::error::ValidationError) for a bad `ts_type`,
    ///   `get_limit` or period, before the store is touched
    /// - [`StoreError::Sqlite`] if a store constraint rejects the row (for
    ///   example a zero period); the transaction is rolled back
    pub fn try_create_series(&self, new: &NewSeries) -> Result<SeriesId> {
        let validated = new.validate()?;

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = series::insert(&tx, &validated)?;
        tx.commit()?;

        info!(%id, name = %new.name, "series created");
        Ok(id)
    }

    /// Drops a series and every point in it. Dropping an id that does not
    /// exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn drop_series(&self, id: SeriesId) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let dropped = series::delete(&tx, id)?;
        tx.commit()?;

        if dropped {
            info!(%id, "series dropped");
        }
        Ok(())
    }

    /// Lists the series matching `filter`, keyed by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list_series(&self, filter: &SeriesFilter) -> Result<BTreeMap<SeriesId, SeriesInfo>> {
        Ok(series::select(&*self.connection()?, filter)?)
    }

    /// Returns one series' metadata, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn describe_series(&self, id: SeriesId) -> Result<Option<SeriesInfo>> {
        Ok(series::fetch(&*self.connection()?, id)?)
    }

    /// Returns `true` if `id` names an existing series.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn is_series(&self, id: SeriesId) -> Result<bool> {
        Ok(series::exists(&*self.connection()?, id)?)
    }

    /// Records `value` at `timestamp` in series `id`, replacing any value
    /// already stored there. Returns `false`, with nothing written, if the
    /// series does not exist, the value is not a number, or the store fails.
    pub fn add_value(&self, id: SeriesId, timestamp: i64, value: f64) -> bool {
        match self.try_add_value(id, timestamp, value) {
            Ok(_) => true,
            Err(err) => {
                if err.is_validation() || err.is_not_found() {
                    warn!(%id, timestamp, "value rejected: {err}");
                } else {
                    error!(%id, timestamp, "value write failed: {err}");
                }
                false
            }
        }
    }

    /// Records `value` at `timestamp` in series `id` and reports whether the
    /// key was new.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::NonNumericValue`](crate::error::ValidationError::NonNumericValue)
    ///   for NaN or infinite values
    /// - [`StoreError::SeriesNotFound`] if the series does not exist
    /// - [`StoreError::Sqlite`] for any other store failure
    pub fn try_add_value(&self, id: SeriesId, timestamp: i64, value: f64) -> Result<UpsertOutcome> {
        let value = point::check_value(value)?;

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !series::exists(&tx, id)? {
            return Err(StoreError::SeriesNotFound { id }.into());
        }
        let outcome = point::upsert(&tx, id, timestamp, value, point::now_nanos())?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Writes a JSON batch of points to series `id`.
    ///
    /// Unreadable entries are skipped and listed in the report; every other
    /// entry is written, all in one transaction.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidBatch`](crate::error::ValidationError::InvalidBatch)
    ///   if `body` is not an array
    /// - [`StoreError::SeriesNotFound`] if the series does not exist; nothing is written
    /// - a store error, in which case nothing is written
    pub fn ingest_json(&self, id: SeriesId, body: &Value) -> Result<IngestReport> {
        let (points, rejected) = ingest::parse_batch(body)?;

        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !series::exists(&tx, id)? {
            return Err(StoreError::SeriesNotFound { id }.into());
        }
        let ingest_time = point::now_nanos();
        for p in &points {
            point::upsert(&tx, id, p.timestamp, p.value, ingest_time)?;
        }
        tx.commit()?;

        if !rejected.is_empty() {
            warn!(%id, rejected = rejected.len(), "batch entries skipped");
        }
        Ok(IngestReport {
            accepted: points.len(),
            rejected,
        })
    }

    /// Returns the stored point at `(id, timestamp)`, with its ingest time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_point(&self, id: SeriesId, timestamp: i64) -> Result<Option<StoredPoint>> {
        Ok(point::fetch(&*self.connection()?, id, timestamp)?)
    }

    /// Returns the number of points stored in series `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn point_count(&self, id: SeriesId) -> Result<u64> {
        Ok(point::count(&*self.connection()?, id)?)
    }

    /// Reads values for one or more series over a half-open window.
    ///
    /// One id gives [`Values::Series`]; several give [`Values::Crosstab`].
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptySeriesList`](crate::error::ValidationError::EmptySeriesList)
    ///   if `ids` is empty
    /// - see [`Store::crosstab`] for the multi-series case
    pub fn get_values(&self, ids: &[SeriesId], range: impl Into<TimeRange>) -> Result<Values> {
        match ids {
            [] => Err(crate::error::ValidationError::EmptySeriesList.into()),
            [id] => Ok(Values::Series(self.get_series_values(*id, range)?)),
            _ => Ok(Values::Crosstab(self.crosstab(ids, range)?)),
        }
    }

    /// Returns a lazy cursor over one series' points in the window, in
    /// ascending timestamp order. An unknown or dropped series reads as
    /// empty.
    ///
    /// # Errors
    ///
    /// Currently infallible at creation; store errors surface while
    /// iterating.
    pub fn get_series_values(
        &self,
        id: SeriesId,
        range: impl Into<TimeRange>,
    ) -> Result<PointCursor> {
        Ok(PointCursor::new(self.clone(), id, range.into()))
    }

    /// Builds a crosstab over `ids`, columns in request order.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptySeriesList`](crate::error::ValidationError::EmptySeriesList)
    ///   or [`ValidationError::DuplicateSeries`](crate::error::ValidationError::DuplicateSeries)
    /// - [`StoreError::SeriesNotFound`] if any id is unknown
    pub fn crosstab(&self, ids: &[SeriesId], range: impl Into<TimeRange>) -> Result<Crosstab> {
        Crosstab::build(self, ids, range.into())
    }

    /// Counts series per distinct value of `column`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn facet_summary(&self, column: FacetColumn) -> Result<Vec<FacetCount>> {
        Ok(facet::summarize(&*self.connection()?, column)?)
    }

    /// Counts series per distinct value of the column named `column`.
    ///
    /// # Errors
    ///
    /// Returns an unknown-facet-column validation error for any name other
    /// than `period`, `units` or `ts_type`.
    pub fn facet_summary_by_name(&self, column: &str) -> Result<Vec<FacetCount>> {
        let column: FacetColumn = column.parse()?;
        self.facet_summary(column)
    }

    /// Drops every table the store owns. For tests and teardown only: the
    /// store is unusable afterwards until reopened.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn wipe(&self) -> Result<()> {
        let mut conn = self.connection()?;
        schema::drop_all(&mut conn).map_err(MeterError::from)?;
        warn!(path = %self.config.path.display(), "store wiped");
        Ok(())
    }
}
