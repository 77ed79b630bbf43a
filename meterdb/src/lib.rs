//! # meterdb
//!
//! Storage and query engine for periodic meter readings.
//!
//! meterdb keeps named time series of floating-point readings in a SQLite
//! database. Each series has a sampling period, a unit and a statistical
//! type. Points are keyed by `(series, timestamp)`. Writing a key that
//! already exists replaces the value, so replaying a feed is harmless.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Idempotent writes that converge under concurrent writers
//! - Lazy, paged reads: one series as a point cursor, several as a crosstab
//!   with one column per series
//! - Series discovery by id, period, period range, type, name and unit, plus
//!   facet counts for building filters
//! - Additive schema migrations, applied atomically at open
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meterdb::{NewSeries, SeriesFilter, Store, StoreConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open(StoreConfig::new("./meter.db"))?;
//!
//! // Register a series: one reading every ten minutes
//! let temp = store
//!     .create_series(
//!         &NewSeries::new("Lab 3 temperature", Duration::from_secs(600))
//!             .ts_type("mean")
//!             .unit("C"),
//!     )
//!     .ok_or("series creation failed")?;
//!
//! // Record readings; the second write to a timestamp wins
//! store.add_value(temp, 1_700_000_000_000_000_000, 21.5);
//! store.add_value(temp, 1_700_000_600_000_000_000, 21.7);
//!
//! // Find it again and read it back
//! let celsius = store.list_series(&SeriesFilter::all().units(["c"]))?;
//! assert!(celsius.contains_key(&temp));
//!
//! for point in store.get_series_values(temp, 1_700_000_000_000_000_000..)? {
//!     let point = point?;
//!     println!("{}: {}", point.timestamp, point.value);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`]: Top-level handle; owns the connection pool
//! - [`NewSeries`] / [`SeriesInfo`]: Series definition and stored metadata
//! - [`SeriesFilter`]: Composable predicate for series discovery
//! - [`PointCursor`] / [`Crosstab`]: Lazy readers for one or many series
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`store`]: Store lifecycle and every read and write operation
//! - [`config`]: Database location and pool parameters
//! - [`schema`]: Schema version and migrations
//! - [`series`]: Series identity, types and metadata
//! - [`filter`]: Series filters
//! - [`facet`]: Facet summaries
//! - [`point`]: Points and the upsert path
//! - [`query`]: Time windows, cursors and crosstabs
//! - [`ingest`]: JSON batch ingestion
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod facet;
pub mod filter;
pub mod ingest;
pub mod point;
pub mod query;
pub mod schema;
pub mod series;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use config::{JournalMode, StoreConfig};
pub use error::{MeterError, Result};
pub use facet::{FacetColumn, FacetCount, FacetValue};
pub use filter::SeriesFilter;
pub use ingest::{IngestReport, RejectedPoint};
pub use point::{Point, StoredPoint, UpsertOutcome};
pub use query::{ColumnInfo, Crosstab, CrosstabRow, PointCursor, TimeRange, Values};
pub use series::{NewSeries, SeriesId, SeriesInfo, TsType};
pub use store::Store;
