//! Error types for the meterdb time-series store.
//!
//! Errors fall into two classes. Validation errors are raised before any
//! store mutation and describe bad caller input. Store, schema and config
//! errors come from the backing SQLite database or its setup and carry the
//! original error as their source.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::series::SeriesId;

/// The main error type for all meterdb operations.
#[derive(Error, Debug)]
pub enum MeterError {
    /// Caller input was rejected before touching the store.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The backing store failed or refused an operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Schema inspection or migration failed.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The store configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl MeterError {
    /// Returns `true` if this error was raised by input validation, meaning
    /// the store was never touched.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns `true` if this error reports a missing series.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::SeriesNotFound { .. }))
    }
}

impl From<rusqlite::Error> for MeterError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

impl From<r2d2::Error> for MeterError {
    fn from(err: r2d2::Error) -> Self {
        Self::Store(StoreError::Pool(err))
    }
}

/// Input rejected before any store mutation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The series type is not one of `point`, `mean`, `stdev`, `count`.
    #[error("invalid ts_type '{value}': expected one of point, mean, stdev, count")]
    InvalidTsType {
        /// The rejected type name.
        value: String,
    },

    /// A data value is not a number.
    #[error("non-numeric value: {value}")]
    NonNumericValue {
        /// Textual form of the rejected value.
        value: String,
    },

    /// The facet column is not one of the summarisable columns.
    #[error("unknown facet column '{column}': expected one of period, units, ts_type")]
    UnknownFacetColumn {
        /// The rejected column name.
        column: String,
    },

    /// The period does not fit the store's nanosecond representation.
    #[error("period {period:?} is out of range")]
    PeriodOutOfRange {
        /// The rejected period.
        period: Duration,
    },

    /// The retrieval cap must be positive.
    #[error("invalid get_limit {limit}: must be > 0")]
    InvalidGetLimit {
        /// The rejected limit.
        limit: u32,
    },

    /// A value query named no series.
    #[error("at least one series id is required")]
    EmptySeriesList,

    /// A crosstab query named the same series twice.
    #[error("series {id} requested more than once")]
    DuplicateSeries {
        /// The repeated id.
        id: SeriesId,
    },

    /// A batch body does not have the expected shape.
    #[error("invalid batch: {reason}")]
    InvalidBatch {
        /// What was wrong with the batch.
        reason: String,
    },
}

/// Failures reported by the backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite returned an error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No pooled connection could be obtained.
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    /// The referenced series does not exist.
    #[error("series {id} not found")]
    SeriesNotFound {
        /// The missing id.
        id: SeriesId,
    },
}

/// Errors from the schema manager.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The database was written by a newer schema than this build knows.
    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version recorded in the database.
        found: u32,
        /// Highest version this build can handle.
        supported: u32,
    },

    /// A migration step failed; the whole upgrade was rolled back.
    #[error("migration to version {version} failed: {source}")]
    MigrationFailed {
        /// The step that failed.
        version: u32,
        /// The underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// The current schema version could not be read.
    #[error("failed to read schema version: {source}")]
    Inspect {
        /// The underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
}

/// Errors loading or validating a [`StoreConfig`](crate::config::StoreConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for a store config.
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A config value is out of range.
    #[error("invalid config: {reason}")]
    Invalid {
        /// Which value was invalid and why.
        reason: String,
    },
}

/// Type alias for `Result<T, MeterError>`.
pub type Result<T> = std::result::Result<T, MeterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_distinguishable_from_store_failure() {
        let validation: MeterError = ValidationError::EmptySeriesList.into();
        let store: MeterError = StoreError::SeriesNotFound { id: SeriesId(7) }.into();

        assert!(validation.is_validation());
        assert!(!store.is_validation());
        assert!(store.is_not_found());
    }

    #[test]
    fn test_error_messages_name_the_input() {
        let err = ValidationError::InvalidTsType {
            value: "bogus".to_string(),
        };
        assert!(err.to_string().contains("bogus"));

        let err = MeterError::from(StoreError::SeriesNotFound { id: SeriesId(42) });
        assert_eq!(err.to_string(), "store error: series 42 not found");
    }
}
