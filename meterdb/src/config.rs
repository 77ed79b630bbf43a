//! Configuration for opening a meterdb [`Store`](crate::store::Store).
//!
//! The store consumes nothing from its environment except this object: the
//! location of the SQLite database and the parameters of the connection pool
//! built over it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// SQLite journal mode applied to every pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log. Readers do not block the single writer.
    #[default]
    Wal,
    /// Rollback journal, deleted at the end of each transaction.
    Delete,
}

impl JournalMode {
    /// Returns the value passed to `PRAGMA journal_mode`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters for the backing store.
///
/// # Example
///
/// ```rust
/// use meterdb::config::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig {
///     max_connections: 4,
///     busy_timeout: Duration::from_secs(2),
///     ..StoreConfig::new("/var/lib/meterdb/meter.db")
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file. Created on first open.
    pub path: PathBuf,

    /// Maximum number of pooled connections.
    pub max_connections: u32,

    /// How long a caller waits to check a connection out of the pool.
    pub connection_timeout: Duration,

    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,

    /// Journal mode for every connection.
    pub journal_mode: JournalMode,

    /// Rows fetched per page by streaming reads.
    pub fetch_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("meterdb.sqlite"),
            max_connections: 8,
            connection_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            journal_mode: JournalMode::Wal,
            fetch_batch_size: 1000,
        }
    }
}

impl StoreConfig {
    /// Creates a config for the database at `path` with default pool settings.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Loads a config from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not a valid config, and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that pool and paging parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_connections must be > 0".to_string(),
            }
            .into());
        }
        if self.fetch_batch_size == 0 {
            return Err(ConfigError::Invalid {
                reason: "fetch_batch_size must be > 0".to_string(),
            }
            .into());
        }
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "path must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Prepares a freshly opened pooled connection.
    pub(crate) fn apply_pragmas(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", self.journal_mode.as_str())
    }
}
