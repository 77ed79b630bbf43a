//! Schema versioning and migrations for the backing SQLite database.
//!
//! The database records a single integer schema version in the `version`
//! table. Version 0 means the table is absent and nothing has been created.
//! At open time the store compares that number with [`CURRENT_VERSION`] and,
//! if it is behind, applies every migration from `found + 1` up to the
//! current version.
//!
//! # Migration chain
//!
//! | version | change                                                    |
//! |---------|-----------------------------------------------------------|
//! | 1       | `version`, `series` and `data` tables                     |
//! | 2       | `name`, `description`, `unit` on `series`                 |
//! | 3       | `(stamp, series_id)` index on `data` for ordered merges   |
//!
//! The whole upgrade, including the version bump, runs in one transaction.
//! A failure at any step leaves the database exactly as it was.

use rusqlite::{Connection, TransactionBehavior, params};
use tracing::info;

use crate::error::{Result, SchemaError};

/// Schema version this build reads and writes.
pub const CURRENT_VERSION: u32 = 3;

/// A single additive step in the schema history.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version reached once this step has been applied.
    pub version: u32,
    /// Human-readable summary, used in logs.
    pub description: &'static str,
    /// Statements executed as one batch.
    pub sql: &'static str,
}

/// Every migration, ordered by version. No step may be skipped.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create version, series and data tables",
        sql: "
            CREATE TABLE version (version INTEGER NOT NULL);
            INSERT INTO version (version) VALUES (0);

            CREATE TABLE series (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                period    INTEGER NOT NULL CHECK (period > 0),
                epoch     INTEGER NOT NULL,
                ts_type   TEXT    NOT NULL
                          CHECK (ts_type IN ('point', 'mean', 'stdev', 'count')),
                get_limit INTEGER NOT NULL CHECK (get_limit > 0)
            );

            CREATE TABLE data (
                series_id INTEGER NOT NULL
                          REFERENCES series (id) ON DELETE CASCADE ON UPDATE CASCADE,
                stamp     INTEGER NOT NULL,
                ingest    INTEGER NOT NULL,
                value     REAL    NOT NULL,
                PRIMARY KEY (series_id, stamp)
            );
        ",
    },
    Migration {
        version: 2,
        description: "add series name, description and unit",
        sql: "
            ALTER TABLE series ADD COLUMN name        TEXT NOT NULL DEFAULT '';
            ALTER TABLE series ADD COLUMN description TEXT NOT NULL DEFAULT '';
            ALTER TABLE series ADD COLUMN unit        TEXT NOT NULL DEFAULT '';
            CREATE INDEX series_unit_idx ON series (unit COLLATE NOCASE);
        ",
    },
    Migration {
        version: 3,
        description: "index data by (stamp, series_id)",
        sql: "
            CREATE INDEX data_stamp_idx ON data (stamp, series_id);
        ",
    },
];

/// Tables owned by the store, in drop order.
pub(crate) const OWNED_TABLES: &[&str] = &["data", "series", "version"];

/// Returns the schema version recorded in the database, or 0 if none.
///
/// # Errors
///
/// Returns [`SchemaError::Inspect`] if the catalog or the version row
/// cannot be read.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let inspect = |source| SchemaError::Inspect { source };

    let has_table: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'version'",
            [],
            |row| row.get(0),
        )
        .map_err(inspect)?;
    if !has_table {
        return Ok(0);
    }

    let version: u32 = conn
        .query_row("SELECT version FROM version", [], |row| row.get(0))
        .map_err(inspect)?;
    Ok(version)
}

/// Upgrades the database from `from` to [`CURRENT_VERSION`].
///
/// Returns the version reached. Calling this on an up-to-date database is a
/// no-op.
///
/// # Errors
///
/// - [`SchemaError::UnsupportedVersion`] if `from` is newer than this build
/// - [`SchemaError::MigrationFailed`] if any step fails; nothing is applied
pub fn upgrade(conn: &mut Connection, from: u32) -> Result<u32> {
    upgrade_to(conn, from, CURRENT_VERSION)
}

/// Upgrades the database from `from` to `target`, which must not exceed
/// [`CURRENT_VERSION`].
///
/// `from` is what the caller saw before taking the write lock. Another
/// connection may have migrated in the meantime, so the version is read
/// again inside the transaction and that reading wins.
pub(crate) fn upgrade_to(conn: &mut Connection, from: u32, target: u32) -> Result<u32> {
    check_supported(from)?;
    if from >= target {
        return Ok(from);
    }

    let begin_failed = |source| SchemaError::MigrationFailed {
        version: from + 1,
        source,
    };
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(begin_failed)?;

    let from = current_version(&tx)?;
    check_supported(from)?;
    if from >= target {
        return Ok(from);
    }

    info!(from, to = target, "upgrading database schema");

    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > from && m.version <= target)
    {
        let failed = |source| SchemaError::MigrationFailed {
            version: migration.version,
            source,
        };
        info!(
            version = migration.version,
            "applying migration: {}", migration.description
        );
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute("UPDATE version SET version = ?1", params![migration.version])
            .map_err(failed)?;
    }

    tx.commit().map_err(|source| SchemaError::MigrationFailed {
        version: target,
        source,
    })?;

    Ok(target)
}

fn check_supported(found: u32) -> Result<()> {
    if found > CURRENT_VERSION {
        return Err(SchemaError::UnsupportedVersion {
            found,
            supported: CURRENT_VERSION,
        }
        .into());
    }
    Ok(())
}

/// Drops every store-owned table. The database is back at version 0.
pub(crate) fn drop_all(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for table in OWNED_TABLES {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    }
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeterError;

    fn column_names(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn test_migrations_are_contiguous() {
        for (index, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, index + 1);
        }
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(CURRENT_VERSION));
    }

    #[test]
    fn test_empty_database_is_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_upgrade_from_scratch() {
        let mut conn = Connection::open_in_memory().unwrap();

        let reached = upgrade(&mut conn, 0).unwrap();
        assert_eq!(reached, CURRENT_VERSION);
        assert_eq!(current_version(&conn).unwrap(), CURRENT_VERSION);

        let columns = column_names(&conn, "series");
        for expected in ["id", "period", "epoch", "ts_type", "get_limit", "name", "unit"] {
            assert!(columns.iter().any(|c| c == expected), "missing column {expected}");
        }
    }

    #[test]
    fn test_upgrade_is_noop_when_current() {
        let mut conn = Connection::open_in_memory().unwrap();
        upgrade(&mut conn, 0).unwrap();
        assert_eq!(upgrade(&mut conn, CURRENT_VERSION).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_upgrade_preserves_existing_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        upgrade_to(&mut conn, 0, 1).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);

        conn.execute(
            "INSERT INTO series (period, epoch, ts_type, get_limit) VALUES (1800000000000, 0, 'point', 1000)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO data (series_id, stamp, ingest, value) VALUES (1, 10, 11, 134.6)",
            [],
        )
        .unwrap();

        upgrade(&mut conn, 1).unwrap();

        let (name, unit): (String, String) = conn
            .query_row("SELECT name, unit FROM series WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "");
        assert_eq!(unit, "");

        let value: f64 = conn
            .query_row("SELECT value FROM data WHERE series_id = 1", [], |row| row.get(0))
            .unwrap();
        assert!((value - 134.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failed_step_rolls_back_whole_upgrade() {
        let mut conn = Connection::open_in_memory().unwrap();
        upgrade_to(&mut conn, 0, 1).unwrap();

        // Occupy the name migration 2 wants for its index.
        conn.execute_batch("CREATE TABLE series_unit_idx (x INTEGER);")
            .unwrap();

        match upgrade(&mut conn, 1) {
            Err(MeterError::Schema(SchemaError::MigrationFailed { version, .. })) => {
                assert_eq!(version, 2);
            }
            other => panic!("expected MigrationFailed, got {other:?}"),
        }

        assert_eq!(current_version(&conn).unwrap(), 1);
        let columns = column_names(&conn, "series");
        assert!(!columns.iter().any(|c| c == "name"));
    }

    #[test]
    fn test_stale_caller_version_is_rechecked_under_lock() {
        let mut conn = Connection::open_in_memory().unwrap();
        upgrade(&mut conn, 0).unwrap();

        // The caller read 0 before another connection finished migrating.
        assert_eq!(upgrade(&mut conn, 0).unwrap(), CURRENT_VERSION);
        assert_eq!(current_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_database_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        upgrade(&mut conn, 0).unwrap();
        conn.execute("UPDATE version SET version = ?1", params![CURRENT_VERSION + 1])
            .unwrap();

        let found = current_version(&conn).unwrap();
        match upgrade(&mut conn, found) {
            Err(MeterError::Schema(SchemaError::UnsupportedVersion { found, supported })) => {
                assert_eq!(found, CURRENT_VERSION + 1);
                assert_eq!(supported, CURRENT_VERSION);
            }
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_all_returns_to_version_zero() {
        let mut conn = Connection::open_in_memory().unwrap();
        upgrade(&mut conn, 0).unwrap();

        drop_all(&mut conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);

        upgrade(&mut conn, 0).unwrap();
        assert_eq!(current_version(&conn).unwrap(), CURRENT_VERSION);
    }
}
