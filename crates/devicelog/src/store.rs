//! Durable record store over a SQLite `device_logs` table.
//!
//! This is the persistence leaf of the pipeline: an append-only table with an
//! auto-increment primary key, read back in insertion order through
//! offset/limit windows of [`BATCH_LIMIT`] rows. Pagination over the
//! auto-increment key gives stable, cheap ordered batching without holding
//! cursors across calls, and bounds both memory per retrieval and HTTP
//! fan-out per delivery cycle.
//!
//! # Error contract
//!
//! Every operation returns `Result<_, StorageError>` so callers can tell a
//! storage failure apart from an empty result. The public logger boundary
//! collapses these to safe defaults (zero, empty, false); nothing in this
//! module panics or propagates to the host application.
//!
//! # Schema upgrades
//!
//! The schema version is tracked in SQLite's `user_version` pragma. Any
//! version bump drops and recreates the table; buffered logs are transient
//! and are not migrated across schema versions.

use std::path::Path;

use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, error};

use crate::record::{timestamp_before, LogRecord};

/// Maximum number of records per batch.
///
/// A batch is the unit of retrieval and of delivery: one delivery cycle
/// uploads at most this many records.
pub const BATCH_LIMIT: usize = 5000;

/// Bumping this drops and recreates `device_logs` on the next open.
const SCHEMA_VERSION: i32 = 1;

const TABLE_NAME: &str = "device_logs";

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS device_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    log_level_name TEXT,
    tag TEXT,
    message TEXT,
    timestamp TEXT
)";

/// Errors internal to the persistence layer.
///
/// These never cross the public API; the logger logs them and substitutes
/// safe defaults.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The buffer worker has shut down and can no longer serve requests.
    #[error("log store worker unavailable")]
    Unavailable,
}

/// Owns the SQLite connection for the `device_logs` table.
///
/// The connection is single-owner by design: the buffer worker task holds the
/// store exclusively, which serializes all mutations (see
/// [`buffer`](crate::buffer)).
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Opens (or creates) the store at `path` and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens a transient in-memory store. Intended for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = RecordStore { conn };
        store.migrate()?;
        store.create_table();
        Ok(store)
    }

    /// Drops the table when the on-disk schema version does not match.
    /// Buffered logs are expendable; they are not migrated.
    fn migrate(&self) -> Result<(), StorageError> {
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version != SCHEMA_VERSION {
            if version != 0 {
                debug!(
                    "Schema version changed ({version} -> {SCHEMA_VERSION}), dropping {TABLE_NAME}"
                );
            }
            self.conn
                .execute(&format!("DROP TABLE IF EXISTS {TABLE_NAME}"), [])?;
            self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    /// Creates the `device_logs` table if absent. Idempotent; failures are
    /// logged and swallowed so table creation can never take down a caller.
    pub fn create_table(&self) {
        if let Err(e) = self.conn.execute(CREATE_TABLE_SQL, []) {
            error!("Failed to create {TABLE_NAME} table: {e}");
        }
    }

    /// Total number of stored records.
    pub fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {TABLE_NAME}"), [], |row| {
                row.get(0)
            })?;
        Ok(count.max(0) as u64)
    }

    /// Number of batches currently stored: `ceil(count / BATCH_LIMIT)`.
    pub fn batch_count(&self) -> Result<u64, StorageError> {
        let count = self.count()?;
        Ok(count.div_ceil(BATCH_LIMIT as u64))
    }

    /// Persists a record and assigns its store id.
    ///
    /// Records with an empty message are never persisted; the call is a
    /// silent no-op and the id stays unassigned.
    pub fn insert(&self, record: &mut LogRecord) -> Result<(), StorageError> {
        if record.message.is_empty() {
            return Ok(());
        }

        self.conn.execute(
            &format!(
                "INSERT INTO {TABLE_NAME} (log_level_name, tag, message, timestamp)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![
                record.level.as_ref(),
                record.tag,
                record.message,
                record.timestamp
            ],
        )?;
        record.id = self.conn.last_insert_rowid();
        Ok(())
    }

    /// Deletes every record whose id is in `ids`, in one statement.
    /// An empty set is a no-op.
    pub fn delete_many(&self, ids: &[i64]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(",");
        let deleted = self.conn.execute(
            &format!("DELETE FROM {TABLE_NAME} WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter()),
        )?;
        Ok(deleted)
    }

    /// Deletes a single record by id.
    pub fn delete_one(&self, id: i64) -> Result<usize, StorageError> {
        let deleted = self.conn.execute(
            &format!("DELETE FROM {TABLE_NAME} WHERE id = ?1"),
            params![id],
        )?;
        Ok(deleted)
    }

    /// Deletes every stored record.
    pub fn delete_all(&self) -> Result<usize, StorageError> {
        let deleted = self.conn.execute(&format!("DELETE FROM {TABLE_NAME}"), [])?;
        Ok(deleted)
    }

    /// Reads one batch window, ascending by insertion order.
    ///
    /// Batch 1 is the oldest window. When the store holds at most one batch
    /// worth of data the offset is forced to zero regardless of
    /// `batch_number`; callers such as the export loop rely on repeatedly
    /// asking for batch 1 as the store shrinks. A batch number past the end
    /// returns an empty vector, not an error.
    pub fn read_batch(&self, batch_number: u64) -> Result<Vec<LogRecord>, StorageError> {
        let batches = self.batch_count()?;
        let mut index = batch_number.saturating_sub(1);
        if batches <= 1 {
            index = 0;
        }
        let offset = index * BATCH_LIMIT as u64;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, log_level_name, tag, message, timestamp
             FROM {TABLE_NAME} ORDER BY id ASC LIMIT ?1 OFFSET ?2"
        ))?;

        let rows = stmt.query_map(params![BATCH_LIMIT as i64, offset as i64], |row| {
            let level_name: String = row.get(1)?;
            Ok(LogRecord {
                id: row.get(0)?,
                level: level_name.parse().unwrap_or_default(),
                tag: row.get(2)?,
                message: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Deletes all records strictly older than `now - cutoff`.
    ///
    /// A record stamped exactly at the cutoff is retained.
    pub fn purge_older_than(&self, cutoff: std::time::Duration) -> Result<usize, StorageError> {
        self.purge_before(&timestamp_before(cutoff))
    }

    /// Deletes all records stamped strictly before `threshold`, which must be
    /// in the storage timestamp format. Relies on the sortable timestamp
    /// format (see [`record`](crate::record)).
    pub fn purge_before(&self, threshold: &str) -> Result<usize, StorageError> {
        let deleted = self.conn.execute(
            &format!("DELETE FROM {TABLE_NAME} WHERE timestamp < ?1"),
            params![threshold],
        )?;
        if deleted > 0 {
            debug!("Purged {deleted} expired records older than {threshold}");
        }
        Ok(deleted)
    }
}
