//! Single-worker log buffer over the record store.
//!
//! The store's SQLite connection is owned by one background worker; handles
//! talk to it over a command channel. This gives the buffer its two ordering
//! properties for free:
//!
//! - writes apply in submission order (one consumer, FIFO channel), and
//! - `add` never blocks the caller (fire-and-forget send).
//!
//! Reads travel through the same channel, so a read issued concurrently with
//! pending writes may or may not observe them; there is no read-after-write
//! guarantee across the async boundary. Tests that need one call
//! [`BufferHandle::drain`] first, which round-trips a marker through the
//! queue and resolves once everything ahead of it has applied.
//!
//! ```text
//!    ┌──────────────┐
//!    │   Handles    │ (logger, delivery cycle)
//!    │   (Clone)    │
//!    └──────┬───────┘
//!           │ Commands via channel
//!           v
//!    ┌──────────────┐
//!    │ Worker thread│ (single consumer)
//!    └──────┬───────┘
//!           │ Owns connection
//!           v
//!    ┌──────────────┐
//!    │ RecordStore  │
//!    └──────────────┘
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::record::LogRecord;
use crate::store::{RecordStore, StorageError};

/// Commands processed by the buffer worker, in FIFO order.
#[derive(Debug)]
pub enum BufferCommand {
    /// Persist one record (fire-and-forget).
    Add(LogRecord),
    /// Read one batch window; the reply distinguishes a storage failure
    /// from an empty batch.
    Batch {
        batch_number: u64,
        reply: oneshot::Sender<Result<Vec<LogRecord>, StorageError>>,
    },
    /// Total record count (0 on storage failure).
    Count(oneshot::Sender<u64>),
    /// Number of stored batches (0 on storage failure).
    BatchCount(oneshot::Sender<u64>),
    /// Delete the given record ids in one statement.
    DeleteMany(Vec<i64>),
    /// Delete every stored record.
    DeleteAll,
    /// Delete records older than the given retention duration.
    PurgeExpired(Duration),
    /// Resolves once every previously queued command has applied.
    Drain(oneshot::Sender<()>),
    /// Stop the worker.
    Shutdown,
}

/// Cloneable handle to the buffer worker.
///
/// Every operation degrades to a safe default (empty, zero, no-op) when the
/// worker has shut down; only [`BufferHandle::batch`] reports that condition,
/// as [`StorageError::Unavailable`].
#[derive(Clone, Debug)]
pub struct BufferHandle {
    tx: mpsc::UnboundedSender<BufferCommand>,
}

impl BufferHandle {
    /// Queues a record for persistence without blocking the caller.
    ///
    /// Inserts apply in call order relative to each other. A record with an
    /// empty message is dropped by the store.
    pub fn add(&self, record: LogRecord) {
        if self.tx.send(BufferCommand::Add(record)).is_err() {
            debug!("Buffer worker gone, dropping log record");
        }
    }

    /// Reads one batch window (batch 1 = oldest).
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the store query failed or the worker
    /// has shut down, as distinct from an empty batch.
    pub async fn batch(&self, batch_number: u64) -> Result<Vec<LogRecord>, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BufferCommand::Batch {
                batch_number,
                reply,
            })
            .map_err(|_| StorageError::Unavailable)?;
        rx.await.map_err(|_| StorageError::Unavailable)?
    }

    /// Total number of buffered records; 0 when unavailable.
    pub async fn count(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(BufferCommand::Count(reply)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Number of buffered batches; 0 when unavailable.
    pub async fn batch_count(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(BufferCommand::BatchCount(reply)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Deletes the persisted records of `records` (ids > 0) in one statement.
    pub fn clear(&self, records: &[LogRecord]) {
        let ids: Vec<i64> = records
            .iter()
            .filter(|record| record.id > 0)
            .map(|record| record.id)
            .collect();
        if ids.is_empty() {
            return;
        }
        let _ = self.tx.send(BufferCommand::DeleteMany(ids));
    }

    /// Deletes one record by id.
    pub fn delete_one(&self, id: i64) {
        if id <= 0 {
            return;
        }
        let _ = self.tx.send(BufferCommand::DeleteMany(vec![id]));
    }

    /// Deletes every buffered record.
    pub fn clear_all(&self) {
        let _ = self.tx.send(BufferCommand::DeleteAll);
    }

    /// Queues an expiry sweep for records older than `expiry`.
    pub fn purge_expired(&self, expiry: Duration) {
        let _ = self.tx.send(BufferCommand::PurgeExpired(expiry));
    }

    /// Resolves once every command queued before this call has applied.
    ///
    /// This is the read-after-write escape hatch: `add` then `drain` then
    /// `count` observes the added record.
    pub async fn drain(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(BufferCommand::Drain(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stops the worker after the commands already queued have applied.
    pub fn shutdown(&self) {
        let _ = self.tx.send(BufferCommand::Shutdown);
    }
}

/// The worker that owns the store and processes commands sequentially.
pub struct BufferService {
    store: RecordStore,
    rx: mpsc::UnboundedReceiver<BufferCommand>,
}

impl BufferService {
    /// Creates a service and its handle without starting the worker.
    /// Most callers want [`BufferService::start`].
    #[must_use]
    pub fn new(store: RecordStore) -> (Self, BufferHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { store, rx }, BufferHandle { tx })
    }

    /// Spawns the worker on a dedicated thread and returns its handle.
    #[must_use]
    pub fn start(store: RecordStore) -> BufferHandle {
        let (service, handle) = Self::new(store);
        if let Err(e) = std::thread::Builder::new()
            .name("devicelog-buffer".to_string())
            .spawn(move || service.run())
        {
            error!("Failed to spawn buffer worker thread: {e}");
        }
        handle
    }

    /// Processes commands until shutdown or until all handles drop.
    pub fn run(mut self) {
        debug!("Log buffer worker started");

        while let Some(command) = self.rx.blocking_recv() {
            match command {
                BufferCommand::Add(mut record) => {
                    // Unexpected panics during persistence drop the record,
                    // never the worker's callers.
                    let store = &self.store;
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        store.insert(&mut record)
                    }));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("Failed to persist log record: {e}"),
                        Err(_) => error!("Persistence panicked, log record dropped"),
                    }
                }
                BufferCommand::Batch {
                    batch_number,
                    reply,
                } => {
                    let _ = reply.send(self.store.read_batch(batch_number));
                }
                BufferCommand::Count(reply) => {
                    let count = self.store.count().unwrap_or_else(|e| {
                        error!("Failed to count log records: {e}");
                        0
                    });
                    let _ = reply.send(count);
                }
                BufferCommand::BatchCount(reply) => {
                    let count = self.store.batch_count().unwrap_or_else(|e| {
                        error!("Failed to count log batches: {e}");
                        0
                    });
                    let _ = reply.send(count);
                }
                BufferCommand::DeleteMany(ids) => {
                    if let Err(e) = self.store.delete_many(&ids) {
                        error!("Failed to delete {} log records: {e}", ids.len());
                    }
                }
                BufferCommand::DeleteAll => {
                    if let Err(e) = self.store.delete_all() {
                        error!("Failed to clear log store: {e}");
                    }
                }
                BufferCommand::PurgeExpired(expiry) => {
                    if let Err(e) = self.store.purge_older_than(expiry) {
                        error!("Failed to purge expired log records: {e}");
                    }
                }
                BufferCommand::Drain(reply) => {
                    let _ = reply.send(());
                }
                BufferCommand::Shutdown => {
                    debug!("Log buffer worker shutting down");
                    break;
                }
            }
        }
    }
}
