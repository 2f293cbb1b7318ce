//! The `DeviceLogger` context: logging verbs, buffered reads, and delivery.
//!
//! A [`DeviceLogger`] wires the pieces together: it owns the buffer handle of
//! the store worker and a [`DeliveryCoordinator`], and exposes the severity
//! verbs plus the read, export, and push surfaces. It is cheap to clone and
//! every clone shares the same buffer and delivery state.
//!
//! Logging verbs always emit to the host `tracing` subscriber; persistence in
//! the store is gated on the configured minimum level. Every operation on a
//! logger whose worker has stopped degrades to a safe default instead of
//! panicking.

use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BufferHandle, BufferService};
use crate::config::log_level::LogLevel;
use crate::config::Config;
use crate::delivery::{DeliveryCallback, DeliveryCoordinator, DeliveryReport};
use crate::error::Error;
use crate::format::{DefaultLogFormat, LogFormat};
use crate::record::LogRecord;
use crate::store::RecordStore;

/// Device-side logger with a durable store and batched delivery.
#[derive(Clone)]
pub struct DeviceLogger {
    inner: Arc<Inner>,
}

struct Inner {
    buffer: BufferHandle,
    delivery: DeliveryCoordinator,
    url: RwLock<Option<String>>,
    min_level: RwLock<LogLevel>,
    format: RwLock<Arc<dyn LogFormat>>,
    expiry: Duration,
}

impl DeviceLogger {
    /// Creates a logger from `config`, opens the store, starts the buffer
    /// worker, and schedules an expiry sweep.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid configuration and
    /// [`Error::StoreOpen`] when the store cannot be opened.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;

        let store = match &config.store_path {
            Some(path) => RecordStore::open(path),
            None => RecordStore::open_in_memory(),
        }
        .map_err(|e| Error::StoreOpen(e.to_string()))?;

        let buffer = BufferService::start(store);
        buffer.purge_expired(config.expiry);

        let delivery =
            DeliveryCoordinator::new(buffer.clone(), config.request_timeout, config.device_id);

        debug!("Device logger initialized at level {}", config.log_level);

        Ok(DeviceLogger {
            inner: Arc::new(Inner {
                buffer,
                delivery,
                url: RwLock::new(config.url),
                min_level: RwLock::new(config.log_level),
                format: RwLock::new(Arc::new(DefaultLogFormat)),
                expiry: config.expiry,
            }),
        })
    }

    /// Creates a logger and, when an endpoint URL is configured, immediately
    /// runs a delivery cycle for records buffered by earlier runs.
    ///
    /// # Errors
    ///
    /// Same as [`DeviceLogger::new`].
    pub async fn init(config: Config) -> Result<Self, Error> {
        let logger = Self::new(config)?;
        if logger.url().is_some() {
            let report = logger.push_logs().await;
            debug!(
                "Startup delivery: {} delivered, {} failed",
                report.delivered.len(),
                report.failed.len()
            );
        }
        Ok(logger)
    }

    /// Logs at [`LogLevel::Verbose`].
    pub fn v(&self, tag: &str, message: &str) {
        self.log(LogLevel::Verbose, tag, message);
    }

    /// Logs at [`LogLevel::Debug`].
    pub fn d(&self, tag: &str, message: &str) {
        self.log(LogLevel::Debug, tag, message);
    }

    /// Logs at [`LogLevel::Info`].
    pub fn i(&self, tag: &str, message: &str) {
        self.log(LogLevel::Info, tag, message);
    }

    /// Logs at [`LogLevel::Warn`].
    pub fn w(&self, tag: &str, message: &str) {
        self.log(LogLevel::Warn, tag, message);
    }

    /// Logs at [`LogLevel::Error`].
    pub fn e(&self, tag: &str, message: &str) {
        self.log(LogLevel::Error, tag, message);
    }

    /// Logs at [`LogLevel::Assert`].
    pub fn a(&self, tag: &str, message: &str) {
        self.log(LogLevel::Assert, tag, message);
    }

    /// Emits `message` to the console and, at or above the configured minimum
    /// level, enqueues it for persistence. Empty messages are never persisted.
    pub fn log(&self, level: LogLevel, tag: &str, message: &str) {
        emit_console(level, tag, message);

        if level >= self.log_level() && !message.is_empty() {
            self.inner.buffer.add(LogRecord::new(level, tag, message));
        }
    }

    /// Logs `message` with `error` and its source chain appended, so the
    /// persisted record carries the full failure context.
    pub fn log_with_error(
        &self,
        level: LogLevel,
        tag: &str,
        message: &str,
        error: &dyn std::error::Error,
    ) {
        self.log(level, tag, &format!("{message}: {}", error_chain(error)));
    }

    /// Records an exceptional failure at [`LogLevel::Error`], prefixed so
    /// these stand out when scanning exported logs.
    pub fn exception(&self, tag: &str, message: &str, error: &dyn std::error::Error) {
        self.log_with_error(LogLevel::Error, tag, &format!("EXCEPTION: {message}"), error);
    }

    /// Returns the requested batch of buffered records, oldest first.
    ///
    /// `batch_number` is 1-based; while at most one batch is buffered every
    /// batch number resolves to it, and past the end the result is empty.
    /// With `delete` set, the returned records are removed from the store
    /// before this resolves.
    pub async fn logs(&self, batch_number: u64, delete: bool) -> Vec<LogRecord> {
        let records = match self.inner.buffer.batch(batch_number).await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to read log batch {batch_number}: {e}");
                return Vec::new();
            }
        };

        if delete && !records.is_empty() {
            self.inner.buffer.clear(&records);
            // Settle the deletion so a follow-up read never sees the batch.
            self.inner.buffer.drain().await;
        }

        records
    }

    /// Like [`logs`](Self::logs), rendered through the active formatter.
    pub async fn logs_as_strings(&self, batch_number: u64, delete: bool) -> Vec<String> {
        let records = self.logs(batch_number, delete).await;
        let format = Arc::clone(&read_lock(&self.inner.format));
        records.iter().map(|record| format.format(record)).collect()
    }

    /// Drains the whole store into a text file, one formatted line per
    /// record, oldest first. Records are deleted batch by batch as they are
    /// written, so an IO failure loses at most the batch being written.
    ///
    /// Returns the number of lines written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] when the file cannot be created or written.
    pub async fn export_to_file(&self, path: impl AsRef<Path>) -> Result<usize, Error> {
        use std::io::Write;

        let mut file = std::fs::File::create(path)?;
        let mut written = 0;

        // Bounded by the starting batch count so a failing delete cannot
        // turn this into an endless loop.
        let mut passes = self.batch_count().await;
        while passes > 0 {
            let lines = self.logs_as_strings(1, true).await;
            if lines.is_empty() {
                break;
            }
            for line in &lines {
                writeln!(file, "{line}")?;
            }
            written += lines.len();
            passes -= 1;
        }

        file.flush()?;
        info!("Exported {written} log records");
        Ok(written)
    }

    /// Number of buffered records.
    pub async fn count(&self) -> u64 {
        self.inner.buffer.count().await
    }

    /// Number of batches the buffered records span.
    pub async fn batch_count(&self) -> u64 {
        self.inner.buffer.batch_count().await
    }

    /// Whether any records are buffered.
    pub async fn has_pending(&self) -> bool {
        self.count().await > 0
    }

    /// Runs one delivery cycle against the configured URL.
    ///
    /// With no URL configured this is a no-op that resolves to an empty
    /// report. See [`DeliveryCoordinator::deliver`] for the cycle semantics.
    pub async fn push_logs(&self) -> DeliveryReport {
        self.push_logs_with(None).await
    }

    /// Like [`push_logs`](Self::push_logs), invoking `callback` exactly once
    /// with the final report.
    pub async fn push_logs_with(&self, callback: Option<DeliveryCallback>) -> DeliveryReport {
        let Some(url) = self.url() else {
            warn!("No endpoint URL configured, skipping delivery");
            let report = DeliveryReport::default();
            if let Some(callback) = callback {
                callback(&report);
            }
            return report;
        };

        self.inner.delivery.deliver(&url, callback).await
    }

    /// Cancels the in-flight delivery cycle, if any. Records of the cancelled
    /// cycle stay buffered.
    pub fn cancel_delivery(&self) {
        self.inner.delivery.cancel_inflight();
    }

    /// The configured endpoint URL.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        read_lock(&self.inner.url).clone()
    }

    /// Sets the endpoint URL for subsequent delivery cycles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `url` is empty or whitespace.
    pub fn set_url(&self, url: &str) -> Result<(), Error> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidConfig(
                "endpoint URL cannot be empty".to_string(),
            ));
        }
        *write_lock(&self.inner.url) = Some(url.to_string());
        Ok(())
    }

    /// The minimum level at which records are persisted.
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        *read_lock(&self.inner.min_level)
    }

    /// Sets the minimum level at which records are persisted.
    pub fn set_log_level(&self, level: LogLevel) {
        *write_lock(&self.inner.min_level) = level;
    }

    /// Replaces the formatter used by [`logs_as_strings`](Self::logs_as_strings)
    /// and [`export_to_file`](Self::export_to_file).
    pub fn set_format(&self, format: Arc<dyn LogFormat>) {
        *write_lock(&self.inner.format) = format;
    }

    /// Deletes every buffered record.
    pub fn delete_all(&self) {
        self.inner.buffer.clear_all();
    }

    /// The configured retention duration.
    #[must_use]
    pub fn expiry(&self) -> Duration {
        self.inner.expiry
    }

    /// Deletes records older than the configured expiry.
    pub fn purge_expired(&self) {
        self.inner.buffer.purge_expired(self.inner.expiry);
    }

    /// Waits until every previously enqueued write has been applied.
    pub async fn drain(&self) {
        self.inner.buffer.drain().await;
    }

    /// Stops the buffer worker. Later operations degrade to safe defaults.
    pub fn shutdown(&self) {
        self.inner.buffer.shutdown();
    }
}

// The tracing macros need a const level, so this dispatches on the
// level mapping instead of taking it as a value.
fn emit_console(level: LogLevel, tag: &str, message: &str) {
    match level.as_tracing_level() {
        tracing::Level::TRACE => trace!(target: "device_log", "{tag}: {message}"),
        tracing::Level::DEBUG => debug!(target: "device_log", "{tag}: {message}"),
        tracing::Level::INFO => info!(target: "device_log", "{tag}: {message}"),
        tracing::Level::WARN => warn!(target: "device_log", "{tag}: {message}"),
        _ => error!(target: "device_log", "{tag}: {message}"),
    }
}

/// Renders an error and its `source` chain as a single line.
fn error_chain(error: &dyn std::error::Error) -> String {
    use std::fmt::Write;

    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(chain, ": {cause}");
        source = cause.source();
    }
    chain
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_logger(level: LogLevel) -> DeviceLogger {
        DeviceLogger::new(Config {
            log_level: level,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_below_threshold_is_not_persisted() {
        let logger = in_memory_logger(LogLevel::Warn);

        logger.i("net", "connected");
        logger.d("net", "handshake");
        logger.drain().await;

        assert_eq!(logger.count().await, 0);
        assert!(!logger.has_pending().await);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_at_and_above_threshold_persist() {
        let logger = in_memory_logger(LogLevel::Warn);

        logger.w("net", "slow link");
        logger.e("net", "dropped");
        logger.a("net", "invariant broken");
        logger.drain().await;

        assert_eq!(logger.count().await, 3);
        assert!(logger.has_pending().await);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_set_log_level_changes_the_gate() {
        let logger = in_memory_logger(LogLevel::Error);

        logger.i("app", "ignored");
        logger.set_log_level(LogLevel::Verbose);
        logger.v("app", "captured");
        logger.drain().await;

        assert_eq!(logger.count().await, 1);
        logger.shutdown();
    }

    #[derive(Debug)]
    struct FailedUpload {
        cause: std::io::Error,
    }

    impl std::fmt::Display for FailedUpload {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("upload failed")
        }
    }

    impl std::error::Error for FailedUpload {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.cause)
        }
    }

    fn upload_error() -> FailedUpload {
        FailedUpload {
            cause: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
        }
    }

    #[tokio::test]
    async fn test_log_with_error_appends_the_source_chain() {
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.log_with_error(LogLevel::Warn, "sync", "retrying", &upload_error());
        logger.drain().await;

        let records = logger.logs(1, false).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Warn);
        assert_eq!(
            records[0].message,
            "retrying: upload failed: connection reset"
        );
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_exception_persists_at_error_level() {
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.exception("sync", "push aborted", &upload_error());
        logger.drain().await;

        let records = logger.logs(1, false).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(
            records[0].message,
            "EXCEPTION: push aborted: upload failed: connection reset"
        );
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_log_with_error_respects_the_threshold() {
        let logger = in_memory_logger(LogLevel::Error);

        logger.log_with_error(LogLevel::Info, "sync", "retrying", &upload_error());
        logger.drain().await;

        assert_eq!(logger.count().await, 0);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_empty_message_is_not_persisted() {
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.e("app", "");
        logger.drain().await;

        assert_eq!(logger.count().await, 0);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_logs_with_delete_drains_the_batch() {
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.i("app", "one");
        logger.i("app", "two");
        logger.drain().await;

        let records = logger.logs(1, true).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "one");
        assert_eq!(logger.count().await, 0);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_logs_without_delete_keeps_records() {
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.i("app", "kept");
        logger.drain().await;

        let first = logger.logs(1, false).await;
        let second = logger.logs(1, false).await;
        assert_eq!(first, second);
        assert_eq!(logger.count().await, 1);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_logs_as_strings_uses_active_formatter() {
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.e("sync", "upload failed");
        logger.drain().await;

        let default_lines = logger.logs_as_strings(1, false).await;
        assert_eq!(default_lines.len(), 1);
        assert!(default_lines[0].contains("ERROR | sync: upload failed"));

        struct MessageOnly;
        impl LogFormat for MessageOnly {
            fn format(&self, record: &LogRecord) -> String {
                record.message.clone()
            }
        }
        logger.set_format(Arc::new(MessageOnly));

        let custom_lines = logger.logs_as_strings(1, false).await;
        assert_eq!(custom_lines, vec!["upload failed".to_string()]);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_export_to_file_drains_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.txt");
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.e("sync", "first");
        logger.e("sync", "second");
        logger.e("sync", "third");
        logger.drain().await;

        let written = logger.export_to_file(&path).await.unwrap();

        assert_eq!(written, 3);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.contains("sync: first"));
        assert_eq!(logger.count().await, 0);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_export_empty_store_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.txt");
        let logger = in_memory_logger(LogLevel::Verbose);

        let written = logger.export_to_file(&path).await.unwrap();

        assert_eq!(written, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_set_url_rejects_empty() {
        let logger = in_memory_logger(LogLevel::Verbose);

        assert!(logger.set_url("").is_err());
        assert!(logger.set_url("   ").is_err());
        assert_eq!(logger.url(), None);

        logger.set_url("https://logs.example.com/ingest").unwrap();
        assert_eq!(
            logger.url().as_deref(),
            Some("https://logs.example.com/ingest")
        );
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_push_logs_without_url_is_a_noop() {
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.e("app", "stranded");
        logger.drain().await;

        let report = logger.push_logs().await;

        assert_eq!(report.total(), 0);
        assert_eq!(logger.count().await, 1);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_push_logs_delivers_and_deletes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let logger = in_memory_logger(LogLevel::Verbose);
        logger.set_url(&format!("{}/ingest", server.url())).unwrap();

        logger.e("app", "one");
        logger.e("app", "two");
        logger.drain().await;

        let report = logger.push_logs().await;

        assert_eq!(report.delivered.len(), 2);
        assert!(report.failed.is_empty());
        mock.assert_async().await;

        logger.drain().await;
        assert_eq!(logger.count().await, 0);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_delete_all_clears_the_store() {
        let logger = in_memory_logger(LogLevel::Verbose);

        logger.e("app", "one");
        logger.e("app", "two");
        logger.drain().await;
        assert_eq!(logger.count().await, 2);

        logger.delete_all();
        logger.drain().await;
        assert_eq!(logger.count().await, 0);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let logger = in_memory_logger(LogLevel::Verbose);
        let other = logger.clone();

        logger.e("app", "shared");
        other.drain().await;

        assert_eq!(other.count().await, 1);
        other.set_log_level(LogLevel::Assert);
        assert_eq!(logger.log_level(), LogLevel::Assert);
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_expiry_reports_configured_retention() {
        let logger = DeviceLogger::new(Config {
            expiry: Duration::from_secs(3600),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(logger.expiry(), Duration::from_secs(3600));
        logger.shutdown();
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let result = DeviceLogger::new(Config {
            url: Some(String::new()),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_on_disk_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");

        {
            let logger = DeviceLogger::new(Config {
                store_path: Some(path.clone()),
                log_level: LogLevel::Verbose,
                ..Default::default()
            })
            .unwrap();
            logger.e("app", "persisted");
            logger.drain().await;
            logger.shutdown();
        }

        let logger = DeviceLogger::new(Config {
            store_path: Some(path),
            log_level: LogLevel::Verbose,
            ..Default::default()
        })
        .unwrap();
        logger.drain().await;
        assert_eq!(logger.count().await, 1);
        assert_eq!(logger.logs(1, false).await[0].message, "persisted");
        logger.shutdown();
    }
}
