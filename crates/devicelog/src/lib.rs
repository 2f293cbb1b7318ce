//! Device-side log buffering with durable storage and batched delivery.
//!
//! `devicelog` captures log lines on a device, persists them in a local
//! SQLite store, and ships them in batches to a remote collection endpoint.
//! Records survive restarts and network outages: a line stays in the store
//! until the endpoint acknowledges it, and stale records are purged after a
//! configurable expiry.
//!
//! The crate is organized around three pieces:
//!
//! - [`store`]: the SQLite record store, owned by a dedicated worker thread.
//! - [`buffer`]: the command channel and worker loop in front of the store.
//! - [`delivery`]: per-record HTTP delivery with supersede semantics.
//!
//! [`DeviceLogger`] is the entry point tying them together:
//!
//! ```no_run
//! use devicelog::{Config, DeviceLogger, LogLevel};
//!
//! # async fn run() -> Result<(), devicelog::Error> {
//! let logger = DeviceLogger::new(Config {
//!     store_path: Some("logs.db".into()),
//!     url: Some("https://logs.example.com/ingest".to_string()),
//!     log_level: LogLevel::Info,
//!     ..Default::default()
//! })?;
//!
//! logger.i("net", "connection established");
//! logger.e("net", "upload failed, will retry");
//!
//! let report = logger.push_logs().await;
//! println!("delivered {} records", report.delivered.len());
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod delivery;
pub mod error;
pub mod format;
pub mod logger;
pub mod record;
pub mod store;

pub use config::log_level::LogLevel;
pub use config::Config;
pub use delivery::{DeliveryCallback, DeliveryError, DeliveryReport};
pub use error::Error;
pub use format::{DefaultLogFormat, LogFormat};
pub use logger::DeviceLogger;
pub use record::LogRecord;
pub use store::BATCH_LIMIT;
