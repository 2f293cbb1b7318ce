//! Configuration for the device logger.
//!
//! A [`Config`] is handed to [`DeviceLogger::new`](crate::logger::DeviceLogger::new)
//! when the logger context is created. Everything except the store path can be
//! changed later through the logger's setters.

pub mod log_level;

use std::path::PathBuf;
use std::time::Duration;

use crate::config::log_level::LogLevel;
use crate::error::Error;

/// Default retention for buffered records: seven days.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default per-request timeout for delivery POSTs.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`DeviceLogger`](crate::logger::DeviceLogger) instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite store file. `None` uses an in-memory store, which
    /// loses records on shutdown and is intended for tests.
    pub store_path: Option<PathBuf>,
    /// Endpoint URL logs are delivered to. Delivery is a no-op until set.
    pub url: Option<String>,
    /// Minimum level at which records are persisted.
    pub log_level: LogLevel,
    /// Records older than this are purged on initialization and by
    /// [`purge_expired`](crate::logger::DeviceLogger::purge_expired).
    pub expiry: Duration,
    /// Timeout applied to every delivery request.
    pub request_timeout: Duration,
    /// Optional device identifier included in every delivery payload.
    pub device_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: None,
            url: None,
            log_level: LogLevel::default(),
            expiry: DEFAULT_EXPIRY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            device_id: None,
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the URL is set but empty, or the
    /// expiry or request timeout is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(url) = &self.url {
            if url.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "endpoint URL cannot be empty".to_string(),
                ));
            }
        }

        if self.expiry.is_zero() {
            return Err(Error::InvalidConfig(
                "expiry must be greater than zero".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
