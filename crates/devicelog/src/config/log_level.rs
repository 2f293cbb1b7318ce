//! Severity levels for buffered device logs.
//!
//! This module defines the `LogLevel` enum and provides parsing from strings
//! (case-insensitive) for configuration values.
//!
//! # Log Levels
//!
//! Six levels are supported, ordered from least to most severe:
//! - **VERBOSE**: extremely detailed tracing output
//! - **DEBUG**: diagnostic information useful during development
//! - **INFO**: notable events during normal operation
//! - **WARN**: hazardous situations that may lead to errors (default threshold)
//! - **ERROR**: serious failures
//! - **ASSERT**: conditions that should never happen
//!
//! # Filtering
//!
//! The logger persists a record only when its level is at or above the
//! configured minimum; everything is still echoed to the host console via
//! `tracing` regardless of the threshold.

use std::str::FromStr;

/// Severity of a buffered log record.
///
/// Ordered by severity, so `LogLevel::Error >= LogLevel::Warn` holds and the
/// minimum-level filter is a plain comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    /// Extremely detailed output, rarely persisted in production.
    Verbose,
    /// Diagnostic information useful during development.
    Debug,
    /// Notable events during normal operation.
    Info,
    /// Hazardous situations that may lead to errors.
    ///
    /// This is the **default** persistence threshold.
    #[default]
    Warn,
    /// Serious failures.
    Error,
    /// Conditions that should never happen.
    Assert,
}

impl LogLevel {
    /// All levels in ascending severity order.
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Verbose,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Assert,
    ];

    /// Maps this level to the closest `tracing` level for console emission.
    ///
    /// `Assert` has no `tracing` counterpart and maps to `ERROR`.
    #[must_use]
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Verbose => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Assert => tracing::Level::ERROR,
        }
    }
}

/// Upper-case level name, as persisted in the store's `log_level_name` column.
impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Verbose => "VERBOSE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Assert => "ASSERT",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Parses log levels from strings with case-insensitive matching.
///
/// # Errors
///
/// Returns a descriptive error string listing valid options.
impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "assert" => Ok(LogLevel::Assert),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: verbose, debug, info, warn, error, assert",
            )),
        }
    }
}
