//! The buffered log record and its timestamp handling.
//!
//! Records carry their wall-clock timestamp as a fixed-format string in the
//! sortable `%Y-%m-%d %H:%M:%S%.3f` form, so insertion-time ordering and the
//! expiry sweep's `timestamp < cutoff` comparison both work lexicographically.
//! A human-oriented rendering (`26 Aug 03:14:07:120 PM`) is available through
//! [`display_timestamp`] for formatted output.

use std::time::Duration;

use chrono::{NaiveDateTime, Utc};

use crate::config::log_level::LogLevel;

/// Storage format for record timestamps. Lexicographic order matches
/// chronological order, which the expiry sweep relies on.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Human-oriented timestamp format used by the default log formatter.
const DISPLAY_TIMESTAMP_FORMAT: &str = "%d %b %I:%M:%S:%3f %p";

/// A single buffered log line.
///
/// `id` is assigned by the store on insert and stays `0` until then. Ids are
/// auto-increment and never reused, so they are the only stable reference for
/// deletion. Records are never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Store-assigned identifier; `0` before the record is persisted.
    pub id: i64,
    /// Severity of the record.
    pub level: LogLevel,
    /// Short category string.
    pub tag: String,
    /// Log text. Records with an empty message are never persisted.
    pub message: String,
    /// Wall-clock timestamp in [`TIMESTAMP_FORMAT`].
    pub timestamp: String,
}

impl LogRecord {
    /// Creates an unpersisted record stamped with the current wall-clock time.
    #[must_use]
    pub fn new(level: LogLevel, tag: impl Into<String>, message: impl Into<String>) -> Self {
        LogRecord {
            id: 0,
            level,
            tag: tag.into(),
            message: message.into(),
            timestamp: current_timestamp(),
        }
    }

    /// Whether the record has been assigned a store id.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }
}

/// Current wall-clock time in the storage format.
pub(crate) fn current_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// The storage-format timestamp of `age` ago, used as the expiry cutoff.
pub(crate) fn timestamp_before(age: Duration) -> String {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::days(36500));
    cutoff.format(TIMESTAMP_FORMAT).to_string()
}

/// Renders a stored timestamp in the display format.
///
/// Falls back to the raw stored string when it does not parse, so formatted
/// output never fails on a hand-written or legacy timestamp.
#[must_use]
pub fn display_timestamp(timestamp: &str) -> String {
    match NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT) {
        Ok(parsed) => parsed.format(DISPLAY_TIMESTAMP_FORMAT).to_string(),
        Err(_) => timestamp.to_string(),
    }
}
