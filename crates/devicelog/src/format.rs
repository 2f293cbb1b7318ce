//! Pluggable rendering of stored records to display lines.

use crate::record::{display_timestamp, LogRecord};

/// Renders a stored record as a single display line.
///
/// Implementations are shared across threads by the logger, so they must be
/// `Send + Sync`. Swap the active formatter with
/// [`set_format`](crate::logger::DeviceLogger::set_format).
pub trait LogFormat: Send + Sync {
    fn format(&self, record: &LogRecord) -> String;
}

/// Default `timestamp | LEVEL | tag: message` rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLogFormat;

impl LogFormat for DefaultLogFormat {
    fn format(&self, record: &LogRecord) -> String {
        format!(
            "{} | {} | {}: {}",
            display_timestamp(&record.timestamp),
            record.level,
            record.tag,
            record.message
        )
    }
}
