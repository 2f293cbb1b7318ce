/// Errors surfaced to applications embedding the device logger.
///
/// Storage problems are deliberately absent from most of the public API: they
/// are logged and collapsed to safe defaults (zero counts, empty batches) so
/// a logging failure can never crash the host application. The variants here
/// cover the few places where an error is the correct answer: configuration
/// setters, initial store creation, and file export.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open log store: {0}")]
    StoreOpen(String),

    #[error("Log export failed: {0}")]
    Export(#[from] std::io::Error),
}
