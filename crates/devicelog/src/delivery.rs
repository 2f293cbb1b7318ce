//! Delivery of buffered records to the collection endpoint.
//!
//! One delivery cycle pulls the oldest batch from the buffer, issues one POST
//! per record with concurrent fan-out, and deletes each record as soon as its
//! acknowledgement arrives. Failed records stay in the store for the next
//! cycle; there is no automatic retry or backoff.
//!
//! # Supersede semantics
//!
//! Starting a cycle cancels the in-flight requests of the previous one and
//! bumps a generation counter. A resolution is applied to the store only if
//! it still carries the current generation, so a late acknowledgement from a
//! superseded cycle can never delete a record the new cycle is re-sending.
//!
//! ```text
//!   Buffer ──batch 1──> Dispatch (JoinSet, one POST per record)
//!                          │ per-record resolution, any order
//!                          v
//!              success ──> delete id, success list
//!              failure ──> failure list (record stays)
//!                          │ all resolved
//!                          v
//!              completion report (exactly once per cycle)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::BufferHandle;
use crate::record::LogRecord;

/// Per-record delivery failure.
///
/// Carries a human-readable message plus, for application-level rejections,
/// the HTTP status and response body.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct DeliveryError {
    /// Human-readable description of the failure.
    pub message: String,
    /// HTTP status code, when a response was received.
    pub status: Option<u16>,
    /// Response body, when one was received and non-empty.
    pub body: Option<String>,
}

impl DeliveryError {
    fn transport(e: &reqwest::Error) -> Self {
        DeliveryError {
            message: format!("request failed: {e}"),
            status: e.status().map(|s| s.as_u16()),
            body: None,
        }
    }

    fn rejected(status: reqwest::StatusCode, body: Option<String>) -> Self {
        DeliveryError {
            message: format!("endpoint rejected record: {status}"),
            status: Some(status.as_u16()),
            body,
        }
    }

    fn superseded() -> Self {
        DeliveryError {
            message: "superseded by a newer delivery cycle".to_string(),
            status: None,
            body: None,
        }
    }
}

/// Outcome of one delivery cycle, produced exactly once per cycle.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Records acknowledged by the endpoint and deleted from the store.
    pub delivered: Vec<LogRecord>,
    /// Records that failed and remain buffered for the next cycle.
    pub failed: Vec<(LogRecord, DeliveryError)>,
}

impl DeliveryReport {
    /// Number of records dispatched in the cycle.
    #[must_use]
    pub fn total(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Completion callback invoked once per cycle with the final report.
pub type DeliveryCallback = Box<dyn FnOnce(&DeliveryReport) + Send>;

/// JSON payload for one record, one POST per record.
#[derive(Debug, Serialize)]
struct RecordPayload {
    log_level_name: String,
    tag: String,
    message: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
}

impl RecordPayload {
    fn new(record: &LogRecord, device_id: Option<&str>) -> Self {
        RecordPayload {
            log_level_name: record.level.as_ref().to_string(),
            tag: record.tag.clone(),
            message: record.message.clone(),
            timestamp: record.timestamp.clone(),
            device_id: device_id.map(str::to_string),
        }
    }
}

/// Runs delivery cycles against a configured endpoint.
pub struct DeliveryCoordinator {
    client: reqwest::Client,
    buffer: BufferHandle,
    /// Current cycle generation; resolutions from older generations are stale.
    generation: AtomicU64,
    /// Cancellation token of the in-flight cycle, if any.
    active: Mutex<Option<CancellationToken>>,
    device_id: Option<String>,
}

impl DeliveryCoordinator {
    #[must_use]
    pub fn new(buffer: BufferHandle, request_timeout: Duration, device_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build delivery HTTP client, using defaults: {e}");
                reqwest::Client::new()
            });

        DeliveryCoordinator {
            client,
            buffer,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
            device_id,
        }
    }

    /// Cancels the in-flight cycle, if any, and invalidates its pending
    /// resolutions. The next cycle does this implicitly.
    pub fn cancel_inflight(&self) {
        let _ = self.begin_cycle();
    }

    /// Starts a new cycle generation, superseding the previous one.
    fn begin_cycle(&self) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let previous = {
            let mut active = self.active.lock().unwrap_or_else(|poisoned| {
                // A panicked cycle left the lock poisoned; the token inside
                // is still valid to replace.
                poisoned.into_inner()
            });
            active.replace(token.clone())
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
        (generation, token)
    }

    /// Runs one delivery cycle against `url`.
    ///
    /// Fetches batch 1, fans out one POST per record, deletes each record as
    /// its acknowledgement arrives, and resolves once every request has
    /// settled. The optional callback receives the final report exactly once,
    /// before it is returned.
    ///
    /// A failure to read the batch aborts the cycle with an empty report; it
    /// is never fatal to the process.
    pub async fn deliver(&self, url: &str, callback: Option<DeliveryCallback>) -> DeliveryReport {
        let (generation, token) = self.begin_cycle();

        let batch = match self.buffer.batch(1).await {
            Ok(batch) => batch,
            Err(e) => {
                error!("Delivery cycle aborted, batch retrieval failed: {e}");
                return Self::complete(DeliveryReport::default(), callback);
            }
        };

        if batch.is_empty() {
            debug!("No buffered records to deliver");
            return Self::complete(DeliveryReport::default(), callback);
        }

        debug!("Delivering {} records to {url}", batch.len());

        let mut requests = JoinSet::new();
        for record in batch {
            let client = self.client.clone();
            let token = token.clone();
            let url = url.to_string();
            let payload = RecordPayload::new(&record, self.device_id.as_deref());

            requests.spawn(async move {
                let outcome = tokio::select! {
                    () = token.cancelled() => Err(DeliveryError::superseded()),
                    response = client.post(&url).json(&payload).send() => match response {
                        Ok(response) if response.status().is_success() => Ok(()),
                        Ok(response) => {
                            let status = response.status();
                            let body = response.text().await.ok().filter(|b| !b.is_empty());
                            Err(DeliveryError::rejected(status, body))
                        }
                        Err(e) => Err(DeliveryError::transport(&e)),
                    },
                };
                (record, outcome)
            });
        }

        // Resolutions arrive in any order. The JoinSet doubles as the
        // outstanding-request counter: the loop ends when it hits zero.
        let mut report = DeliveryReport::default();
        while let Some(joined) = requests.join_next().await {
            let Ok((record, outcome)) = joined else {
                debug!("Delivery request task failed to join");
                continue;
            };

            match outcome {
                Ok(()) => {
                    // Apply only resolutions of the current generation: an
                    // acknowledgement racing a supersede must not delete a
                    // record the newer cycle is re-sending.
                    if self.generation.load(Ordering::SeqCst) == generation
                        && !token.is_cancelled()
                    {
                        self.buffer.delete_one(record.id);
                        report.delivered.push(record);
                    } else {
                        report.failed.push((record, DeliveryError::superseded()));
                    }
                }
                Err(e) => {
                    warn!("Failed to deliver log record {}: {e}", record.id);
                    report.failed.push((record, e));
                }
            }
        }

        debug!(
            "Delivery cycle finished: {} delivered, {} failed",
            report.delivered.len(),
            report.failed.len()
        );
        Self::complete(report, callback)
    }

    fn complete(report: DeliveryReport, callback: Option<DeliveryCallback>) -> DeliveryReport {
        if let Some(callback) = callback {
            callback(&report);
        }
        report
    }
}
