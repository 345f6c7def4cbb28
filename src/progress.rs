//! Upload progress reporting
//!
//! The engine reports through a write-only [`ProgressSink`]. Byte counts are
//! reported once a part has been acknowledged by the server, so retried
//! attempts are never double counted.
//!
//! # Examples
//!
//! ```no_run
//! use s3stream::progress::{ProgressEvent, ProgressReporter};
//!
//! # async fn run() {
//! let (reporter, mut receiver) = ProgressReporter::new();
//!
//! tokio::spawn(async move {
//!     while let Some(event) = receiver.recv().await {
//!         if let ProgressEvent::Progress { bytes_transferred, .. } = event {
//!             println!("{} bytes uploaded", bytes_transferred);
//!         }
//!     }
//! });
//!
//! // Pass `Arc::new(reporter)` as `PutObjectOptions::progress`...
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Receives progress notifications for one upload
///
/// Only `on_transfer` is required; the lifecycle hooks default to no-ops.
pub trait ProgressSink: Send + Sync {
    /// `bytes` more bytes of the object were acknowledged by the server
    fn on_transfer(&self, bytes: u64);

    /// Upload of `key` started; `total_bytes` is None for unknown sizes
    fn upload_started(&self, _key: &str, _total_bytes: Option<u64>) {}

    /// Part `part_number` was stored
    fn part_completed(&self, _part_number: u32, _part_bytes: u64) {}

    /// Object committed
    fn upload_completed(&self, _total_bytes: u64, _duration: Duration) {}

    /// Upload ended with an error
    fn upload_failed(&self, _error: &str) {}
}

/// Progress event delivered by [`ProgressReporter`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// Upload started
    UploadStarted {
        key: String,
        total_bytes: Option<u64>,
    },

    /// Cumulative byte count changed
    Progress {
        bytes_transferred: u64,
        total_bytes: Option<u64>,
        /// Percentage complete (0-100), known sizes only
        percentage: Option<f64>,
        /// Average rate since start, in bytes/sec
        rate_bps: f64,
    },

    /// One part stored
    PartCompleted { part_number: u32, part_bytes: u64 },

    /// Upload completed successfully
    UploadCompleted { total_bytes: u64, duration: Duration },

    /// Upload failed
    UploadFailed {
        error: String,
        bytes_transferred: u64,
    },
}

const UNKNOWN_TOTAL: u64 = u64::MAX;

/// Channel-backed progress sink
#[derive(Clone)]
pub struct ProgressReporter {
    sender: Arc<UnboundedSender<ProgressEvent>>,
    transferred: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    started: Arc<OnceLock<Instant>>,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self::with_sender(sender), receiver)
    }

    fn with_sender(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            sender: Arc::new(sender),
            transferred: Arc::new(AtomicU64::new(0)),
            total: Arc::new(AtomicU64::new(UNKNOWN_TOTAL)),
            started: Arc::new(OnceLock::new()),
        }
    }

    /// Report a progress event
    pub fn report(&self, event: ProgressEvent) {
        // Receiver may be gone; progress is best effort
        let _ = self.sender.send(event);
    }

    /// Bytes acknowledged so far
    pub fn bytes_transferred(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }

    fn total_bytes(&self) -> Option<u64> {
        match self.total.load(Ordering::SeqCst) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        let (sender, _) = unbounded_channel();
        Self::with_sender(sender)
    }
}

impl ProgressSink for ProgressReporter {
    fn on_transfer(&self, bytes: u64) {
        let bytes_transferred = self.transferred.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let total_bytes = self.total_bytes();

        let percentage = total_bytes.map(|total| {
            if total > 0 {
                (bytes_transferred as f64 / total as f64) * 100.0
            } else {
                100.0
            }
        });

        let elapsed = self
            .started
            .get()
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or_default();
        let rate_bps = if elapsed > 0.0 {
            bytes_transferred as f64 / elapsed
        } else {
            0.0
        };

        self.report(ProgressEvent::Progress {
            bytes_transferred,
            total_bytes,
            percentage,
            rate_bps,
        });
    }

    fn upload_started(&self, key: &str, total_bytes: Option<u64>) {
        let _ = self.started.set(Instant::now());
        self.total
            .store(total_bytes.unwrap_or(UNKNOWN_TOTAL), Ordering::SeqCst);
        self.report(ProgressEvent::UploadStarted {
            key: key.to_string(),
            total_bytes,
        });
    }

    fn part_completed(&self, part_number: u32, part_bytes: u64) {
        self.report(ProgressEvent::PartCompleted {
            part_number,
            part_bytes,
        });
    }

    fn upload_completed(&self, total_bytes: u64, duration: Duration) {
        self.report(ProgressEvent::UploadCompleted {
            total_bytes,
            duration,
        });
    }

    fn upload_failed(&self, error: &str) {
        self.report(ProgressEvent::UploadFailed {
            error: error.to_string(),
            bytes_transferred: self.bytes_transferred(),
        });
    }
}
