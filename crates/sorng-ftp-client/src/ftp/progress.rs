//! Transfer progress reporting.
//!
//! A [`ProgressTracker`] wraps the caller's observer plus the file sizes it
//! already knows (usually from a prior listing). Each transfer gets a
//! [`TransferReporter`] that calls the observer once per chunk, on the
//! transfer task itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::ftp::types::{FtpEntry, TransferKind, TransferProgress};

type Observer = Box<dyn Fn(&TransferProgress) + Send + Sync>;

pub struct ProgressTracker {
    observer: Observer,
    known_sizes: HashMap<String, u64>,
    bytes_overall: AtomicU64,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("known_sizes", &self.known_sizes)
            .field("bytes_overall", &self.bytes_overall())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new<F>(observer: F) -> Self
    where
        F: Fn(&TransferProgress) + Send + Sync + 'static,
    {
        Self {
            observer: Box::new(observer),
            known_sizes: HashMap::new(),
            bytes_overall: AtomicU64::new(0),
        }
    }

    /// Register the sizes of every file entry of a listing.
    pub fn with_known_sizes(mut self, entries: &[FtpEntry]) -> Self {
        for entry in entries.iter().filter(|e| e.is_file()) {
            self.known_sizes.insert(entry.name.clone(), entry.size);
        }
        self
    }

    pub fn with_size(mut self, name: impl Into<String>, size: u64) -> Self {
        self.known_sizes.insert(name.into(), size);
        self
    }

    /// Bytes moved by all transfers since this tracker was created.
    pub fn bytes_overall(&self) -> u64 {
        self.bytes_overall.load(Ordering::Relaxed)
    }

    /// Size registered for a remote path, by full path then base name.
    pub fn known_size(&self, name: &str) -> Option<u64> {
        self.known_sizes.get(name).copied().or_else(|| {
            let base = name.rsplit('/').next().unwrap_or(name);
            self.known_sizes.get(base).copied()
        })
    }

    /// Start reporting one transfer. `offset` is a resume position already
    /// present at the destination.
    pub fn begin(
        self: &Arc<Self>,
        name: &str,
        kind: TransferKind,
        total: Option<u64>,
        offset: u64,
    ) -> TransferReporter {
        TransferReporter {
            tracker: Arc::clone(self),
            name: name.to_string(),
            kind,
            total: total.or_else(|| self.known_size(name)),
            offset,
            transferred: 0,
            started: Instant::now(),
        }
    }
}

/// Per-transfer progress state.
pub struct TransferReporter {
    tracker: Arc<ProgressTracker>,
    name: String,
    kind: TransferKind,
    total: Option<u64>,
    offset: u64,
    transferred: u64,
    started: Instant,
}

impl TransferReporter {
    /// Record `n` more bytes and notify the observer.
    pub fn advance(&mut self, n: u64) {
        self.transferred += n;
        let overall = self.tracker.bytes_overall.fetch_add(n, Ordering::Relaxed) + n;

        let reached = self.offset + self.transferred;
        let percent = self.total.map(|total| {
            if total == 0 {
                100.0
            } else {
                (reached as f64 / total as f64 * 100.0).min(100.0) as f32
            }
        });
        let secs = self.started.elapsed().as_secs_f64().max(0.001);

        let progress = TransferProgress {
            name: self.name.clone(),
            kind: self.kind,
            transferred_bytes: self.transferred,
            offset: self.offset,
            bytes_overall: overall,
            total_bytes: self.total,
            percent,
            speed_bps: (self.transferred as f64 / secs) as u64,
        };
        (self.tracker.observer)(&progress);
    }
}
