//! Connector metrics.
//!
//! [`IoMetrics`] is a set of atomic counters that sources, readers and writers bump as they
//! work. One instance is usually shared (behind an [`Arc`](std::sync::Arc)) by every worker
//! of a run; the counters are the only state workers share.
//!
//! # Example
//!
//! ```no_run
//! use ironbeam_mongodb::metrics::IoMetrics;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = Arc::new(IoMetrics::new());
//! metrics.record_start();
//! // ... hand clones of `metrics` to readers and writers ...
//! metrics.record_end();
//!
//! let snapshot = metrics.snapshot();
//! snapshot.print();
//! snapshot.save_to_file("mongodb-metrics.json")?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters.
#[derive(Debug, Default)]
pub struct IoMetrics {
    partitions: AtomicU64,
    connections_opened: AtomicU64,
    documents_read: AtomicU64,
    documents_written: AtomicU64,
    bulk_inserts: AtomicU64,
    suppressed_write_errors: AtomicU64,
    timing: Mutex<(Option<Instant>, Option<Instant>)>,
}

/// Point-in-time copy of [`IoMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub partitions: u64,
    pub connections_opened: u64,
    pub documents_read: u64,
    pub documents_written: u64,
    pub bulk_inserts: u64,
    pub suppressed_write_errors: u64,
    pub elapsed_ms: Option<u64>,
}

impl IoMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_partitions(&self, count: usize) {
        self.partitions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.documents_read.fetch_add(1, Ordering::Relaxed);
    }

    /// One bulk insert that persisted `inserted` documents.
    pub fn record_bulk_insert(&self, inserted: usize) {
        self.bulk_inserts.fetch_add(1, Ordering::Relaxed);
        self.documents_written
            .fetch_add(inserted as u64, Ordering::Relaxed);
    }

    pub fn record_suppressed_write_error(&self) {
        self.suppressed_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// # Panics
    ///
    /// Panics if the timing mutex is poisoned.
    pub fn record_start(&self) {
        self.timing.lock().expect("metrics timing mutex poisoned").0 = Some(Instant::now());
    }

    /// # Panics
    ///
    /// Panics if the timing mutex is poisoned.
    pub fn record_end(&self) {
        self.timing.lock().expect("metrics timing mutex poisoned").1 = Some(Instant::now());
    }

    /// # Panics
    ///
    /// Panics if the timing mutex is poisoned.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        match *self.timing.lock().expect("metrics timing mutex poisoned") {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            partitions: self.partitions.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            documents_read: self.documents_read.load(Ordering::Relaxed),
            documents_written: self.documents_written.load(Ordering::Relaxed),
            bulk_inserts: self.bulk_inserts.load(Ordering::Relaxed),
            suppressed_write_errors: self.suppressed_write_errors.load(Ordering::Relaxed),
            elapsed_ms: self
                .elapsed()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl MetricsSnapshot {
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "partitions": self.partitions,
            "connections_opened": self.connections_opened,
            "documents_read": self.documents_read,
            "documents_written": self.documents_written,
            "bulk_inserts": self.bulk_inserts,
            "suppressed_write_errors": self.suppressed_write_errors,
            "execution_time_ms": self.elapsed_ms,
        })
    }

    /// Print to stdout in a human-readable format.
    pub fn print(&self) {
        println!("\n========== MongoDB IO Metrics ==========");
        if let Some(ms) = self.elapsed_ms {
            println!("Execution Time: {ms} ms");
            println!("----------------------------------------");
        }
        println!("partitions: {}", self.partitions);
        println!("connections_opened: {}", self.connections_opened);
        println!("documents_read: {}", self.documents_read);
        println!("documents_written: {}", self.documents_written);
        println!("bulk_inserts: {}", self.bulk_inserts);
        println!("suppressed_write_errors: {}", self.suppressed_write_errors);
        println!("========================================\n");
    }

    /// Save as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
