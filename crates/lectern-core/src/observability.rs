//! Counters and log setup.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Pending work in the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Released and waiting for the worker.
    pub ready: usize,
    /// Submitted with a delay that has not elapsed yet.
    pub delayed: usize,
}

/// Counters shared by the queue, the worker and the flush coordinator.
#[derive(Debug, Default)]
pub struct ServiceStats {
    submitted: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    discarded: AtomicU64,
    flushes_performed: AtomicU64,
    flushes_forced: AtomicU64,
    flushes_skipped: AtomicU64,
    last_flush_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    /// Tasks that ran to completion, successfully or not.
    pub executed: u64,
    /// Tasks whose body returned an error.
    pub failed: u64,
    pub panicked: u64,
    /// Delayed tasks dropped because the queue shut down first.
    pub discarded: u64,
    /// Store-level syncs, forced ones included.
    pub flushes_performed: u64,
    pub flushes_forced: u64,
    pub flushes_skipped: u64,
    pub last_flush_at: Option<DateTime<Utc>>,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, n: usize) {
        self.discarded.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self, forced: bool, at: DateTime<Utc>) {
        self.flushes_performed.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.flushes_forced.fetch_add(1, Ordering::Relaxed);
        }
        *self
            .last_flush_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub(crate) fn record_flush_skipped(&self) {
        self.flushes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            flushes_performed: self.flushes_performed.load(Ordering::Relaxed),
            flushes_forced: self.flushes_forced.load(Ordering::Relaxed),
            flushes_skipped: self.flushes_skipped.load(Ordering::Relaxed),
            last_flush_at: *self
                .last_flush_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Output goes to stderr.
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
