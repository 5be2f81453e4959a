//! # Metrics
//!
//! Read-path metrics collection. The handle is cheap to clone and safe to
//! share; counters are relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector for the scan path
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    cells_scanned: AtomicU64,
    cells_emitted: AtomicU64,
    bytes_emitted: AtomicU64,
    seeks: AtomicU64,
    lazy_seeks: AtomicU64,
    parallel_seeks: AtomicU64,
    flush_reopens: AtomicU64,
    stream_switches: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cells_scanned(&self, count: u64) {
        self.inner.cells_scanned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_emission(&self, count: u64, bytes: u64) {
        self.inner.cells_emitted.fetch_add(count, Ordering::Relaxed);
        self.inner.bytes_emitted.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_seek(&self) {
        self.inner.seeks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lazy_seek(&self) {
        self.inner.lazy_seeks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parallel_seek(&self) {
        self.inner.parallel_seeks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_reopen(&self) {
        self.inner.flush_reopens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_switch(&self) {
        self.inner.stream_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cells_scanned: self.inner.cells_scanned.load(Ordering::Relaxed),
            cells_emitted: self.inner.cells_emitted.load(Ordering::Relaxed),
            bytes_emitted: self.inner.bytes_emitted.load(Ordering::Relaxed),
            seeks: self.inner.seeks.load(Ordering::Relaxed),
            lazy_seeks: self.inner.lazy_seeks.load(Ordering::Relaxed),
            parallel_seeks: self.inner.parallel_seeks.load(Ordering::Relaxed),
            flush_reopens: self.inner.flush_reopens.load(Ordering::Relaxed),
            stream_switches: self.inner.stream_switches.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub cells_scanned: u64,
    pub cells_emitted: u64,
    pub bytes_emitted: u64,
    pub seeks: u64,
    pub lazy_seeks: u64,
    pub parallel_seeks: u64,
    pub flush_reopens: u64,
    pub stream_switches: u64,
}

/// Timer that logs how long an operation took when stopped.
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop and log the duration at debug level.
    pub fn stop(self) {
        tracing::debug!(
            name = self.name,
            duration_us = self.elapsed().as_micros() as u64,
            "operation finished"
        );
    }
}
