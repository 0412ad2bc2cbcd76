//! Engine counters shared by every Fetch Task of one service.
//!
//! The surrounding service owns one `EngineMetrics` and passes it (as an
//! `Arc`) into each task it creates; nothing here is process-global.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    active_tasks: AtomicUsize,
    tasks_started: AtomicU64,
    subrange_requests: AtomicU64,
    retries: AtomicU64,
    redirects: AtomicU64,
    overload_events: AtomicU64,
    bytes_delivered: AtomicU64,
    failed_tasks: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub active_tasks: usize,
    pub tasks_started: u64,
    pub subrange_requests: u64,
    pub retries: u64,
    pub redirects: u64,
    pub overload_events: u64,
    pub bytes_delivered: u64,
    pub failed_tasks: u64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a live task; the count drops when the guard is dropped.
    pub fn task_started(self: &Arc<Self>) -> ActiveTaskGuard {
        self.tasks_started.fetch_add(1, Ordering::Relaxed);
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
        ActiveTaskGuard {
            metrics: Arc::clone(self),
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Relaxed)
    }

    pub(crate) fn record_subrange_request(&self) {
        self.subrange_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redirect(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overload(&self) {
        self.overload_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, n: u64) {
        self.bytes_delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_task(&self) {
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            subrange_requests: self.subrange_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            redirects: self.redirects.load(Ordering::Relaxed),
            overload_events: self.overload_events.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active task count when dropped.
#[derive(Debug)]
pub struct ActiveTaskGuard {
    metrics: Arc<EngineMetrics>,
}

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.metrics.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }
}
