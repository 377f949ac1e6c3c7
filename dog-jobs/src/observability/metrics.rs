use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

/// Live counters for queue operations.
///
/// Global totals are plain atomics; per-queue breakdowns live in a
/// `DashMap` so recording never awaits.
#[derive(Default)]
pub struct LiveMetrics {
    jobs_enqueued: AtomicU64,
    dispatch_failures: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_cleaned: AtomicU64,

    per_queue: DashMap<String, QueueMetrics>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self, queue: &str, count: u64) {
        self.jobs_enqueued.fetch_add(count, Ordering::Relaxed);
        self.per_queue.entry(queue.to_string()).or_default().enqueued += count;
    }

    pub fn record_dispatch_failure(&self, queue: &str) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        self.per_queue.entry(queue.to_string()).or_default().dispatch_failures += 1;
    }

    pub fn record_completed(&self, queue: &str, elapsed: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.per_queue.entry(queue.to_string()).or_default();
        entry.completed += 1;
        entry.total_processing_ms += elapsed.as_millis() as u64;
    }

    /// A failed attempt; `will_retry` tells whether the broker may run it again
    pub fn record_failed(&self, queue: &str, will_retry: bool) {
        let mut entry = self.per_queue.entry(queue.to_string()).or_default();
        if will_retry {
            self.jobs_retried.fetch_add(1, Ordering::Relaxed);
            entry.retried += 1;
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
            entry.failed += 1;
        }
    }

    pub fn record_cleaned(&self, queue: &str, count: u64) {
        self.jobs_cleaned.fetch_add(count, Ordering::Relaxed);
        self.per_queue.entry(queue.to_string()).or_default().cleaned += count;
    }

    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_enqueued.load(Ordering::Relaxed)
    }

    pub fn dispatch_failures(&self) -> u64 {
        self.dispatch_failures.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_cleaned(&self) -> u64 {
        self.jobs_cleaned.load(Ordering::Relaxed)
    }

    /// Get metrics for a specific queue
    pub fn queue_metrics(&self, queue: &str) -> Option<QueueMetrics> {
        self.per_queue.get(queue).map(|entry| entry.clone())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut queues: Vec<(String, QueueMetrics)> = self
            .per_queue
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        queues.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued(),
            dispatch_failures: self.dispatch_failures(),
            jobs_completed: self.jobs_completed(),
            jobs_failed: self.jobs_failed(),
            jobs_retried: self.jobs_retried(),
            jobs_cleaned: self.jobs_cleaned(),
            queues,
        }
    }
}

/// Counters for one queue
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueMetrics {
    pub enqueued: u64,
    pub dispatch_failures: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub cleaned: u64,
    pub total_processing_ms: u64,
}

impl QueueMetrics {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.completed + self.failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.completed as f64 / total_processed as f64) * 100.0
        }
    }

    pub fn average_processing_time(&self) -> Option<Duration> {
        if self.completed == 0 {
            None
        } else {
            Some(Duration::from_millis(self.total_processing_ms / self.completed))
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub dispatch_failures: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_cleaned: u64,
    pub queues: Vec<(String, QueueMetrics)>,
}
