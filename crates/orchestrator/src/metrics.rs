//! Saga observability counters.
//!
//! Counters are kept in-process (for programmatic inspection and tests) and
//! mirrored to the `metrics` facade for whatever exporter the host process
//! installs.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::lifecycle::SagaStatistics;

/// Cumulative saga counters since process start.
#[derive(Debug, Default)]
pub struct SagaMetrics {
    created: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    compensated: AtomicU64,
    retried: AtomicU64,
    recovered: AtomicU64,
    timed_out: AtomicU64,
    publish_failures: AtomicU64,
    cleaned_up: AtomicU64,
    completion_millis_total: AtomicU64,
}

impl SagaMetrics {
    /// Creates a zeroed metrics holder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sagas_created_total").increment(1);
    }

    /// Records a successful completion with its end-to-end duration.
    pub fn record_completed(&self, duration: chrono::Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let millis = duration.num_milliseconds().max(0) as u64;
        self.completion_millis_total
            .fetch_add(millis, Ordering::Relaxed);
        metrics::counter!("sagas_completed_total").increment(1);
        metrics::histogram!("saga_duration_seconds").record(millis as f64 / 1000.0);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sagas_failed_total").increment(1);
    }

    pub fn record_compensated(&self) {
        self.compensated.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sagas_compensated_total").increment(1);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("saga_retries_total").increment(1);
    }

    /// Records a saga re-driven by the recovery engine.
    pub fn record_recovered(&self) {
        self.recovered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sagas_recovered_total").increment(1);
    }

    /// Records a saga found past its deadline.
    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sagas_timed_out_total").increment(1);
    }

    pub fn record_publish_failure(&self, message_kind: &'static str) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("saga_publish_failures_total", "message_kind" => message_kind)
            .increment(1);
    }

    pub fn record_cleaned_up(&self, count: u64) {
        self.cleaned_up.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("sagas_cleaned_up_total").increment(count);
    }

    /// Publishes point-in-time status counts as gauges.
    pub fn emit_status_gauges(stats: &SagaStatistics) {
        metrics::gauge!("sagas_active").set(stats.active() as f64);
        metrics::gauge!("sagas_initiated").set(stats.initiated as f64);
        metrics::gauge!("sagas_in_progress").set(stats.in_progress as f64);
        metrics::gauge!("sagas_compensating").set(stats.compensating as f64);
        if let Some(rate) = Self::success_rate(stats) {
            metrics::gauge!("saga_success_rate").set(rate);
        }
    }

    /// Fraction of finished sagas that completed successfully, if any
    /// finished yet.
    pub fn success_rate(stats: &SagaStatistics) -> Option<f64> {
        let finished = stats.completed + stats.failed + stats.compensated;
        if finished == 0 {
            return None;
        }
        Some(stats.completed as f64 / finished as f64)
    }

    /// Takes a consistent point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let completion_millis_total = self.completion_millis_total.load(Ordering::Relaxed);
        MetricsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            completed,
            failed: self.failed.load(Ordering::Relaxed),
            compensated: self.compensated.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            cleaned_up: self.cleaned_up.load(Ordering::Relaxed),
            avg_completion_millis: if completed > 0 {
                Some(completion_millis_total as f64 / completed as f64)
            } else {
                None
            },
        }
    }
}

/// Point-in-time copy of the saga counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub created: u64,
    pub completed: u64,
    pub failed: u64,
    pub compensated: u64,
    pub retried: u64,
    pub recovered: u64,
    pub timed_out: u64,
    pub publish_failures: u64,
    pub cleaned_up: u64,
    pub avg_completion_millis: Option<f64>,
}
