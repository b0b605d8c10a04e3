//! Pipeline counters and conversion latency.
//!
//! Counters are atomics; latency samples sit behind a mutex and are capped
//! at [`MAX_DURATION_SAMPLES`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Maximum number of duration samples kept in memory.
const MAX_DURATION_SAMPLES: usize = 1000;

/// Conversion metrics collector, shared by all requests.
#[derive(Debug, Default)]
pub struct ConversionMetrics {
    uploads_received: AtomicU64,
    uploads_rejected: AtomicU64,
    conversions_started: AtomicU64,
    conversions_succeeded: AtomicU64,
    conversions_failed: AtomicU64,
    conversions_timed_out: AtomicU64,
    health_checks_failed: AtomicU64,
    total_output_bytes: AtomicU64,
    duration_samples: Mutex<VecDeque<Duration>>,
}

impl ConversionMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// An upload entered the pipeline.
    pub fn record_upload(&self) {
        self.uploads_received.fetch_add(1, Ordering::Relaxed);
    }

    /// An upload failed staging.
    pub fn record_rejected(&self) {
        self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A converter invocation is about to start.
    pub fn record_started(&self) {
        self.conversions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A conversion produced an artifact.
    pub fn record_success(&self, duration: Duration, output_bytes: u64) {
        self.conversions_succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_output_bytes
            .fetch_add(output_bytes, Ordering::Relaxed);

        if let Ok(mut samples) = self.duration_samples.lock() {
            if samples.len() >= MAX_DURATION_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(duration);
        }
    }

    /// A conversion failed. Timeouts are also counted separately.
    pub fn record_failure(&self, timed_out: bool) {
        self.conversions_failed.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.conversions_timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// The converter smoke check failed.
    pub fn record_health_failure(&self) {
        self.health_checks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut sorted: Vec<Duration> = self
            .duration_samples
            .lock()
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        sorted.sort();

        let percentile = |p: usize| {
            if sorted.is_empty() {
                None
            } else {
                let idx = (sorted.len() - 1) * p / 100;
                sorted.get(idx).map(|d| d.as_millis() as u64)
            }
        };

        MetricsSnapshot {
            uploads_received: self.uploads_received.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            conversions_started: self.conversions_started.load(Ordering::Relaxed),
            conversions_succeeded: self.conversions_succeeded.load(Ordering::Relaxed),
            conversions_failed: self.conversions_failed.load(Ordering::Relaxed),
            conversions_timed_out: self.conversions_timed_out.load(Ordering::Relaxed),
            health_checks_failed: self.health_checks_failed.load(Ordering::Relaxed),
            total_output_bytes: self.total_output_bytes.load(Ordering::Relaxed),
            duration_p50_ms: percentile(50),
            duration_p95_ms: percentile(95),
        }
    }
}

/// A point-in-time snapshot of pipeline metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Uploads that entered the pipeline.
    pub uploads_received: u64,
    /// Uploads rejected during staging.
    pub uploads_rejected: u64,
    /// Converter invocations started.
    pub conversions_started: u64,
    /// Conversions that produced an artifact.
    pub conversions_succeeded: u64,
    /// Conversions that failed, including timeouts.
    pub conversions_failed: u64,
    /// Conversions killed at the deadline.
    pub conversions_timed_out: u64,
    /// Failed converter smoke checks.
    pub health_checks_failed: u64,
    /// Total artifact bytes produced.
    pub total_output_bytes: u64,
    /// Median conversion duration.
    pub duration_p50_ms: Option<u64>,
    /// 95th percentile conversion duration.
    pub duration_p95_ms: Option<u64>,
}
