use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide request counters
#[derive(Debug, Default)]
pub struct GatekeeperMetrics {
    pub admitted: AtomicU64,
    pub rate_limited: AtomicU64,
    pub unauthenticated: AtomicU64,
    pub streams_started: AtomicU64,
    pub streams_completed: AtomicU64,
    pub streams_disconnected: AtomicU64,
}

/// Point-in-time copy of [`GatekeeperMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub rate_limited: u64,
    pub unauthenticated: u64,
    pub streams_started: u64,
    pub streams_completed: u64,
    pub streams_disconnected: u64,
}

impl GatekeeperMetrics {
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unauthenticated(&self) {
        self.unauthenticated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_started(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_completed(&self) {
        self.streams_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_disconnected(&self) {
        self.streams_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            unauthenticated: self.unauthenticated.load(Ordering::Relaxed),
            streams_started: self.streams_started.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            streams_disconnected: self.streams_disconnected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gatekeeper_metrics() {
        let metrics = GatekeeperMetrics::default();

        metrics.record_admitted();
        metrics.record_admitted();
        metrics.record_rate_limited();
        metrics.record_unauthenticated();
        metrics.record_stream_started();
        metrics.record_stream_completed();
        metrics.record_stream_disconnected();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                admitted: 2,
                rate_limited: 1,
                unauthenticated: 1,
                streams_started: 1,
                streams_completed: 1,
                streams_disconnected: 1,
            }
        );
    }
}
