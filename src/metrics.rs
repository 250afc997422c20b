// Engine metrics module
//
// Lightweight counters for query, cache and ABI inference activity

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Engine-wide counters
///
/// Uses atomic operations so resolvers running on separate tasks can record
/// without locks. The registry logs a summary on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Number of times the query tool was spawned (including retries)
    pub query_invocations: AtomicU64,

    /// Number of query runs that failed outright (crash, exit code, timeout)
    pub query_failures: AtomicU64,

    /// Metadata served from the on-disk cache
    pub cache_hits: AtomicU64,

    /// Metadata that had to be resolved by querying
    pub cache_misses: AtomicU64,

    /// Number of files scanned for a build banner
    pub banner_scans: AtomicU64,

    /// Number of installations for which no ABI could be inferred
    pub abi_failures: AtomicU64,

    /// Number of change notifications broadcast by the registry
    pub notifications: AtomicU64,

    /// Notifications dropped because nobody was subscribed
    pub notification_errors: AtomicU64,

    /// Total time spent resolving metadata in milliseconds
    pub total_resolve_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            query_invocations: AtomicU64::new(0),
            query_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            banner_scans: AtomicU64::new(0),
            abi_failures: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
            notification_errors: AtomicU64::new(0),
            total_resolve_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_query_invocation(&self) {
        self.query_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_failure(&self) {
        self.query_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_banner_scan(&self) {
        self.banner_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abi_failure(&self) {
        self.abi_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_error(&self) {
        self.notification_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent resolving one installation
    pub fn record_resolve_time(&self, duration: Duration) {
        self.total_resolve_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Fraction of metadata lookups served from the cache
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Engine Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Queries: {} invocations, {} failures",
            self.query_invocations.load(Ordering::Relaxed),
            self.query_failures.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Metadata cache: {} hits, {} misses ({:.0}% hit ratio), {:.2}s resolving",
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
            self.cache_hit_ratio() * 100.0,
            self.total_resolve_time_ms.load(Ordering::Relaxed) as f64 / 1000.0
        );
        tracing::info!(
            "ABI inference: {} banner scans, {} failures",
            self.banner_scans.load(Ordering::Relaxed),
            self.abi_failures.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Notifications: {} sent, {} dropped",
            self.notifications.load(Ordering::Relaxed),
            self.notification_errors.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.query_invocations.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.cache_hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_query_counters() {
        let metrics = Metrics::new();

        metrics.record_query_invocation();
        metrics.record_query_invocation();
        metrics.record_query_failure();

        assert_eq!(metrics.query_invocations.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.query_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cache_hit_ratio() {
        let metrics = Metrics::new();
        assert_eq!(metrics.cache_hit_ratio(), 0.0);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        assert_eq!(metrics.cache_hit_ratio(), 0.75);
    }

    #[test]
    fn test_resolve_time() {
        let metrics = Metrics::new();
        metrics.record_resolve_time(Duration::from_millis(100));
        metrics.record_resolve_time(Duration::from_millis(200));
        assert_eq!(metrics.total_resolve_time_ms.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }

    #[test]
    fn test_abi_and_notification_counters() {
        let metrics = Metrics::new();

        metrics.record_banner_scan();
        metrics.record_abi_failure();
        metrics.record_notification();
        metrics.record_notification_error();

        assert_eq!(metrics.banner_scans.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.abi_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.notifications.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.notification_errors.load(Ordering::Relaxed), 1);
    }
}
