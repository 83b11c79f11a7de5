// Performance and audit metrics for the pricing engine
//
// Tracks calculation timings, cache hit rate and the health of the audit
// pipeline, so a slow or failing history store stays visible without
// affecting pricing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    slow_threshold: Duration,

    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    calculations: AtomicU64,
    total_calculation_time_us: AtomicU64,
    slow_calculations: AtomicU64,
    forecasts: AtomicU64,
    total_forecast_time_us: AtomicU64,

    floor_anomalies: AtomicU64,

    audit_queued: AtomicU64,
    audit_written: AtomicU64,
    audit_failed: AtomicU64,
    audit_dropped: AtomicU64,
}

impl PerformanceMetrics {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                slow_threshold,
                cache_hits: AtomicU64::new(0),
                cache_misses: AtomicU64::new(0),
                calculations: AtomicU64::new(0),
                total_calculation_time_us: AtomicU64::new(0),
                slow_calculations: AtomicU64::new(0),
                forecasts: AtomicU64::new(0),
                total_forecast_time_us: AtomicU64::new(0),
                floor_anomalies: AtomicU64::new(0),
                audit_queued: AtomicU64::new(0),
                audit_written: AtomicU64::new(0),
                audit_failed: AtomicU64::new(0),
                audit_dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Cache hit rate (0.0 to 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn record_floor_anomaly(&self) {
        self.inner.floor_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_queued(&self) {
        self.inner.audit_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_written(&self) {
        self.inner.audit_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_failed(&self) {
        self.inner.audit_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_dropped(&self) {
        self.inner.audit_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Start timing a price calculation; recorded when the timer drops
    pub fn start_calculation(&self) -> OperationTimer {
        OperationTimer::new(OperationType::Calculation, self.clone())
    }

    /// Start timing a trend forecast; recorded when the timer drops
    pub fn start_forecast(&self) -> OperationTimer {
        OperationTimer::new(OperationType::Forecast, self.clone())
    }

    fn record_calculation(&self, duration: Duration) {
        self.inner.calculations.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_calculation_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if duration > self.inner.slow_threshold {
            self.inner.slow_calculations.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(elapsed_ms = duration.as_millis() as u64, "Slow price calculation");
        }
    }

    fn record_forecast(&self, duration: Duration) {
        self.inner.forecasts.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_forecast_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Average calculation time in milliseconds
    pub fn avg_calculation_time_ms(&self) -> f64 {
        average_ms(
            self.inner.total_calculation_time_us.load(Ordering::Relaxed),
            self.inner.calculations.load(Ordering::Relaxed),
        )
    }

    pub fn avg_forecast_time_ms(&self) -> f64 {
        average_ms(
            self.inner.total_forecast_time_us.load(Ordering::Relaxed),
            self.inner.forecasts.load(Ordering::Relaxed),
        )
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            cache_hit_rate: self.cache_hit_rate(),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.inner.cache_misses.load(Ordering::Relaxed),
            calculations: self.inner.calculations.load(Ordering::Relaxed),
            avg_calculation_time_ms: self.avg_calculation_time_ms(),
            slow_calculations: self.inner.slow_calculations.load(Ordering::Relaxed),
            forecasts: self.inner.forecasts.load(Ordering::Relaxed),
            avg_forecast_time_ms: self.avg_forecast_time_ms(),
            floor_anomalies: self.inner.floor_anomalies.load(Ordering::Relaxed),
            audit_queued: self.inner.audit_queued.load(Ordering::Relaxed),
            audit_written: self.inner.audit_written.load(Ordering::Relaxed),
            audit_failed: self.inner.audit_failed.load(Ordering::Relaxed),
            audit_dropped: self.inner.audit_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            "Pricing engine metrics:\n\
             Cache: {:.1}% hit rate ({} hits, {} misses)\n\
             Calculations: {} total, avg {:.2}ms, {} slow, {} floored to zero\n\
             Forecasts: {} total, avg {:.2}ms\n\
             Audit: {} queued, {} written, {} failed, {} dropped",
            summary.cache_hit_rate * 100.0,
            summary.cache_hits,
            summary.cache_misses,
            summary.calculations,
            summary.avg_calculation_time_ms,
            summary.slow_calculations,
            summary.floor_anomalies,
            summary.forecasts,
            summary.avg_forecast_time_ms,
            summary.audit_queued,
            summary.audit_written,
            summary.audit_failed,
            summary.audit_dropped,
        );
    }
}

fn average_ms(total_us: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        (total_us as f64 / count as f64) / 1000.0
    }
}

#[derive(Debug, Clone, Copy)]
enum OperationType {
    Calculation,
    Forecast,
}

/// Drop guard that records how long an operation took
pub struct OperationTimer {
    start: Instant,
    operation_type: OperationType,
    metrics: PerformanceMetrics,
}

impl OperationTimer {
    fn new(operation_type: OperationType, metrics: PerformanceMetrics) -> Self {
        Self {
            start: Instant::now(),
            operation_type,
            metrics,
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();

        match self.operation_type {
            OperationType::Calculation => self.metrics.record_calculation(duration),
            OperationType::Forecast => self.metrics.record_forecast(duration),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub calculations: u64,
    pub avg_calculation_time_ms: f64,
    pub slow_calculations: u64,
    pub forecasts: u64,
    pub avg_forecast_time_ms: f64,
    pub floor_anomalies: u64,
    pub audit_queued: u64,
    pub audit_written: u64,
    pub audit_failed: u64,
    pub audit_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = PerformanceMetrics::new(Duration::from_millis(100));
        assert_eq!(metrics.cache_hit_rate(), 0.0);
        assert_eq!(metrics.avg_calculation_time_ms(), 0.0);
    }

    #[test]
    fn test_cache_metrics() {
        let metrics = PerformanceMetrics::new(Duration::from_millis(100));

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();

        assert_eq!(metrics.cache_hit_rate(), 2.0 / 3.0);
    }

    #[test]
    fn test_timer_records_once() {
        let metrics = PerformanceMetrics::new(Duration::from_millis(100));

        {
            let _timer = metrics.start_calculation();
            thread::sleep(Duration::from_millis(10));
        }

        let summary = metrics.summary();
        assert_eq!(summary.calculations, 1);
        assert!(summary.avg_calculation_time_ms >= 10.0);
    }

    #[test]
    fn test_slow_calculation_detection() {
        let metrics = PerformanceMetrics::new(Duration::from_millis(5));

        {
            let _timer = metrics.start_calculation();
            thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(metrics.summary().slow_calculations, 1);
    }

    #[test]
    fn test_audit_counters() {
        let metrics = PerformanceMetrics::new(Duration::from_millis(100));
        metrics.record_audit_queued();
        metrics.record_audit_queued();
        metrics.record_audit_written();
        metrics.record_audit_failed();
        metrics.record_audit_dropped();

        let summary = metrics.summary();
        assert_eq!(summary.audit_queued, 2);
        assert_eq!(summary.audit_written, 1);
        assert_eq!(summary.audit_failed, 1);
        assert_eq!(summary.audit_dropped, 1);
    }
}
