//! Prometheus metrics for the facet engine.
//!
//! Query outcomes and latency, write volume, index size and HTTP traffic are
//! exported under the `facet_engine` namespace.
//!
//! # Example
//! ```no_run
//! use facet_engine::metrics::HTTP_REQUESTS_TOTAL;
//!
//! // Record an HTTP request
//! HTTP_REQUESTS_TOTAL
//!     .with_label_values(&["GET", "/health", "200"])
//!     .inc();
//! ```

mod middleware;

pub use middleware::track_metrics;

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "facet_engine";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Total number of HTTP requests received
    ///
    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests")
            .namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// HTTP request duration in seconds
    ///
    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Query Metrics
    // ============================================================================

    /// Total number of facet queries
    ///
    /// Labels: outcome (ok, timeout, cancelled, invalid_query, ...)
    pub static ref QUERIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("queries_total", "Total number of facet queries")
            .namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create QUERIES_TOTAL metric");

    /// Facet query duration in seconds, including queueing on the blocking pool
    pub static ref QUERY_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "query_duration_seconds",
            "Facet query duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    ).expect("Failed to create QUERY_DURATION_SECONDS metric");

    // ============================================================================
    // Index Metrics
    // ============================================================================

    /// Total number of records written (including re-ingests)
    pub static ref RECORDS_INGESTED_TOTAL: Counter = Counter::with_opts(
        Opts::new("records_ingested_total", "Total number of records ingested")
            .namespace(NAMESPACE)
    ).expect("Failed to create RECORDS_INGESTED_TOTAL metric");

    /// Total number of delete requests applied
    pub static ref RECORDS_DELETED_TOTAL: Counter = Counter::with_opts(
        Opts::new("records_deleted_total", "Total number of records deleted")
            .namespace(NAMESPACE)
    ).expect("Failed to create RECORDS_DELETED_TOTAL metric");

    /// Number of live records in the index
    pub static ref INDEXED_RECORDS: Gauge = Gauge::with_opts(
        Opts::new("indexed_records", "Number of records currently indexed")
            .namespace(NAMESPACE)
    ).expect("Failed to create INDEXED_RECORDS metric");
}

/// Initialize the Prometheus metrics registry
///
/// Call once at startup. A second call fails with `AlreadyReg`.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    // Register HTTP metrics
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;

    // Register query metrics
    PROMETHEUS_REGISTRY.register(Box::new(QUERIES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(QUERY_DURATION_SECONDS.clone()))?;

    // Register index metrics
    PROMETHEUS_REGISTRY.register(Box::new(RECORDS_INGESTED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(RECORDS_DELETED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(INDEXED_RECORDS.clone()))?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Generate Prometheus text format metrics
///
/// Used by the /metrics endpoint.
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

/// Register once per test process; parallel tests share the global registry
#[cfg(test)]
pub(crate) fn ensure_registered() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = init_metrics();
    });
}
