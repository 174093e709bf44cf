/// Prometheus metrics for the flow classification service.
///
/// Covers HTTP traffic, prediction volume by label, batch sizes and error codes.
/// Metrics live in a process-wide registry; call [`init_metrics`] once at startup.
///
/// # Example
/// ```no_run
/// use flow_classifier::metrics::{self, PREDICTIONS_TOTAL};
///
/// metrics::init_metrics().ok();
/// PREDICTIONS_TOTAL.with_label_values(&["predict", "DDoS"]).inc();
/// ```

mod middleware;

pub use middleware::track_metrics;

use lazy_static::lazy_static;
use prometheus::{CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "flow_classifier";

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

    /// Number of requests currently being served
    pub static ref HTTP_REQUESTS_IN_FLIGHT: Gauge = Gauge::with_opts(
        Opts::new("http_requests_in_flight", "Number of HTTP requests being served")
            .namespace(NAMESPACE)
    ).expect("Failed to create HTTP_REQUESTS_IN_FLIGHT metric");

    // ============================================================================
    // Prediction Metrics
    // ============================================================================

    /// Predictions emitted
    ///
    /// Labels: endpoint (predict, predict_batch), label
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of predictions emitted")
            .namespace(NAMESPACE),
        &["endpoint", "label"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Time spent in the model, excluding request parsing
    ///
    /// Labels: endpoint
    pub static ref PREDICTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "prediction_duration_seconds",
            "Inference duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["endpoint"]
    ).expect("Failed to create PREDICTION_DURATION_SECONDS metric");

    /// Rows per batch upload
    pub static ref BATCH_ROWS: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_rows", "Rows per batch upload")
            .namespace(NAMESPACE)
            .buckets(prometheus::exponential_buckets(1.0, 10.0, 7).unwrap_or_default())
    ).expect("Failed to create BATCH_ROWS metric");

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Error responses by error code
    ///
    /// Labels: code
    pub static ref REQUEST_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("request_errors_total", "Total number of error responses")
            .namespace(NAMESPACE),
        &["code"]
    ).expect("Failed to create REQUEST_ERRORS_TOTAL metric");

    // ============================================================================
    // System Metrics
    // ============================================================================

    /// Loaded model info
    ///
    /// Labels: version, run_id, schema
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Service and loaded artifact information")
            .namespace(NAMESPACE),
        &["version", "run_id", "schema"]
    ).expect("Failed to create BUILD_INFO metric");
}

/// Register all metrics with [`PROMETHEUS_REGISTRY`].
///
/// # Errors
/// Returns an error if a metric is already registered, which happens when this is
/// called more than once per process.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(PREDICTIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PREDICTION_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(BATCH_ROWS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(REQUEST_ERRORS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(BUILD_INFO.clone()))?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Publish which artifact run is being served
pub fn set_build_info(run_id: &str, schema: &str) {
    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION"), run_id, schema])
        .set(1.0);
}

/// Count one prediction
pub fn record_prediction(endpoint: &str, label: &str) {
    PREDICTIONS_TOTAL.with_label_values(&[endpoint, label]).inc();
}

/// Count the predictions of a finished batch by label
pub fn record_batch<'a>(counts: impl IntoIterator<Item = (&'a String, &'a usize)>, total_rows: usize) {
    for (label, count) in counts {
        PREDICTIONS_TOTAL
            .with_label_values(&["predict_batch", label])
            .inc_by(*count as f64);
    }
    BATCH_ROWS.observe(total_rows as f64);
}

pub fn observe_prediction_duration(endpoint: &str, seconds: f64) {
    PREDICTION_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .observe(seconds);
}

/// Count an error response by its error code
pub fn record_error(code: &str) {
    REQUEST_ERRORS_TOTAL.with_label_values(&[code]).inc();
}

/// Render all registered metrics in the Prometheus text exposition format
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
