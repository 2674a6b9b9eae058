//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramTimer,
    HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;

lazy_static::lazy_static! {
    /// Total number of service operations by outcome
    pub static ref OPERATIONS: CounterVec = register_counter_vec!(
        "velero_backup_manager_operations_total",
        "Total number of backup manager operations by outcome",
        &["operation", "outcome"]
    ).unwrap();

    /// Operation duration histogram
    pub static ref OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "velero_backup_manager_operation_duration_seconds",
        "Duration of backup manager operations in seconds",
        &["operation"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Asynchronous requests submitted to Velero
    pub static ref REQUESTS_SUBMITTED: CounterVec = register_counter_vec!(
        "velero_backup_manager_requests_submitted_total",
        "Total number of Velero request objects created",
        &["kind"]
    ).unwrap();

    /// How awaited requests ended
    pub static ref REQUEST_OUTCOMES: CounterVec = register_counter_vec!(
        "velero_backup_manager_request_outcomes_total",
        "Outcome of awaited Velero requests",
        &["kind", "outcome"]
    ).unwrap();

    /// Manager health (1 = healthy, 0 = unhealthy)
    pub static ref MANAGER_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "velero_backup_manager_health",
        "Backup manager health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Scoped measurement of one service operation
///
/// The duration is observed when the guard drops, on every exit path.
pub struct OperationTimer {
    operation: &'static str,
    _timer: HistogramTimer,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            _timer: OPERATION_DURATION
                .with_label_values(&[operation])
                .start_timer(),
        }
    }

    /// Count the operation's outcome and pass the result through
    pub fn finish<T>(self, result: Result<T>) -> Result<T> {
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        OPERATIONS
            .with_label_values(&[self.operation, outcome])
            .inc();
        result
    }
}

/// Start the metrics HTTP server
pub async fn serve(port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    // Set initial health
    MANAGER_HEALTH.set(1.0);

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => {
                MANAGER_HEALTH.set(0.0);
                return Ok(());
            }
        };
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => not_found_response(),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = encoder.format_type().parse::<hyper::header::HeaderValue>() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

/// Health check response
fn health_response() -> Response<Full<Bytes>> {
    if MANAGER_HEALTH.get() >= 1.0 {
        text_response(StatusCode::OK, "ok")
    } else {
        text_response(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}

/// Readiness check response
fn ready_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::OK, "ok")
}

/// Not found response
fn not_found_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, "Not Found")
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
