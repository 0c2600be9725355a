//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics and the
//! connector status as JSON at /healthz. Uses hyper for the HTTP server.

use crate::domain::types::StreamKind;
use crate::infra::metrics::{MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::io::connector::ConnectorSnapshot;
use crate::services::engine::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Gauges describing the engine and connector outside the metrics counters
struct LiveState {
    registered_cattle: usize,
    subscribers: usize,
    connector: ConnectorSnapshot,
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, live: &LiveState, site_id: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_record_metrics(&mut output, site_id, summary);
    write_latency_metrics(&mut output, site_id, summary);
    write_drop_metrics(&mut output, site_id, summary);
    write_state_metrics(&mut output, site_id, summary, live);

    output
}

fn write_record_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let name = "cattlenet_records_total";
    let _ = writeln!(output, "# HELP {name} Records ingested per stream");
    let _ = writeln!(output, "# TYPE {name} counter");
    for stream in StreamKind::ALL {
        let _ = writeln!(
            output,
            "{name}{{site=\"{site}\",stream=\"{}\"}} {}",
            stream.as_str(),
            summary.records_by_stream[stream.index()]
        );
    }

    write_gauge_f64(
        output,
        "cattlenet_records_per_sec",
        "Records ingested per second since the last report",
        site,
        summary.records_per_sec,
    );
    write_metric(
        output,
        "cattlenet_messages_received_total",
        "Broker messages received before routing",
        MetricType::Counter,
        site,
        summary.messages_received,
    );
    write_metric(
        output,
        "cattlenet_synthetic_records_total",
        "Records produced by the fallback generator",
        MetricType::Counter,
        site,
        summary.synthetic_total,
    );
    write_metric(
        output,
        "cattlenet_anomalies_total",
        "Sensor readings classified as anomalous",
        MetricType::Counter,
        site,
        summary.anomalies_total,
    );
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_histogram(
        output,
        "cattlenet_ingest_latency_us",
        "Receive to publish latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_ingest_latency_us,
    );
    write_metric(
        output,
        "cattlenet_ingest_latency_p99_us",
        "99th percentile ingest latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
    write_metric(
        output,
        "cattlenet_ingest_latency_max_us",
        "Maximum ingest latency since the last report",
        MetricType::Gauge,
        site,
        summary.max_ingest_latency_us,
    );
}

fn write_drop_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "cattlenet_malformed_payloads_total",
        "Payloads rejected by the normalizer or unroutable",
        MetricType::Counter,
        site,
        summary.malformed_total,
    );
    write_metric(
        output,
        "cattlenet_ingest_dropped_total",
        "Records dropped because the ingest channel was full",
        MetricType::Counter,
        site,
        summary.ingest_dropped,
    );
    write_metric(
        output,
        "cattlenet_feed_discarded_total",
        "Feed station visits discarded",
        MetricType::Counter,
        site,
        summary.feed_discarded,
    );
    write_metric(
        output,
        "cattlenet_subscriber_dropped_total",
        "Updates lost by lagging subscribers",
        MetricType::Counter,
        site,
        summary.subscriber_dropped,
    );
}

fn write_state_metrics(output: &mut String, site: &str, summary: &MetricsSummary, live: &LiveState) {
    write_metric(
        output,
        "cattlenet_ingest_queue_depth",
        "Records waiting in the ingest channel",
        MetricType::Gauge,
        site,
        summary.ingest_queue_depth,
    );
    write_metric(
        output,
        "cattlenet_registered_cattle",
        "RFID tags in the registry",
        MetricType::Gauge,
        site,
        live.registered_cattle as u64,
    );
    write_metric(
        output,
        "cattlenet_subscribers",
        "Live update subscribers",
        MetricType::Gauge,
        site,
        live.subscribers as u64,
    );
    write_metric(
        output,
        "cattlenet_broker_connected",
        "1 when the broker link is up",
        MetricType::Gauge,
        site,
        u64::from(live.connector.connected),
    );
    write_metric(
        output,
        "cattlenet_fallback_active",
        "1 while synthetic data is being generated",
        MetricType::Gauge,
        site,
        u64::from(live.connector.fallback_active),
    );
    write_metric(
        output,
        "cattlenet_reconnect_attempts_total",
        "Broker reconnect attempts",
        MetricType::Counter,
        site,
        live.connector.reconnect_attempts,
    );
}

fn render_metrics(engine: &Engine, site_id: &str) -> String {
    let live = LiveState {
        registered_cattle: engine.registered_cattle(),
        subscribers: engine.fanout().subscriber_count(),
        connector: engine.connector_status(),
    };
    let summary = engine.metrics().snapshot(live.registered_cattle, live.subscribers);
    format_prometheus_metrics(&summary, &live, site_id)
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    engine: Arc<Engine>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Ok(text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            render_metrics(&engine, &site_id),
        )),
        (&Method::GET, "/healthz") => {
            let snapshot = engine.connector_status();
            let status = if snapshot.connected || snapshot.fallback_active {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            let body = serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string());
            Ok(text_response(status, "application/json", body))
        }
        _ => Ok(text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string())),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    engine: Arc<Engine>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let engine = engine.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let engine = engine.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, engine, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
