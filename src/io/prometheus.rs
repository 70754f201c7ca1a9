//! Prometheus metrics HTTP endpoint
//!
//! Exposes display metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
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

/// Write a simple metric (counter or gauge) with display label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, display: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{display=\"{display}\"}} {val}");
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, display: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{display=\"{display}\"}} {val:.1}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    display: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{display=\"{display}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{display=\"{display}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{display=\"{display}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{display=\"{display}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, display_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_feed_metrics(&mut output, display_id, &summary);
    write_reveal_metrics(&mut output, display_id, &summary);
    write_refresh_metrics(&mut output, display_id, &summary);
    write_display_metrics(&mut output, display_id, &summary);

    output
}

fn write_feed_metrics(output: &mut String, display: &str, summary: &MetricsSummary) {
    let counters = [
        ("live_reveal_notifications_total", "Rating notifications received", summary.notifications_total),
        (
            "live_reveal_notifications_ignored_total",
            "Notifications for a group that is not active",
            summary.notifications_ignored,
        ),
        ("live_reveal_feed_malformed_total", "Feed payloads that could not be decoded", summary.feed_malformed),
        (
            "live_reveal_subscribe_failures_total",
            "Change feed subscriptions that could not be opened",
            summary.subscribe_failures,
        ),
        ("live_reveal_group_switches_total", "Active group changes", summary.group_switches),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, display, val);
    }
}

fn write_reveal_metrics(output: &mut String, display: &str, summary: &MetricsSummary) {
    let counters = [
        ("live_reveal_sessions_started_total", "Reveal sessions started", summary.sessions_started),
        (
            "live_reveal_sessions_superseded_total",
            "Notifications that re-armed a pending suspense",
            summary.sessions_superseded,
        ),
        ("live_reveal_reveals_completed_total", "Reveals that reached the settled state", summary.reveals_completed),
        ("live_reveal_name_fallbacks_total", "Participant names shown as anonymous", summary.name_fallbacks),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, display, val);
    }
}

fn write_refresh_metrics(output: &mut String, display: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "live_reveal_refresh_total",
        "Successful aggregate refreshes",
        MetricType::Counter,
        display,
        summary.refresh_total,
    );
    write_metric(
        output,
        "live_reveal_refresh_failed_total",
        "Failed aggregate refreshes",
        MetricType::Counter,
        display,
        summary.refresh_failed,
    );
    write_histogram(
        output,
        "live_reveal_refresh_latency_ms",
        "Aggregate refresh latency in milliseconds",
        display,
        &summary.refresh_latency_buckets_total,
        summary.refresh_latency_sum_total_ms,
    );
    write_metric(
        output,
        "live_reveal_refresh_latency_p95_ms",
        "95th percentile refresh latency",
        MetricType::Gauge,
        display,
        summary.refresh_latency_p95_ms,
    );
}

fn write_display_metrics(output: &mut String, display: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "live_reveal_displayed_count",
        "Vote count currently on screen",
        MetricType::Gauge,
        display,
        summary.displayed_count,
    );
    write_gauge_f64(
        output,
        "live_reveal_displayed_average",
        "Average currently on screen",
        display,
        summary.displayed_average_tenths as f64 / 10.0,
    );
    write_metric(
        output,
        "live_reveal_frames_dropped_total",
        "Display frames dropped because the publisher was behind",
        MetricType::Counter,
        display,
        summary.frames_dropped,
    );
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
    metrics: Arc<Metrics>,
    display_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &display_id),
        ),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "ok".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    display_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let display_id = Arc::new(display_id);

    info!(port = %port, display = %display_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let display_id = display_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let display_id = display_id.clone();
                                async move { handle_request(req, metrics, display_id).await }
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
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
