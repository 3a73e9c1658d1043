//! Prometheus metrics HTTP endpoint
//!
//! Exposes faregate metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::broadcaster::Broadcaster;
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
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
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

fn write_scan_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "faregate_scans_total",
        "Total ticket scans processed",
        MetricType::Counter,
        site,
        summary.scans_total,
    );
    write_metric(
        output,
        "faregate_scans_accepted_total",
        "Scans accepted",
        MetricType::Counter,
        site,
        summary.accepted_total,
    );

    let _ = writeln!(output, "# HELP faregate_scans_rejected_total Scans rejected by reason");
    let _ = writeln!(output, "# TYPE faregate_scans_rejected_total counter");
    let _ = writeln!(
        output,
        "faregate_scans_rejected_total{{site=\"{site}\",reason=\"not_found\"}} {}",
        summary.rejected_not_found_total
    );
    let _ = writeln!(
        output,
        "faregate_scans_rejected_total{{site=\"{site}\",reason=\"already_used\"}} {}",
        summary.rejected_already_used_total
    );
    let _ = writeln!(
        output,
        "faregate_scans_rejected_total{{site=\"{site}\",reason=\"invalid\"}} {}",
        summary.rejected_invalid_total
    );

    write_metric(
        output,
        "faregate_store_errors_total",
        "Scans aborted by store unavailability",
        MetricType::Counter,
        site,
        summary.store_errors_total,
    );

    write_histogram(
        output,
        "faregate_scan_latency_us",
        "Validation latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_latency_us,
    );
}

fn write_broadcast_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "faregate_events_published_total",
        "Events published on the bus",
        MetricType::Counter,
        site,
        summary.events_published_total,
    );
    write_metric(
        output,
        "faregate_events_dropped_total",
        "Events dropped from subscriber backlogs",
        MetricType::Counter,
        site,
        summary.events_dropped_total,
    );
    write_metric(
        output,
        "faregate_heartbeats_total",
        "Heartbeat frames emitted",
        MetricType::Counter,
        site,
        summary.heartbeats_total,
    );
    write_metric(
        output,
        "faregate_egress_dropped_total",
        "MQTT egress messages dropped",
        MetricType::Counter,
        site,
        summary.egress_dropped_total,
    );
    write_metric(
        output,
        "faregate_subscribers",
        "Currently connected subscribers",
        MetricType::Gauge,
        site,
        summary.subscribers,
    );
    write_metric(
        output,
        "faregate_subscribers_degraded",
        "Subscribers currently degraded",
        MetricType::Gauge,
        site,
        summary.degraded,
    );
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, bus: &Broadcaster, site_id: &str) -> String {
    let summary = metrics.report(bus.subscriber_count() as u64, bus.degraded_count() as u64);
    let mut output = String::with_capacity(4096);

    write_scan_metrics(&mut output, site_id, &summary);
    write_broadcast_metrics(&mut output, site_id, &summary);

    output
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    bus: Arc<Broadcaster>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &bus, &site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))),
    };

    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    bus: Arc<Broadcaster>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "metrics_server_bind_failed");
            return Err(e.into());
        }
    };

    info!(addr = %addr, "metrics_server_started");
    let site_id = Arc::new(site_id);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("metrics_server_shutdown");
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "metrics_accept_failed");
                        continue;
                    }
                };

                let metrics = metrics.clone();
                let bus = bus.clone();
                let site_id = site_id.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        handle_request(req, metrics.clone(), bus.clone(), site_id.clone())
                    });
                    let _ = http1::Builder::new().serve_connection(io, service).await;
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ticket::ValidationOutcome;

    #[test]
    fn test_format_contains_scan_counters() {
        let metrics = Arc::new(Metrics::new());
        let bus = Broadcaster::new(8, metrics.clone());
        metrics.record_scan(ValidationOutcome::Accepted, 150);

        let output = format_prometheus_metrics(&metrics, &bus, "depot-n");
        assert!(output.contains("faregate_scans_total{site=\"depot-n\"} 1"));
        assert!(output.contains("faregate_scans_accepted_total{site=\"depot-n\"} 1"));
        assert!(output.contains("# TYPE faregate_scan_latency_us histogram"));
        assert!(output.contains("faregate_scan_latency_us_bucket{site=\"depot-n\",le=\"+Inf\"} 1"));
    }

    #[test]
    fn test_format_reports_subscriber_gauges() {
        let metrics = Arc::new(Metrics::new());
        let bus = Broadcaster::new(8, metrics.clone());
        let _sub = bus.subscribe(crate::services::broadcaster::ClientId::from("dash-1"));

        let output = format_prometheus_metrics(&metrics, &bus, "depot-n");
        assert!(output.contains("faregate_subscribers{site=\"depot-n\"} 1"));
        assert!(output.contains("faregate_subscribers_degraded{site=\"depot-n\"} 0"));
    }
}
