//! Prometheus text exposition format.
//!
//! Metric names follow the ones the Grafana dashboards and the model update
//! verification job query (`model_switches_total`, `recommend_requests_total`,
//! `recommend_latency_seconds`).

use std::fmt::Write;

use crate::collector::{LATENCY_BUCKETS, MetricsCollector};

/// Render all collected metrics into Prometheus text format.
pub fn render_prometheus(metrics: &MetricsCollector) -> String {
    let mut out = String::new();

    out.push_str("# HELP model_switches_total Model version switch attempts.\n");
    out.push_str("# TYPE model_switches_total counter\n");
    for ((from, to, status), value) in metrics.switches.sorted() {
        let _ = writeln!(
            out,
            "model_switches_total{{from_version=\"{}\",to_version=\"{}\",status=\"{}\"}} {}",
            escape(&from),
            escape(&to),
            status,
            value
        );
    }

    out.push_str("# HELP model_version_info Currently active model version.\n");
    out.push_str("# TYPE model_version_info gauge\n");
    if let Some(v) = metrics.current_version() {
        let _ = writeln!(
            out,
            "model_version_info{{model_name=\"{}\",version=\"{}\",git_sha=\"{}\",data_snapshot=\"{}\"}} 1",
            escape(&v.model_name),
            escape(&v.version),
            escape(&v.git_sha),
            escape(&v.data_snapshot)
        );
    }

    out.push_str("# HELP recommend_requests_total Recommendation requests.\n");
    out.push_str("# TYPE recommend_requests_total counter\n");
    for ((status, variant), value) in metrics.requests.sorted() {
        let _ = writeln!(
            out,
            "recommend_requests_total{{status=\"{}\",variant=\"{}\"}} {}",
            status,
            escape(&variant),
            value
        );
    }

    out.push_str("# HELP recommend_latency_seconds Recommendation latency.\n");
    out.push_str("# TYPE recommend_latency_seconds histogram\n");
    let (buckets, sum, count) = metrics.latency.read();
    for (bound, value) in LATENCY_BUCKETS.iter().zip(&buckets) {
        let _ = writeln!(out, "recommend_latency_seconds_bucket{{le=\"{bound}\"}} {value}");
    }
    let _ = writeln!(out, "recommend_latency_seconds_bucket{{le=\"+Inf\"}} {count}");
    let _ = writeln!(out, "recommend_latency_seconds_sum {sum:.6}");
    let _ = writeln!(out, "recommend_latency_seconds_count {count}");

    out.push_str("# HELP shadow_requests_total Background shadow invocations.\n");
    out.push_str("# TYPE shadow_requests_total counter\n");
    for ((version, status), value) in metrics.shadow.sorted() {
        let _ = writeln!(
            out,
            "shadow_requests_total{{version=\"{}\",status=\"{}\"}} {}",
            escape(&version),
            status,
            value
        );
    }

    out
}

/// Escape a label value per the exposition format.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
