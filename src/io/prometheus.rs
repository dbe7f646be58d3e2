//! Prometheus text exposition for the `/metrics` endpoint

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

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

/// Write a counter split by a `kind` label
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (kind, val) in values {
        let _ = writeln!(output, "{name}{{site=\"{site}\",kind=\"{kind}\"}} {val}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
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
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Escape a label value (backslash, double quote and newline)
fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let site = escape_label_value(site_id);
    let mut output = String::with_capacity(4096);

    write_request_metrics(&mut output, &site, &summary);
    write_visitor_metrics(&mut output, &site, &summary);
    write_lookup_metrics(&mut output, &site, &summary);

    output
}

fn write_request_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "visitor_gate_requests_total",
        "Total HTTP requests handled",
        MetricType::Counter,
        site,
        summary.requests_total,
    );
    write_metric(
        output,
        "visitor_gate_client_errors_total",
        "Requests answered with a 4xx status",
        MetricType::Counter,
        site,
        summary.client_errors_total,
    );
    write_metric(
        output,
        "visitor_gate_server_errors_total",
        "Requests answered with a 5xx status",
        MetricType::Counter,
        site,
        summary.server_errors_total,
    );
    write_histogram(
        output,
        "visitor_gate_request_latency_us",
        "Request handling latency in microseconds",
        site,
        &summary.latency_buckets,
        summary.latency_sum_us,
    );
    write_metric(
        output,
        "visitor_gate_request_latency_p99_us",
        "99th percentile request latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_visitor_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "visitor_gate_visitors_created_total",
        "Visitors registered",
        MetricType::Counter,
        site,
        summary.visitors_created,
    );
    write_metric(
        output,
        "visitor_gate_credential_conflicts_total",
        "Registrations rejected for a credential already in use",
        MetricType::Counter,
        site,
        summary.credential_conflicts,
    );
    write_metric(
        output,
        "visitor_gate_credential_reissues_total",
        "Issued credentials regenerated after a collision",
        MetricType::Counter,
        site,
        summary.credential_reissues,
    );
    write_metric(
        output,
        "visitor_gate_arrivals_total",
        "Visitors marked as arrived",
        MetricType::Counter,
        site,
        summary.arrivals_confirmed,
    );
    write_metric(
        output,
        "visitor_gate_arrivals_repeated_total",
        "Arrival confirmations for visitors already arrived",
        MetricType::Counter,
        site,
        summary.arrivals_repeated,
    );
}

fn write_lookup_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labeled_counter(
        output,
        "visitor_gate_lookups_total",
        "Security lookups by kind",
        site,
        &[
            ("token", summary.token_lookups),
            ("otp", summary.otp_lookups),
            ("name", summary.name_searches),
        ],
    );
    write_metric(
        output,
        "visitor_gate_lookup_misses_total",
        "Security lookups that matched no visitor",
        MetricType::Counter,
        site,
        summary.lookup_misses,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::LookupKind;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_request(200, 150);
        metrics.record_request(404, 40);
        metrics.record_visitor_created();
        metrics.record_lookup(LookupKind::Otp, false);
        metrics.record_arrival(true);

        let output = format_prometheus_metrics(&metrics, "tower-a");

        assert!(output.contains("visitor_gate_requests_total{site=\"tower-a\"} 2"));
        assert!(output.contains("visitor_gate_client_errors_total{site=\"tower-a\"} 1"));
        assert!(output.contains("visitor_gate_request_latency_us_bucket{site=\"tower-a\",le=\"50\"} 1"));
        assert!(output.contains("visitor_gate_request_latency_us_bucket{site=\"tower-a\",le=\"+Inf\"} 2"));
        assert!(output.contains("visitor_gate_request_latency_us_sum{site=\"tower-a\"} 190"));
        assert!(output.contains("visitor_gate_visitors_created_total{site=\"tower-a\"} 1"));
        assert!(output.contains("visitor_gate_lookups_total{site=\"tower-a\",kind=\"otp\"} 1"));
        assert!(output.contains("visitor_gate_lookup_misses_total{site=\"tower-a\"} 1"));
        assert!(output.contains("visitor_gate_arrivals_total{site=\"tower-a\"} 1"));
    }

    #[test]
    fn test_site_label_is_escaped() {
        assert_eq!(escape_label_value(r#"tower "a"\b"#), r#"tower \"a\"\\b"#);
        assert_eq!(escape_label_value("line\nbreak"), "line\\nbreak");

        let output = format_prometheus_metrics(&Metrics::new(), r#"say "hi""#);
        assert!(output.contains(r#"visitor_gate_requests_total{site="say \"hi\""} 0"#));
    }
}
