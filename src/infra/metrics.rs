//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Counters and histogram buckets are monotonic so the Prometheus endpoint can
//! read them at any time; only the per-interval request count and the max
//! latency are reset by `report()`.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not drive any visitor logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket reports 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Which credential or field a security lookup used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Token,
    Otp,
    Name,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupKind::Token => "token",
            LookupKind::Otp => "otp",
            LookupKind::Name => "name",
        }
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Total HTTP requests handled (monotonic)
    requests_total: AtomicU64,
    /// Requests since last report (reset on report)
    requests_since_report: AtomicU64,
    /// Requests answered with a 4xx status (monotonic)
    client_errors_total: AtomicU64,
    /// Requests answered with a 5xx status (monotonic)
    server_errors_total: AtomicU64,
    /// Sum of request latencies in microseconds (monotonic)
    latency_sum_us: AtomicU64,
    /// Max request latency (reset on report)
    latency_max_us: AtomicU64,
    /// Request latency histogram buckets (monotonic)
    latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Visitors registered (monotonic)
    visitors_created: AtomicU64,
    /// Registrations rejected for a caller-supplied duplicate credential
    credential_conflicts: AtomicU64,
    /// Issued credentials regenerated after a collision
    credential_reissues: AtomicU64,
    token_lookups: AtomicU64,
    otp_lookups: AtomicU64,
    name_searches: AtomicU64,
    /// Lookups of any kind that found nothing
    lookup_misses: AtomicU64,
    /// Visitors transitioned to arrived (monotonic)
    arrivals_confirmed: AtomicU64,
    /// Confirmations for visitors already marked arrived
    arrivals_repeated: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_since_report: AtomicU64::new(0),
            client_errors_total: AtomicU64::new(0),
            server_errors_total: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
            visitors_created: AtomicU64::new(0),
            credential_conflicts: AtomicU64::new(0),
            credential_reissues: AtomicU64::new(0),
            token_lookups: AtomicU64::new(0),
            otp_lookups: AtomicU64::new(0),
            name_searches: AtomicU64::new(0),
            lookup_misses: AtomicU64::new(0),
            arrivals_confirmed: AtomicU64::new(0),
            arrivals_repeated: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one HTTP request with its response status and latency
    #[inline]
    pub fn record_request(&self, status: u16, latency_us: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_since_report.fetch_add(1, Ordering::Relaxed);
        match status {
            400..=499 => {
                self.client_errors_total.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.server_errors_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_visitor_created(&self) {
        self.visitors_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_credential_conflict(&self) {
        self.credential_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_credential_reissue(&self) {
        self.credential_reissues.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a security lookup and whether it found a visitor
    #[inline]
    pub fn record_lookup(&self, kind: LookupKind, found: bool) {
        let counter = match kind {
            LookupKind::Token => &self.token_lookups,
            LookupKind::Otp => &self.otp_lookups,
            LookupKind::Name => &self.name_searches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.lookup_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an arrival confirmation; `transitioned` is false for repeats
    #[inline]
    pub fn record_arrival(&self, transitioned: bool) {
        if transitioned {
            self.arrivals_confirmed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.arrivals_repeated.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read every counter without resetting anything
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(
            self.requests_since_report.load(Ordering::Relaxed),
            0.0,
            self.latency_max_us.load(Ordering::Relaxed),
        )
    }

    /// Produce a summary and reset the per-interval counters
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let since_report = self.requests_since_report.swap(0, Ordering::Relaxed);
        let max_us = self.latency_max_us.swap(0, Ordering::Relaxed);
        let rate = if elapsed_secs > 0.0 { since_report as f64 / elapsed_secs } else { 0.0 };

        self.summarize(since_report, rate, max_us)
    }

    fn summarize(
        &self,
        requests_since_report: u64,
        requests_per_sec: f64,
        latency_max_us: u64,
    ) -> MetricsSummary {
        let latency_buckets = load_buckets(&self.latency_buckets);
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let latency_sum_us = self.latency_sum_us.load(Ordering::Relaxed);

        MetricsSummary {
            requests_total,
            requests_since_report,
            requests_per_sec,
            client_errors_total: self.client_errors_total.load(Ordering::Relaxed),
            server_errors_total: self.server_errors_total.load(Ordering::Relaxed),
            latency_sum_us,
            avg_latency_us: if requests_total > 0 { latency_sum_us / requests_total } else { 0 },
            latency_max_us,
            lat_p50_us: percentile_from_buckets(&latency_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&latency_buckets, 0.99),
            latency_buckets,
            visitors_created: self.visitors_created.load(Ordering::Relaxed),
            credential_conflicts: self.credential_conflicts.load(Ordering::Relaxed),
            credential_reissues: self.credential_reissues.load(Ordering::Relaxed),
            token_lookups: self.token_lookups.load(Ordering::Relaxed),
            otp_lookups: self.otp_lookups.load(Ordering::Relaxed),
            name_searches: self.name_searches.load(Ordering::Relaxed),
            lookup_misses: self.lookup_misses.load(Ordering::Relaxed),
            arrivals_confirmed: self.arrivals_confirmed.load(Ordering::Relaxed),
            arrivals_repeated: self.arrivals_repeated.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the metrics
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub requests_total: u64,
    pub requests_since_report: u64,
    pub requests_per_sec: f64,
    pub client_errors_total: u64,
    pub server_errors_total: u64,
    pub latency_sum_us: u64,
    pub avg_latency_us: u64,
    pub latency_max_us: u64,
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub visitors_created: u64,
    pub credential_conflicts: u64,
    pub credential_reissues: u64,
    pub token_lookups: u64,
    pub otp_lookups: u64,
    pub name_searches: u64,
    pub lookup_misses: u64,
    pub arrivals_confirmed: u64,
    pub arrivals_repeated: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            requests_total = %self.requests_total,
            requests_per_sec = %format!("{:.2}", self.requests_per_sec),
            client_errors = %self.client_errors_total,
            server_errors = %self.server_errors_total,
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.latency_max_us,
            lat_p50_us = %self.lat_p50_us,
            lat_p99_us = %self.lat_p99_us,
            visitors_created = %self.visitors_created,
            credential_conflicts = %self.credential_conflicts,
            token_lookups = %self.token_lookups,
            otp_lookups = %self.otp_lookups,
            name_searches = %self.name_searches,
            lookup_misses = %self.lookup_misses,
            arrivals_confirmed = %self.arrivals_confirmed,
            "metrics"
        );
    }
}
