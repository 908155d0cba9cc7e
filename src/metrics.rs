//! Process-wide metric accumulation.
//!
//! Trends keep every raw sample next to a running sum, so percentiles are
//! exact nearest-rank values over the full sample set. Counters keep running
//! totals. Both can be partitioned by a tag, usually the query name.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

// =============================================================================
// Metric names
// =============================================================================

pub mod names {
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_BLOCKED: &str = "http_req_blocked";
    pub const HTTP_REQ_CONNECTING: &str = "http_req_connecting";
    pub const HTTP_REQ_TLS_HANDSHAKING: &str = "http_req_tls_handshaking";
    pub const HTTP_REQ_SENDING: &str = "http_req_sending";
    pub const HTTP_REQ_WAITING: &str = "http_req_waiting";
    pub const HTTP_REQ_RECEIVING: &str = "http_req_receiving";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const DATA_SENT: &str = "data_sent";
    pub const DATA_RECEIVED: &str = "data_received";
    pub const AUTH_DURATION: &str = "auth_duration";
    pub const GRAPHQL_ERRORS: &str = "graphql_errors";
    pub const CHECKS_PASSED: &str = "checks_passed";
    pub const CHECKS_FAILED: &str = "checks_failed";

    /// Per-phase timing trends in report order.
    pub const PHASES: [&str; 6] = [
        HTTP_REQ_BLOCKED,
        HTTP_REQ_CONNECTING,
        HTTP_REQ_TLS_HANDSHAKING,
        HTTP_REQ_SENDING,
        HTTP_REQ_WAITING,
        HTTP_REQ_RECEIVING,
    ];
}

// =============================================================================
// Trend
// =============================================================================

#[derive(Default)]
pub struct TrendSeries {
    samples: Vec<f64>,
    sum: f64,
}

/// Nearest-rank percentile over ascending `sorted`, `p` in `0..=100`.
fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

impl TrendSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
        self.samples.push(value);
        self.sum += value;
    }

    pub fn count(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count() > 0).then(|| self.sum / self.count() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().copied().reduce(f64::max)
    }

    fn sorted(&self) -> Vec<f64> {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        sorted
    }

    /// Nearest-rank percentile, `p` in `0..=100`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        nearest_rank(&self.sorted(), p)
    }

    pub fn stats(&self) -> TrendStats {
        let sorted = self.sorted();
        TrendStats {
            count: self.count(),
            avg: self.mean(),
            min: sorted.first().copied(),
            med: nearest_rank(&sorted, 50.0),
            max: sorted.last().copied(),
            p90: nearest_rank(&sorted, 90.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
        }
    }
}

/// Summary of one trend series. Every statistic is `None` when the series
/// is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendStats {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub med: Option<f64>,
    pub max: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

#[derive(Default)]
struct Trend {
    overall: TrendSeries,
    by_tag: BTreeMap<String, TrendSeries>,
}

#[derive(Default)]
struct Counter {
    total: u64,
    by_tag: BTreeMap<String, u64>,
}

// =============================================================================
// Collector
// =============================================================================

type Series<T> = Arc<RwLock<HashMap<String, Arc<Mutex<T>>>>>;

/// Shared accumulator. Each metric has its own lock, so writers to different
/// metrics never wait on each other.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    trends: Series<Trend>,
    counters: Series<Counter>,
}

fn series<T: Default>(map: &Series<T>, name: &str) -> Arc<Mutex<T>> {
    if let Some(existing) = map.read().get(name) {
        return Arc::clone(existing);
    }
    Arc::clone(map.write().entry(name.to_string()).or_default())
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trend(&self, name: &str, value: f64, tag: Option<&str>) {
        let trend = series(&self.trends, name);
        let mut trend = trend.lock();
        trend.overall.record(value);
        if let Some(tag) = tag {
            trend.by_tag.entry(tag.to_string()).or_default().record(value);
        }
    }

    /// Records a duration in milliseconds.
    pub fn add_duration(&self, name: &str, duration: Duration, tag: Option<&str>) {
        self.add_trend(name, duration.as_secs_f64() * 1000.0, tag);
    }

    pub fn add_counter(&self, name: &str, amount: u64, tag: Option<&str>) {
        let counter = series(&self.counters, name);
        let mut counter = counter.lock();
        counter.total += amount;
        if let Some(tag) = tag {
            *counter.by_tag.entry(tag.to_string()).or_default() += amount;
        }
    }

    /// Registers counters so they report zero instead of "not available"
    /// when nothing was added.
    pub fn declare_counters(&self, names: &[&str]) {
        for name in names {
            series(&self.counters, name);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let trends = self
            .trends
            .read()
            .iter()
            .map(|(name, trend)| {
                let trend = trend.lock();
                let snapshot = TrendSnapshot {
                    overall: trend.overall.stats(),
                    by_tag: trend
                        .by_tag
                        .iter()
                        .map(|(tag, s)| (tag.clone(), s.stats()))
                        .collect(),
                };
                (name.clone(), snapshot)
            })
            .collect();

        let counters = self
            .counters
            .read()
            .iter()
            .map(|(name, counter)| {
                let counter = counter.lock();
                let snapshot = CounterSnapshot {
                    total: counter.total,
                    by_tag: counter.by_tag.clone(),
                };
                (name.clone(), snapshot)
            })
            .collect();

        MetricsSnapshot { trends, counters }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSnapshot {
    pub overall: TrendStats,
    pub by_tag: BTreeMap<String, TrendStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub total: u64,
    pub by_tag: BTreeMap<String, u64>,
}

/// Point-in-time copy of every metric, ordered by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub trends: BTreeMap<String, TrendSnapshot>,
    pub counters: BTreeMap<String, CounterSnapshot>,
}

impl MetricsSnapshot {
    pub fn trend(&self, name: &str) -> Option<&TrendStats> {
        self.trends.get(name).map(|t| &t.overall)
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).map(|c| c.total)
    }

    pub fn counter_for_tag(&self, name: &str, tag: &str) -> Option<u64> {
        self.counters.get(name).and_then(|c| c.by_tag.get(tag).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_percentile(samples: &[f64], p: f64) -> f64 {
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = ((p / 100.0) * sorted.len() as f64).ceil().max(1.0) as usize;
        sorted[rank - 1]
    }

    #[test]
    fn empty_trend_has_no_statistics() {
        let stats = TrendSeries::new().stats();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.avg, None);
        assert_eq!(stats.p95, None);
        assert_eq!(stats.max, None);
    }

    #[test]
    fn trend_percentiles_are_exact_nearest_rank() {
        let collector = MetricsCollector::new();
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        for s in samples.iter().rev() {
            collector.add_trend(names::HTTP_REQ_DURATION, *s, Some("q"));
        }

        let snapshot = collector.snapshot();
        let stats = snapshot.trend(names::HTTP_REQ_DURATION).unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.avg, Some(50.5));
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(100.0));

        for (p, reported) in [
            (50.0, stats.med),
            (90.0, stats.p90),
            (95.0, stats.p95),
            (99.0, stats.p99),
        ] {
            assert_eq!(reported, Some(direct_percentile(&samples, p)), "p{}", p);
        }
    }

    #[test]
    fn fractional_samples_are_reported_unrounded() {
        let mut series = TrendSeries::new();
        let samples = [2000.0, 100.123, 1234.567];
        for s in samples {
            series.record(s);
        }

        let stats = series.stats();
        assert_eq!(stats.med, Some(1234.567));
        assert_eq!(stats.med, Some(direct_percentile(&samples, 50.0)));
        assert_eq!(stats.min, Some(100.123));
        assert_eq!(stats.p99, Some(2000.0));
        assert_eq!(series.percentile(0.0), Some(100.123));
        assert_eq!(series.percentile(100.0), Some(2000.0));
    }

    #[test]
    fn tags_partition_trends() {
        let collector = MetricsCollector::new();
        collector.add_trend("t", 10.0, Some("a"));
        collector.add_trend("t", 20.0, Some("b"));
        collector.add_trend("t", 30.0, Some("b"));
        collector.add_trend("t", 40.0, None);

        let snapshot = collector.snapshot();
        let trend = &snapshot.trends["t"];
        assert_eq!(trend.overall.count, 4);
        assert_eq!(trend.by_tag["a"].count, 1);
        assert_eq!(trend.by_tag["b"].count, 2);
        assert_eq!(trend.by_tag["b"].avg, Some(25.0));
        assert_eq!(trend.by_tag.len(), 2);
    }

    #[test]
    fn counters_accumulate_by_tag() {
        let collector = MetricsCollector::new();
        collector.declare_counters(&[names::GRAPHQL_ERRORS]);
        assert_eq!(collector.snapshot().counter(names::GRAPHQL_ERRORS), Some(0));

        collector.add_counter(names::GRAPHQL_ERRORS, 1, Some("users"));
        collector.add_counter(names::GRAPHQL_ERRORS, 2, Some("users"));
        collector.add_counter(names::GRAPHQL_ERRORS, 1, Some("posts"));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.counter(names::GRAPHQL_ERRORS), Some(4));
        assert_eq!(snapshot.counter_for_tag(names::GRAPHQL_ERRORS, "users"), Some(3));
        assert_eq!(snapshot.counter("never"), None);
    }

    #[test]
    fn durations_are_milliseconds() {
        let collector = MetricsCollector::new();
        collector.add_duration("d", Duration::from_millis(250), None);
        assert_eq!(collector.snapshot().trend("d").unwrap().avg, Some(250.0));
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let collector = MetricsCollector::new();
        let handles: Vec<_> = (0..8)
            .map(|w| {
                let collector = collector.clone();
                std::thread::spawn(move || {
                    let tag = format!("w{}", w % 2);
                    for i in 0..1000 {
                        collector.add_trend("latency", f64::from(i), Some(tag.as_str()));
                        collector.add_counter("hits", 1, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.counter("hits"), Some(8000));
        assert_eq!(snapshot.trend("latency").unwrap().count, 8000);
        assert_eq!(snapshot.trends["latency"].by_tag["w0"].count, 4000);
    }
}
