//! End-of-run summary: reduces the collector's final state to a typed report,
//! a text rendering and a JSON dump.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::RunError;
use crate::executor::ExecutionStats;
use crate::metrics::{names, MetricsCollector, MetricsSnapshot, TrendStats};

pub const NOT_AVAILABLE: &str = "n/a";

const RULE: &str = "════════════════════════════════════════════════════════════";

// =============================================================================
// Report model
// =============================================================================

/// What the run was, independent of what it measured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInfo {
    pub scenarios: Vec<String>,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: ExecutionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseRow {
    pub phase: String,
    pub stats: Option<TrendStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRow {
    pub query: String,
    pub stats: TrendStats,
    pub failed: u64,
    pub graphql_errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rate {
    pub total: u64,
    pub per_second: Option<f64>,
}

/// Read-only snapshot of a finished run. `None` marks a metric nothing was
/// recorded for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub run: RunInfo,
    pub vus_max: usize,
    pub iterations: Option<Rate>,
    pub http_reqs: Option<Rate>,
    pub failure_rate: Option<f64>,
    pub checks_pass_rate: Option<f64>,
    pub http_req_duration: Option<TrendStats>,
    pub auth_duration: Option<TrendStats>,
    pub graphql_errors: Option<u64>,
    pub phases: Vec<PhaseRow>,
    pub data_sent: Option<Rate>,
    pub data_received: Option<Rate>,
    pub iteration_duration: Option<TrendStats>,
    pub per_query: Vec<QueryRow>,
}

fn ratio(part: u64, whole: u64) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64)
}

impl SummaryReport {
    /// Pure function of its inputs; the same snapshot always yields the same
    /// report.
    pub fn from_snapshot(snapshot: &MetricsSnapshot, run: &RunInfo) -> Self {
        let elapsed = run.stats.elapsed.as_secs_f64();
        let rate = |name: &str| {
            snapshot.counter(name).map(|total| Rate {
                total,
                per_second: (elapsed > 0.0).then(|| total as f64 / elapsed),
            })
        };

        let requests = snapshot.counter(names::HTTP_REQS);
        let failure_rate = requests.and_then(|total| {
            ratio(snapshot.counter(names::HTTP_REQ_FAILED).unwrap_or(0), total)
        });

        let passed = snapshot.counter(names::CHECKS_PASSED).unwrap_or(0);
        let failed = snapshot.counter(names::CHECKS_FAILED).unwrap_or(0);

        let phases = names::PHASES
            .iter()
            .map(|phase| PhaseRow {
                phase: phase.trim_start_matches("http_req_").to_string(),
                stats: snapshot.trend(phase).cloned(),
            })
            .collect();

        let per_query = snapshot
            .trends
            .get(names::HTTP_REQ_DURATION)
            .map(|trend| {
                trend
                    .by_tag
                    .iter()
                    .map(|(query, stats)| QueryRow {
                        query: query.clone(),
                        stats: stats.clone(),
                        failed: snapshot
                            .counter_for_tag(names::HTTP_REQ_FAILED, query)
                            .unwrap_or(0),
                        graphql_errors: snapshot
                            .counter_for_tag(names::GRAPHQL_ERRORS, query)
                            .unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            run: run.clone(),
            vus_max: run.stats.peak_vus,
            iterations: rate(names::ITERATIONS),
            http_reqs: rate(names::HTTP_REQS),
            failure_rate,
            checks_pass_rate: ratio(passed, passed + failed),
            http_req_duration: snapshot.trend(names::HTTP_REQ_DURATION).cloned(),
            auth_duration: snapshot.trend(names::AUTH_DURATION).cloned(),
            graphql_errors: snapshot.counter(names::GRAPHQL_ERRORS),
            phases,
            data_sent: rate(names::DATA_SENT),
            data_received: rate(names::DATA_RECEIVED),
            iteration_duration: snapshot.trend(names::ITERATION_DURATION).cloned(),
            per_query,
        }
    }
}

// =============================================================================
// Text rendering
// =============================================================================

struct Num(Option<f64>);

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{:.2}", v),
            None => f.write_str(NOT_AVAILABLE),
        }
    }
}

struct Percent(Option<f64>);

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{:.2}%", v * 100.0),
            None => f.write_str(NOT_AVAILABLE),
        }
    }
}

struct Counted<'a>(&'a Option<Rate>, &'a str);

impl fmt::Display for Counted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(rate) => write!(
                f,
                "{}{} ({}{}/s)",
                rate.total,
                self.1,
                Num(rate.per_second),
                self.1
            ),
            None => f.write_str(NOT_AVAILABLE),
        }
    }
}

/// `avg=.. p90=.. p95=.. p99=..`, or the not-available marker for an
/// untouched or empty series.
struct Percentiles<'a>(Option<&'a TrendStats>);

impl fmt::Display for Percentiles<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(s) if s.count > 0 => write!(
                f,
                "avg={} p90={} p95={} p99={}",
                Num(s.avg),
                Num(s.p90),
                Num(s.p95),
                Num(s.p99)
            ),
            _ => f.write_str(NOT_AVAILABLE),
        }
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "                     LOAD TEST SUMMARY")?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Scenarios:  {}", self.run.scenarios.join(", "))?;
        writeln!(f, "Query:      {}", self.run.query)?;
        writeln!(f, "Started:    {}", self.run.started_at.to_rfc3339())?;
        writeln!(f, "Finished:   {}", self.run.finished_at.to_rfc3339())?;
        writeln!(f, "Duration:   {:.2}s", self.run.stats.elapsed.as_secs_f64())?;

        writeln!(f)?;
        writeln!(f, "High-level Metrics:")?;
        writeln!(f, "  VUs (max):           {}", self.vus_max)?;
        writeln!(f, "  Iterations:          {}", Counted(&self.iterations, ""))?;
        writeln!(f, "  HTTP requests:       {}", Counted(&self.http_reqs, ""))?;
        writeln!(f, "  Failure rate:        {}", Percent(self.failure_rate))?;
        writeln!(f, "  Checks passed:       {}", Percent(self.checks_pass_rate))?;
        writeln!(
            f,
            "  Response time (ms):  {}",
            Percentiles(self.http_req_duration.as_ref())
        )?;

        writeln!(f)?;
        writeln!(f, "Custom Metrics:")?;
        writeln!(
            f,
            "  Auth duration (ms):  {}",
            Percentiles(self.auth_duration.as_ref())
        )?;
        match self.graphql_errors {
            Some(total) => writeln!(f, "  GraphQL errors:      {}", total)?,
            None => writeln!(f, "  GraphQL errors:      {}", NOT_AVAILABLE)?,
        }

        writeln!(f)?;
        writeln!(f, "Phase Timings (ms):")?;
        for row in &self.phases {
            writeln!(f, "  {:<18} {}", row.phase, Percentiles(row.stats.as_ref()))?;
        }

        writeln!(f)?;
        writeln!(f, "Data Transfer:")?;
        writeln!(f, "  Sent:                {}", Counted(&self.data_sent, " B"))?;
        writeln!(f, "  Received:            {}", Counted(&self.data_received, " B"))?;

        writeln!(f)?;
        writeln!(f, "Iteration Duration (ms):")?;
        match self.iteration_duration.as_ref().filter(|s| s.count > 0) {
            Some(s) => writeln!(
                f,
                "  count={} avg={} min={} med={} max={} p90={} p95={}",
                s.count,
                Num(s.avg),
                Num(s.min),
                Num(s.med),
                Num(s.max),
                Num(s.p90),
                Num(s.p95)
            )?,
            None => writeln!(f, "  {}", NOT_AVAILABLE)?,
        }

        writeln!(f)?;
        writeln!(f, "Per-Query Breakdown (ms):")?;
        if self.per_query.is_empty() {
            writeln!(f, "  {}", NOT_AVAILABLE)?;
        } else {
            writeln!(
                f,
                "  {:<24} {:>8} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}",
                "query", "count", "avg", "p90", "p95", "p99", "failed", "errors"
            )?;
            for row in &self.per_query {
                writeln!(
                    f,
                    "  {:<24} {:>8} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}",
                    row.query,
                    row.stats.count,
                    Num(row.stats.avg).to_string(),
                    Num(row.stats.p90).to_string(),
                    Num(row.stats.p95).to_string(),
                    Num(row.stats.p99).to_string(),
                    row.failed,
                    row.graphql_errors
                )?;
            }
        }

        write!(f, "{}", RULE)
    }
}

// =============================================================================
// Reporter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    Collecting,
    Finalizing,
    Rendered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub summary: SummaryReport,
    pub text: String,
    pub json: String,
}

#[derive(Serialize)]
struct Dump<'a> {
    metrics: &'a MetricsSnapshot,
    summary: &'a SummaryReport,
    text: &'a str,
}

pub struct SummaryReporter {
    metrics: MetricsCollector,
    state: ReporterState,
    rendered: Option<RenderedReport>,
}

impl SummaryReporter {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self {
            metrics,
            state: ReporterState::Collecting,
            rendered: None,
        }
    }

    pub fn state(&self) -> ReporterState {
        self.state
    }

    /// Must only be called once every virtual user has stopped. Later calls
    /// return the report produced by the first.
    pub fn finalize(&mut self, run: &RunInfo) -> Result<RenderedReport, RunError> {
        if let Some(rendered) = &self.rendered {
            return Ok(rendered.clone());
        }

        self.state = ReporterState::Finalizing;
        debug!("Finalizing summary");

        let rendered = render(&self.metrics.snapshot(), run)?;
        self.rendered = Some(rendered.clone());
        self.state = ReporterState::Rendered;
        Ok(rendered)
    }
}

pub fn render(snapshot: &MetricsSnapshot, run: &RunInfo) -> Result<RenderedReport, RunError> {
    let summary = SummaryReport::from_snapshot(snapshot, run);
    let text = summary.to_string();
    let json = sonic_rs::to_string_pretty(&Dump {
        metrics: snapshot,
        summary: &summary,
        text: &text,
    })
    .map_err(|e| RunError::Serialize(e.to_string()))?;

    Ok(RenderedReport {
        summary,
        text,
        json,
    })
}
