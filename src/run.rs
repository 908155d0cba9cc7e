//! Top-level run orchestration: scenario selection, login, phases, report.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use url::Url;

use crate::auth::{AuthConfig, AuthSession};
use crate::catalog::QueryCatalog;
use crate::dispatch::RequestDispatcher;
use crate::error::RunError;
use crate::executor::{ExecutionStats, Executor};
use crate::metrics::{names, MetricsCollector, MetricsSnapshot};
use crate::report::{RenderedReport, RunInfo, SummaryReporter};
use crate::scenario::ScenarioRegistry;
use crate::transport::Transport;
use crate::vu::VuContext;

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub endpoint: Url,
    pub auth: AuthConfig,
    /// `None` runs every registered scenario, one after another.
    pub scenario: Option<String>,
    pub query: String,
    pub think_time: Duration,
    pub request_timeout: Duration,
    pub reconcile_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub rendered: RenderedReport,
    pub stats: ExecutionStats,
    pub metrics: MetricsSnapshot,
}

pub struct LoadTest {
    settings: RunSettings,
    transport: Arc<dyn Transport>,
    catalog: QueryCatalog,
    registry: ScenarioRegistry,
}

impl LoadTest {
    pub fn new(settings: RunSettings, transport: Arc<dyn Transport>, catalog: QueryCatalog) -> Self {
        Self {
            settings,
            transport,
            catalog,
            registry: ScenarioRegistry::builtin(),
        }
    }

    pub fn with_registry(mut self, registry: ScenarioRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Authenticates, drives the selected scenarios, then summarizes.
    /// Only setup failures are returned as errors.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let settings = &self.settings;
        let phases = self.registry.select(settings.scenario.as_deref())?;

        if self.catalog.get(&settings.query).is_none() {
            warn!(
                "Query {} is not in the catalog; iterations will send nothing",
                settings.query
            );
        }

        let metrics = MetricsCollector::new();
        metrics.declare_counters(&[
            names::ITERATIONS,
            names::HTTP_REQS,
            names::HTTP_REQ_FAILED,
            names::GRAPHQL_ERRORS,
            names::DATA_SENT,
            names::DATA_RECEIVED,
        ]);

        let session = AuthSession::acquire(self.transport.as_ref(), &settings.auth, &metrics).await?;

        let dispatcher = RequestDispatcher::new(
            Arc::clone(&self.transport),
            settings.endpoint.clone(),
            settings.request_timeout,
            metrics.clone(),
        );
        let ctx = Arc::new(VuContext {
            catalog: self.catalog.clone(),
            query: settings.query.clone(),
            dispatcher,
            session,
            metrics: metrics.clone(),
            think_time: settings.think_time,
        });
        let executor = Executor::new(ctx, settings.reconcile_interval);

        let started_at = Utc::now();
        let mut stats = ExecutionStats::default();
        for (i, phase) in phases.iter().enumerate() {
            info!("Phase {}/{}: {}", i + 1, phases.len(), phase.name);
            stats = stats.merge(executor.run(phase).await);
        }
        let finished_at = Utc::now();

        info!(
            "All phases complete: {} iterations, {} max VUs",
            stats.iterations, stats.peak_vus
        );

        let run = RunInfo {
            scenarios: phases.iter().map(|p| p.name.clone()).collect(),
            query: settings.query.clone(),
            started_at,
            finished_at,
            stats,
        };
        let rendered = SummaryReporter::new(metrics.clone()).finalize(&run)?;

        Ok(RunReport {
            rendered,
            stats,
            metrics: metrics.snapshot(),
        })
    }
}
