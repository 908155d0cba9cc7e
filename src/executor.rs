//! Drives a scenario profile: keeps the number of running virtual users on
//! the profile's curve until its duration elapses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::scenario::NamedScenario;
use crate::vu::{VirtualUser, VuContext};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub peak_vus: usize,
    pub iterations: u64,
    pub elapsed: Duration,
}

impl ExecutionStats {
    /// Combines consecutive phases.
    pub fn merge(self, other: ExecutionStats) -> ExecutionStats {
        ExecutionStats {
            peak_vus: self.peak_vus.max(other.peak_vus),
            iterations: self.iterations + other.iterations,
            elapsed: self.elapsed + other.elapsed,
        }
    }
}

struct VuHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl VuHandle {
    fn retire(self) -> JoinHandle<u64> {
        self.stop.send(true).ok();
        self.task
    }
}

/// Joins retired VU tasks and sums their iteration counts.
async fn collect(tasks: Vec<JoinHandle<u64>>) -> u64 {
    let mut iterations = 0;
    for result in futures_util::future::join_all(tasks).await {
        match result {
            Ok(count) => iterations += count,
            Err(e) => error!("VU task failed: {}", e),
        }
    }
    iterations
}

pub struct Executor {
    ctx: Arc<VuContext>,
    reconcile_interval: Duration,
    active: Arc<AtomicUsize>,
    next_id: AtomicUsize,
}

impl Executor {
    pub fn new(ctx: Arc<VuContext>, reconcile_interval: Duration) -> Self {
        Self {
            ctx,
            reconcile_interval,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Live count of virtual users that have not been told to stop.
    pub fn active_users(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active)
    }

    fn spawn(&self) -> VuHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (stop, stop_rx) = watch::channel(false);
        let vu = VirtualUser::new(id, Arc::clone(&self.ctx));
        let task = tokio::spawn(vu.run(stop_rx));
        VuHandle { stop, task }
    }

    /// Runs one scenario to completion. Request outcomes never affect the
    /// curve; only elapsed time does.
    pub async fn run(&self, scenario: &NamedScenario) -> ExecutionStats {
        let profile = &scenario.profile;
        let total = profile.total_duration();

        info!("Starting scenario {}: {}", scenario.name, profile);

        let start = Instant::now();
        let mut running: Vec<VuHandle> = Vec::new();
        let mut retired: Vec<JoinHandle<u64>> = Vec::new();
        let mut peak = 0;
        let mut iterations = 0;
        let mut last_log = start;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            let target = profile.target_at(elapsed) as usize;
            while running.len() < target {
                running.push(self.spawn());
            }
            while running.len() > target {
                if let Some(vu) = running.pop() {
                    retired.push(vu.retire());
                }
            }

            self.active.store(running.len(), Ordering::Relaxed);
            peak = peak.max(running.len());

            let (done, pending): (Vec<_>, Vec<_>) =
                retired.drain(..).partition(|task| task.is_finished());
            retired = pending;
            iterations += collect(done).await;

            if last_log.elapsed() >= PROGRESS_INTERVAL {
                info!(
                    "{}: elapsed={}s, target={}, active={}",
                    scenario.name,
                    elapsed.as_secs(),
                    target,
                    running.len()
                );
                last_log = Instant::now();
            }

            // Wake on stage ends so each declared target is hit exactly.
            let boundary = profile.next_boundary(elapsed);
            sleep(self.reconcile_interval.min(boundary - elapsed)).await;
        }

        info!(
            "Scenario {} finished spawning; waiting for {} in-flight VUs",
            scenario.name,
            running.len() + retired.len()
        );

        retired.extend(running.drain(..).map(VuHandle::retire));
        self.active.store(0, Ordering::Relaxed);

        iterations += collect(retired).await;

        let elapsed = start.elapsed();
        debug!(
            "Scenario {} complete: {} iterations in {:?}",
            scenario.name, iterations, elapsed
        );

        ExecutionStats {
            peak_vus: peak,
            iterations,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthSession;
    use crate::catalog::{QueryCatalog, RequestTemplate};
    use crate::dispatch::RequestDispatcher;
    use crate::error::TransportError;
    use crate::metrics::{names, MetricsCollector};
    use crate::scenario::{ScenarioProfile, Stage};
    use crate::transport::{HttpRequest, HttpResponse, Timings, Transport};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;
    use url::Url;

    struct StaticTransport {
        delay: Duration,
        sent: AtomicU64,
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            sleep(self.delay).await;
            self.sent.fetch_add(1, Ordering::Relaxed);
            Ok(HttpResponse {
                status: 200,
                body: r#"{"data":{"__typename":"Query"}}"#.to_string(),
                timings: Timings::default(),
            })
        }
    }

    fn executor(delay: Duration, query: &str) -> (Executor, MetricsCollector, Arc<StaticTransport>) {
        let metrics = MetricsCollector::new();
        let transport = Arc::new(StaticTransport {
            delay,
            sent: AtomicU64::new(0),
        });
        let dispatcher = RequestDispatcher::new(
            transport.clone(),
            Url::parse("http://localhost/graphql").unwrap(),
            Duration::from_secs(30),
            metrics.clone(),
        );
        let ctx = VuContext {
            catalog: QueryCatalog::new(vec![RequestTemplate::new("typename", "{ __typename }")])
                .unwrap(),
            query: query.to_string(),
            dispatcher,
            session: AuthSession::from_token("t"),
            metrics: metrics.clone(),
            think_time: Duration::from_secs(1),
        };
        (
            Executor::new(Arc::new(ctx), Duration::from_millis(100)),
            metrics,
            transport,
        )
    }

    fn named(profile: ScenarioProfile) -> NamedScenario {
        NamedScenario {
            name: "test".to_string(),
            profile,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn constant_profile_runs_expected_iterations() {
        let (executor, metrics, _) = executor(Duration::ZERO, "typename");
        let stats = executor
            .run(&named(ScenarioProfile::Constant {
                vus: 1,
                duration: Duration::from_millis(2500),
            }))
            .await;

        assert_eq!(stats.iterations, 3);
        assert_eq!(stats.peak_vus, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter(names::ITERATIONS), Some(3));
        assert_eq!(snapshot.counter(names::HTTP_REQ_FAILED), None);
        assert_eq!(snapshot.counter(names::GRAPHQL_ERRORS), None);
        assert_eq!(snapshot.counter(names::HTTP_REQS), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn ramping_profile_tracks_the_curve() {
        let (executor, metrics, _) = executor(Duration::from_millis(50), "typename");
        let executor = Arc::new(executor);
        let active = executor.active_users();

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .run(&named(ScenarioProfile::Ramping {
                        start_vus: 0,
                        stages: vec![
                            Stage::new(Duration::from_secs(120), 10),
                            Stage::new(Duration::from_secs(120), 0),
                        ],
                    }))
                    .await
            })
        };

        sleep(Duration::from_secs(60)).await;
        let at_one_minute = active.load(Ordering::Relaxed);
        assert!((4..=5).contains(&at_one_minute), "active={}", at_one_minute);

        sleep(Duration::from_secs(61)).await;
        let at_peak = active.load(Ordering::Relaxed);
        assert!((9..=10).contains(&at_peak), "active={}", at_peak);

        sleep(Duration::from_secs(119)).await;
        let stats = runner.await.unwrap();
        assert_eq!(active.load(Ordering::Relaxed), 0);
        assert_eq!(stats.peak_vus, 10);
        assert!(stats.iterations > 0);
        assert_eq!(
            metrics.snapshot().counter(names::ITERATIONS),
            Some(stats.iterations)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_iterations() {
        let (executor, metrics, transport) = executor(Duration::from_secs(3), "typename");
        let stats = executor
            .run(&named(ScenarioProfile::Constant {
                vus: 2,
                duration: Duration::from_secs(1),
            }))
            .await;

        assert_eq!(stats.iterations, 2);
        assert!(stats.elapsed >= Duration::from_secs(3));
        assert_eq!(transport.sent.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.snapshot().counter(names::HTTP_REQS), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_query_skips_without_sending() {
        let (executor, metrics, transport) = executor(Duration::ZERO, "missing");
        let stats = executor
            .run(&named(ScenarioProfile::Constant {
                vus: 1,
                duration: Duration::from_millis(1500),
            }))
            .await;

        assert_eq!(stats.iterations, 2);
        assert_eq!(transport.sent.load(Ordering::Relaxed), 0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter(names::HTTP_REQS), None);
        assert_eq!(snapshot.counter(names::HTTP_REQ_FAILED), None);
    }

    #[tokio::test(start_paused = true)]
    async fn swinging_profile_keeps_every_retired_iteration() {
        let (executor, metrics, transport) = executor(Duration::from_millis(50), "typename");
        let stats = executor
            .run(&named(ScenarioProfile::Ramping {
                start_vus: 0,
                stages: vec![
                    Stage::new(Duration::from_secs(10), 6),
                    Stage::new(Duration::from_secs(10), 1),
                    Stage::new(Duration::from_secs(10), 6),
                    Stage::new(Duration::from_secs(10), 0),
                ],
            }))
            .await;

        assert_eq!(stats.peak_vus, 6);
        assert!(stats.iterations > 0);
        assert_eq!(stats.iterations, transport.sent.load(Ordering::Relaxed));
        assert_eq!(
            metrics.snapshot().counter(names::ITERATIONS),
            Some(stats.iterations)
        );
    }

    #[test]
    fn merge_combines_phases() {
        let a = ExecutionStats {
            peak_vus: 3,
            iterations: 10,
            elapsed: Duration::from_secs(5),
        };
        let b = ExecutionStats {
            peak_vus: 7,
            iterations: 1,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(
            a.merge(b),
            ExecutionStats {
                peak_vus: 7,
                iterations: 11,
                elapsed: Duration::from_secs(7),
            }
        );
    }
}
