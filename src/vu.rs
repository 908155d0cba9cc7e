//! The virtual-user iteration loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::auth::AuthSession;
use crate::catalog::QueryCatalog;
use crate::dispatch::RequestDispatcher;
use crate::metrics::{names, MetricsCollector};

/// Everything a virtual user reads. Shared by all of them for the run.
pub struct VuContext {
    pub catalog: QueryCatalog,
    pub query: String,
    pub dispatcher: RequestDispatcher,
    pub session: AuthSession,
    pub metrics: MetricsCollector,
    pub think_time: Duration,
}

pub struct VirtualUser {
    id: usize,
    iterations: u64,
    ctx: Arc<VuContext>,
}

impl VirtualUser {
    pub fn new(id: usize, ctx: Arc<VuContext>) -> Self {
        Self {
            id,
            iterations: 0,
            ctx,
        }
    }

    /// Iterates until `stop` flips or its sender goes away. A stop signal
    /// never interrupts an iteration, only the think-time pause after it.
    /// Returns the number of completed iterations.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> u64 {
        debug!("VU {} started", self.id);

        while !*stop.borrow() {
            self.iterate().await;

            tokio::select! {
                _ = sleep(self.ctx.think_time) => {}
                _ = stop.changed() => break,
            }
        }

        debug!("VU {} stopped after {} iterations", self.id, self.iterations);
        self.iterations
    }

    async fn iterate(&mut self) {
        let ctx = &self.ctx;
        let start = Instant::now();

        match ctx.catalog.get(&ctx.query) {
            Some(template) => {
                let outcome = ctx.dispatcher.dispatch(template, &ctx.session).await;
                ctx.dispatcher.record(&template.name, &outcome);
            }
            None => {
                warn!(
                    "VU {} skipping iteration: query {} is not in the catalog",
                    self.id, ctx.query
                );
            }
        }

        self.iterations += 1;
        ctx.metrics.add_counter(names::ITERATIONS, 1, None);
        ctx.metrics
            .add_duration(names::ITERATION_DURATION, start.elapsed(), None);
    }
}
