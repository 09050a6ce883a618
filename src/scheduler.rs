//! Ticks every flow on its interval and runs due flows as tasks.
use std::{sync::Arc, time::Duration};

use flow_plugin::AppConfig;
use tokio::{
    sync::Semaphore,
    time::{Instant, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{flow::Flow, metrics, pipeline};

/// Pause between two scheduler ticks.
pub const LOOP_SLEEP: Duration = Duration::from_millis(300);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Flows whose execution was started.
    pub started: Vec<String>,
    /// Flows that were due but whose gate was full.
    pub locked: Vec<String>,
}

pub struct Scheduler {
    app: Arc<AppConfig>,
    flows: Vec<Arc<Flow>>,
    /// Fleet-wide ceiling; `None` when `flow_limit` is 0.
    limit: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(app: Arc<AppConfig>, flows: Vec<Flow>) -> Self {
        let limit = (app.flow_limit > 0).then(|| Arc::new(Semaphore::new(app.flow_limit)));
        Self {
            app,
            flows: flows.into_iter().map(Arc::new).collect(),
            limit,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn flows(&self) -> &[Arc<Flow>] {
        &self.flows
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of executions currently in flight.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Starts every due flow whose gate has room.
    pub fn tick(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        if self.cancel.is_cancelled() {
            return report;
        }
        for flow in &self.flows {
            if !flow.is_due(now) {
                continue;
            }
            let Some(permit) = flow.gate().try_acquire() else {
                let (running, ceiling) = (flow.gate().running(), flow.gate().ceiling());
                if flow.note_locked() {
                    warn!(flow = %flow.name(), running, ceiling, "flow locked, skipping tick");
                } else {
                    debug!(flow = %flow.name(), running, ceiling, "flow still locked");
                }
                report.locked.push(flow.name().to_string());
                continue;
            };
            flow.mark_started(now);
            report.started.push(flow.name().to_string());

            let flow = flow.clone();
            let limit = self.limit.clone();
            let cancel = self.cancel.clone();
            let timeout = self.app.plugin_timeout;
            self.tracker.spawn(async move {
                let _slot = match limit {
                    Some(sem) => tokio::select! {
                        slot = sem.acquire_owned() => match slot {
                            Ok(slot) => Some(slot),
                            Err(_) => return,
                        },
                        _ = cancel.cancelled() => return,
                    },
                    None => None,
                };
                // errors are logged and counted by the pipeline
                let _ = pipeline::run_permitted(&flow, permit, timeout).await;
                metrics::publish(flow.name(), &flow.info.metrics.snapshot());
            });
        }
        report
    }

    /// Ticks until cancelled, then waits for running executions.
    pub async fn run(&self) {
        info!(flows = self.flows.len(), limit = self.app.flow_limit, "scheduler started");
        loop {
            self.tick(Instant::now());
            tokio::select! {
                _ = sleep(LOOP_SLEEP) => {}
                _ = self.cancel.cancelled() => break,
            }
        }
        self.drain().await;
    }

    /// Stops ticking and waits for running executions to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.drain().await;
    }

    async fn drain(&self) {
        self.tracker.close();
        let running = self.tracker.len();
        if running > 0 {
            info!(running, "waiting for running flows");
        }
        self.tracker.wait().await;
        info!("scheduler stopped");
    }
}
