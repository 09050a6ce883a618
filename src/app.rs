//! Process lifecycle: exporter, flow loading, scheduler, shutdown.
use std::{process::ExitCode, sync::Arc};

use anyhow::Context;
use flow_plugin::AppConfig;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{flow::load_flows, metrics, registry::Registry, scheduler::Scheduler};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] anyhow::Error),

    #[error("cannot bind metrics exporter on {listen}: {source}")]
    Bind {
        listen: String,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Config(_) => ExitCode::from(1),
            AppError::Bind { .. } => ExitCode::from(2),
        }
    }
}

pub struct App {
    scheduler: Arc<Scheduler>,
    scheduler_task: JoinHandle<()>,
    exporter_task: Option<JoinHandle<std::io::Result<()>>>,
    exporter_stop: CancellationToken,
}

impl App {
    /// Binds the exporter, loads the flows and starts the scheduler loop.
    pub async fn bootstrap(app: Arc<AppConfig>, registry: &Registry) -> Result<Self, AppError> {
        let listener = match &app.exporter_listen {
            Some(listen) => Some(metrics::bind(listen).await.map_err(|source| AppError::Bind {
                listen: listen.clone(),
                source,
            })?),
            None => None,
        };

        let flows = load_flows(&app, registry).context("failed to load flows")?;
        if flows.is_empty() {
            info!(dir = %app.flow_conf.display(), "no flows to run");
        }

        let exporter_stop = CancellationToken::new();
        let exporter_task = listener.map(|l| tokio::spawn(metrics::serve(l, exporter_stop.clone())));

        let scheduler = Arc::new(Scheduler::new(app, flows));
        let scheduler_task = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run().await })
        };

        Ok(Self { scheduler, scheduler_task, exporter_task, exporter_stop })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Stops ticking, waits for running flows, then stops the exporter.
    pub async fn shutdown(self) {
        self.scheduler.cancel_token().cancel();
        if let Err(e) = self.scheduler_task.await {
            error!(error = %e, "scheduler task failed");
        }
        self.exporter_stop.cancel();
        if let Some(task) = self.exporter_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "metrics exporter failed"),
                Err(e) => error!(error = %e, "metrics exporter task failed"),
            }
        }
    }
}
