//! One pass of a flow: input, processes in order, projection, output.
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use flow_plugin::{PluginError, Record};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::flow::{Flow, GatePermit};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("input `{alias}` failed: {source}")]
    Input {
        alias: String,
        #[source]
        source: PluginError,
    },

    #[error("process `{alias}` failed: {source}")]
    Process {
        alias: String,
        #[source]
        source: PluginError,
    },

    #[error("output `{alias}` failed: {source}")]
    Output {
        alias: String,
        #[source]
        source: PluginError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The re-entrancy gate was full.
    Locked,
    /// Nothing to send.
    NoData,
    Sent { received: usize, sent: usize },
}

/// Records of one run, addressed by UUID so that every stage sees the
/// mutations of the stages before it.
#[derive(Default)]
struct Arena {
    records: HashMap<Uuid, Record>,
}

impl Arena {
    fn store(&mut self, records: Vec<Record>) -> Vec<Uuid> {
        records
            .into_iter()
            .map(|r| {
                let id = r.uuid();
                self.records.insert(id, r);
                id
            })
            .collect()
    }

    fn take_copies(&self, ids: &[Uuid]) -> Vec<Record> {
        ids.iter().filter_map(|id| self.records.get(id).cloned()).collect()
    }
}

/// Appends the ids of `more` not yet in `seen`, keeping first-seen order.
fn union_into(out: &mut Vec<Uuid>, seen: &mut HashSet<Uuid>, more: &[Uuid]) {
    out.extend(more.iter().filter(|id| seen.insert(**id)));
}

/// Acquires the flow's gate and runs one pass.
pub async fn run(flow: &Flow, plugin_timeout: Duration) -> Result<RunOutcome, RunError> {
    let Some(permit) = flow.gate().try_acquire() else {
        warn!(flow = %flow.name(), running = flow.gate().running(), "flow locked, skipping run");
        return Ok(RunOutcome::Locked);
    };
    run_permitted(flow, permit, plugin_timeout).await
}

/// Runs one pass under an already acquired permit, released on return.
#[tracing::instrument(name = "flow_run", skip_all, fields(flow = %flow.name(), run = tracing::field::Empty))]
pub async fn run_permitted(flow: &Flow, permit: GatePermit, plugin_timeout: Duration) -> Result<RunOutcome, RunError> {
    let _permit = permit;
    let run_id = Uuid::new_v4();
    tracing::Span::current().record("run", tracing::field::display(run_id));
    let metrics = &flow.info.metrics;
    metrics.reset();
    let started = Instant::now();
    info!("run started");

    let result = evaluate(flow, plugin_timeout).await;
    match &result {
        Ok(RunOutcome::Sent { received, sent }) => {
            info!(received, sent, elapsed = ?started.elapsed(), "run finished");
        }
        Ok(_) => debug!(elapsed = ?started.elapsed(), "run finished"),
        Err(e) => {
            metrics.error();
            error!(error = %e, elapsed = ?started.elapsed(), "run failed");
        }
    }
    result
}

async fn evaluate(flow: &Flow, plugin_timeout: Duration) -> Result<RunOutcome, RunError> {
    let metrics = &flow.info.metrics;

    let received = flow.input.receive().await.map_err(|source| RunError::Input {
        alias: flow.input.name().to_string(),
        source,
    })?;
    if !received.expired.is_empty() {
        warn!(sources = ?received.expired, "sources expired");
        metrics.expired(received.expired.len() as u64);
    }

    let mut arena = Arena::default();
    let input_ids = arena.store(received.records);

    let to_send = if input_ids.is_empty() && flow.processes.is_empty() {
        Vec::new()
    } else {
        // stage id -> ids of the records it emitted; the input is stage 0
        let mut outputs: HashMap<usize, Vec<Uuid>> = HashMap::new();
        outputs.insert(0, input_ids.clone());

        for process in &flow.processes {
            let incoming_ids = if process.require().is_empty() {
                input_ids.clone()
            } else {
                let mut ids = Vec::new();
                let mut seen = HashSet::new();
                for stage in process.require() {
                    if let Some(out) = outputs.get(stage) {
                        union_into(&mut ids, &mut seen, out);
                    }
                }
                ids
            };
            let incoming = arena.take_copies(&incoming_ids);
            debug!(stage = process.id(), alias = %process.alias(), incoming = incoming.len(), "process stage");

            let outgoing = process.process(incoming).await.map_err(|source| RunError::Process {
                alias: process.alias().to_string(),
                source,
            })?;
            if outgoing.is_empty() {
                debug!(alias = %process.alias(), "stage emitted nothing");
            }
            let ids = arena.store(outgoing);
            outputs.insert(process.id(), ids);
        }

        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        union_into(&mut ids, &mut seen, &input_ids);
        for process in flow.processes.iter().filter(|p| p.include()) {
            if let Some(out) = outputs.get(&process.id()) {
                union_into(&mut ids, &mut seen, out);
            }
        }
        if ids.is_empty() {
            info!("no data");
            metrics.no_data();
            return Ok(RunOutcome::NoData);
        }
        ids
    };

    let batch: Vec<Record> = to_send
        .iter()
        .filter_map(|id| arena.records.remove(id))
        .collect();
    let output_err = |source| RunError::Output {
        alias: flow.output.name().to_string(),
        source,
    };
    match tokio::time::timeout(plugin_timeout, flow.output.send(&batch)).await {
        Ok(result) => result.map_err(output_err)?,
        Err(_) => return Err(output_err(PluginError::Timeout(plugin_timeout))),
    }

    metrics.set_received(input_ids.len() as u64);
    metrics.set_sent(batch.len() as u64);
    Ok(RunOutcome::Sent {
        received: input_ids.len(),
        sent: batch.len(),
    })
}
