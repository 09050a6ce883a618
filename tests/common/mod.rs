//! Small plugins for driving flows in tests.
#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use feedflow::flow::Flow;
use flow_plugin::{
    AppConfig, FlowInfo, Input, Output, PluginError, Process, Received, Record, SourceState, StageInfo,
};
use tokio::sync::{Barrier, Semaphore};
use uuid::Uuid;

pub fn app(dir: &Path, extra: &str) -> Arc<AppConfig> {
    Arc::new(AppConfig::from_toml_str(&format!("[default]\n{extra}"), dir).unwrap())
}

pub fn info(app: &AppConfig, name: &str, interval: Duration, instance: usize) -> Arc<FlowInfo> {
    let path = app.flow_conf.join(format!("{name}.yaml"));
    Arc::new(FlowInfo::new(name, &path, app, interval, instance))
}

pub fn record(source: &str, text: &str) -> Record {
    let mut r = Record::new("test", "fixed", source, Utc.timestamp_opt(100, 0).unwrap());
    r.generic.texts[0] = text.to_string();
    r
}

pub fn stage(id: usize, include: bool, require: Vec<usize>) -> StageInfo {
    StageInfo { id, alias: format!("probe-{id}"), include, require }
}

/// Returns clones of the same records on every receive.
pub struct FixedInput {
    pub records: Vec<Record>,
    pub calls: Arc<AtomicUsize>,
    /// Receives wait for a permit here when set.
    pub hold: Option<Arc<Semaphore>>,
    /// Receives meet here when set.
    pub meet: Option<Arc<Barrier>>,
}

impl FixedInput {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records, calls: Arc::new(AtomicUsize::new(0)), hold: None, meet: None }
    }
}

#[async_trait]
impl Input for FixedInput {
    fn name(&self) -> &str {
        "fixed"
    }

    fn input_list(&self) -> Vec<String> {
        vec!["fixed".into()]
    }

    async fn load_state(&self) -> Result<SourceState, PluginError> {
        Ok(SourceState::new())
    }

    async fn save_state(&self, _state: &mut SourceState) -> Result<(), PluginError> {
        Ok(())
    }

    async fn receive(&self) -> Result<Received, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(meet) = &self.meet {
            meet.wait().await;
        }
        if let Some(hold) = &self.hold {
            hold.acquire().await.map_err(PluginError::exec)?.forget();
        }
        Ok(Received::new(self.records.clone()))
    }
}

pub enum Emit {
    /// Hands the incoming records on, tagged with the stage alias.
    Tag,
    /// Drops the incoming records and emits `n` new ones.
    Fresh(usize),
}

/// Records the UUIDs it was given.
pub struct ProbeProcess {
    pub stage: StageInfo,
    pub emit: Emit,
    pub seen: Arc<Mutex<Vec<Uuid>>>,
}

impl ProbeProcess {
    pub fn new(stage: StageInfo, emit: Emit) -> Self {
        Self { stage, emit, seen: Arc::new(Mutex::new(Vec::new())) }
    }
}

#[async_trait]
impl Process for ProbeProcess {
    fn stage(&self) -> &StageInfo {
        &self.stage
    }

    fn name(&self) -> &str {
        "probe"
    }

    async fn process(&self, records: Vec<Record>) -> Result<Vec<Record>, PluginError> {
        self.seen.lock().unwrap().extend(records.iter().map(Record::uuid));
        Ok(match self.emit {
            Emit::Tag => records
                .into_iter()
                .map(|mut r| {
                    r.generic.arrays[0].push(self.stage.alias.clone());
                    r
                })
                .collect(),
            Emit::Fresh(n) => (0..n).map(|i| record("generated", &format!("{}-{i}", self.stage.alias))).collect(),
        })
    }
}

pub struct FailingProcess(pub StageInfo);

#[async_trait]
impl Process for FailingProcess {
    fn stage(&self) -> &StageInfo {
        &self.0
    }

    fn name(&self) -> &str {
        "failing"
    }

    async fn process(&self, _records: Vec<Record>) -> Result<Vec<Record>, PluginError> {
        Err(PluginError::exec("boom"))
    }
}

/// Keeps every batch it is sent.
#[derive(Default)]
pub struct CollectOutput {
    pub batches: Arc<Mutex<Vec<Vec<Record>>>>,
    pub delay: Option<Duration>,
    pub fail: bool,
}

#[async_trait]
impl Output for CollectOutput {
    fn name(&self) -> &str {
        "collect"
    }

    fn output_list(&self) -> Vec<String> {
        Vec::new()
    }

    async fn send(&self, records: &[Record]) -> Result<(), PluginError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(PluginError::exec("sink closed"));
        }
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

pub fn flow(info: Arc<FlowInfo>, input: FixedInput, processes: Vec<Box<dyn Process>>, output: CollectOutput) -> Flow {
    Flow::new(info, Box::new(input), processes, Box::new(output))
}
