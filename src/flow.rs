//! Flow files, their validation into runnable [`Flow`]s, and the per-flow
//! re-entrancy gate.
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use flow_plugin::{AppConfig, FlowInfo, Input, Output, PluginConfig, Process, params::Params};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::registry::{Registry, RegistryError};

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]+$").unwrap());

/// On-disk shape of a flow file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FlowFile {
    pub flow: FlowSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FlowSpec {
    /// Letters, digits and `-` only.
    pub name: String,
    /// `interval` and `instance` overrides.
    #[serde(default)]
    pub params: Map<String, Value>,
    pub input: StageSpec,
    #[serde(default)]
    pub process: Vec<ProcessSpec>,
    pub output: StageSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub plugin: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    pub plugin: String,
    /// Defaults to the 1-based position; must equal it when given.
    #[serde(default)]
    pub id: Option<usize>,
    /// Defaults to `<plugin>-<id>`.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid flow name `{0}` (letters, digits and `-` only)")]
    InvalidName(String),

    #[error("duplicate flow name `{0}`")]
    Duplicate(String),

    #[error("flow params: {0}")]
    Params(String),

    #[error("process #{position}: {message}")]
    ProcessId { position: usize, message: String },

    #[error(transparent)]
    Plugin(#[from] RegistryError),
}

/// Counter with a ceiling guarding overlapping executions of one flow.
#[derive(Debug)]
pub struct Gate {
    running: Mutex<usize>,
    ceiling: usize,
}

/// Held for the duration of one execution; releases on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<Gate>,
}

impl Gate {
    pub fn new(ceiling: usize) -> Arc<Self> {
        Arc::new(Self { running: Mutex::new(0), ceiling: ceiling.max(1) })
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if *running >= self.ceiling {
            return None;
        }
        *running += 1;
        Some(GatePermit { gate: self.clone() })
    }

    pub fn running(&self) -> usize {
        *self.running.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut running = self.gate.running.lock().unwrap_or_else(|p| p.into_inner());
        *running = running.saturating_sub(1);
    }
}

/// A validated, runnable flow.
pub struct Flow {
    pub info: Arc<FlowInfo>,
    pub input: Box<dyn Input>,
    pub processes: Vec<Box<dyn Process>>,
    pub output: Box<dyn Output>,
    gate: Arc<Gate>,
    last_start: Mutex<Option<Instant>>,
    lock_reported: AtomicBool,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.info.name)
            .field("input", &self.input.name())
            .field("processes", &self.processes.iter().map(|p| p.alias().to_string()).collect::<Vec<_>>())
            .field("output", &self.output.name())
            .finish()
    }
}

impl Flow {
    pub fn new(
        info: Arc<FlowInfo>,
        input: Box<dyn Input>,
        processes: Vec<Box<dyn Process>>,
        output: Box<dyn Output>,
    ) -> Self {
        let gate = Gate::new(info.instance);
        Self {
            info,
            input,
            processes,
            output,
            gate,
            last_start: Mutex::new(None),
            lock_reported: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn gate(&self) -> &Arc<Gate> {
        &self.gate
    }

    /// True when the flow has never started or its interval has passed.
    pub fn is_due(&self, now: Instant) -> bool {
        let last = self.last_start.lock().unwrap_or_else(|p| p.into_inner());
        last.is_none_or(|t| now.saturating_duration_since(t) >= self.info.interval)
    }

    pub fn mark_started(&self, now: Instant) {
        *self.last_start.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);
        self.lock_reported.store(false, Ordering::Relaxed);
    }

    /// True the first time the gate is found full since the last start.
    pub fn note_locked(&self) -> bool {
        !self.lock_reported.swap(true, Ordering::Relaxed)
    }
}

pub fn read_flow_file(path: &Path) -> Result<FlowFile, FlowError> {
    let content = fs::read_to_string(path).map_err(|source| FlowError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml_bw::from_str(&content).map_err(|e| FlowError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn flow_params(spec: &FlowSpec, app: &AppConfig) -> Result<(std::time::Duration, usize), FlowError> {
    let unknown: Vec<&str> = spec
        .params
        .keys()
        .map(String::as_str)
        .filter(|k| !matches!(*k, "interval" | "instance"))
        .collect();
    if !unknown.is_empty() {
        return Err(FlowError::Params(format!("unknown keys: {}", unknown.join(", "))));
    }
    let params = Params::from_map(spec.params.clone());
    let interval = params
        .opt_interval("interval")
        .map_err(|e| FlowError::Params(e.to_string()))?
        .unwrap_or(app.flow_interval);
    let instance = match params.get("instance") {
        Some(_) => params.usize("instance").map_err(|e| FlowError::Params(e.to_string()))?,
        None => app.flow_instance,
    };
    if instance == 0 {
        return Err(FlowError::Params("instance must be at least 1".into()));
    }
    Ok((interval, instance))
}

/// Validates a parsed flow file and builds its plugins.
pub fn build_flow(file: FlowFile, path: &Path, app: &Arc<AppConfig>, registry: &Registry) -> Result<Flow, FlowError> {
    let spec = file.flow;
    if !NAME_RE.is_match(&spec.name) {
        return Err(FlowError::InvalidName(spec.name));
    }
    let (interval, instance) = flow_params(&spec, app)?;
    let info = Arc::new(FlowInfo::new(&spec.name, path, app, interval, instance));
    info.create_dirs().map_err(|source| FlowError::Io {
        path: info.data_dir.clone(),
        source,
    })?;

    let config = |id: usize, plugin: &str, alias: String, params: &Map<String, Value>| PluginConfig {
        app: app.clone(),
        flow: info.clone(),
        id,
        alias,
        plugin: plugin.to_string(),
        params: params.clone(),
    };

    let input = registry.build_input(&config(0, &spec.input.plugin, spec.input.plugin.clone(), &spec.input.params))?;

    let mut processes = Vec::with_capacity(spec.process.len());
    for (index, p) in spec.process.iter().enumerate() {
        let position = index + 1;
        if let Some(id) = p.id.filter(|id| *id != position) {
            return Err(FlowError::ProcessId {
                position,
                message: format!("id {id} does not match its position"),
            });
        }
        let alias = p.alias.clone().unwrap_or_else(|| format!("{}-{position}", p.plugin));
        processes.push(registry.build_process(&config(position, &p.plugin, alias, &p.params))?);
    }

    let output_id = spec.process.len() + 1;
    let output = registry.build_output(&config(
        output_id,
        &spec.output.plugin,
        spec.output.plugin.clone(),
        &spec.output.params,
    ))?;

    Ok(Flow::new(info, input, processes, output))
}

pub fn load_flow(path: &Path, app: &Arc<AppConfig>, registry: &Registry) -> Result<Flow, FlowError> {
    build_flow(read_flow_file(path)?, path, app, registry)
}

/// Whether the enable/disable lists let `name` run.
pub fn is_selected(name: &str, app: &AppConfig) -> bool {
    if !app.flow_enable.is_empty() {
        return app.flow_enable.iter().any(|n| n == name);
    }
    !app.flow_disable.iter().any(|n| n == name)
}

fn is_flow_file(path: &Path) -> bool {
    path.is_file() && matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
}

/// Loads every flow file in `flow_conf`. Invalid flows are logged and left out.
pub fn load_flows(app: &Arc<AppConfig>, registry: &Registry) -> Result<Vec<Flow>, FlowError> {
    let dir = &app.flow_conf;
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|source| FlowError::Io { path: dir.clone(), source })?;
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| FlowError::Io { path: dir.clone(), source })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_flow_file(p))
        .collect();
    paths.sort();

    let mut seen = HashSet::new();
    let mut flows = Vec::new();
    for path in paths {
        let file = match read_flow_file(&path) {
            Ok(file) => file,
            Err(e) => {
                error!(path = %path.display(), error = %e, "flow invalid");
                continue;
            }
        };
        let name = file.flow.name.clone();
        if !is_selected(&name, app) {
            info!(flow = %name, "flow disabled");
            continue;
        }
        if !seen.insert(name.clone()) {
            error!(flow = %name, path = %path.display(), error = %FlowError::Duplicate(name.clone()), "flow invalid");
            continue;
        }
        match build_flow(file, &path, app, registry) {
            Ok(flow) => {
                info!(
                    flow = %name,
                    hash = %flow.info.hash,
                    interval = ?flow.info.interval,
                    instance = flow.info.instance,
                    processes = flow.processes.len(),
                    "flow loaded"
                );
                flows.push(flow);
            }
            Err(e) => error!(flow = %name, path = %path.display(), error = %e, "flow invalid"),
        }
    }
    if flows.is_empty() {
        warn!(dir = %dir.display(), "no flows loaded");
    }
    Ok(flows)
}
