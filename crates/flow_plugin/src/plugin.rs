//! Contracts implemented by input, process and output plugins.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    config::AppConfig,
    field::FieldError,
    flow::FlowInfo,
    params::{self, ParamSpec, Params},
    record::Record,
    state::{SourceState, StateError},
};

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("{0}")]
    Config(String),

    #[error("missing parameters: {}", .0.join(", "))]
    MissingParams(Vec<String>),

    #[error("unknown parameters: {}", .0.join(", "))]
    UnknownParams(Vec<String>),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("`{left}` has {left_len} entries but `{right}` has {right_len}")]
    SizeMismatch {
        left: String,
        left_len: usize,
        right: String,
        right_len: usize,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("{0}")]
    Exec(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl PluginError {
    pub fn exec(e: impl std::fmt::Display) -> Self {
        PluginError::Exec(e.to_string())
    }

    /// True for failures that make a flow unloadable rather than a run fail.
    pub fn is_init(&self) -> bool {
        matches!(
            self,
            PluginError::Config(_)
                | PluginError::MissingParams(_)
                | PluginError::UnknownParams(_)
                | PluginError::Field(_)
                | PluginError::SizeMismatch { .. }
        )
    }
}

/// What the scheduler hands a plugin on construction.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub app: Arc<AppConfig>,
    pub flow: Arc<FlowInfo>,
    /// Position in the pipeline; the input is 0.
    pub id: usize,
    pub alias: String,
    pub plugin: String,
    pub params: Map<String, Value>,
}

impl PluginConfig {
    pub fn resolve(&self, schema: &[ParamSpec]) -> Result<Params, PluginError> {
        params::resolve(schema, &self.app.templates, &self.params)
    }
}

/// Result of one `receive`.
#[derive(Debug, Default)]
pub struct Received {
    pub records: Vec<Record>,
    /// Sources whose last-seen time is older than the expiry interval.
    pub expired: Vec<String>,
}

impl Received {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records, expired: Vec::new() }
    }
}

#[async_trait]
pub trait Input: Send + Sync {
    fn name(&self) -> &str;

    fn input_list(&self) -> Vec<String>;

    async fn load_state(&self) -> Result<SourceState, PluginError>;

    async fn save_state(&self, state: &mut SourceState) -> Result<(), PluginError>;

    async fn receive(&self) -> Result<Received, PluginError>;
}

/// Id, alias and routing of a process stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    pub id: usize,
    pub alias: String,
    pub include: bool,
    pub require: Vec<usize>,
}

impl StageInfo {
    /// Routing parameters every process understands.
    pub fn schema(app: &AppConfig) -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("include").default(app.plugin_include),
            ParamSpec::optional("require").default(Value::Array(Vec::new())),
        ]
    }

    pub fn from_params(cfg: &PluginConfig, params: &Params) -> Result<Self, PluginError> {
        let require = params.ids("require")?;
        for (i, id) in require.iter().enumerate() {
            if *id >= cfg.id {
                return Err(PluginError::Config(format!(
                    "stage {} ({}) requires stage {id}, which does not run before it",
                    cfg.id, cfg.alias
                )));
            }
            if require[..i].contains(id) {
                return Err(PluginError::Config(format!("stage {} requires stage {id} twice", cfg.id)));
            }
        }
        Ok(Self {
            id: cfg.id,
            alias: cfg.alias.clone(),
            include: params.bool("include")?,
            require,
        })
    }
}

#[async_trait]
pub trait Process: Send + Sync {
    fn stage(&self) -> &StageInfo;

    fn name(&self) -> &str;

    fn id(&self) -> usize {
        self.stage().id
    }

    fn alias(&self) -> &str {
        &self.stage().alias
    }

    fn include(&self) -> bool {
        self.stage().include
    }

    fn require(&self) -> &[usize] {
        &self.stage().require
    }

    async fn process(&self, records: Vec<Record>) -> Result<Vec<Record>, PluginError>;
}

#[async_trait]
pub trait Output: Send + Sync {
    fn name(&self) -> &str;

    fn output_list(&self) -> Vec<String>;

    async fn send(&self, records: &[Record]) -> Result<(), PluginError>;
}
