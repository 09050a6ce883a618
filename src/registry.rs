//! Maps plugin names to their parameter schema and constructor.
use std::{fmt, sync::Arc};

use dashmap::DashMap;
use flow_plugin::{
    AppConfig, Detector, Input, Output, ParamSpec, Params, PluginConfig, PluginError, Process, StageInfo,
};

use crate::plugins;

pub type SchemaFn = fn(&AppConfig) -> Vec<ParamSpec>;
pub type InputFactory = Arc<dyn Fn(&PluginConfig, &Params) -> Result<Box<dyn Input>, PluginError> + Send + Sync>;
pub type ProcessFactory = Arc<dyn Fn(&PluginConfig, &Params) -> Result<Box<dyn Process>, PluginError> + Send + Sync>;
pub type OutputFactory = Arc<dyn Fn(&PluginConfig, &Params) -> Result<Box<dyn Output>, PluginError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Input,
    Process,
    Output,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PluginKind::Input => "input",
            PluginKind::Process => "process",
            PluginKind::Output => "output",
        })
    }
}

struct Entry<F> {
    schema: SchemaFn,
    build: F,
}

impl<F: Clone> Clone for Entry<F> {
    fn clone(&self) -> Self {
        Self { schema: self.schema, build: self.build.clone() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown {kind} plugin `{name}`")]
    Unknown { kind: PluginKind, name: String },

    #[error("{kind} `{alias}`: {source}")]
    Plugin {
        kind: PluginKind,
        alias: String,
        #[source]
        source: PluginError,
    },
}

#[derive(Default)]
pub struct Registry {
    inputs: DashMap<String, Entry<InputFactory>>,
    processes: DashMap<String, Entry<ProcessFactory>>,
    outputs: DashMap<String, Entry<OutputFactory>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("plugins", &self.list())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in plugin.
    pub fn builtin() -> Self {
        let registry = Self::new();
        plugins::register_builtin(&registry);
        registry
    }

    pub fn register_input(&self, name: &str, schema: SchemaFn, build: InputFactory) {
        self.inputs.insert(name.to_string(), Entry { schema, build });
    }

    pub fn register_process(&self, name: &str, schema: SchemaFn, build: ProcessFactory) {
        self.processes.insert(name.to_string(), Entry { schema, build });
    }

    pub fn register_output(&self, name: &str, schema: SchemaFn, build: OutputFactory) {
        self.outputs.insert(name.to_string(), Entry { schema, build });
    }

    /// Sorted `(kind, name)` pairs.
    pub fn list(&self) -> Vec<(PluginKind, String)> {
        let mut all: Vec<(PluginKind, String)> = self
            .inputs
            .iter()
            .map(|e| (PluginKind::Input, e.key().clone()))
            .chain(self.processes.iter().map(|e| (PluginKind::Process, e.key().clone())))
            .chain(self.outputs.iter().map(|e| (PluginKind::Output, e.key().clone())))
            .collect();
        all.sort_by(|a, b| (a.0 as u8, &a.1).cmp(&(b.0 as u8, &b.1)));
        all
    }

    /// Full parameter schema of a plugin, common parameters included.
    pub fn schema(&self, kind: PluginKind, name: &str, app: &AppConfig) -> Result<Vec<ParamSpec>, RegistryError> {
        let unknown = || RegistryError::Unknown { kind, name: name.to_string() };
        let mut schema = match kind {
            PluginKind::Input => (self.inputs.get(name).ok_or_else(unknown)?.schema)(app),
            PluginKind::Process => (self.processes.get(name).ok_or_else(unknown)?.schema)(app),
            PluginKind::Output => (self.outputs.get(name).ok_or_else(unknown)?.schema)(app),
        };
        match kind {
            PluginKind::Input => schema.extend(Detector::schema(app)),
            PluginKind::Process => schema.extend(StageInfo::schema(app)),
            PluginKind::Output => {}
        }
        Ok(schema)
    }

    fn params(&self, kind: PluginKind, cfg: &PluginConfig) -> Result<Params, RegistryError> {
        let schema = self.schema(kind, &cfg.plugin, &cfg.app)?;
        cfg.resolve(&schema).map_err(|source| RegistryError::Plugin {
            kind,
            alias: cfg.alias.clone(),
            source,
        })
    }

    pub fn build_input(&self, cfg: &PluginConfig) -> Result<Box<dyn Input>, RegistryError> {
        let params = self.params(PluginKind::Input, cfg)?;
        // clone the entry out so the map is not locked while the plugin builds
        let entry = self
            .inputs
            .get(&cfg.plugin)
            .map(|e| e.clone())
            .ok_or_else(|| RegistryError::Unknown { kind: PluginKind::Input, name: cfg.plugin.clone() })?;
        (entry.build)(cfg, &params).map_err(|source| RegistryError::Plugin {
            kind: PluginKind::Input,
            alias: cfg.alias.clone(),
            source,
        })
    }

    pub fn build_process(&self, cfg: &PluginConfig) -> Result<Box<dyn Process>, RegistryError> {
        let params = self.params(PluginKind::Process, cfg)?;
        let entry = self
            .processes
            .get(&cfg.plugin)
            .map(|e| e.clone())
            .ok_or_else(|| RegistryError::Unknown { kind: PluginKind::Process, name: cfg.plugin.clone() })?;
        (entry.build)(cfg, &params).map_err(|source| RegistryError::Plugin {
            kind: PluginKind::Process,
            alias: cfg.alias.clone(),
            source,
        })
    }

    pub fn build_output(&self, cfg: &PluginConfig) -> Result<Box<dyn Output>, RegistryError> {
        let params = self.params(PluginKind::Output, cfg)?;
        let entry = self
            .outputs
            .get(&cfg.plugin)
            .map(|e| e.clone())
            .ok_or_else(|| RegistryError::Unknown { kind: PluginKind::Output, name: cfg.plugin.clone() })?;
        (entry.build)(cfg, &params).map_err(|source| RegistryError::Plugin {
            kind: PluginKind::Output,
            alias: cfg.alias.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_listed() {
        let registry = Registry::builtin();
        let list = registry.list();
        for (kind, name) in [
            (PluginKind::Input, "io"),
            (PluginKind::Input, "http"),
            (PluginKind::Process, "copy"),
            (PluginKind::Process, "regexp"),
            (PluginKind::Process, "join"),
            (PluginKind::Process, "template"),
            (PluginKind::Output, "io"),
            (PluginKind::Output, "debug"),
        ] {
            assert!(list.contains(&(kind, name.to_string())), "{kind} {name} missing");
        }
    }

    #[test]
    fn schema_includes_common_params() {
        let registry = Registry::builtin();
        let app = AppConfig::with_base_dir(std::path::Path::new("/tmp"));
        let input = registry.schema(PluginKind::Input, "io", &app).unwrap();
        assert!(input.iter().any(|s| s.name == "match_signature"));
        let process = registry.schema(PluginKind::Process, "copy", &app).unwrap();
        assert!(process.iter().any(|s| s.name == "require"));
        assert!(matches!(
            registry.schema(PluginKind::Output, "nope", &app),
            Err(RegistryError::Unknown { .. })
        ));
    }
}
