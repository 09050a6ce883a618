//! Built-in plugins.
use std::sync::Arc;

use crate::registry::Registry;

pub mod copy_process;
pub mod debug_output;
pub mod http_input;
pub mod io_input;
pub mod io_output;
pub mod join_process;
pub mod regexp_process;
pub mod template_process;

pub fn register_builtin(registry: &Registry) {
    registry.register_input("io", io_input::schema, Arc::new(io_input::build));
    registry.register_input("http", http_input::schema, Arc::new(http_input::build));

    registry.register_process("copy", copy_process::schema, Arc::new(copy_process::build));
    registry.register_process("regexp", regexp_process::schema, Arc::new(regexp_process::build));
    registry.register_process("join", join_process::schema, Arc::new(join_process::build));
    registry.register_process("template", template_process::schema, Arc::new(template_process::build));

    registry.register_output("io", io_output::schema, Arc::new(io_output::build));
    registry.register_output("debug", debug_output::schema, Arc::new(debug_output::build));
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{path::Path, sync::Arc, time::Duration};

    use flow_plugin::{
        AppConfig, FlowInfo, Output, ParamSpec, Params, PluginConfig, PluginError, Process, StageInfo, params,
    };
    use serde_json::Value;

    fn config(id: usize, plugin: &str, params: Value) -> PluginConfig {
        let app = Arc::new(AppConfig::with_base_dir(Path::new("/tmp/feedflow-test")));
        let flow = Arc::new(FlowInfo::new("test", Path::new("/tmp/feedflow-test/flows/test.yaml"), &app, Duration::from_secs(60), 1));
        PluginConfig {
            app,
            flow,
            id,
            alias: format!("{plugin}-{id}"),
            plugin: plugin.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    pub fn process_config(
        schema: fn(&AppConfig) -> Vec<ParamSpec>,
        build: fn(&PluginConfig, &Params) -> Result<Box<dyn Process>, PluginError>,
        params: Value,
    ) -> Result<Box<dyn Process>, PluginError> {
        let cfg = config(1, "process", params);
        let mut spec = schema(&cfg.app);
        spec.extend(StageInfo::schema(&cfg.app));
        let p = params::resolve(&spec, &cfg.app.templates, &cfg.params)?;
        build(&cfg, &p)
    }

    pub fn output_config(
        schema: fn(&AppConfig) -> Vec<ParamSpec>,
        build: fn(&PluginConfig, &Params) -> Result<Box<dyn Output>, PluginError>,
        params: Value,
    ) -> Result<Box<dyn Output>, PluginError> {
        let cfg = config(2, "output", params);
        let p = params::resolve(&schema(&cfg.app), &cfg.app.templates, &cfg.params)?;
        build(&cfg, &p)
    }
}
