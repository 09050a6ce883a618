// src/config.rs
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flow_plugin::{AppConfig, ConfigError};
use tracing::info;

pub const APP_NAME: &str = "feedflow";
pub const CONFIG_FILE: &str = "config.toml";

/// Written when no config file exists anywhere on the search path.
pub const SAMPLE_CONFIG: &str = r#"# feedflow configuration
#
# Intervals use <count><unit> with unit one of s, m, h, d.

[default]
# command run when a source has not produced anything for expire_interval:
#   <command> <flow> <source> <last seen, unix seconds> <extra args...>
expire_action = []
expire_action_delay = "1h"
expire_action_timeout = 30
expire_interval = "1d"

# host:port for the prometheus exporter, empty to disable
exporter_listen = ""

# relative paths resolve against the directory of this file
flow_conf = "flows"
flow_data = "data"

# flow_enable = ["news"]
# flow_disable = ["old-feed"]

flow_instance = 1
flow_interval = "5m"
flow_limit = 0

log_level = "info"

plugin_include = false
plugin_timeout = 30

# tokio worker threads, 0 for one per core
proc_num = 0

time_format = "%Y-%m-%d %H:%M:%S %Z"
time_zone = "UTC"

# Any other table is a parameter template. A plugin pulls it in with
# `template: slow-feeds` in its params.
[slow-feeds]
force_count = 3
expire_interval = "7d"
"#;

/// `/etc/feedflow`, `$HOME/.feedflow`, then the working directory.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![Path::new("/etc").join(APP_NAME).join(CONFIG_FILE)];
    if let Some(user) = user_config_path() {
        paths.push(user);
    }
    paths.push(PathBuf::from(CONFIG_FILE));
    paths
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(format!(".{APP_NAME}")).join(CONFIG_FILE))
}

pub fn write_sample(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, SAMPLE_CONFIG).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// The explicit path if given, else the first existing file on the search
/// path. When nothing exists a sample is written to the user directory.
pub fn locate(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(found) = search_paths().into_iter().find(|p| p.is_file()) {
        return Ok(found);
    }
    let sample = user_config_path().context("no config file found and no home directory for a sample")?;
    write_sample(&sample)?;
    info!(path = %sample.display(), "wrote sample config");
    Ok(sample)
}

/// Reads and validates `path`; relative directories resolve against its parent.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    AppConfig::from_toml_str(&content, &base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn sample_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        write_sample(&path).unwrap();
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.flow_conf, dir.path().join("nested").join("flows"));
        assert_eq!(cfg.flow_interval, Duration::from_secs(300));
        assert!(cfg.templates.contains_key("slow-feeds"));
        assert!(cfg.expire_action.is_empty());
    }

    #[test]
    fn explicit_path_wins() {
        let p = Path::new("/some/where.toml");
        assert_eq!(locate(Some(p)).unwrap(), p);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn search_order() {
        let paths = search_paths();
        assert_eq!(paths.first().unwrap(), &PathBuf::from("/etc/feedflow/config.toml"));
        assert_eq!(paths.last().unwrap(), &PathBuf::from("config.toml"));
    }
}
