//! Application-wide settings shared with every plugin.
//!
//! The `[default]` section of the TOML config becomes an [`AppConfig`]; every
//! other top-level table is kept verbatim as a named parameter template that
//! plugins can pull in with `template: <name>`.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use chrono::format::{Item, StrftimeItems};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

static INTERVAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9]+)([SsMmHhDd])$").unwrap());
static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9]+)([BbKkMmGg])$").unwrap());

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid interval `{0}` (expected e.g. 30s, 5m, 2h, 1d)")]
    Interval(String),

    #[error("invalid size `{0}` (expected e.g. 512b, 64k, 10m, 1g)")]
    Size(String),

    #[error("unknown time zone `{0}`")]
    TimeZone(String),

    #[error("flow_enable and flow_disable are mutually exclusive")]
    EnableDisable,

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

/// Parses `^[0-9]+[SsMmHhDd]$`. A zero count is coerced to one unit.
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let caps = INTERVAL_RE
        .captures(value.trim())
        .ok_or_else(|| ConfigError::Interval(value.to_string()))?;
    let count: u64 = caps[1]
        .parse()
        .map_err(|_| ConfigError::Interval(value.to_string()))?;
    let unit = match caps[2].to_ascii_lowercase().as_str() {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        _ => 86_400,
    };
    count
        .max(1)
        .checked_mul(unit)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Interval(value.to_string()))
}

/// Parses `^[0-9]+[BbKkMmGg]$` into bytes.
pub fn parse_size(value: &str) -> Result<u64, ConfigError> {
    let caps = SIZE_RE
        .captures(value.trim())
        .ok_or_else(|| ConfigError::Size(value.to_string()))?;
    let count: u64 = caps[1]
        .parse()
        .map_err(|_| ConfigError::Size(value.to_string()))?;
    let unit: u64 = match caps[2].to_ascii_lowercase().as_str() {
        "b" => 1,
        "k" => 1_024,
        "m" => 1_048_576,
        _ => 1_073_741_824,
    };
    count
        .checked_mul(unit)
        .ok_or_else(|| ConfigError::Size(value.to_string()))
}

/// Raw `[default]` section as written in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DefaultSection {
    expire_action: Vec<String>,
    expire_action_delay: String,
    expire_action_timeout: u64,
    expire_interval: String,
    exporter_listen: String,
    flow_conf: Option<PathBuf>,
    flow_data: Option<PathBuf>,
    flow_enable: Vec<String>,
    flow_disable: Vec<String>,
    flow_instance: usize,
    flow_interval: String,
    flow_limit: usize,
    log_level: String,
    plugin_include: bool,
    plugin_timeout: u64,
    proc_num: usize,
    time_format: String,
    time_zone: String,
    user_agent: String,
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            expire_action: Vec::new(),
            expire_action_delay: "1h".into(),
            expire_action_timeout: 30,
            expire_interval: "1d".into(),
            exporter_listen: String::new(),
            flow_conf: None,
            flow_data: None,
            flow_enable: Vec::new(),
            flow_disable: Vec::new(),
            flow_instance: 1,
            flow_interval: "5m".into(),
            flow_limit: 0,
            log_level: "info".into(),
            plugin_include: false,
            plugin_timeout: 30,
            proc_num: 0,
            time_format: "%Y-%m-%d %H:%M:%S %Z".into(),
            time_zone: "UTC".into(),
            user_agent: format!("feedflow/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Validated application config.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub expire_action: Vec<String>,
    pub expire_action_delay: Duration,
    pub expire_action_timeout: Duration,
    pub expire_interval: Duration,
    pub exporter_listen: Option<String>,
    pub flow_conf: PathBuf,
    pub flow_data: PathBuf,
    pub flow_enable: Vec<String>,
    pub flow_disable: Vec<String>,
    pub flow_instance: usize,
    pub flow_interval: Duration,
    pub flow_limit: usize,
    pub log_level: String,
    pub plugin_include: bool,
    pub plugin_timeout: Duration,
    pub proc_num: usize,
    pub time_format: String,
    pub time_zone: Tz,
    pub user_agent: String,
    /// Named parameter templates, one per non-default table.
    pub templates: BTreeMap<String, Map<String, Value>>,
}

impl AppConfig {
    /// Parses a TOML document. Relative directories resolve against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut table: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let section = match table.remove("default") {
            Some(value) => value
                .try_into::<DefaultSection>()
                .map_err(|e| ConfigError::Parse(format!("[default]: {e}")))?,
            None => DefaultSection::default(),
        };

        let mut templates = BTreeMap::new();
        for (name, value) in table {
            let toml::Value::Table(_) = value else {
                return Err(ConfigError::Invalid {
                    key: name,
                    reason: "top-level keys must be tables".into(),
                });
            };
            let json = serde_json::to_value(&value).map_err(|e| ConfigError::Parse(e.to_string()))?;
            if let Value::Object(map) = json {
                templates.insert(name, map);
            }
        }

        Self::from_section(section, base_dir, templates)
    }

    /// All defaults, rooted at `base_dir`.
    pub fn with_base_dir(base_dir: &Path) -> Self {
        // the default section always validates
        Self::from_section(DefaultSection::default(), base_dir, BTreeMap::new())
            .unwrap_or_else(|e| unreachable!("built-in defaults are invalid: {e}"))
    }

    fn from_section(
        s: DefaultSection,
        base_dir: &Path,
        templates: BTreeMap<String, Map<String, Value>>,
    ) -> Result<Self, ConfigError> {
        if !s.flow_enable.is_empty() && !s.flow_disable.is_empty() {
            return Err(ConfigError::EnableDisable);
        }
        if s.flow_instance == 0 {
            return Err(ConfigError::Invalid {
                key: "flow_instance".into(),
                reason: "must be at least 1".into(),
            });
        }
        if StrftimeItems::new(&s.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Invalid {
                key: "time_format".into(),
                reason: format!("`{}` is not a strftime format", s.time_format),
            });
        }
        let time_zone = Tz::from_str(&s.time_zone).map_err(|_| ConfigError::TimeZone(s.time_zone.clone()))?;
        let resolve = |dir: Option<PathBuf>, fallback: &str| match dir {
            Some(d) if d.is_absolute() => d,
            Some(d) => base_dir.join(d),
            None => base_dir.join(fallback),
        };

        Ok(AppConfig {
            expire_action: s.expire_action,
            expire_action_delay: parse_interval(&s.expire_action_delay)?,
            expire_action_timeout: Duration::from_secs(s.expire_action_timeout.max(1)),
            expire_interval: parse_interval(&s.expire_interval)?,
            exporter_listen: Some(s.exporter_listen).filter(|l| !l.trim().is_empty()),
            flow_conf: resolve(s.flow_conf, "flows"),
            flow_data: resolve(s.flow_data, "data"),
            flow_enable: s.flow_enable,
            flow_disable: s.flow_disable,
            flow_instance: s.flow_instance,
            flow_interval: parse_interval(&s.flow_interval)?,
            flow_limit: s.flow_limit,
            log_level: s.log_level,
            plugin_include: s.plugin_include,
            plugin_timeout: Duration::from_secs(s.plugin_timeout.max(1)),
            proc_num: s.proc_num,
            time_format: s.time_format,
            time_zone,
            user_agent: s.user_agent,
            templates,
        })
    }
}
