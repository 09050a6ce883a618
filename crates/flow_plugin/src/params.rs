//! Parameter descriptors and resolution.
//!
//! A plugin declares the parameters it understands as a list of
//! [`ParamSpec`]s. Values are layered lowest to highest: compiled-in default,
//! the app-config template named by the `template` key, then the flow file.
use std::{collections::BTreeMap, time::Duration};

use serde_json::{Map, Value};

use crate::{
    config::{parse_interval, parse_size},
    field::Field,
    plugin::PluginError,
};

/// Key that selects an app-config template.
pub const TEMPLATE_KEY: &str = "template";

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str) -> Self {
        Self { name, required: true, default: None }
    }

    pub fn optional(name: &'static str) -> Self {
        Self { name, required: false, default: None }
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Resolved parameter values of one plugin instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Map<String, Value>,
}

/// Layers defaults, template and flow values and validates them against `schema`.
///
/// Only flow-level keys are checked for unknowns: a template is shared by
/// several plugins and may carry keys only some of them understand.
pub fn resolve(
    schema: &[ParamSpec],
    templates: &BTreeMap<String, Map<String, Value>>,
    given: &Map<String, Value>,
) -> Result<Params, PluginError> {
    let mut values = Map::new();
    for spec in schema {
        if let Some(default) = &spec.default {
            values.insert(spec.name.to_string(), default.clone());
        }
    }

    if let Some(selector) = given.get(TEMPLATE_KEY) {
        let name = selector
            .as_str()
            .ok_or_else(|| PluginError::Config(format!("`{TEMPLATE_KEY}` must be a string")))?;
        let template = templates
            .get(name)
            .ok_or_else(|| PluginError::Config(format!("unknown template `{name}`")))?;
        for spec in schema {
            if let Some(value) = template.get(spec.name) {
                values.insert(spec.name.to_string(), value.clone());
            }
        }
    }

    let mut unknown: Vec<String> = given
        .keys()
        .filter(|k| k.as_str() != TEMPLATE_KEY && !schema.iter().any(|s| s.name == k.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(PluginError::UnknownParams(unknown));
    }
    for (key, value) in given {
        if key != TEMPLATE_KEY {
            values.insert(key.clone(), value.clone());
        }
    }

    let mut missing: Vec<String> = schema
        .iter()
        .filter(|s| s.required && values.get(s.name).is_none_or(Value::is_null))
        .map(|s| s.name.to_string())
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(PluginError::MissingParams(missing));
    }

    Ok(Params { values })
}

fn wrong_type(name: &str, expected: &str, got: &Value) -> PluginError {
    PluginError::Config(format!("parameter `{name}`: expected {expected}, got {got}"))
}

impl Params {
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn need(&self, name: &str) -> Result<&Value, PluginError> {
        self.get(name)
            .ok_or_else(|| PluginError::MissingParams(vec![name.to_string()]))
    }

    pub fn string(&self, name: &str) -> Result<String, PluginError> {
        match self.need(name)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(wrong_type(name, "a string", other)),
        }
    }

    pub fn opt_string(&self, name: &str) -> Result<Option<String>, PluginError> {
        self.get(name).map(|_| self.string(name)).transpose()
    }

    /// A list of strings; a single string counts as a one-element list.
    pub fn strings(&self, name: &str) -> Result<Vec<String>, PluginError> {
        match self.need(name)? {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(wrong_type(name, "a list of strings", other)),
                })
                .collect(),
            other => Err(wrong_type(name, "a list of strings", other)),
        }
    }

    pub fn opt_strings(&self, name: &str) -> Result<Option<Vec<String>>, PluginError> {
        self.get(name).map(|_| self.strings(name)).transpose()
    }

    pub fn bool(&self, name: &str) -> Result<bool, PluginError> {
        match self.need(name)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(wrong_type(name, "a boolean", other)),
        }
    }

    pub fn u64(&self, name: &str) -> Result<u64, PluginError> {
        match self.need(name)? {
            Value::Number(n) => n.as_u64().ok_or_else(|| wrong_type(name, "a non-negative integer", &Value::Number(n.clone()))),
            Value::String(s) => s.trim().parse().map_err(|_| wrong_type(name, "a non-negative integer", &Value::String(s.clone()))),
            other => Err(wrong_type(name, "a non-negative integer", other)),
        }
    }

    pub fn usize(&self, name: &str) -> Result<usize, PluginError> {
        let n = self.u64(name)?;
        usize::try_from(n).map_err(|_| wrong_type(name, "a smaller integer", &Value::from(n)))
    }

    /// Interval syntax (`30s`, `5m`, ...) or a plain number of seconds.
    pub fn interval(&self, name: &str) -> Result<Duration, PluginError> {
        match self.need(name)? {
            Value::Number(n) => n
                .as_u64()
                .map(Duration::from_secs)
                .ok_or_else(|| wrong_type(name, "an interval", &Value::Number(n.clone()))),
            Value::String(s) => parse_interval(s).map_err(|e| PluginError::Config(format!("parameter `{name}`: {e}"))),
            other => Err(wrong_type(name, "an interval", other)),
        }
    }

    pub fn opt_interval(&self, name: &str) -> Result<Option<Duration>, PluginError> {
        self.get(name).map(|_| self.interval(name)).transpose()
    }

    pub fn size(&self, name: &str) -> Result<u64, PluginError> {
        match self.need(name)? {
            Value::Number(_) => self.u64(name),
            Value::String(s) => parse_size(s).map_err(|e| PluginError::Config(format!("parameter `{name}`: {e}"))),
            other => Err(wrong_type(name, "a size", other)),
        }
    }

    /// Field paths, resolved.
    pub fn fields(&self, name: &str) -> Result<Vec<Field>, PluginError> {
        match self.need(name)? {
            Value::Array(items) => Ok(items.iter().map(Field::resolve_value).collect::<Result<_, _>>()?),
            single => Ok(vec![Field::resolve_value(single)?]),
        }
    }

    pub fn opt_fields(&self, name: &str) -> Result<Option<Vec<Field>>, PluginError> {
        self.get(name).map(|_| self.fields(name)).transpose()
    }

    /// Stage ids for `require`.
    pub fn ids(&self, name: &str) -> Result<Vec<usize>, PluginError> {
        match self.need(name)? {
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| wrong_type(name, "a list of stage ids", v))
                })
                .collect(),
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(|n| vec![n])
                .ok_or_else(|| wrong_type(name, "a list of stage ids", &Value::Number(n.clone()))),
            other => Err(wrong_type(name, "a list of stage ids", other)),
        }
    }
}

/// Input and output lists must have the same length.
pub fn ensure_same_len<A, B>(left: (&str, &[A]), right: (&str, &[B])) -> Result<(), PluginError> {
    if left.1.len() != right.1.len() {
        return Err(PluginError::SizeMismatch {
            left: left.0.to_string(),
            left_len: left.1.len(),
            right: right.0.to_string(),
            right_len: right.1.len(),
        });
    }
    Ok(())
}
