use async_trait::async_trait;
use flow_plugin::{AppConfig, Field, ParamSpec, Params, PluginConfig, PluginError, Process, Record, StageInfo};
use regex::RegexSet;

/// Keeps records where any input field matches any pattern, or, with
/// `inverse`, where none does.
#[derive(Debug)]
pub struct RegexpProcess {
    stage: StageInfo,
    inputs: Vec<Field>,
    patterns: RegexSet,
    inverse: bool,
}

pub fn schema(_app: &AppConfig) -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("input"),
        ParamSpec::required("regexp"),
        ParamSpec::optional("inverse").default(false),
    ]
}

pub fn build(cfg: &PluginConfig, params: &Params) -> Result<Box<dyn Process>, PluginError> {
    let patterns = RegexSet::new(params.strings("regexp")?)
        .map_err(|e| PluginError::Config(format!("invalid regexp: {e}")))?;
    Ok(Box::new(RegexpProcess {
        stage: StageInfo::from_params(cfg, params)?,
        inputs: params.fields("input")?,
        patterns,
        inverse: params.bool("inverse")?,
    }))
}

impl RegexpProcess {
    fn matches(&self, record: &Record) -> bool {
        self.inputs
            .iter()
            .flat_map(|f| f.get_strings(record))
            .any(|value| self.patterns.is_match(&value))
    }
}

#[async_trait]
impl Process for RegexpProcess {
    fn stage(&self) -> &StageInfo {
        &self.stage
    }

    fn name(&self) -> &str {
        "regexp"
    }

    async fn process(&self, records: Vec<Record>) -> Result<Vec<Record>, PluginError> {
        Ok(records
            .into_iter()
            .filter(|r| self.matches(r) != self.inverse)
            .collect())
    }
}
