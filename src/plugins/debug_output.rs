use async_trait::async_trait;
use flow_plugin::{AppConfig, Field, Output, ParamSpec, Params, PluginConfig, PluginError, Record};
use serde_json::{Map, Value};
use tracing::info;

/// Logs every record it receives.
#[derive(Debug)]
pub struct DebugOutput {
    flow: String,
    fields: Option<Vec<Field>>,
}

pub fn schema(_app: &AppConfig) -> Vec<ParamSpec> {
    vec![ParamSpec::optional("input")]
}

pub fn build(cfg: &PluginConfig, params: &Params) -> Result<Box<dyn Output>, PluginError> {
    Ok(Box::new(DebugOutput {
        flow: cfg.flow.name.clone(),
        fields: params.opt_fields("input")?,
    }))
}

fn render(fields: Option<&[Field]>, record: &Record) -> String {
    let value = match fields {
        Some(fields) => Value::Object(
            fields
                .iter()
                .map(|f| (f.path().to_string(), f.read(record).to_json()))
                .collect::<Map<_, _>>(),
        ),
        None => serde_json::to_value(record).unwrap_or(Value::Null),
    };
    value.to_string()
}

#[async_trait]
impl Output for DebugOutput {
    fn name(&self) -> &str {
        "debug"
    }

    fn output_list(&self) -> Vec<String> {
        Vec::new()
    }

    async fn send(&self, records: &[Record]) -> Result<(), PluginError> {
        for record in records {
            info!(flow = %self.flow, uuid = %record.uuid(), record = %render(self.fields.as_deref(), record), "record");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::tests::output_config;
    use serde_json::json;

    #[test]
    fn renders_selected_fields() {
        let fields = Field::resolve_all(&["rss.title", "generic.text1"]).unwrap();
        let mut r = Record::default();
        r.rss.title = "t".into();
        r.generic.texts[1] = "x".into();
        let v: Value = serde_json::from_str(&render(Some(&fields), &r)).unwrap();
        assert_eq!(v, json!({"rss.title": "t", "generic.text1": "x"}));
    }

    #[tokio::test]
    async fn sends_without_error() {
        let out = output_config(schema, build, json!({})).unwrap();
        out.send(&[Record::default(), Record::default()]).await.unwrap();
        assert!(out.output_list().is_empty());
    }
}
