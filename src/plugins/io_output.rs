use std::path::PathBuf;

use async_trait::async_trait;
use flow_plugin::{AppConfig, Field, Output, ParamSpec, Params, PluginConfig, PluginError, Record};
use serde_json::{Map, Value};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// Appends records to a file as JSON lines. With `input`, each line holds
/// only the listed fields, keyed by path.
#[derive(Debug)]
pub struct IoOutput {
    path: PathBuf,
    fields: Option<Vec<Field>>,
}

pub fn schema(_app: &AppConfig) -> Vec<ParamSpec> {
    vec![ParamSpec::required("output"), ParamSpec::optional("input")]
}

pub fn build(cfg: &PluginConfig, params: &Params) -> Result<Box<dyn Output>, PluginError> {
    let output = PathBuf::from(params.string("output")?);
    let path = if output.is_relative() { cfg.flow.data_dir.join(output) } else { output };
    Ok(Box::new(IoOutput {
        path,
        fields: params.opt_fields("input")?,
    }))
}

impl IoOutput {
    fn line(&self, record: &Record) -> Result<String, PluginError> {
        let value = match &self.fields {
            Some(fields) => {
                let mut map = Map::new();
                for f in fields {
                    map.insert(f.path().to_string(), f.read(record).to_json());
                }
                Value::Object(map)
            }
            None => serde_json::to_value(record).map_err(PluginError::exec)?,
        };
        let mut line = serde_json::to_string(&value).map_err(PluginError::exec)?;
        line.push('\n');
        Ok(line)
    }
}

#[async_trait]
impl Output for IoOutput {
    fn name(&self) -> &str {
        "io"
    }

    fn output_list(&self) -> Vec<String> {
        vec![self.path.display().to_string()]
    }

    async fn send(&self, records: &[Record]) -> Result<(), PluginError> {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&self.line(record)?);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(PluginError::exec)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PluginError::Exec(format!("{}: {e}", self.path.display())))?;
        file.write_all(buf.as_bytes()).await.map_err(PluginError::exec)?;
        file.flush().await.map_err(PluginError::exec)?;
        Ok(())
    }
}
