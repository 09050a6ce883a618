use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flow_plugin::{
    AppConfig, Detector, FlowInfo, Input, ParamSpec, Params, PluginConfig, PluginError, Received, Record, SourceState,
};
use tracing::{debug, warn};

/// Reads files. Every regular file under each configured path is one record;
/// directories are listed, not walked.
#[derive(Debug)]
pub struct IoInput {
    plugin: String,
    flow: Arc<FlowInfo>,
    inputs: Vec<String>,
    detector: Detector,
}

pub fn schema(_app: &AppConfig) -> Vec<ParamSpec> {
    vec![ParamSpec::required("input")]
}

pub fn build(cfg: &PluginConfig, params: &Params) -> Result<Box<dyn Input>, PluginError> {
    Ok(Box::new(IoInput {
        plugin: cfg.plugin.clone(),
        flow: cfg.flow.clone(),
        inputs: params.strings("input")?,
        detector: Detector::from_params(cfg, params)?,
    }))
}

async fn files_of(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

impl IoInput {
    async fn read_record(&self, source: &str, file: &Path) -> std::io::Result<Record> {
        let meta = tokio::fs::metadata(file).await?;
        let time: DateTime<Utc> = meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
        let bytes = tokio::fs::read(file).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let mut record = Record::new(&self.flow.name, &self.plugin, source, time);
        record.io.file = file.display().to_string();
        record.io.lines = text.lines().map(str::to_string).collect();
        record.io.text = text;
        Ok(record)
    }
}

#[async_trait]
impl Input for IoInput {
    fn name(&self) -> &str {
        &self.plugin
    }

    fn input_list(&self) -> Vec<String> {
        self.inputs.clone()
    }

    async fn load_state(&self) -> Result<SourceState, PluginError> {
        self.detector.load_state().await
    }

    async fn save_state(&self, state: &mut SourceState) -> Result<(), PluginError> {
        self.detector.save_state(state, &self.inputs).await
    }

    #[tracing::instrument(name = "io_input_receive", skip(self), fields(flow = %self.flow.name))]
    async fn receive(&self) -> Result<Received, PluginError> {
        let mut candidates = Vec::new();
        let mut failed = 0;
        let mut last_error = None;
        for source in &self.inputs {
            let files = match files_of(Path::new(source)).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(source = %source, error = %e, "cannot read source");
                    failed += 1;
                    last_error = Some(e);
                    continue;
                }
            };
            let listed = files.len();
            let mut read = 0;
            for file in files {
                match self.read_record(source, &file).await {
                    Ok(record) => {
                        candidates.push(record);
                        read += 1;
                    }
                    Err(e) => {
                        warn!(file = %file.display(), error = %e, "cannot read file");
                        last_error = Some(e);
                    }
                }
            }
            if listed > 0 && read == 0 {
                failed += 1;
            }
        }
        if failed == self.inputs.len() {
            if let Some(e) = last_error {
                return Err(PluginError::exec(e));
            }
        }
        debug!(candidates = candidates.len(), "files read");
        self.detector.detect(&self.inputs, candidates).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_plugin::params;
    use serde_json::json;
    use tempfile::TempDir;

    fn input(dir: &Path, sources: Vec<String>) -> Box<dyn Input> {
        let app = Arc::new(AppConfig::with_base_dir(dir));
        let flow = Arc::new(FlowInfo::new("files", &dir.join("files.yaml"), &app, std::time::Duration::from_secs(60), 1));
        let cfg = PluginConfig {
            app: app.clone(),
            flow,
            id: 0,
            alias: "io".into(),
            plugin: "io".into(),
            params: json!({ "input": sources }).as_object().cloned().unwrap(),
        };
        let mut spec = schema(&app);
        spec.extend(Detector::schema(&app));
        let p = params::resolve(&spec, &app.templates, &cfg.params).unwrap();
        build(&cfg, &p).unwrap()
    }

    #[tokio::test]
    async fn reads_files_once() {
        let dir = TempDir::new().unwrap();
        let feed = dir.path().join("feed");
        std::fs::create_dir_all(feed.join("sub")).unwrap();
        std::fs::write(feed.join("a.txt"), "one\ntwo").unwrap();
        std::fs::write(feed.join("b.txt"), "three").unwrap();
        std::fs::write(feed.join("sub").join("c.txt"), "nested").unwrap();

        let source = feed.display().to_string();
        let io = input(dir.path(), vec![source.clone(), "/no/such/path".into()]);

        let first = io.receive().await.unwrap();
        assert_eq!(first.records.len(), 2);
        let a = &first.records[0];
        assert_eq!(a.io.lines, vec!["one", "two"]);
        assert_eq!(a.meta.source, source);
        assert!(a.io.file.ends_with("a.txt"));

        let second = io.receive().await.unwrap();
        assert!(second.records.is_empty());
        assert!(io.load_state().await.unwrap().contains_key(&source));
    }

    #[tokio::test]
    async fn unreadable_sources_fail_the_run() {
        let dir = TempDir::new().unwrap();
        let io = input(dir.path(), vec!["/no/such/path".into(), "/nor/this/one".into()]);
        assert!(matches!(io.receive().await, Err(PluginError::Exec(_))));

        // an empty directory is readable, just quiet
        let empty = dir.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        let io = input(dir.path(), vec![empty.display().to_string(), "/no/such/path".into()]);
        assert!(io.receive().await.unwrap().records.is_empty());
    }
}
