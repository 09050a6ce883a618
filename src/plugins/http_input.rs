use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flow_plugin::{
    AppConfig, Detector, FlowInfo, Input, ParamSpec, Params, PluginConfig, PluginError, Received, Record, SourceState,
};
use reqwest::{Client, header::LAST_MODIFIED};
use tracing::warn;

/// Fetches URLs. One record per URL: the body lands in `generic.text0` and
/// the URL in `rss.link`. The record time is `Last-Modified`, or now when the
/// server sends none, so sites without it are best matched by signature.
#[derive(Debug)]
pub struct HttpInput {
    plugin: String,
    flow: Arc<FlowInfo>,
    urls: Vec<String>,
    client: Client,
    detector: Detector,
}

pub fn schema(_app: &AppConfig) -> Vec<ParamSpec> {
    vec![ParamSpec::required("input")]
}

pub fn build(cfg: &PluginConfig, params: &Params) -> Result<Box<dyn Input>, PluginError> {
    let client = Client::builder()
        .user_agent(cfg.app.user_agent.clone())
        .timeout(cfg.app.plugin_timeout)
        .build()
        .map_err(|e| PluginError::Config(format!("http client: {e}")))?;
    Ok(Box::new(HttpInput {
        plugin: cfg.plugin.clone(),
        flow: cfg.flow.clone(),
        urls: params.strings("input")?,
        client,
        detector: Detector::from_params(cfg, params)?,
    }))
}

fn last_modified(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

impl HttpInput {
    async fn fetch(&self, url: &str) -> Result<Record, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let time = last_modified(response.headers().get(LAST_MODIFIED).and_then(|v| v.to_str().ok()))
            .unwrap_or_else(Utc::now);
        let body = response.text().await?;

        let mut record = Record::new(&self.flow.name, &self.plugin, url, time);
        record.rss.link = url.to_string();
        record.generic.texts[0] = body;
        Ok(record)
    }
}

#[async_trait]
impl Input for HttpInput {
    fn name(&self) -> &str {
        &self.plugin
    }

    fn input_list(&self) -> Vec<String> {
        self.urls.clone()
    }

    async fn load_state(&self) -> Result<SourceState, PluginError> {
        self.detector.load_state().await
    }

    async fn save_state(&self, state: &mut SourceState) -> Result<(), PluginError> {
        self.detector.save_state(state, &self.urls).await
    }

    #[tracing::instrument(name = "http_input_receive", skip(self), fields(flow = %self.flow.name))]
    async fn receive(&self) -> Result<Received, PluginError> {
        let mut candidates = Vec::new();
        let mut last_error = None;
        for url in &self.urls {
            match self.fetch(url).await {
                Ok(record) => candidates.push(record),
                Err(e) => {
                    warn!(url = %url, error = %e, "fetch failed");
                    last_error = Some(e);
                }
            }
        }
        if candidates.is_empty() {
            if let Some(e) = last_error {
                return Err(PluginError::exec(e));
            }
        }
        self.detector.detect(&self.urls, candidates).await
    }
}
