//! New-item detection shared by all inputs.
//!
//! An input collects candidate records and hands them to [`Detector::detect`],
//! which filters them against the flow's persisted state, either by source
//! timestamp or by a signature hash of configured fields.
use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    config::AppConfig,
    expire::ExpireController,
    field::Field,
    flow::FlowInfo,
    params::{ParamSpec, Params},
    plugin::{PluginConfig, PluginError, Received},
    record::Record,
    state::{self, SourceState, merge_max},
};

/// Signature used when `match_signature` is given but empty.
pub const FALLBACK_SIGNATURE: [&str; 2] = ["text", "time"];

/// Runs blocking state file I/O off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, PluginError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(PluginError::exec)
}

pub fn signature_hash(fields: &[Field], record: &Record) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.get_string(record).as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
pub struct Detector {
    flow: Arc<FlowInfo>,
    signature: Option<Vec<Field>>,
    ttl: Option<Duration>,
    force: bool,
    force_count: usize,
    expire_interval: Duration,
    expire: Option<ExpireController>,
    time_zone: Tz,
    time_format: String,
}

impl Detector {
    /// Parameters common to every input.
    pub fn schema(app: &AppConfig) -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("match_signature"),
            ParamSpec::optional("match_ttl"),
            ParamSpec::optional("force").default(false),
            ParamSpec::optional("force_count").default(10),
            ParamSpec::optional("expire_action").default(app.expire_action.clone()),
            ParamSpec::optional("expire_action_delay").default(app.expire_action_delay.as_secs()),
            ParamSpec::optional("expire_action_timeout").default(app.expire_action_timeout.as_secs()),
            ParamSpec::optional("expire_interval").default(app.expire_interval.as_secs()),
        ]
    }

    pub fn from_params(cfg: &PluginConfig, params: &Params) -> Result<Self, PluginError> {
        let signature = match params.get("match_signature") {
            None => None,
            Some(Value::Array(items)) if items.is_empty() => Some(Field::resolve_all(&FALLBACK_SIGNATURE)?),
            Some(_) => Some(params.fields("match_signature")?),
        };
        let expire = ExpireController::new(
            params.strings("expire_action")?,
            params.interval("expire_action_delay")?,
            params.interval("expire_action_timeout")?.max(Duration::from_secs(1)),
        );
        Ok(Self {
            flow: cfg.flow.clone(),
            signature,
            ttl: params.opt_interval("match_ttl")?,
            force: params.bool("force")?,
            force_count: params.usize("force_count")?,
            expire_interval: params.interval("expire_interval")?,
            expire,
            time_zone: cfg.app.time_zone,
            time_format: cfg.app.time_format.clone(),
        })
    }

    pub async fn load_state(&self) -> Result<SourceState, PluginError> {
        let dir = self.flow.state_dir.clone();
        Ok(blocking(move || state::load(&dir)).await??)
    }

    /// Saves `state`. Entries for `sources` survive `match_ttl` eviction.
    pub async fn save_state(&self, state: &mut SourceState, sources: &[String]) -> Result<(), PluginError> {
        let keep = sources.iter().cloned().collect();
        *state = self.save_state_at(state.clone(), Utc::now(), keep).await?;
        Ok(())
    }

    async fn save_state_at(
        &self,
        mut map: SourceState,
        now: DateTime<Utc>,
        keep: BTreeSet<String>,
    ) -> Result<SourceState, PluginError> {
        let dir = self.flow.state_dir.clone();
        let ttl = self.ttl;
        Ok(blocking(move || state::save(&dir, &mut map, ttl, now, &keep).map(|()| map)).await??)
    }

    pub fn expire_controller(&self) -> Option<&ExpireController> {
        self.expire.as_ref()
    }

    pub async fn detect(&self, sources: &[String], candidates: Vec<Record>) -> Result<Received, PluginError> {
        self.detect_at(sources, candidates, Utc::now()).await
    }

    /// Filters `candidates` down to unseen records and persists the new state.
    #[tracing::instrument(level = "debug", skip_all, fields(flow = %self.flow.name, candidates = candidates.len()))]
    pub async fn detect_at(
        &self,
        sources: &[String],
        candidates: Vec<Record>,
        now: DateTime<Utc>,
    ) -> Result<Received, PluginError> {
        let (records, expired) = {
            let _guard = self.flow.state_lock().lock().await;
            let mut state = self.load_state().await?;
            // source cursors are never evicted, only signature entries age out
            let mut keep: BTreeSet<String> = sources.iter().cloned().collect();
            keep.extend(candidates.iter().map(|r| r.meta.source.clone()));
            let baseline = state.clone();
            let mut fresh = Vec::new();

            for mut record in candidates {
                if self.force && fresh.len() >= self.force_count {
                    debug!(force_count = self.force_count, "force cap reached");
                    break;
                }
                let is_new = match &self.signature {
                    Some(fields) => {
                        let hash = signature_hash(fields, &record);
                        if self.force || !state.contains_key(&hash) {
                            state.insert(hash, now);
                            true
                        } else {
                            false
                        }
                    }
                    None => {
                        self.force
                            || baseline
                                .get(record.source())
                                .is_none_or(|seen| record.time() > *seen)
                    }
                };
                if is_new {
                    merge_max(&mut state, &record.meta.source, record.time());
                    record.localize(&self.time_zone, &self.time_format);
                    fresh.push(record);
                }
            }

            let state = self.save_state_at(state, now, keep).await?;

            let limit = chrono::Duration::from_std(self.expire_interval).unwrap_or(chrono::Duration::MAX);
            let expired: Vec<(String, DateTime<Utc>)> = sources
                .iter()
                .filter_map(|s| state.get(s).map(|seen| (s.clone(), *seen)))
                .filter(|(_, seen)| now.signed_duration_since(*seen) > limit)
                .collect();
            (fresh, expired)
        };

        if let Some((source, seen)) = expired.first() {
            warn!(flow = %self.flow.name, sources = expired.len(), first = %source, "sources expired");
            if let Some(ctl) = &self.expire {
                ctl.fire(&self.flow.name, source, *seen, now).await;
            }
        }

        Ok(Received {
            records,
            expired: expired.into_iter().map(|(s, _)| s).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn detector(dir: &Path, params: Value) -> Detector {
        let app = AppConfig::with_base_dir(dir);
        let flow = FlowInfo::new("news", &dir.join("flows/news.yaml"), &app, Duration::from_secs(60), 1);
        let cfg = PluginConfig {
            app: Arc::new(app),
            flow: Arc::new(flow),
            id: 0,
            alias: "io-0".into(),
            plugin: "io".into(),
            params: params.as_object().cloned().unwrap_or_default(),
        };
        let p = cfg.resolve(&Detector::schema(&cfg.app)).unwrap();
        Detector::from_params(&cfg, &p).unwrap()
    }

    fn rec(source: &str, text: &str, time: i64) -> Record {
        let mut r = Record::new("news", "io", source, at(time));
        r.generic.texts[0] = text.into();
        r
    }

    #[tokio::test]
    async fn timestamp_mode_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let d = detector(dir.path(), json!({}));
        let src = vec!["s".to_string()];
        let batch = || vec![rec("s", "a", 90), rec("s", "b", 95), rec("s", "c", 100)];

        let first = d.detect_at(&src, batch(), at(100)).await.unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(d.load_state().await.unwrap()["s"], at(100));
        assert!(!first.records[0].meta.time_format.is_empty());

        let second = d.detect_at(&src, batch(), at(101)).await.unwrap();
        assert!(second.records.is_empty());
        assert_eq!(d.load_state().await.unwrap()["s"], at(100));
    }

    #[tokio::test]
    async fn ttl_keeps_source_cursor() {
        let dir = TempDir::new().unwrap();
        let d = detector(dir.path(), json!({"match_ttl": "1h", "match_signature": ["text"]}));
        let src = vec!["s".to_string()];
        let two_days = 2 * 86_400;

        let first = d.detect_at(&src, vec![rec("s", "a", 1_000)], at(1_000 + two_days)).await.unwrap();
        assert_eq!(first.records.len(), 1);
        let state = d.load_state().await.unwrap();
        assert_eq!(state["s"], at(1_000));

        // the signature entry ages out, the cursor of a quiet source does not
        let later = d.detect_at(&src, vec![], at(1_000 + 2 * two_days)).await.unwrap();
        assert!(later.records.is_empty());
        let state = d.load_state().await.unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state["s"], at(1_000));

        let plain = detector(dir.path(), json!({"match_ttl": "1h"}));
        let again = plain.detect_at(&src, vec![rec("s", "a", 1_000)], at(1_000 + 3 * two_days)).await.unwrap();
        assert!(again.records.is_empty());
    }

    #[tokio::test]
    async fn signature_mode_and_force() {
        let dir = TempDir::new().unwrap();
        let src = vec!["s".to_string()];
        let d = detector(dir.path(), json!({"match_signature": ["text", "time"]}));

        let first = d.detect_at(&src, vec![rec("s", "a", 100)], at(100)).await.unwrap();
        assert_eq!(first.records.len(), 1);
        let hash = signature_hash(&Field::resolve_all(&["text", "time"]).unwrap(), &first.records[0]);
        assert!(d.load_state().await.unwrap().contains_key(&hash));

        let again = d.detect_at(&src, vec![rec("s", "a", 100)], at(110)).await.unwrap();
        assert!(again.records.is_empty());

        let forced = detector(dir.path(), json!({"match_signature": ["text", "time"], "force": true}));
        let third = forced.detect_at(&src, vec![rec("s", "a", 100)], at(120)).await.unwrap();
        assert_eq!(third.records.len(), 1);
    }

    #[tokio::test]
    async fn empty_signature_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let d = detector(dir.path(), json!({"match_signature": []}));
        let src = vec!["s".to_string()];
        // same source and time, different text: both new
        let out = d
            .detect_at(&src, vec![rec("s", "a", 100), rec("s", "b", 100), rec("s", "a", 100)], at(100))
            .await
            .unwrap();
        assert_eq!(out.records.len(), 2);
    }

    #[tokio::test]
    async fn force_caps_volume() {
        let dir = TempDir::new().unwrap();
        let d = detector(dir.path(), json!({"force": true, "force_count": 2}));
        let src = vec!["s".to_string()];
        let out = d
            .detect_at(&src, vec![rec("s", "a", 1), rec("s", "b", 2), rec("s", "c", 3)], at(10))
            .await
            .unwrap();
        assert_eq!(out.records.len(), 2);
    }

    #[tokio::test]
    async fn stale_save_does_not_rewind() {
        let dir = TempDir::new().unwrap();
        let d = detector(dir.path(), json!({}));
        let src = vec!["s".to_string()];
        d.detect_at(&src, vec![rec("s", "new", 500)], at(500)).await.unwrap();
        // a slower run that observed older items finishes later
        let late = detector(dir.path(), json!({"force": true}));
        late.detect_at(&src, vec![rec("s", "old", 300)], at(510)).await.unwrap();
        assert_eq!(d.load_state().await.unwrap()["s"], at(500));
    }

    #[tokio::test]
    async fn reports_expired_sources() {
        let dir = TempDir::new().unwrap();
        let d = detector(dir.path(), json!({"expire_interval": "60s"}));
        let src = vec!["s".to_string(), "never-seen".to_string()];
        d.detect_at(&src, vec![rec("s", "a", 100)], at(100)).await.unwrap();

        let fresh = d.detect_at(&src, vec![], at(150)).await.unwrap();
        assert!(fresh.expired.is_empty());
        let stale = d.detect_at(&src, vec![], at(200)).await.unwrap();
        assert_eq!(stale.expired, vec!["s"]);
        assert!(d.expire_controller().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn expired_source_fires_controller() {
        let dir = TempDir::new().unwrap();
        let d = detector(
            dir.path(),
            json!({"expire_interval": "60s", "expire_action": ["/bin/echo", "x"], "expire_action_delay": "30s"}),
        );
        let src = vec!["s".to_string()];
        d.detect_at(&src, vec![rec("s", "a", 100)], at(100)).await.unwrap();

        d.detect_at(&src, vec![], at(200)).await.unwrap();
        let ctl = d.expire_controller().unwrap();
        assert_eq!(ctl.last_run(), Some(at(200)));
        d.detect_at(&src, vec![], at(215)).await.unwrap();
        assert_eq!(ctl.last_run(), Some(at(200)));
        d.detect_at(&src, vec![], at(231)).await.unwrap();
        assert_eq!(ctl.last_run(), Some(at(231)));
    }
}
