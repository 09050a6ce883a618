use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::AppConfig;

/// First six hex chars of the SHA-256 of `name`.
pub fn flow_hash(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(digest)[..6].to_string()
}

/// Per-flow counters. Everything except `runs` is reset at the start of a run.
#[derive(Debug, Default)]
pub struct FlowMetrics {
    errors: AtomicU64,
    expired: AtomicU64,
    no_data: AtomicU64,
    received: AtomicU64,
    sent: AtomicU64,
    runs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub errors: u64,
    pub expired: u64,
    pub no_data: u64,
    pub received: u64,
    pub sent: u64,
    pub runs: u64,
}

impl FlowMetrics {
    pub fn reset(&self) {
        for counter in [&self.errors, &self.expired, &self.no_data, &self.received, &self.sent] {
            counter.store(0, Ordering::Relaxed);
        }
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn no_data(&self) {
        self.no_data.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_received(&self, count: u64) {
        self.received.store(count, Ordering::Relaxed);
    }

    pub fn set_sent(&self, count: u64) {
        self.sent.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            errors: self.errors.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            no_data: self.no_data.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            runs: self.runs.load(Ordering::Relaxed),
        }
    }
}

/// Everything a plugin may know about the flow that owns it.
#[derive(Debug)]
pub struct FlowInfo {
    pub id: Uuid,
    pub hash: String,
    pub name: String,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub interval: Duration,
    /// Maximum number of overlapping executions.
    pub instance: usize,
    pub metrics: FlowMetrics,
    state_lock: Mutex<()>,
}

impl FlowInfo {
    pub fn new(name: &str, config_path: &Path, app: &AppConfig, interval: Duration, instance: usize) -> Self {
        let data_dir = app.flow_data.join(name);
        Self {
            id: Uuid::new_v4(),
            hash: flow_hash(name),
            name: name.to_string(),
            config_path: config_path.to_path_buf(),
            state_dir: data_dir.clone(),
            temp_dir: data_dir.join("tmp"),
            data_dir,
            interval,
            instance: instance.max(1),
            metrics: FlowMetrics::default(),
            state_lock: Mutex::new(()),
        }
    }

    /// Serialises load-modify-save of this flow's state.
    pub fn state_lock(&self) -> &Mutex<()> {
        &self.state_lock
    }

    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(&self.temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_short_lower_hex() {
        let h = flow_hash("news-feed");
        assert_eq!(h.len(), 6);
        assert!(h.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_eq!(h, flow_hash("news-feed"));
        assert_ne!(h, flow_hash("other"));
    }

    #[test]
    fn layout_under_flow_data() {
        let app = AppConfig::with_base_dir(Path::new("/srv/ff"));
        let info = FlowInfo::new("news", Path::new("/srv/ff/flows/news.yaml"), &app, Duration::from_secs(60), 0);
        assert_eq!(info.data_dir, PathBuf::from("/srv/ff/data/news"));
        assert_eq!(info.state_dir, info.data_dir);
        assert_eq!(info.temp_dir, PathBuf::from("/srv/ff/data/news/tmp"));
        assert_eq!(info.instance, 1);
    }

    #[test]
    fn reset_keeps_runs() {
        let m = FlowMetrics::default();
        m.reset();
        m.error();
        m.set_sent(4);
        m.reset();
        let s = m.snapshot();
        assert_eq!(s.errors, 0);
        assert_eq!(s.sent, 0);
        assert_eq!(s.runs, 2);
    }
}
