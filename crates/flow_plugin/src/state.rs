//! Durable per-flow `key -> time` map.
//!
//! The map lives in `<dir>/state.db` as a bincode blob. Writes go to a
//! temporary file in the same directory which is then renamed over the old
//! one, so a crash never leaves a half-written state behind.
use std::{
    collections::{BTreeMap, BTreeSet},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const STATE_FILE: &str = "state.db";

/// Source identifiers and signature hashes mapped to their last-seen time.
pub type SourceState = BTreeMap<String, DateTime<Utc>>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state read/write failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

/// Reads the state of `dir`. A missing file is an empty state.
pub fn load(dir: &Path) -> Result<SourceState, StateError> {
    let path = state_path(dir);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SourceState::new()),
        Err(source) => return Err(StateError::Io { path, source }),
    };
    bincode::deserialize(&bytes).map_err(|source| StateError::Codec { path, source })
}

/// Drops entries older than `ttl`, except the keys in `keep`. `None` or a
/// zero ttl keeps everything.
pub fn evict(state: &mut SourceState, ttl: Option<Duration>, now: DateTime<Utc>, keep: &BTreeSet<String>) -> usize {
    let Some(ttl) = ttl.filter(|t| !t.is_zero()) else {
        return 0;
    };
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return 0;
    };
    let before = state.len();
    state.retain(|key, seen| keep.contains(key) || now.signed_duration_since(*seen) <= ttl);
    before - state.len()
}

/// Evicts stale entries not in `keep`, then atomically replaces
/// `<dir>/state.db`.
pub fn save(
    dir: &Path,
    state: &mut SourceState,
    ttl: Option<Duration>,
    now: DateTime<Utc>,
    keep: &BTreeSet<String>,
) -> Result<(), StateError> {
    let evicted = evict(state, ttl, now, keep);
    if evicted > 0 {
        tracing::debug!(dir = %dir.display(), evicted, "evicted stale state entries");
    }

    let path = state_path(dir);
    let io_err = |source| StateError::Io { path: path.clone(), source };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let bytes = bincode::serialize(state).map_err(|source| StateError::Codec { path: path.clone(), source })?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(&path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Max-merge: a stored time never moves backwards.
pub fn merge_max(state: &mut SourceState, key: &str, seen: DateTime<Utc>) {
    state
        .entry(key.to_string())
        .and_modify(|t| *t = (*t).max(seen))
        .or_insert(seen);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut state = SourceState::new();
        state.insert("https://example.org/feed".into(), at(100));
        state.insert("ab12cd".into(), at(90));
        save(dir.path(), &mut state, None, at(1_000_000), &BTreeSet::new()).unwrap();
        assert_eq!(load(dir.path()).unwrap(), state);
        // no leftover temp files
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn ttl_evicts_on_save() {
        let dir = TempDir::new().unwrap();
        let mut state = SourceState::new();
        state.insert("old".into(), at(100));
        state.insert("fresh".into(), at(950));
        state.insert("quiet-source".into(), at(10));
        let keep = BTreeSet::from(["quiet-source".to_string()]);
        save(dir.path(), &mut state, Some(Duration::from_secs(60)), at(1_000), &keep).unwrap();
        let loaded = load(dir.path()).unwrap();
        assert!(!loaded.contains_key("old"));
        assert!(loaded.contains_key("fresh"));
        assert_eq!(loaded["quiet-source"], at(10));

        let mut all = loaded.clone();
        assert_eq!(evict(&mut all, Some(Duration::ZERO), at(1_000_000), &BTreeSet::new()), 0);
    }

    #[test]
    fn corrupt_file_is_codec_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(state_path(dir.path()), b"\xff\xff\xff\xff\xff\xff\xff\xff\xff").unwrap();
        assert!(matches!(load(dir.path()), Err(StateError::Codec { .. })));
    }

    #[test]
    fn merge_never_rewinds() {
        let mut state = SourceState::new();
        merge_max(&mut state, "s", at(200));
        merge_max(&mut state, "s", at(150));
        assert_eq!(state["s"], at(200));
        merge_max(&mut state, "s", at(250));
        assert_eq!(state["s"], at(250));
    }
}
