//! Runs a user command when a source has gone quiet.
//!
//! Invocations are rate limited by `delay`; the command is started in its own
//! process group and the whole group is killed when `timeout` trips.
use std::{process::Stdio, sync::Mutex, time::Duration};

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// Too soon after the previous invocation.
    Delayed,
    /// The command ran to completion with this exit code.
    Exited(Option<i32>),
    Killed,
    Failed(String),
}

impl ExpireOutcome {
    pub fn fired(&self) -> bool {
        !matches!(self, ExpireOutcome::Delayed)
    }
}

#[derive(Debug)]
pub struct ExpireController {
    command: Vec<String>,
    delay: Duration,
    timeout: Duration,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl ExpireController {
    /// `None` when `command` is empty.
    pub fn new(command: Vec<String>, delay: Duration, timeout: Duration) -> Option<Self> {
        if command.is_empty() {
            return None;
        }
        Some(Self { command, delay, timeout, last_run: Mutex::new(None) })
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run.lock().map(|g| *g).unwrap_or_else(|p| *p.into_inner())
    }

    /// Claims the slot at `now` unless the previous run was less than `delay` ago.
    fn claim(&self, now: DateTime<Utc>) -> bool {
        let mut last = self.last_run.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(prev) = *last {
            let since = now.signed_duration_since(prev);
            if since < chrono::Duration::from_std(self.delay).unwrap_or(chrono::Duration::MAX) {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Invokes `<command> <flow> <source> <last_seen unix> <extra args...>`.
    #[tracing::instrument(skip(self), fields(command = %self.command[0]))]
    pub async fn fire(&self, flow: &str, source: &str, last_seen: DateTime<Utc>, now: DateTime<Utc>) -> ExpireOutcome {
        if !self.claim(now) {
            info!("expire action skipped, delay not elapsed");
            return ExpireOutcome::Delayed;
        }

        let mut cmd = Command::new(&self.command[0]);
        cmd.arg(flow)
            .arg(source)
            .arg(last_seen.timestamp().to_string())
            .args(&self.command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "expire action failed to start");
                return ExpireOutcome::Failed(e.to_string());
            }
        };
        info!("expire action fired");

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(code = ?status.code(), "expire action exited");
                ExpireOutcome::Exited(status.code())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "expire action wait failed");
                ExpireOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "expire action timed out, killing process group");
                kill_group(&mut child).await;
                ExpireOutcome::Killed
            }
        }
    }
}

#[cfg(unix)]
async fn kill_group(child: &mut tokio::process::Child) {
    use nix::{sys::signal::{Signal, killpg}, unistd::Pid};

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            warn!(error = %e, "killpg failed");
        }
    }
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn kill_group(child: &mut tokio::process::Child) {
    let _ = child.kill().await;
}
