use std::path::Path;

use anyhow::Result;
use tracing_appender::{non_blocking::WorkerGuard, rolling::{RollingFileAppender, Rotation}};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const LOG_FILE: &str = "feedflow.log";

fn filter(log_level: &str) -> Result<EnvFilter> {
    // RUST_LOG wins over the configured level
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => build_filter(&directives),
        _ => build_filter(log_level),
    }
}

fn build_filter(directives: &str) -> Result<EnvFilter> {
    Ok(EnvFilter::try_new(directives)?
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("h2=warn".parse()?))
}

/// Installs the global subscriber: stdout, plus a daily rolling file in
/// `log_dir` when given. Keep the returned guard alive until exit or buffered
/// file lines are lost.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stdout_layer = fmt::layer().with_target(false).with_thread_names(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter(log_level)?)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("feedflow=debug,warn").is_ok());
        assert!(build_filter("feedflow=loud").is_err());
    }
}
