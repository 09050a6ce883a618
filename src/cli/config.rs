use std::path::Path;

use anyhow::Context;

use feedflow::{app::AppError, config};

pub fn sample(path: Option<&Path>) -> Result<(), AppError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config::user_config_path().context("no home directory; pass a path")?,
    };
    config::write_sample(&path)?;
    println!("✅ Sample config written to {}", path.display());
    Ok(())
}
