use std::path::Path;

use anyhow::Context;

use super::CliContext;
use feedflow::{app::AppError, flow::load_flow};

pub fn validate(context: &CliContext, file: &Path) -> Result<(), AppError> {
    let flow = load_flow(file, &context.app, &context.registry)
        .with_context(|| format!("{} is not a valid flow", file.display()))?;
    println!(
        "✅ Flow `{}` is valid: {} process stage(s), every {:?}.",
        flow.name(),
        flow.processes.len(),
        flow.info.interval
    );
    Ok(())
}
