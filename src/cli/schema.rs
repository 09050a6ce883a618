use std::{fs, path::Path};

use anyhow::Context;
use schemars::schema_for;

use feedflow::{app::AppError, flow::FlowFile};
use flow_plugin::Record;

pub fn execute(dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (name, schema) in [
        ("flow.schema.json", schema_for!(FlowFile)),
        ("record.schema.json", schema_for!(Record)),
    ] {
        let path = dir.join(name);
        let json = serde_json::to_string_pretty(&schema).context("failed to encode schema")?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    }
    println!("Schemas written to {}", dir.display());
    Ok(())
}
