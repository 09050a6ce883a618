use async_trait::async_trait;
use flow_plugin::{
    AppConfig, Field, FieldError, FieldType, ParamSpec, Params, PluginConfig, PluginError, Process, Record, StageInfo,
    field::check_same_types, params::ensure_same_len,
};

/// Copies `input[i]` into `output[i]`. Scalars are overwritten, sequences
/// are appended to.
#[derive(Debug)]
pub struct CopyProcess {
    stage: StageInfo,
    inputs: Vec<Field>,
    outputs: Vec<Field>,
}

pub fn schema(_app: &AppConfig) -> Vec<ParamSpec> {
    vec![ParamSpec::required("input"), ParamSpec::required("output")]
}

pub(crate) fn ensure_writable(fields: &[Field]) -> Result<(), FieldError> {
    match fields.iter().find(|f| matches!(f.kind(), FieldType::Uuid | FieldType::Other)) {
        Some(f) => Err(FieldError::ReadOnly(f.path().to_string())),
        None => Ok(()),
    }
}

pub fn build(cfg: &PluginConfig, params: &Params) -> Result<Box<dyn Process>, PluginError> {
    let inputs = params.fields("input")?;
    let outputs = params.fields("output")?;
    ensure_same_len(("input", &inputs), ("output", &outputs))?;
    check_same_types(&inputs, &outputs)?;
    ensure_writable(&outputs)?;
    Ok(Box::new(CopyProcess {
        stage: StageInfo::from_params(cfg, params)?,
        inputs,
        outputs,
    }))
}

impl CopyProcess {
    fn copy(&self, record: &mut Record) -> Result<(), FieldError> {
        for (input, output) in self.inputs.iter().zip(&self.outputs) {
            if output.is_sequence() {
                let values = input.get_strings(record);
                output.append_strings(record, values)?;
            } else {
                let value = input.read(record);
                output.write(record, value)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Process for CopyProcess {
    fn stage(&self) -> &StageInfo {
        &self.stage
    }

    fn name(&self) -> &str {
        "copy"
    }

    async fn process(&self, mut records: Vec<Record>) -> Result<Vec<Record>, PluginError> {
        for record in &mut records {
            self.copy(record)?;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::tests::process_config;
    use serde_json::json;

    #[tokio::test]
    async fn copies_scalars_and_appends_sequences() {
        let p = process_config(schema, build, json!({
            "input": ["rss.title", "rss.links", "meta.time"],
            "output": ["generic.text2", "generic.array2", "meta.time"],
        }))
        .unwrap();

        let mut r = Record::default();
        r.rss.title = "hello".into();
        r.rss.links = vec!["a".into(), "b".into()];
        r.generic.arrays[2] = vec!["x".into()];
        let out = p.process(vec![r]).await.unwrap();
        assert_eq!(out[0].generic.texts[2], "hello");
        assert_eq!(out[0].generic.arrays[2], vec!["x", "a", "b"]);
    }

    #[test]
    fn init_checks() {
        let mismatch = process_config(schema, build, json!({"input": ["rss.title"], "output": ["generic.array0"]}));
        assert!(matches!(mismatch, Err(PluginError::Field(FieldError::TypeMismatch { .. }))));

        let size = process_config(schema, build, json!({"input": ["rss.title", "rss.link"], "output": ["generic.text0"]}));
        assert!(matches!(size, Err(PluginError::SizeMismatch { .. })));

        let unknown = process_config(schema, build, json!({"input": ["rss.nope"], "output": ["generic.text0"]}));
        assert!(matches!(unknown, Err(PluginError::Field(FieldError::UnknownField(_)))));

        let section = process_config(schema, build, json!({"input": ["rss"], "output": ["twitter"]}));
        assert!(matches!(section, Err(PluginError::Field(FieldError::ReadOnly(_)))));
    }
}
