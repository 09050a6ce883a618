use async_trait::async_trait;
use flow_plugin::{
    AppConfig, Field, FieldError, FieldType, ParamSpec, Params, PluginConfig, PluginError, Process, Record, StageInfo,
    field::check_sequences, params::ensure_same_len,
};

/// Joins each sequence field into the paired string field.
#[derive(Debug)]
pub struct JoinProcess {
    stage: StageInfo,
    inputs: Vec<Field>,
    outputs: Vec<Field>,
    separator: String,
}

pub fn schema(_app: &AppConfig) -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("input"),
        ParamSpec::required("output"),
        ParamSpec::optional("separator").default("\n"),
    ]
}

pub fn build(cfg: &PluginConfig, params: &Params) -> Result<Box<dyn Process>, PluginError> {
    let inputs = params.fields("input")?;
    let outputs = params.fields("output")?;
    ensure_same_len(("input", &inputs), ("output", &outputs))?;
    check_sequences(&inputs)?;
    for (input, output) in inputs.iter().zip(&outputs) {
        if output.kind() != FieldType::String {
            return Err(FieldError::TypeMismatch {
                input: input.path().to_string(),
                input_type: FieldType::String,
                output: output.path().to_string(),
                output_type: output.kind(),
            }
            .into());
        }
    }
    Ok(Box::new(JoinProcess {
        stage: StageInfo::from_params(cfg, params)?,
        inputs,
        outputs,
        separator: params.string("separator")?,
    }))
}

#[async_trait]
impl Process for JoinProcess {
    fn stage(&self) -> &StageInfo {
        &self.stage
    }

    fn name(&self) -> &str {
        "join"
    }

    async fn process(&self, mut records: Vec<Record>) -> Result<Vec<Record>, PluginError> {
        for record in &mut records {
            for (input, output) in self.inputs.iter().zip(&self.outputs) {
                let joined = input.get_strings(record).join(&self.separator);
                output.set_string(record, joined)?;
            }
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
    async fn joins_lines() {
        let p = process_config(schema, build, json!({
            "input": ["io.lines", "rss.categories"],
            "output": ["generic.text0", "generic.text1"],
            "separator": ", ",
        }))
        .unwrap();
        let mut r = Record::default();
        r.io.lines = vec!["a".into(), "b".into()];
        let out = p.process(vec![r]).await.unwrap();
        assert_eq!(out[0].generic.texts[0], "a, b");
        assert_eq!(out[0].generic.texts[1], "");
    }

    #[test]
    fn input_must_be_sequence() {
        let err = process_config(schema, build, json!({"input": ["rss.title"], "output": ["generic.text0"]}));
        assert!(matches!(err, Err(PluginError::Field(FieldError::NotSequence(_)))));

        let err = process_config(schema, build, json!({"input": ["io.lines"], "output": ["generic.array0"]}));
        assert!(matches!(err, Err(PluginError::Field(FieldError::TypeMismatch { .. }))));
    }
}
