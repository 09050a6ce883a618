use async_trait::async_trait;
use flow_plugin::{
    AppConfig, Field, FieldError, FieldType, ParamSpec, Params, PluginConfig, PluginError, Process, Record, StageInfo,
};
use handlebars::Handlebars;

const TEMPLATE_NAME: &str = "record";

/// Renders a Handlebars template against the record into a string field.
///
/// The whole record is the template context, so sections and fields are
/// addressed as in the record itself:
///
/// ```handlebars
/// {{rss.title}} ({{meta.time_format}})
/// {{#each rss.links}}
/// - {{this}}
/// {{/each}}
/// ```
///
/// Output is not HTML-escaped.
pub struct TemplateProcess {
    stage: StageInfo,
    output: Field,
    handlebars: Handlebars<'static>,
}

pub fn schema(_app: &AppConfig) -> Vec<ParamSpec> {
    vec![ParamSpec::required("format"), ParamSpec::required("output")]
}

pub fn build(cfg: &PluginConfig, params: &Params) -> Result<Box<dyn Process>, PluginError> {
    let mut outputs = params.fields("output")?;
    if outputs.len() != 1 {
        return Err(PluginError::Config("parameter `output`: expected a single field".into()));
    }
    let output = outputs.remove(0);
    if output.kind() != FieldType::String {
        return Err(FieldError::TypeMismatch {
            input: "format".into(),
            input_type: FieldType::String,
            output: output.path().to_string(),
            output_type: output.kind(),
        }
        .into());
    }

    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string(TEMPLATE_NAME, params.string("format")?)
        .map_err(|e| PluginError::Config(format!("invalid template: {e}")))?;

    Ok(Box::new(TemplateProcess {
        stage: StageInfo::from_params(cfg, params)?,
        output,
        handlebars,
    }))
}

#[async_trait]
impl Process for TemplateProcess {
    fn stage(&self) -> &StageInfo {
        &self.stage
    }

    fn name(&self) -> &str {
        "template"
    }

    #[tracing::instrument(name = "template_process", skip_all, fields(alias = %self.stage.alias))]
    async fn process(&self, mut records: Vec<Record>) -> Result<Vec<Record>, PluginError> {
        for record in &mut records {
            let rendered = self
                .handlebars
                .render(TEMPLATE_NAME, &*record)
                .map_err(PluginError::exec)?;
            self.output.set_string(record, rendered)?;
        }
        Ok(records)
    }
}
