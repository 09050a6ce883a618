use super::CliContext;

pub fn execute(context: &CliContext) {
    for (kind, name) in context.registry.list() {
        let params = match context.registry.schema(kind, &name, &context.app) {
            Ok(spec) => spec
                .iter()
                .map(|p| if p.required { format!("{}*", p.name) } else { p.name.to_string() })
                .collect::<Vec<_>>()
                .join(", "),
            Err(e) => format!("<{e}>"),
        };
        println!("{:<8} {name:<10} {params}", kind.to_string());
    }
}
