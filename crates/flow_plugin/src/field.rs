//! Dotted field paths into a [`Record`].
//!
//! Paths have one or two segments (`rss`, `rss.title`) and are matched
//! case-insensitively; underscores are ignored, so `telegram.messagetext` and
//! `telegram.message_text` name the same field. The lookup table is built once
//! and every handle is a cheap clone of a table entry.
use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::record::{GENERIC_SLOTS, Record};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("bad field key: {0}")]
    BadKey(String),

    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("field types differ: `{input}` is {input_type}, `{output}` is {output_type}")]
    TypeMismatch {
        input: String,
        input_type: FieldType,
        output: String,
        output_type: FieldType,
    },

    #[error("field `{0}` is not a sequence")]
    NotSequence(String),

    #[error("field `{0}` cannot be written")]
    ReadOnly(String),

    #[error("cannot store {value} in `{path}`")]
    Value { path: String, value: String },
}

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Strings,
    Time,
    Uuid,
    /// A whole section.
    Other,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Strings => "sequence of strings",
            FieldType::Time => "time",
            FieldType::Uuid => "uuid",
            FieldType::Other => "section",
        };
        f.write_str(name)
    }
}

/// An owned snapshot of a field's value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Strings(Vec<String>),
    Time(DateTime<Utc>),
    Uuid(Uuid),
    Other(Value),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Strings(v) => Value::from(v.clone()),
            FieldValue::Time(t) => Value::String(t.to_rfc3339()),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::Other(v) => v.clone(),
        }
    }
}

enum Access {
    Text(fn(&Record) -> &String, fn(&mut Record) -> &mut String),
    List(fn(&Record) -> &Vec<String>, fn(&mut Record) -> &mut Vec<String>),
    Time(fn(&Record) -> &DateTime<Utc>, fn(&mut Record) -> &mut DateTime<Utc>),
    Uuid(fn(&Record) -> &Uuid),
    Section(fn(&Record) -> Value),
}

struct FieldDef {
    path: String,
    access: Access,
}

/// A resolved, typed handle on one field of any record.
#[derive(Clone)]
pub struct Field {
    def: Arc<FieldDef>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("path", &self.def.path)
            .field("type", &self.kind())
            .finish()
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.def.path == other.def.path
    }
}

fn normalize(path: &str) -> String {
    path.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn section<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

type Defs = Vec<(String, Access)>;

fn text(defs: &mut Defs, path: &str, get: fn(&Record) -> &String, get_mut: fn(&mut Record) -> &mut String) {
    defs.push((path.to_string(), Access::Text(get, get_mut)));
}

fn list(defs: &mut Defs, path: &str, get: fn(&Record) -> &Vec<String>, get_mut: fn(&mut Record) -> &mut Vec<String>) {
    defs.push((path.to_string(), Access::List(get, get_mut)));
}

static FIELDS: Lazy<HashMap<String, Arc<FieldDef>>> = Lazy::new(build_table);

fn build_table() -> HashMap<String, Arc<FieldDef>> {
    let mut defs = Defs::new();

    text(&mut defs, "meta.flow", |r| &r.meta.flow, |r| &mut r.meta.flow);
    text(&mut defs, "meta.plugin", |r| &r.meta.plugin, |r| &mut r.meta.plugin);
    text(&mut defs, "meta.source", |r| &r.meta.source, |r| &mut r.meta.source);
    text(&mut defs, "meta.timeformat", |r| &r.meta.time_format, |r| &mut r.meta.time_format);
    text(&mut defs, "meta.timezone", |r| &r.meta.timezone, |r| &mut r.meta.timezone);

    text(&mut defs, "io.file", |r| &r.io.file, |r| &mut r.io.file);
    text(&mut defs, "io.text", |r| &r.io.text, |r| &mut r.io.text);

    text(&mut defs, "rss.title", |r| &r.rss.title, |r| &mut r.rss.title);
    text(&mut defs, "rss.description", |r| &r.rss.description, |r| &mut r.rss.description);
    text(&mut defs, "rss.content", |r| &r.rss.content, |r| &mut r.rss.content);
    text(&mut defs, "rss.link", |r| &r.rss.link, |r| &mut r.rss.link);
    text(&mut defs, "rss.guid", |r| &r.rss.guid, |r| &mut r.rss.guid);
    text(&mut defs, "rss.author", |r| &r.rss.author, |r| &mut r.rss.author);

    text(&mut defs, "telegram.chatid", |r| &r.telegram.chat_id, |r| &mut r.telegram.chat_id);
    text(&mut defs, "telegram.userid", |r| &r.telegram.user_id, |r| &mut r.telegram.user_id);
    text(&mut defs, "telegram.username", |r| &r.telegram.username, |r| &mut r.telegram.username);
    text(&mut defs, "telegram.firstname", |r| &r.telegram.first_name, |r| &mut r.telegram.first_name);
    text(&mut defs, "telegram.lastname", |r| &r.telegram.last_name, |r| &mut r.telegram.last_name);
    text(&mut defs, "telegram.messageid", |r| &r.telegram.message_id, |r| &mut r.telegram.message_id);
    text(&mut defs, "telegram.messagetext", |r| &r.telegram.message_text, |r| &mut r.telegram.message_text);
    text(&mut defs, "telegram.messageurl", |r| &r.telegram.message_url, |r| &mut r.telegram.message_url);

    text(&mut defs, "twitter.id", |r| &r.twitter.id, |r| &mut r.twitter.id);
    text(&mut defs, "twitter.lang", |r| &r.twitter.lang, |r| &mut r.twitter.lang);
    text(&mut defs, "twitter.screenname", |r| &r.twitter.screen_name, |r| &mut r.twitter.screen_name);
    text(&mut defs, "twitter.username", |r| &r.twitter.user_name, |r| &mut r.twitter.user_name);
    text(&mut defs, "twitter.text", |r| &r.twitter.text, |r| &mut r.twitter.text);

    // shortcut for the first generic text slot
    text(&mut defs, "text", |r| &r.generic.texts[0], |r| &mut r.generic.texts[0]);

    list(&mut defs, "meta.warnings", |r| &r.meta.warnings, |r| &mut r.meta.warnings);
    list(&mut defs, "io.lines", |r| &r.io.lines, |r| &mut r.io.lines);
    list(&mut defs, "rss.links", |r| &r.rss.links, |r| &mut r.rss.links);
    list(&mut defs, "rss.categories", |r| &r.rss.categories, |r| &mut r.rss.categories);
    list(&mut defs, "telegram.media", |r| &r.telegram.media, |r| &mut r.telegram.media);
    list(&mut defs, "twitter.urls", |r| &r.twitter.urls, |r| &mut r.twitter.urls);
    list(&mut defs, "twitter.media", |r| &r.twitter.media, |r| &mut r.twitter.media);

    defs.push(("meta.time".into(), Access::Time(|r| &r.meta.time, |r| &mut r.meta.time)));
    defs.push(("meta.uuid".into(), Access::Uuid(|r| &r.meta.uuid)));

    defs.push(("meta".into(), Access::Section(|r| section(&r.meta))));
    defs.push(("generic".into(), Access::Section(|r| section(&r.generic))));
    defs.push(("io".into(), Access::Section(|r| section(&r.io))));
    defs.push(("rss".into(), Access::Section(|r| section(&r.rss))));
    defs.push(("telegram".into(), Access::Section(|r| section(&r.telegram))));
    defs.push(("twitter".into(), Access::Section(|r| section(&r.twitter))));

    let mut table: HashMap<String, Arc<FieldDef>> = defs
        .into_iter()
        .map(|(path, access)| (normalize(&path), Arc::new(FieldDef { path, access })))
        .collect();

    // generic.array0..9 and generic.text0..9
    macro_rules! generic_slots {
        ($($i:literal),*) => {$(
            table.insert(
                format!("generic.array{}", $i),
                Arc::new(FieldDef {
                    path: format!("generic.array{}", $i),
                    access: Access::List(|r| &r.generic.arrays[$i], |r| &mut r.generic.arrays[$i]),
                }),
            );
            table.insert(
                format!("generic.text{}", $i),
                Arc::new(FieldDef {
                    path: format!("generic.text{}", $i),
                    access: Access::Text(|r| &r.generic.texts[$i], |r| &mut r.generic.texts[$i]),
                }),
            );
        )*};
    }
    generic_slots!(0, 1, 2, 3, 4, 5, 6, 7, 8, 9);
    debug_assert_eq!(GENERIC_SLOTS, 10);

    // bare meta names resolve to the meta field
    let promoted: Vec<(String, Arc<FieldDef>)> = table
        .iter()
        .filter_map(|(key, def)| key.strip_prefix("meta.").map(|bare| (bare.to_string(), def.clone())))
        .collect();
    for (bare, def) in promoted {
        table.entry(bare).or_insert(def);
    }

    table
}

impl Field {
    /// Resolves a dotted path.
    pub fn resolve(path: &str) -> Result<Field, FieldError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(FieldError::BadKey("empty path".into()));
        }
        let segments: Vec<&str> = trimmed.split('.').collect();
        if segments.len() > 2 || segments.iter().any(|s| s.is_empty()) {
            return Err(FieldError::UnknownField(trimmed.to_string()));
        }
        FIELDS
            .get(&normalize(trimmed))
            .map(|def| Field { def: def.clone() })
            .ok_or_else(|| FieldError::UnknownField(trimmed.to_string()))
    }

    /// Resolves a path taken from a parameter value; non-strings are bad keys.
    pub fn resolve_value(value: &Value) -> Result<Field, FieldError> {
        match value {
            Value::String(path) => Self::resolve(path),
            other => Err(FieldError::BadKey(other.to_string())),
        }
    }

    pub fn resolve_all<S: AsRef<str>>(paths: &[S]) -> Result<Vec<Field>, FieldError> {
        paths.iter().map(|p| Self::resolve(p.as_ref())).collect()
    }

    pub fn path(&self) -> &str {
        &self.def.path
    }

    pub fn kind(&self) -> FieldType {
        match self.def.access {
            Access::Text(..) => FieldType::String,
            Access::List(..) => FieldType::Strings,
            Access::Time(..) => FieldType::Time,
            Access::Uuid(..) => FieldType::Uuid,
            Access::Section(..) => FieldType::Other,
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.kind() == FieldType::Strings
    }

    pub fn read(&self, record: &Record) -> FieldValue {
        match &self.def.access {
            Access::Text(get, _) => FieldValue::String(get(record).clone()),
            Access::List(get, _) => FieldValue::Strings(get(record).clone()),
            Access::Time(get, _) => FieldValue::Time(*get(record)),
            Access::Uuid(get) => FieldValue::Uuid(*get(record)),
            Access::Section(get) => FieldValue::Other(get(record)),
        }
    }

    /// Scalar rendering of any field: sequences are joined with `,`.
    pub fn get_string(&self, record: &Record) -> String {
        match &self.def.access {
            Access::Text(get, _) => get(record).clone(),
            Access::List(get, _) => get(record).join(","),
            Access::Time(get, _) => get(record).to_rfc3339(),
            Access::Uuid(get) => get(record).to_string(),
            Access::Section(get) => get(record).to_string(),
        }
    }

    /// Sequence read; a scalar reads as a one-element sequence.
    pub fn get_strings(&self, record: &Record) -> Vec<String> {
        match &self.def.access {
            Access::List(get, _) => get(record).clone(),
            _ => vec![self.get_string(record)],
        }
    }

    /// Scalar write. Time fields accept RFC 3339 text.
    pub fn set_string(&self, record: &mut Record, value: String) -> Result<(), FieldError> {
        match &self.def.access {
            Access::Text(_, get_mut) => {
                *get_mut(record) = value;
                Ok(())
            }
            Access::List(_, get_mut) => {
                *get_mut(record) = vec![value];
                Ok(())
            }
            Access::Time(_, get_mut) => {
                let parsed = DateTime::parse_from_rfc3339(&value).map_err(|_| FieldError::Value {
                    path: self.def.path.clone(),
                    value,
                })?;
                *get_mut(record) = parsed.with_timezone(&Utc);
                Ok(())
            }
            Access::Uuid(_) | Access::Section(_) => Err(FieldError::ReadOnly(self.def.path.clone())),
        }
    }

    /// Sequence append.
    pub fn append_strings(&self, record: &mut Record, values: Vec<String>) -> Result<(), FieldError> {
        match &self.def.access {
            Access::List(_, get_mut) => {
                get_mut(record).extend(values);
                Ok(())
            }
            _ => Err(FieldError::NotSequence(self.def.path.clone())),
        }
    }

    /// Stores a value read from a field of the same type.
    pub fn write(&self, record: &mut Record, value: FieldValue) -> Result<(), FieldError> {
        match (&self.def.access, value) {
            (Access::Text(_, get_mut), FieldValue::String(v)) => *get_mut(record) = v,
            (Access::List(_, get_mut), FieldValue::Strings(v)) => *get_mut(record) = v,
            (Access::Time(_, get_mut), FieldValue::Time(v)) => *get_mut(record) = v,
            (Access::Uuid(_) | Access::Section(_), _) => {
                return Err(FieldError::ReadOnly(self.def.path.clone()));
            }
            (_, other) => {
                return Err(FieldError::Value {
                    path: self.def.path.clone(),
                    value: format!("{other:?}"),
                });
            }
        }
        Ok(())
    }
}

/// Every positional input/output pair must have the same semantic type.
pub fn check_same_types(inputs: &[Field], outputs: &[Field]) -> Result<(), FieldError> {
    for (input, output) in inputs.iter().zip(outputs) {
        if input.kind() != output.kind() {
            return Err(FieldError::TypeMismatch {
                input: input.path().to_string(),
                input_type: input.kind(),
                output: output.path().to_string(),
                output_type: output.kind(),
            });
        }
    }
    Ok(())
}

/// Every field must be a sequence.
pub fn check_sequences(fields: &[Field]) -> Result<(), FieldError> {
    match fields.iter().find(|f| !f.is_sequence()) {
        Some(f) => Err(FieldError::NotSequence(f.path().to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_levels_and_types() {
        assert_eq!(Field::resolve("rss.title").unwrap().kind(), FieldType::String);
        assert_eq!(Field::resolve("RSS.Title").unwrap().path(), "rss.title");
        assert_eq!(Field::resolve("rss").unwrap().kind(), FieldType::Other);
        assert_eq!(Field::resolve("telegram.messagetext").unwrap().kind(), FieldType::String);
        assert_eq!(Field::resolve("telegram.message_text").unwrap().path(), "telegram.messagetext");
        assert_eq!(Field::resolve("generic.ARRAY7").unwrap().kind(), FieldType::Strings);
        assert_eq!(Field::resolve("generic.text9").unwrap().kind(), FieldType::String);
        assert_eq!(Field::resolve("meta.time").unwrap().kind(), FieldType::Time);
        assert_eq!(Field::resolve("time").unwrap().kind(), FieldType::Time);
        assert_eq!(Field::resolve("uuid").unwrap().kind(), FieldType::Uuid);
        assert_eq!(Field::resolve("text").unwrap().path(), "text");
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(matches!(Field::resolve("rss.title.extra"), Err(FieldError::UnknownField(_))));
        assert!(matches!(Field::resolve(""), Err(FieldError::BadKey(_))));
        assert!(matches!(Field::resolve("rss.nothing"), Err(FieldError::UnknownField(_))));
        assert!(matches!(Field::resolve("nowhere"), Err(FieldError::UnknownField(_))));
        assert!(matches!(Field::resolve("rss."), Err(FieldError::UnknownField(_))));
        assert!(matches!(Field::resolve_value(&json!(12)), Err(FieldError::BadKey(_))));
    }

    #[test]
    fn reads_and_writes() {
        let mut r = Record::default();
        let title = Field::resolve("rss.title").unwrap();
        title.set_string(&mut r, "hello".into()).unwrap();
        assert_eq!(r.rss.title, "hello");
        assert_eq!(title.get_string(&r), "hello");

        let links = Field::resolve("rss.links").unwrap();
        links.append_strings(&mut r, vec!["a".into()]).unwrap();
        links.append_strings(&mut r, vec!["b".into()]).unwrap();
        assert_eq!(links.get_strings(&r), vec!["a", "b"]);
        assert_eq!(links.get_string(&r), "a,b");
        assert!(matches!(title.append_strings(&mut r, vec![]), Err(FieldError::NotSequence(_))));

        let slot = Field::resolve("generic.array3").unwrap();
        slot.write(&mut r, FieldValue::Strings(vec!["x".into()])).unwrap();
        assert_eq!(r.generic.arrays[3], vec!["x"]);

        let uuid = Field::resolve("meta.uuid").unwrap();
        assert!(matches!(uuid.set_string(&mut r, "x".into()), Err(FieldError::ReadOnly(_))));
        assert_eq!(Field::resolve("rss").unwrap().read(&r), FieldValue::Other(serde_json::to_value(&r.rss).unwrap()));
    }

    #[test]
    fn type_helpers() {
        let ins = Field::resolve_all(&["rss.title", "rss.links"]).unwrap();
        let outs = Field::resolve_all(&["generic.text1", "generic.array1"]).unwrap();
        assert!(check_same_types(&ins, &outs).is_ok());

        let swapped = Field::resolve_all(&["generic.array1", "generic.text1"]).unwrap();
        assert!(matches!(check_same_types(&ins, &swapped), Err(FieldError::TypeMismatch { .. })));

        assert!(check_sequences(&Field::resolve_all(&["rss.links", "io.lines"]).unwrap()).is_ok());
        assert!(matches!(check_sequences(&ins), Err(FieldError::NotSequence(p)) if p == "rss.title"));
    }
}
