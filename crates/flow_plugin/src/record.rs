use std::fmt::Write;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of generic array and text slots.
pub const GENERIC_SLOTS: usize = 10;

/// The unit of data travelling through one pipeline pass.
///
/// A record is created by an input, mutated in place by process stages and
/// finally handed to the output. Every section is always present so that
/// field paths resolve without allocation checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Record {
    pub meta: Meta,
    pub generic: Generic,
    pub io: Io,
    pub rss: Rss,
    pub telegram: Telegram,
    pub twitter: Twitter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    pub flow: String,
    pub plugin: String,
    pub source: String,
    pub time: DateTime<Utc>,
    /// `time` rendered with the configured format and zone.
    pub time_format: String,
    pub timezone: String,
    pub uuid: Uuid,
    pub warnings: Vec<String>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            flow: String::new(),
            plugin: String::new(),
            source: String::new(),
            time: DateTime::<Utc>::UNIX_EPOCH,
            time_format: String::new(),
            timezone: String::new(),
            uuid: Uuid::new_v4(),
            warnings: Vec::new(),
        }
    }
}

/// Untyped slots for plugins that do not have a domain section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Generic {
    pub arrays: [Vec<String>; GENERIC_SLOTS],
    pub texts: [String; GENERIC_SLOTS],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Io {
    pub file: String,
    pub text: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rss {
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: String,
    pub links: Vec<String>,
    pub guid: String,
    pub author: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Telegram {
    pub chat_id: String,
    pub user_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub message_id: String,
    pub message_text: String,
    pub message_url: String,
    pub media: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Twitter {
    pub id: String,
    pub lang: String,
    pub screen_name: String,
    pub user_name: String,
    pub text: String,
    pub urls: Vec<String>,
    pub media: Vec<String>,
}

impl Record {
    /// A fresh record with a new UUID, stamped with its origin.
    pub fn new(flow: impl Into<String>, plugin: impl Into<String>, source: impl Into<String>, time: DateTime<Utc>) -> Self {
        let mut record = Record::default();
        record.meta.flow = flow.into();
        record.meta.plugin = plugin.into();
        record.meta.source = source.into();
        record.meta.time = time;
        record
    }

    pub fn uuid(&self) -> Uuid {
        self.meta.uuid
    }

    pub fn source(&self) -> &str {
        &self.meta.source
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.meta.time
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.meta.warnings.push(warning.into());
    }

    /// Fills `meta.time_format` and `meta.timezone` from `time`.
    pub fn localize(&mut self, tz: &Tz, format: &str) {
        let local = self.meta.time.with_timezone(tz);
        let mut rendered = String::new();
        if write!(rendered, "{}", local.format(format)).is_err() {
            rendered.clear();
            self.warn(format!("cannot render time with `{format}`"));
        }
        self.meta.time_format = rendered;
        self.meta.timezone = tz.name().to_string();
    }
}
