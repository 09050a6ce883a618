//! Everything a feedflow plugin needs: the data record, field paths,
//! parameter handling, the plugin traits and the shared input machinery.
pub mod config;
pub mod detect;
pub mod expire;
pub mod field;
pub mod flow;
pub mod params;
pub mod plugin;
pub mod record;
pub mod state;

pub use config::{AppConfig, ConfigError};
pub use detect::Detector;
pub use field::{Field, FieldError, FieldType, FieldValue};
pub use flow::{FlowInfo, FlowMetrics, MetricsSnapshot};
pub use params::{ParamSpec, Params};
pub use plugin::{Input, Output, PluginConfig, PluginError, Process, Received, StageInfo};
pub use record::Record;
pub use state::{SourceState, StateError};
