pub mod app;
pub mod config;
pub mod flow;
pub mod logger;
pub mod metrics;
pub mod pipeline;
pub mod plugins;
pub mod registry;
pub mod scheduler;
