//! Application settings and their loading for the execq front-ends.

pub mod config;

pub use config::{AppConfig, ConfigLoader, ConfigSource, ConfigValidator};
