//! Logging configuration

use serde::{Deserialize, Serialize};
use validator::Validate;

use certkeeper_common::LogFormat;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingSettings {
    /// Default filter directive, e.g. `info` or `certkeeper=debug,info`
    #[serde(default = "default_level")]
    #[validate(length(min = 1))]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
