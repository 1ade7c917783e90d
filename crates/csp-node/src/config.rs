//! TOML-based configuration for CSP nodes.

use std::path::Path;

use serde::Deserialize;

use csp_transport::StackConfig;

use crate::error::NodeError;

/// Top-level node configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub stack: StackConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string. The stack section is
    /// validated here so a bad file fails before anything starts.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        let config: Self =
            toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))?;
        config
            .stack
            .validate()
            .map_err(|e| NodeError::Config(e.to_string()))?;
        Ok(config)
    }
}

/// The `[node]` section.
#[derive(Debug, Deserialize)]
pub struct NodeSection {
    /// Answer ping, memfree, buffer-free, uptime and reboot requests on the
    /// reserved service ports. Default: true.
    #[serde(default = "default_services")]
    pub services: bool,
    /// Seconds between counter summaries in the log. 0 disables. Default: 60.
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
    /// How long the service thread waits on a connection before closing it.
    #[serde(default = "default_service_timeout_ms")]
    pub service_timeout_ms: u64,
}

fn default_services() -> bool {
    true
}

fn default_stats_interval() -> u64 {
    60
}

fn default_service_timeout_ms() -> u64 {
    100
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            services: default_services(),
            stats_interval: default_stats_interval(),
            service_timeout_ms: default_service_timeout_ms(),
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
