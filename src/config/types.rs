use crate::monitoring::{AlertManagerConfig, AlertThreshold, CollectorConfig};
use crate::transport::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfmonConfig {
    /// Process-level settings (logging)
    pub server: ServerSection,

    /// Metrics collector settings
    pub collector: CollectorConfig,

    /// Alert manager settings
    pub alerts: AlertManagerConfig,

    /// Built-in threshold limits
    pub thresholds: ThresholdsSection,

    /// WebSocket relay settings
    pub relay: RelayConfig,
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Log level or EnvFilter directive
    pub log_level: String,

    /// Also write logs to rolling files
    pub log_file: bool,

    /// Directory for log files
    pub log_dir: Option<PathBuf>,

    /// Rotation: daily, hourly or never
    pub log_rotation: String,

    /// Delete log files older than this many days
    pub log_retention_days: Option<u32>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: false,
            log_dir: None,
            log_rotation: "daily".to_string(),
            log_retention_days: None,
        }
    }
}

/// Limits for the built-in thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsSection {
    /// Register the built-in thresholds at startup
    pub enabled: bool,

    /// Per-component average render time (ms)
    pub render_ms: f64,

    /// Average used memory (MB)
    pub memory_mb: f64,

    /// Average network duration (ms)
    pub network_ms: f64,

    /// Server error rate (percent)
    pub error_rate_percent: f64,
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            render_ms: 16.0,
            memory_mb: 100.0,
            network_ms: 1000.0,
            error_rate_percent: 5.0,
        }
    }
}

impl ThresholdsSection {
    /// Build the configured thresholds (empty when disabled)
    pub fn to_thresholds(&self) -> Vec<AlertThreshold> {
        if !self.enabled {
            return Vec::new();
        }

        vec![
            AlertThreshold::slow_render(self.render_ms),
            AlertThreshold::high_memory(self.memory_mb),
            AlertThreshold::slow_network(self.network_ms),
            AlertThreshold::high_error_rate(self.error_rate_percent),
        ]
    }
}
