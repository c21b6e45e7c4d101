use super::types::PerfmonConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File};

/// Prefix for environment overrides, e.g. `PERFMON__RELAY__PORT=4000`
pub const ENV_PREFIX: &str = "PERFMON";

/// Values given on the command line; they win over every other source
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

/// Configuration loader with builder pattern
///
/// Sources in increasing priority: built-in defaults, config file, environment, CLI.
pub struct ConfigLoader {
    config_file: Option<String>,
    load_env: bool,
    cli_override: CliOverrides,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
            cli_override: CliOverrides::default(),
        }
    }

    /// Load configuration from file
    ///
    /// Without an explicit path, `perfmon.toml` and `config/perfmon.toml` are tried.
    pub fn load_from_file(mut self, path: Option<&str>) -> Self {
        self.config_file = path.map(String::from);
        self
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Apply command line overrides
    pub fn load_from_cli(mut self, overrides: CliOverrides) -> Self {
        self.cli_override = overrides;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<PerfmonConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&PerfmonConfig::default())?);

        if let Some(config_path) = &self.config_file {
            builder = builder.add_source(File::with_name(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("perfmon").required(false))
                .add_source(File::with_name("config/perfmon").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let mut config: PerfmonConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if let Some(port) = self.cli_override.port {
            config.relay.port = port;
        }
        if let Some(level) = self.cli_override.log_level {
            config.server.log_level = level;
        }

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
