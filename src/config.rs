//! Configuration for sockmill servers.
//!
//! The library consumes a plain [`ServerConfig`]; the demo binary resolves
//! one from command-line arguments layered over an optional TOML file,
//! with CLI arguments taking precedence.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default grace period before a silent new connection is dropped, seconds.
pub const DEF_CONNECT_TIMEOUT: u64 = 5;

/// Default idle period before a keep-alive probe is sent, seconds.
pub const DEF_IDLE_TIMEOUT: u64 = 60;

/// Default depth of the per-connection reader channel.
pub const DEF_QUEUE_DEPTH: usize = 10;

/// Runtime settings for one server instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Listening port. Port 0 asks the OS for a free port.
    #[serde(default)]
    pub port: u16,
    /// Seconds a fresh connection may stay silent before being dropped.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Seconds an established connection may idle before a keep-alive probe.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Capacity of the reader-to-dispatch message channel.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl ServerConfig {
    /// The `host:port` string handed to the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    DEF_CONNECT_TIMEOUT
}

fn default_idle_timeout() -> u64 {
    DEF_IDLE_TIMEOUT
}

fn default_queue_depth() -> usize {
    DEF_QUEUE_DEPTH
}

/// Command-line arguments for the demo binary.
#[derive(Parser, Debug)]
#[command(name = "sockmill")]
#[command(version = "0.1.0")]
#[command(about = "A line-echo server built on the sockmill framework", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// Listening port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds before a silent new connection is dropped
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Seconds of inactivity before a keep-alive probe is sent
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration for the demo binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge CLI args over an optional TOML file; CLI takes precedence.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mut server = toml_config.server;
        if let Some(host) = cli.host {
            server.host = host;
        }
        if let Some(port) = cli.port {
            server.port = port;
        }
        if let Some(secs) = cli.connect_timeout {
            server.connect_timeout_secs = secs;
        }
        if let Some(secs) = cli.idle_timeout {
            server.idle_timeout_secs = secs;
        }

        Ok(AppConfig {
            server,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.connect_timeout_secs, 5);
        assert_eq!(config.idle_timeout_secs, 60);
        assert_eq!(config.queue_depth, 10);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 7000
            connect_timeout_secs = 2
            idle_timeout_secs = 30

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.connect_timeout_secs, 2);
        assert_eq!(config.server.idle_timeout_secs, 30);
        assert_eq!(config.server.queue_depth, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml_defaults() {
        let cli = CliArgs {
            config: None,
            host: Some("10.0.0.1".to_string()),
            port: Some(9000),
            connect_timeout: Some(1),
            idle_timeout: None,
            log_level: "trace".to_string(),
        };

        let config = AppConfig::resolve(cli).unwrap();
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.connect_timeout_secs, 1);
        assert_eq!(config.server.idle_timeout_secs, 60);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_listen_addr() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 4000,
            ..ServerConfig::default()
        };
        assert_eq!(config.listen_addr(), "0.0.0.0:4000");
    }
}
