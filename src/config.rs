//! Configuration module for the word-count server.
//!
//! The four positional arguments mirror the benchmark harness invocation.
//! Tuning knobs that the harness never passes live in an optional TOML file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the word-count server
#[derive(Parser, Debug)]
#[command(name = "wordcount-server")]
#[command(author = "wordcount-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "A word-count server for latency benchmarking", long_about = None)]
#[command(override_usage = "wordcount-server <listenaddress> <listenport> <cleaning> <threadcount>")]
pub struct CliArgs {
    /// Address to bind to (e.g., 127.0.0.1)
    pub listen_address: String,

    /// Port to listen on
    pub listen_port: u16,

    /// Strip HTML tags before counting ("true" enables, anything else disables)
    #[arg(action = clap::ArgAction::Set, value_parser = parse_cleaning)]
    pub cleaning: bool,

    /// Number of worker lanes (0 or 1 processes documents on the reactor thread)
    pub worker_count: usize,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Emit per-stage percentile dumps at the end of each experiment
    #[arg(long)]
    pub percentiles: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Anything other than a case-insensitive "true" reads as false.
fn parse_cleaning(value: &str) -> Result<bool, String> {
    Ok(value.eq_ignore_ascii_case("true"))
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Character terminating each document on the wire
    #[serde(default = "default_separator")]
    pub separator: char,
    /// Size of the reactor's scratch read buffer
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Maximum number of simultaneously open connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Number of readiness events fetched per poll
    #[serde(default = "default_event_batch")]
    pub event_batch: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            read_buffer_size: default_read_buffer_size(),
            max_connections: default_max_connections(),
            event_batch: default_event_batch(),
        }
    }
}

/// Experiment report configuration
#[derive(Debug, Deserialize, Default)]
pub struct ReportConfig {
    /// Emit percentile dumps alongside the summary line
    #[serde(default)]
    pub percentiles: bool,
}

/// Logging configuration
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

fn default_separator() -> char {
    '$'
}

fn default_read_buffer_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_max_connections() -> usize {
    10_000
}

fn default_event_batch() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cleaning: bool,
    pub workers: usize,
    pub separator: u8,
    pub read_buffer_size: usize,
    pub max_connections: usize,
    pub event_batch: usize,
    pub percentiles: bool,
    pub log_level: String,
}

impl Config {
    /// Configuration with default tuning for the given positional values.
    pub fn new(host: impl Into<String>, port: u16, cleaning: bool, workers: usize) -> Self {
        Self {
            host: host.into(),
            port,
            cleaning,
            workers,
            separator: default_separator() as u8,
            read_buffer_size: default_read_buffer_size(),
            max_connections: default_max_connections(),
            event_batch: default_event_batch(),
            percentiles: false,
            log_level: default_log_level(),
        }
    }

    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::try_parse().map_err(ConfigError::Usage)?;
        Self::from_args(cli)
    }

    /// Merge parsed CLI arguments with the TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let separator = toml_config.server.separator;
        if !separator.is_ascii() {
            return Err(ConfigError::Separator(separator));
        }

        Ok(Config {
            host: cli.listen_address,
            port: cli.listen_port,
            cleaning: cli.cleaning,
            workers: cli.worker_count,
            separator: separator as u8,
            read_buffer_size: toml_config.server.read_buffer_size.max(1),
            max_connections: toml_config.server.max_connections,
            event_batch: toml_config.server.event_batch.max(1),
            percentiles: cli.percentiles || toml_config.report.percentiles,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Whether documents are handed to worker lanes instead of being
    /// processed on the reactor thread.
    pub fn uses_lanes(&self) -> bool {
        self.workers > 1
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Usage(clap::Error),
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Separator(char),
}

impl ConfigError {
    /// Argument errors end the process cleanly after printing usage.
    pub fn is_usage(&self) -> bool {
        matches!(self, ConfigError::Usage(_))
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Usage(e) => write!(f, "{e}"),
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Separator(c) => {
                write!(f, "Separator must be a single ASCII character, got {c:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
