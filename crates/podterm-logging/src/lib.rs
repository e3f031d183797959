// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized logging utilities for podterm
//!
//! Every podterm binary initializes `tracing` through this crate so that log
//! filtering, formatting and file placement behave the same way everywhere.
//! `RUST_LOG` always takes precedence over the configured default level.

pub mod logging_config;

pub use logging_config::LoggingConfig;

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Re-export Level for convenience
pub use tracing::Level;

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format, one object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plaintext" => Ok(LogFormat::Plaintext),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "Invalid log format: {}. Use 'plaintext' or 'json'",
                s
            )),
        }
    }
}

/// CLI log level enum for clap integration
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    /// Only error conditions
    Error,
    /// Errors and warnings
    Warn,
    /// Errors, warnings, and informational messages
    #[default]
    Info,
    /// All above plus debug information
    Debug,
    /// All above plus detailed tracing
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliLogLevel::Error => write!(f, "error"),
            CliLogLevel::Warn => write!(f, "warn"),
            CliLogLevel::Info => write!(f, "info"),
            CliLogLevel::Debug => write!(f, "debug"),
            CliLogLevel::Trace => write!(f, "trace"),
        }
    }
}

/// Standardized CLI logging arguments
///
/// Flatten this into a clap parser with `#[command(flatten)]`. Logs go to
/// stdout unless `--log-file` or `--log-dir` is given.
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    /// Log verbosity level
    #[arg(long, value_enum, help = "Log verbosity level (default: info)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format
    #[arg(long, value_enum, help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Directory for log files
    #[arg(long, help = "Directory for log files")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Log filename
    #[arg(long, help = "Log filename")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl CliLoggingArgs {
    /// Fill unset flags from a config file section. Flags given on the command
    /// line win.
    pub fn merge_config(mut self, config: &LoggingConfig) -> Self {
        if self.log_level.is_none() {
            self.log_level = config.level;
        }
        if self.log_format.is_none() {
            self.log_format = config.format;
        }
        if self.log_dir.is_none() {
            self.log_dir = config.dir.clone();
        }
        self
    }

    /// Initialize logging based on the parsed CLI arguments
    ///
    /// # Example
    /// ```rust,no_run
    /// use podterm_logging::CliLoggingArgs;
    /// use clap::Parser;
    ///
    /// #[derive(Parser)]
    /// struct Args {
    ///     #[command(flatten)]
    ///     logging: CliLoggingArgs,
    /// }
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let args = Args::parse();
    ///     args.logging.init("my-server")?;
    ///     Ok(())
    /// }
    /// ```
    pub fn init(self, component: &str) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or_default().into();
        let format = self.log_format.unwrap_or_default();

        match self.resolve_log_path(component) {
            Some(log_path) => init_to_file(component, level, format, &log_path),
            None => init(component, level, format),
        }
    }

    /// Resolve the log file path, or `None` when logging to the console.
    ///
    /// An absolute `log_file` is used as is; a relative one is placed under
    /// `log_dir` when that is set. A bare `log_dir` gets `<component>.log`.
    fn resolve_log_path(&self, component: &str) -> Option<PathBuf> {
        match (&self.log_file, &self.log_dir) {
            (Some(file), _) if Path::new(file).is_absolute() => Some(PathBuf::from(file)),
            (Some(file), Some(dir)) => Some(Path::new(dir).join(file)),
            (Some(file), None) => Some(PathBuf::from(file)),
            (None, Some(dir)) => Some(Path::new(dir).join(format!("{}.log", component))),
            (None, None) => None,
        }
    }
}

/// Initialize console logging with the specified component name, default
/// level, and format
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stdout)
}

/// Initialize logging to a file, creating parent directories as needed
pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    use std::fs;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;

    init_with_writer(component, default_level, format, std::sync::Mutex::new(log_file))
}

/// Initialize logging with a custom writer
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(component, default_level)));

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Filter directive used when `RUST_LOG` is not set. Crate targets use
/// underscores, so the component name is normalized.
fn default_directive(component: &str, level: Level) -> String {
    format!("{},{}={}", level, component.replace('-', "_"), level)
}

/// Redact sensitive information from log output
///
/// # Example
/// ```rust
/// use podterm_logging::redact;
///
/// let ticket = "AISBJFCOIZXUF==";
/// tracing::info!(ticket = %redact(ticket), "verifying ticket");
/// ```
pub fn redact(_value: impl std::fmt::Display) -> &'static str {
    "[REDACTED]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        let redacted = redact("sensitive-ticket");
        assert_eq!(format!("{}", redacted), "[REDACTED]");
    }

    #[test]
    fn test_cli_log_level_conversion() {
        assert_eq!(Level::from(CliLogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(CliLogLevel::Warn), Level::WARN);
        assert_eq!(Level::from(CliLogLevel::Info), Level::INFO);
        assert_eq!(Level::from(CliLogLevel::Debug), Level::DEBUG);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
    }

    #[test]
    fn test_cli_log_level_display_and_default() {
        assert_eq!(format!("{}", CliLogLevel::Warn), "warn");
        assert_eq!(CliLogLevel::default(), CliLogLevel::Info);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("plaintext".parse::<LogFormat>().unwrap(), LogFormat::Plaintext);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_directive_normalizes_component() {
        assert_eq!(
            default_directive("podterm-server", Level::DEBUG),
            "DEBUG,podterm_server=DEBUG"
        );
    }

    #[test]
    fn test_console_logging_without_file_options() {
        let args = CliLoggingArgs::default();
        assert_eq!(args.resolve_log_path("podterm-server"), None);
    }

    #[test]
    fn test_log_dir_gets_component_file() {
        let args = CliLoggingArgs {
            log_dir: Some("/var/log/podterm".to_string()),
            ..Default::default()
        };
        assert_eq!(
            args.resolve_log_path("podterm-server"),
            Some(PathBuf::from("/var/log/podterm/podterm-server.log"))
        );
    }

    #[test]
    fn test_relative_log_file_joins_log_dir() {
        let args = CliLoggingArgs {
            log_dir: Some("/var/log/podterm".to_string()),
            log_file: Some("sessions.log".to_string()),
            ..Default::default()
        };
        assert_eq!(
            args.resolve_log_path("podterm-server"),
            Some(PathBuf::from("/var/log/podterm/sessions.log"))
        );
    }

    #[test]
    fn test_absolute_log_file_ignores_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("abs.log");
        let args = CliLoggingArgs {
            log_dir: Some("/var/log/podterm".to_string()),
            log_file: Some(file.to_string_lossy().into_owned()),
            ..Default::default()
        };
        assert_eq!(args.resolve_log_path("podterm-server"), Some(file));
    }

    #[test]
    fn test_merge_config_keeps_cli_values() {
        let config = LoggingConfig {
            level: Some(CliLogLevel::Debug),
            format: Some(LogFormat::Json),
            dir: Some("/tmp/podterm".to_string()),
        };
        let args = CliLoggingArgs {
            log_level: Some(CliLogLevel::Warn),
            ..Default::default()
        }
        .merge_config(&config);

        assert_eq!(args.log_level, Some(CliLogLevel::Warn));
        assert_eq!(args.log_format, Some(LogFormat::Json));
        assert_eq!(args.log_dir.as_deref(), Some("/tmp/podterm"));
    }
}
