//! # Structured Logging
//!
//! Log lines come from three threads at once (main, `rx`, `tx`). The `fmt`
//! layer formats each event into one buffer and writes it under the writer
//! lock, so lines never interleave character by character.
//!
//! ```rust,ignore
//! use rfburst_core::observe::{init_logging, LogConfig, LogLevel};
//!
//! init_logging(&LogConfig { level: LogLevel::Debug, ..Default::default() });
//! tracing::info!(tick = 1_000, "TX burst queued");
//! ```

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (machine-readable)
    Json,
    /// Pretty format (human-readable, multi-line)
    Pretty,
    /// Compact format (one line per event)
    #[default]
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Log file path (None for stderr)
    pub file: Option<PathBuf>,
    /// Include source location (file:line)
    pub source_location: bool,
    /// Include thread names (`rx`, `tx`)
    pub thread_names: bool,
    /// Directive filter (e.g. "rfburst_radio=debug"); overrides `level`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            file: None,
            source_location: false,
            thread_names: true,
            filter: None,
        }
    }
}

impl LogConfig {
    fn env_filter(&self) -> EnvFilter {
        if let Some(ref custom) = self.filter {
            EnvFilter::try_new(custom).unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
        } else {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_thread_names(config.thread_names)
        .with_target(false);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Initialize the global logging subscriber.
///
/// Call once at startup; later calls are ignored. If the log file cannot be
/// opened, logging falls back to stderr.
pub fn init_logging(config: &LogConfig) {
    let output = match config.file {
        Some(ref path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => format_layer(config, Mutex::new(file), false),
            Err(e) => {
                eprintln!("cannot open log file {}: {}", path.display(), e);
                format_layer(config, std::io::stderr, true)
            }
        },
        None => format_layer(config, std::io::stderr, true),
    };

    let subscriber = tracing_subscriber::registry()
        .with(output)
        .with(config.env_filter());

    // Already-set subscriber is not an error
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.thread_names);
        assert!(!config.source_location);
    }

    #[test]
    fn test_config_yaml() {
        let config: LogConfig = serde_yaml::from_str("level: debug\nformat: json\n").unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.file.is_none());
    }
}
