//! Logging bootstrap.
//!
//! Thin configuration layer over `tracing`: pick a level, a format and a
//! destination, then install the global subscriber once at startup. The
//! library itself only emits events; embedding programs decide whether
//! anything listens.

use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for development.
    Pretty,
    /// Terse single lines.
    Compact,
    /// Structured JSON, for log pipelines.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    /// Daily-rotated file.
    File { directory: String, prefix: String },
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Extra filter directives, e.g. `"opix=trace"`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::from_default_env().add_directive(config.level.into());
    match &config.filter {
        Some(directives) => directives.split(',').fold(base, |filter, directive| {
            match directive.parse() {
                Ok(parsed) => filter.add_directive(parsed),
                Err(_) => {
                    tracing::warn!(directive, "ignoring invalid filter directive");
                    filter
                }
            }
        }),
        None => base,
    }
}

/// Install the global subscriber.
///
/// The returned guard must stay alive for the program's duration so
/// buffered log lines are flushed; drop it on the way out.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config);

    let (writer, guard) = match &config.output {
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(rolling::daily(directory, prefix))
        }
    };

    let registry = tracing_subscriber::registry();
    match config.format {
        LogFormat::Pretty => {
            registry
                .with(fmt::layer().with_writer(writer).pretty().with_filter(filter))
                .init();
        }
        LogFormat::Compact => {
            registry
                .with(fmt::layer().with_writer(writer).compact().with_filter(filter))
                .init();
        }
        LogFormat::Json => {
            registry
                .with(fmt::layer().with_writer(writer).json().with_filter(filter))
                .init();
        }
    }
    Some(guard)
}

/// Development defaults: debug level, pretty output on stderr.
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(
        LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Pretty)
            .with_filter("opix=debug"),
    )
}

/// Production defaults: JSON into a rotated file.
pub fn init_prod_logging(log_dir: impl AsRef<Path>) -> Option<WorkerGuard> {
    init_logging(
        LogConfig::new()
            .with_format(LogFormat::Json)
            .with_output(LogOutput::File {
                directory: log_dir.as_ref().to_string_lossy().to_string(),
                prefix: "opix".to_string(),
            })
            .with_filter("opix=info"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::TRACE)
            .with_format(LogFormat::Json)
            .with_filter("opix=trace");
        assert_eq!(config.level, Level::TRACE);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter, Some("opix=trace".to_string()));
    }
}
