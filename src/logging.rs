//! Unified logging infrastructure for ssr-pool.
//!
//! Supervisor, workers and the bundler all log through `tracing` to stderr.
//! Stdout is reserved for banners and the readiness sentinel, which the host
//! scans line by line.
//!
//! # Environment Variables
//!
//! - `SSR_LOG` - Log filter (overrides RUST_LOG)
//! - `SSR_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `SSR_LOG_FORMAT` - Output format: pretty, compact, json
//! - `SSR_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)

use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::capture::LogCapture;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-field format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Pretty)
    pub format: LogFormat,
    /// Path to a daily-rotated log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs (default: true)
    pub show_target: bool,
    /// Additional in-memory sink
    pub capture: Option<LogCapture>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            filter: None,
            show_target: true,
            capture: None,
        }
    }
}

impl LogConfig {
    /// Derive the base level from a `-v` count.
    pub fn from_verbosity(verbose: u8) -> Self {
        let level = match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self::default().with_level(level)
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Also write formatted events into `capture`.
    pub fn with_capture(mut self, capture: LogCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// An explicit filter wins over `SSR_LOG`/`RUST_LOG`, and `SSR_LOG_LEVEL`
    /// only applies when no filter is set at all.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("SSR_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level_str) = std::env::var("SSR_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("SSR_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(path) = std::env::var("SSR_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let default = || EnvFilter::new(self.level.to_string().to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                default()
            }),
            None => default(),
        }
    }

    fn stderr_layer(&self) -> BoxedLayer {
        let layer = fmt::layer()
            .with_target(self.show_target)
            .with_writer(std::io::stderr);
        match self.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.boxed(),
        }
    }

    fn file_layer(&self) -> Option<BoxedLayer> {
        let path = self.file_path.as_ref()?;
        let parent = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("ssr.log");
        let appender = RollingFileAppender::new(Rotation::DAILY, parent, file_name);

        let layer = fmt::layer()
            .with_target(self.show_target)
            .with_ansi(false)
            .with_writer(appender);
        Some(match self.format {
            LogFormat::Json => layer.json().boxed(),
            _ => layer.compact().boxed(),
        })
    }

    fn capture_layer(&self) -> Option<BoxedLayer> {
        let capture = self.capture.clone()?;
        Some(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_ansi(false)
                .with_writer(capture)
                .boxed(),
        )
    }
}

/// Parse a log level string.
fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Initialize the global tracing subscriber.
///
/// Subsequent calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let mut layers = vec![config.stderr_layer()];
    layers.extend(config.file_layer());
    layers.extend(config.capture_layer());

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_format_display_roundtrip() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Some(Level::ERROR));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("INFO"), Some(Level::INFO));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_from_verbosity() {
        assert_eq!(LogConfig::from_verbosity(0).level, Level::INFO);
        assert_eq!(LogConfig::from_verbosity(1).level, Level::DEBUG);
        assert_eq!(LogConfig::from_verbosity(5).level, Level::TRACE);
    }

    #[test]
    fn test_log_config_builder() {
        let capture = LogCapture::new();
        let config = LogConfig::default()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_file(PathBuf::from("/tmp/ssr-test.log"))
            .with_capture(capture);

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/ssr-test.log")));
        assert!(config.capture.is_some());
        assert!(config.capture_layer().is_some());
    }

    #[test]
    fn test_no_optional_layers_by_default() {
        let config = LogConfig::default();
        assert!(config.file_layer().is_none());
        assert!(config.capture_layer().is_none());
    }
}
