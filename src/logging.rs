//! Tracing initialisation.
//!
//! Components log through the `tracing` macros with structured fields
//! (`port`, `path`, `seq`, ...). [`init`] installs a `tracing-subscriber`
//! registry with one console layer on stderr and, optionally, a plain-text copy
//! of every event appended to `application.log_file`.
//!
//! `RUST_LOG` wins over the configured level when set. The ZeroMQ and HDF5 crates
//! are capped at `warn` unless `RUST_LOG` says otherwise.
//!
//! # Example
//! ```no_run
//! use callisto_daq::{config::DaemonConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DaemonConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(instrument = %config.output.instrument, "Daemon starting");
//! # Ok(())
//! # }
//! ```

use crate::config::DaemonConfig;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Dependencies whose chatter is capped unless `RUST_LOG` overrides it.
const QUIET_TARGETS: &[&str] = &["zeromq=warn", "hdf5=warn"];

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Console rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line with colours, for a terminal
    Pretty,
    /// One line per event, for journald and friends
    Compact,
    /// One JSON object per event, for log shippers
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                s
            )),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default verbosity when `RUST_LOG` is unset
    pub level: Level,
    /// Console rendering
    pub format: OutputFormat,
    /// Log span open/close events
    pub with_span_events: bool,
    /// Include source file and line
    pub with_source_location: bool,
    /// Colours on the pretty console
    pub with_ansi: bool,
    /// Plain-text copy of every event
    pub log_file: Option<PathBuf>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_source_location: false,
            with_ansi: true,
            log_file: None,
        }
    }
}

impl TracingConfig {
    /// Defaults at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Settings from the `[application]` section.
    pub fn from_daemon_config(config: &DaemonConfig) -> Result<Self, String> {
        let app = &config.application;
        Ok(Self {
            level: parse_log_level(&app.log_level)?,
            format: app.log_format.parse()?,
            log_file: app.log_file.clone(),
            ..Default::default()
        })
    }

    /// Sets the console format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Logs span open/close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enables colours on the pretty console.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// Also appends every event to `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return EnvFilter::from_default_env();
        }
        QUIET_TARGETS.iter().fold(
            EnvFilter::default().add_directive(LevelFilter::from_level(self.level).into()),
            |filter, directive| match directive.parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => filter,
            },
        )
    }

    fn console_layer(&self) -> BoxedLayer {
        let span_events = if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_file(self.with_source_location)
            .with_line_number(self.with_source_location);

        match self.format {
            OutputFormat::Pretty => base.pretty().with_ansi(self.with_ansi).boxed(),
            OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
            OutputFormat::Json => base.json().with_current_span(false).boxed(),
        }
    }
}

/// Installs the subscriber described by the daemon configuration.
pub fn init_from_config(config: &DaemonConfig) -> Result<(), String> {
    init(TracingConfig::from_daemon_config(config)?)
}

/// Installs the global subscriber.
///
/// Returns `Ok(())` without changes when a global subscriber already exists, so
/// tests and the CLI may call it more than once.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let mut layers = vec![config.console_layer()];
    if let Some(path) = &config.log_file {
        layers.push(file_layer(path)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(config.filter())
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {}", e))
}

fn file_layer(path: &Path) -> Result<BoxedLayer, String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create log directory: {}", e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;
    Ok(fmt::layer()
        .compact()
        .with_ansi(false)
        .with_writer(Arc::new(file))
        .boxed())
}

/// Level names accepted by `application.log_level`, case-insensitive.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_log_level("trace"), Ok(Level::TRACE));
        assert_eq!(parse_log_level(" INFO "), Ok(Level::INFO));
        assert_eq!(parse_log_level("Warn"), Ok(Level::WARN));
        assert!(parse_log_level("verbose").is_err());
        // numeric levels are not part of the config format
        assert!(parse_log_level("3").is_err());
    }

    #[test]
    fn output_formats_parse() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!(" Compact".parse::<OutputFormat>(), Ok(OutputFormat::Compact));
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn settings_follow_application_section() {
        let mut config = DaemonConfig::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = "json".to_string();
        config.application.log_file = Some(PathBuf::from("/var/log/callisto/daemon.log"));

        let settings = TracingConfig::from_daemon_config(&config).unwrap();
        assert_eq!(settings.level, Level::DEBUG);
        assert_eq!(settings.format, OutputFormat::Json);
        assert_eq!(
            settings.log_file.as_deref(),
            Some(Path::new("/var/log/callisto/daemon.log"))
        );

        config.application.log_format = "syslog".to_string();
        assert!(TracingConfig::from_daemon_config(&config).is_err());
    }

    #[test]
    fn builder_overrides() {
        let settings = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Compact)
            .with_span_events(true)
            .with_ansi(false)
            .with_log_file("/tmp/callisto.log");

        assert_eq!(settings.level, Level::WARN);
        assert_eq!(settings.format, OutputFormat::Compact);
        assert!(settings.with_span_events);
        assert!(!settings.with_ansi);
        assert_eq!(settings.log_file, Some(PathBuf::from("/tmp/callisto.log")));
    }

    #[test]
    fn log_file_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/daemon.log");
        assert!(file_layer(&path).is_ok());
        assert!(path.is_file());
    }
}
