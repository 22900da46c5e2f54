//! Logging configuration and initialization
//!
//! Every MDP binary sets up `tracing` through [`init_logging`]. Output can go
//! to the console, to a daily-rotated file, or both, as text or JSON.
//!
//! Library code must not print: use `trace!`, `debug!`, `info!`, `warn!` and
//! `error!` with structured fields instead.
//!
//! ```rust
//! use tracing::{info, warn};
//!
//! # let symbol = "IBM"; let rows = 3; let err = "timeout";
//! info!(%symbol, rows, "Loaded insider transactions");
//! warn!(%symbol, error = %err, "Fetch failed, continuing");
//! ```
//!
//! Environment variables read by [`LogConfig::from_env`]:
//! - `LOG_LEVEL`: trace, debug, info, warn, error
//! - `LOG_FORMAT`: text, json
//! - `LOG_OUTPUT`: console, file, both
//! - `LOG_DIR`: directory for rotated log files
//! - `LOG_FILE_PREFIX`: log file name prefix
//! - `LOG_FILTER`: extra directives, e.g. `sqlx=warn,reqwest=info`

use crate::error::{MdpError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, writer::MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = MdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(MdpError::invalid_var("LOG_FORMAT", s, "text or json")),
        }
    }
}

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = MdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(MdpError::invalid_var("LOG_OUTPUT", s, "console, file or both")),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level for everything not matched by `filter`
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Directory for rotated files (only used when output includes a file)
    pub log_dir: PathBuf,
    /// File name prefix, e.g. "mdp-ingest" -> "mdp-ingest.2024-01-18"
    pub file_prefix: String,
    /// Additional comma-separated filter directives
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            output: LogOutput::Console,
            log_dir: PathBuf::from("./logs"),
            file_prefix: "mdp".to_string(),
            filter: Some("sqlx=warn".to_string()),
        }
    }
}

impl LogConfig {
    /// Load configuration from `LOG_*` environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Override fields of `self` with any `LOG_*` variables that are set
    pub fn merge_env(mut self) -> Result<Self> {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.level = level
                .parse()
                .map_err(|_| MdpError::invalid_var("LOG_LEVEL", &level, "a tracing level"))?;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.format = format.parse()?;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.output = output.parse()?;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("LOG_FILE_PREFIX") {
            self.file_prefix = prefix;
        }
        if let Ok(filter) = std::env::var("LOG_FILTER") {
            self.filter = Some(filter);
        }
        Ok(self)
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Build the `EnvFilter` for this configuration. `RUST_LOG` still applies.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());
        if let Some(directives) = &self.filter {
            for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                let parsed = directive
                    .parse()
                    .map_err(|e| MdpError::Logging(format!("bad filter directive {directive:?}: {e}")))?;
                filter = filter.add_directive(parsed);
            }
        }
        Ok(filter)
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(writer: W, format: LogFormat, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi).with_target(true);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber. Call once at startup.
///
/// When file output is enabled the returned guard flushes the background
/// writer on drop, so keep it alive until the process exits.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.output.console() {
        layers.push(format_layer(std::io::stdout, config.format, true));
    }

    if config.output.file() {
        std::fs::create_dir_all(&config.log_dir)?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.file_prefix);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(format_layer(writer, config.format, false));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(config.env_filter()?)
        .try_init()
        .map_err(|e| MdpError::Logging(e.to_string()))?;

    Ok(guard)
}
