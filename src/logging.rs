//! Structured logging setup.
//!
//! - Component targets for filtering (see [`targets`])
//! - Daily rolling log files via tracing-appender
//! - Pretty, compact or JSON stdout
//!
//! ```bash
//! # Debug only the aggregator
//! RUST_LOG=info,lending::account=debug lending_monitor status --account 0x...
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::{prelude::*, Error};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(Error::Config(format!("unknown log format '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LogConfig {
    /// Base level when RUST_LOG is unset
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Directory for daily rolling JSON logs; disabled when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// File name prefix for rolling logs
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Write logs to stdout as well as files
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "lending-monitor.log".to_string()
}

fn default_enable_stdout() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            log_dir: None,
            file_prefix: default_file_prefix(),
            enable_stdout: default_enable_stdout(),
        }
    }
}

impl LogConfig {
    /// JSON to stdout and to daily files under `log_dir`.
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            format: LogFormat::Json,
            log_dir: Some(log_dir),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    let directive = |d: &str| {
        d.parse()
            .map_err(|e| Error::Config(format!("invalid log directive '{d}': {e}")))
    };
    Ok(EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid log level '{level}': {e}")))?
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("reqwest=warn")?))
}

/// Initialize the global subscriber.
///
/// RUST_LOG takes precedence over `config.level`. The returned guard must
/// be held for the lifetime of the program so buffered file logs are flushed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let stdout_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };

    let Some(log_dir) = config.log_dir.as_ref() else {
        init_stdout_only(config.format, stdout_filter)?;
        return Ok(None);
    };

    std::fs::create_dir_all(log_dir)
        .map_err(|e| Error::Config(format!("cannot create {}: {e}", log_dir.display())))?;
    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, &config.file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .json()
        .with_filter(build_filter(&config.level)?);

    let stdout_layer = config.enable_stdout.then(|| match config.format {
        LogFormat::Json => fmt::layer().json().with_filter(stdout_filter).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_filter(stdout_filter).boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).with_filter(stdout_filter).boxed(),
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {e}")))?;

    Ok(Some(guard))
}

fn init_stdout_only(format: LogFormat, filter: EnvFilter) -> Result<()> {
    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };
    result.map_err(|e| Error::Config(format!("logging already initialized: {e}")))
}

/// Log targets used across the crate.
///
/// ```ignore
/// tracing::warn!(target: targets::MARKET, market = %symbol, "Exchange rate regressed");
/// ```
pub mod targets {
    /// Price reads and resolution
    pub const ORACLE: &str = "lending::oracle";
    /// Market state reads, APY derivation, exchange-rate guard
    pub const MARKET: &str = "lending::market";
    /// Account snapshot aggregation
    pub const ACCOUNT: &str = "lending::account";
    /// Approvals and lending transactions
    pub const EXCHANGE: &str = "lending::exchange";
    /// Periodic refresh tasks
    pub const MONITOR: &str = "lending::monitor";
    /// JSON-RPC transport
    pub const RPC: &str = "lending::rpc";
}
