//! Logging setup for the agent.
//!
//! Console output always goes to stderr so action results printed on stdout
//! stay machine-readable. A daily-rotated file can be added on top with
//! `RINGMASTER_LOG_DIR`.
//!
//! | Variable               | Meaning                                  |
//! |------------------------|------------------------------------------|
//! | `RINGMASTER_LOG_LEVEL` | console and file level (default `info`)  |
//! | `RINGMASTER_LOG_DIR`   | enable file logging into this directory  |
//! | `RINGMASTER_LOG_FILE`  | file name prefix (default `ringmaster.log`) |
//!
//! `RUST_LOG`, when set, takes precedence over the level.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub const DEFAULT_LOG_FILE: &str = "ringmaster.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: Level,
    /// `None` disables file logging
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_dir: None,
            file_name: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let level = lookup("RINGMASTER_LOG_LEVEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO);
        let log_dir = lookup("RINGMASTER_LOG_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let file_name = lookup("RINGMASTER_LOG_FILE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
        Self {
            level,
            log_dir,
            file_name,
        }
    }

    /// Raise the level by one step per `-v`, never lowering it
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let requested = match verbose {
            0 => return self,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        // tracing orders levels by verbosity: TRACE > DEBUG > INFO
        if requested > self.level {
            self.level = requested;
        }
        self
    }
}

/// Keeps the file writer alive; dropping it flushes buffered output
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter(config.level));
    layers.push(Box::new(console_layer));

    let mut file_guard = None;
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(filter(config.level));
        layers.push(Box::new(file_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if let Some(dir) = &config.log_dir {
        tracing::debug!(log_dir = %dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
