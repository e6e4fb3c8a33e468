//! Logging bootstrap for econfmanager tools
//!
//! Console output uses a compact `timestamp [LEVEL] target: message` layout
//! on stderr. An optional daily-rolling file layer can be enabled, plain or
//! JSON. `RUST_LOG` always overrides the configured level.

use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Bracketed tag and ANSI color for a level
fn level_style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
    }
}

/// `2026-03-02T00:50:44.809Z [INFO] econfmanager::store: Store opened: ...`
///
/// Targets outside the store crates are omitted to keep tool output short.
struct TaggedFormat;

impl<S, N> FormatEvent<S, N> for TaggedFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        write!(writer, "{} ", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let (tag, color) = level_style(*metadata.level());
        if writer.has_ansi_escapes() {
            write!(writer, "{}{}\x1b[0m ", color, tag)?;
        } else {
            write!(writer, "{} ", tag)?;
        }

        if metadata.target().starts_with("econfmanager") {
            write!(writer, "{}: ", metadata.target())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Cannot create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging already initialized")]
    AlreadyInitialized,
}

/// Logger configuration
///
/// Deserializable so tools can embed it under a `logging:` key in their
/// YAML config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Application name, used as the log file prefix
    pub app_name: String,
    /// Filter directive (e.g. `info`, `warn,econfmanager=debug`)
    pub level: String,
    /// Directory for daily log files; console only when unset
    pub log_dir: Option<PathBuf>,
    /// Write the file layer as JSON lines
    pub json: bool,
    /// Colorize console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            app_name: "econfmanager".to_string(),
            level: "info".to_string(),
            log_dir: None,
            json: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// `RUST_LOG` wins over the configured level
    pub fn effective_filter(&self) -> String {
        match std::env::var("RUST_LOG") {
            Ok(env) if !env.trim().is_empty() => env,
            _ => self.level.clone(),
        }
    }

    fn env_filter(&self) -> Result<EnvFilter, LogError> {
        let filter = self.effective_filter();
        EnvFilter::try_new(&filter).map_err(|e| LogError::InvalidFilter {
            filter,
            reason: e.to_string(),
        })
    }
}

// Keeps the non-blocking file writer alive for the process lifetime
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber; fails if one is already set
pub fn init_with_config(config: &LogConfig) -> Result<(), LogError> {
    let filter = config.env_filter()?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .event_format(TaggedFormat)
        .boxed();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LogError::LogDir {
                path: dir.clone(),
                source,
            })?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.app_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if FILE_GUARD.set(guard).is_err() {
                return Err(LogError::AlreadyInitialized);
            }

            let layer = if config.json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .event_format(TaggedFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)?;

    tracing::debug!(
        "Logging for {} at '{}'{}",
        config.app_name,
        config.effective_filter(),
        config
            .log_dir
            .as_ref()
            .map(|d| format!(", files in {}", d.display()))
            .unwrap_or_default()
    );
    Ok(())
}
