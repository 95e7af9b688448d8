use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid log rotation {0:?}, expected hourly, daily or never")]
    InvalidRotation(String),
    #[error("create log file in {dir}: {source}")]
    Appender {
        dir: PathBuf,
        #[source]
        source: rolling::InitError,
    },
    #[error("a global logger is already installed")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `slicefs_meta=debug,warn`.
    pub level: String,

    /// Directory for log files. No file logging when unset.
    pub log_dir: Option<PathBuf>,

    pub file_prefix: String,

    /// `hourly`, `daily` or `never`.
    pub rotation: String,

    pub json_format: bool,

    /// Also write to stderr.
    pub console_output: bool,

    /// Colored level names on the console.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".into(),
            log_dir: None,
            file_prefix: "slicefs".into(),
            rotation: "daily".into(),
            json_format: false,
            console_output: true,
            ansi: true,
        }
    }
}

impl LogConfig {
    fn rotation(&self) -> Result<rolling::Rotation, LogError> {
        match self.rotation.as_str() {
            "hourly" => Ok(rolling::Rotation::HOURLY),
            "daily" => Ok(rolling::Rotation::DAILY),
            "never" => Ok(rolling::Rotation::NEVER),
            other => Err(LogError::InvalidRotation(other.to_string())),
        }
    }
}

/// Map `-v`/`-q` counts to a level; verbosity wins over quiet.
pub fn level_for(verbose: u8, quiet: bool) -> &'static str {
    match (verbose, quiet) {
        (0, true) => "error",
        (0, false) => "info",
        (1, _) => "debug",
        _ => "trace",
    }
}

type BoxedLayer<S> = Box<dyn tracing_subscriber::Layer<S> + Send + Sync>;

/// Install the global subscriber. `RUST_LOG` overrides `config.level`.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the program logs.
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LogError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let console_layer: Option<BoxedLayer<_>> = if config.console_output {
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(config.ansi);
        if config.json_format {
            Some(Box::new(layer.json()))
        } else {
            Some(Box::new(layer))
        }
    } else {
        None
    };

    let (file_layer, guard): (Option<BoxedLayer<_>>, _) = if let Some(ref log_dir) = config.log_dir {
        let file_appender = rolling::RollingFileAppender::builder()
            .rotation(config.rotation()?)
            .filename_prefix(&config.file_prefix)
            .filename_suffix("log")
            .build(log_dir)
            .map_err(|source| LogError::Appender {
                dir: log_dir.clone(),
                source,
            })?;

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let layer: BoxedLayer<_> = if config.json_format {
            Box::new(fmt::layer().json().with_writer(non_blocking))
        } else {
            Box::new(fmt::layer().with_ansi(false).with_writer(non_blocking))
        };

        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)?;

    Ok(guard)
}
