// Logging module - tracing subscriber setup for the relay process
//
// Stdout carries either human-readable or JSON lines. File output is always
// JSON so rotated files can be shipped and parsed without the stdout format
// leaking into them.
//
// Precedence for the filter: RUST_LOG env var > config file > default "info"

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::{LogRotation, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter used when RUST_LOG is unset: our crate at the configured level,
/// everything else (AWS SDK, hyper) at warn
pub fn default_directive(level: &str) -> String {
    let level = match level.trim() {
        "" => "info",
        other => other,
    };
    format!("warn,tenant_relay={}", level.to_lowercase())
}

fn rotation(rotation: &LogRotation) -> Rotation {
    match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

/// Install the global subscriber.
///
/// The returned guard must be held for the process lifetime, otherwise
/// buffered file lines are lost on exit.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(if config.json {
        fmt::layer().json().with_current_span(true).boxed()
    } else {
        fmt::layer().boxed()
    });

    let guard = if config.file_enabled {
        match std::fs::create_dir_all(&config.file_dir) {
            Ok(()) => {
                let appender = RollingFileAppender::new(
                    rotation(&config.file_rotation),
                    &config.file_dir,
                    &config.file_prefix,
                );
                // Writes happen on a background thread
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                layers.push(
                    fmt::layer()
                        .json()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .boxed(),
                );
                Some(guard)
            }
            Err(e) => {
                // The subscriber isn't up yet, so this is the only way to say it
                eprintln!(
                    "Warning: Could not create log directory {}: {}",
                    config.file_dir.display(),
                    e
                );
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
