//! Tracing subscriber setup shared by both binaries.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::{AppError, Result};

/// Log line format.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `default_filter`. With `log_file`, every event goes
/// to the file and only `ERROR` events reach stderr.
///
/// # Errors
///
/// Returns `AppError::Config` if the log file cannot be created or a
/// subscriber is already installed.
pub fn init(format: LogFormat, log_file: Option<&Path>, default_filter: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let layers: Vec<BoxedLayer> = match log_file {
        None => vec![fmt_layer(format, std::io::stderr, true)],
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| {
                    AppError::Config(format!("cannot create log dir {}: {err}", parent.display()))
                })?;
            }
            let file = File::create(path).map_err(|err| {
                AppError::Config(format!("cannot create log file {}: {err}", path.display()))
            })?;
            vec![
                fmt_layer(format, Mutex::new(file), false),
                fmt_layer(format, std::io::stderr.with_max_level(Level::ERROR), true),
            ]
        }
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))
}

/// Path of a fresh log file for `role` (`server` or `client`) under `dir`:
/// `gdbrpc_<role>-<YYYYmmdd-HHMMSS>-pid<pid>.log`.
#[must_use]
pub fn log_file_path(dir: &Path, role: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("gdbrpc_{role}-{stamp}-pid{}.log", std::process::id()))
}

fn fmt_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
