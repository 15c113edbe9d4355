use std::io;
use std::path::PathBuf;

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zoosync::config::LogConfig;

/// Where log lines go.
pub enum LogTarget {
  Stderr,
  /// Daily rolling file in this directory
  Directory(PathBuf),
}

impl LogTarget {
  /// Configured directory, else `<data_dir>/zoosync/logs`.
  pub fn from_config(config: &LogConfig) -> Result<Self> {
    let directory = match &config.directory {
      Some(dir) => dir.clone(),
      None => dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .ok_or_else(|| eyre!("Could not determine data directory for logs"))?
        .join("zoosync")
        .join("logs"),
    };
    Ok(LogTarget::Directory(directory))
  }
}

/// RUST_LOG wins; otherwise the configured level.
fn filter(config: &LogConfig) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initialize the tracing subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init(config: &LogConfig, target: LogTarget) -> Result<Option<WorkerGuard>> {
  match target {
    LogTarget::Stderr => {
      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter(config))
        .try_init()
        .map_err(|e| eyre!("Failed to install logger: {e}"))?;
      Ok(None)
    }
    LogTarget::Directory(directory) => {
      std::fs::create_dir_all(&directory)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;
      let appender = tracing_appender::rolling::daily(&directory, "zoosync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter(config))
        .try_init()
        .map_err(|e| eyre!("Failed to install logger: {e}"))?;
      Ok(Some(guard))
    }
  }
}
