//! Logging setup using `tracing_subscriber`.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Once;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::config::LogConfig;

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. When `config.file` is set, logs go to
/// that file through a non-blocking writer; keep the returned guard alive
/// until exit so buffered lines are flushed. Repeated calls are no-ops.
///
/// # Errors
/// Returns an error if the filter does not parse or the log file's
/// directory cannot be created.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    static INIT: Once = Once::new();

    let mut result = Ok(None);
    INIT.call_once(|| result = install(config));
    result
}

fn install(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(&config.level)?;

    match &config.file {
        Some(file) => {
            let path = Path::new(file);
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create log directory {}", directory.display()))?;
            let file_name = path
                .file_name()
                .with_context(|| format!("Log path has no file name: {file}"))?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|err| anyhow::anyhow!("Failed to install log subscriber: {err}"))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| anyhow::anyhow!("Failed to install log subscriber: {err}"))?;
            Ok(None)
        }
    }
}

fn env_filter(default_level: &str) -> Result<EnvFilter> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_level.to_string());

    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse(&directives)
        .with_context(|| format!("Invalid log filter: {directives}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_crate_directives() {
        assert!(env_filter("hrdesk_core=debug,warn").is_ok());
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig::default();
        let _ = init(&config);
        assert!(init(&config).unwrap().is_none());
    }
}
