use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, LoggingConfig};

const LOG_FILE_PREFIX: &str = "timegate.log";

/// Installs the global subscriber. The returned guard flushes the file writer
/// on drop and must live as long as the program.
pub fn init_logging(
    logging: &LoggingConfig,
    level_override: Option<&str>,
    debug: bool,
) -> Result<Option<WorkerGuard>> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level_override
            .unwrap_or(logging.level.as_str())
            .parse()
            .context("Invalid log level")?
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let (json_layer, text_layer) = if logging.json {
        (
            Some(fmt::layer().json().with_writer(std::io::stderr)),
            None,
        )
    } else {
        (None, Some(fmt::layer().with_writer(std::io::stderr)))
    };

    let (file_layer, guard) = match &logging.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    /// `false` when the file was missing and defaults were used.
    pub found: bool,
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("timegate");
    path.push("config.yaml");
    Ok(path)
}

/// Reads and parses the configuration. Runs before logging is installed, so
/// it reports through the returned value rather than through `tracing`.
pub async fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };

    if !fs::try_exists(&config_path).await.unwrap_or(false) {
        return Ok(LoadedConfig {
            config: AppConfig::default(),
            path: config_path,
            found: false,
        });
    }

    let content = fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
    let config = AppConfig::from_yaml(&content)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

    Ok(LoadedConfig {
        config,
        path: config_path,
        found: true,
    })
}
