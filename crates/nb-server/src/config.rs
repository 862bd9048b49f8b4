//! Configuration loading: `config.json` plus environment overrides

use anyhow::{Context, Result};
use nb_types::{Config, SqliteConfig, DEFAULT_CACHE_PATH, DEFAULT_DATABASE_PATH};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

pub fn config_path() -> PathBuf {
    std::env::var("NB_MUSIC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub async fn load() -> Result<Config> {
    let mut config = load_from(&config_path()).await?;

    if let Ok(port) = std::env::var("NB_MUSIC_PORT") {
        config.port = port
            .parse()
            .with_context(|| format!("Invalid NB_MUSIC_PORT: {}", port))?;
    }

    Ok(config)
}

pub async fn load_from(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        info!("Loading configuration from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str::<Config>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        warn!("{} not found, using default configuration", path.display());
        Config::default()
    };

    apply_defaults(&mut config);
    validate(&config)?;
    Ok(config)
}

fn apply_defaults(config: &mut Config) {
    if config.database.is_empty() {
        config.database.sqlite = Some(SqliteConfig {
            path: DEFAULT_DATABASE_PATH.to_string(),
        });
    }
    if config.cache_database.is_empty() {
        config.cache_database.sqlite = Some(SqliteConfig {
            path: DEFAULT_CACHE_PATH.to_string(),
        });
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.speed_limit.ban_duration == 0 {
        anyhow::bail!("speedLimit.banDuration must be greater than 0");
    }
    if config.backend_timeout == 0 {
        anyhow::bail!("backendTimeout must be greater than 0");
    }
    if config.administrators.allows_everyone() {
        warn!("administrators is set to true: every logged in user is an administrator");
    }
    Ok(())
}
