use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub gamification: GamificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
}

/// Tunables for the gamification engine. The path-completion fallback is the
/// award applied when a learning path does not define its own
/// `completion_points`.
#[derive(Debug, Clone, Deserialize)]
pub struct GamificationConfig {
    pub path_completion_fallback_points: i64,
}

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            path_completion_fallback_points: 500,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let db_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let db_max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(val) => Some(
                val.parse()
                    .context("Failed to parse DATABASE_MAX_CONNECTIONS")?,
            ),
            Err(_) => Some(10),
        };
        let db_min_connections = match env::var("DATABASE_MIN_CONNECTIONS") {
            Ok(val) => Some(
                val.parse()
                    .context("Failed to parse DATABASE_MIN_CONNECTIONS")?,
            ),
            Err(_) => Some(1),
        };

        let path_completion_fallback_points = match env::var("PATH_COMPLETION_FALLBACK_POINTS") {
            Ok(val) => val
                .parse()
                .context("Failed to parse PATH_COMPLETION_FALLBACK_POINTS")?,
            Err(_) => GamificationConfig::default().path_completion_fallback_points,
        };

        Ok(Config {
            database: DatabaseConfig {
                url: db_url,
                max_connections: db_max_connections,
                min_connections: db_min_connections,
            },
            gamification: GamificationConfig {
                path_completion_fallback_points,
            },
        })
    }
}

// Use once_cell for a global config instance that's initialized once
use once_cell::sync::OnceCell;

static CONFIG: OnceCell<Config> = OnceCell::new();

pub fn init() -> Result<&'static Config> {
    CONFIG.get_or_try_init(Config::from_env)
}

pub fn get() -> &'static Config {
    CONFIG.get().expect("Config is not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamification_defaults_to_500_path_points() {
        let config = GamificationConfig::default();
        assert_eq!(config.path_completion_fallback_points, 500);
    }
}
