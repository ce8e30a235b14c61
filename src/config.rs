//! Конфигурация процесса: читается один раз при старте.

use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite:movie_bot.db?mode=rwc";
const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const DEFAULT_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/w1280";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is missing")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub tmdb_api_key: String,
    pub admin_id: i64,
    pub database_url: String,
    pub tmdb_base_url: String,
    pub image_base_url: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // токены в логи не попадают
        f.debug_struct("Config")
            .field("admin_id", &self.admin_id)
            .field("database_url", &self.database_url)
            .field("tmdb_base_url", &self.tmdb_base_url)
            .field("image_base_url", &self.image_base_url)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Сборка из произвольного источника ключей; пустые значения считаются отсутствующими.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let admin_raw = required("ADMIN_ID")?;
        let admin_id = admin_raw
            .parse::<i64>()
            .map_err(|_| ConfigError::Invalid { name: "ADMIN_ID", value: admin_raw.clone() })?;

        Ok(Self {
            bot_token: required("BOT_TOKEN")?,
            tmdb_api_key: required("TMDB_API_KEY")?,
            admin_id,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            tmdb_base_url: get("TMDB_BASE_URL")
                .unwrap_or_else(|| DEFAULT_TMDB_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            image_base_url: get("TMDB_IMAGE_URL").unwrap_or_else(|| DEFAULT_IMAGE_BASE_URL.to_string()),
        })
    }
}
