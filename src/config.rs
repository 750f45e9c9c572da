use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Web Server
    pub web_host: String,
    pub web_port: u16,

    // Auth. Only the HTTP server needs it.
    pub jwt_secret: Option<String>,

    // Feed reads
    pub default_page_size: u32,
    pub max_page_size: u32,

    // Post writes
    pub max_tags_per_post: usize,

    // Storage service ceilings
    pub transaction_item_limit: usize,
    pub batch_get_limit: usize,
    pub batch_write_limit: usize,

    // Backfill
    pub backfill_page_size: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/cms.sqlite")),

            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env("WEB_PORT", 8080)?,

            jwt_secret: std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()),

            default_page_size: parse_env("DEFAULT_PAGE_SIZE", 10)?,
            max_page_size: parse_env("MAX_PAGE_SIZE", 100)?,

            max_tags_per_post: parse_env("MAX_TAGS_PER_POST", 33)?,

            transaction_item_limit: parse_env("TRANSACTION_ITEM_LIMIT", 100)?,
            batch_get_limit: parse_env("BATCH_GET_LIMIT", 100)?,
            batch_write_limit: parse_env("BATCH_WRITE_LIMIT", 25)?,

            backfill_page_size: parse_env("BACKFILL_PAGE_SIZE", 100)?,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("DEFAULT_PAGE_SIZE", self.default_page_size as usize),
            ("MAX_PAGE_SIZE", self.max_page_size as usize),
            ("TRANSACTION_ITEM_LIMIT", self.transaction_item_limit),
            ("BATCH_GET_LIMIT", self.batch_get_limit),
            ("BATCH_WRITE_LIMIT", self.batch_write_limit),
            ("BACKFILL_PAGE_SIZE", self.backfill_page_size as usize),
        ] {
            if value == 0 {
                return Err(invalid(name, "must be at least 1"));
            }
        }
        if self.default_page_size > self.max_page_size {
            return Err(invalid(
                "DEFAULT_PAGE_SIZE",
                &format!("must not exceed MAX_PAGE_SIZE ({})", self.max_page_size),
            ));
        }
        // Replacing every tag of a full post is the largest write: the post
        // update, one entry delete per old tag, an entry and a catalog row
        // per new tag.
        let worst_case_write = self.max_tags_per_post * 3 + 1;
        if worst_case_write > self.transaction_item_limit {
            return Err(invalid(
                "MAX_TAGS_PER_POST",
                &format!(
                    "{} tags need up to {worst_case_write} transaction items, limit is {}",
                    self.max_tags_per_post, self.transaction_item_limit
                ),
            ));
        }
        Ok(())
    }

    /// The token signing secret, required by the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error if `JWT_SECRET` is not set.
    pub fn require_jwt_secret(&self) -> Result<&str, ConfigError> {
        self.jwt_secret
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".to_string()))
    }

    /// Storage ceilings handed to the database layer.
    #[must_use]
    pub fn store_limits(&self) -> crate::db::StoreLimits {
        crate::db::StoreLimits {
            transaction_items: self.transaction_item_limit,
            batch_get: self.batch_get_limit,
            batch_write: self.batch_write_limit,
        }
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
