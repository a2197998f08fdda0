use std::{env, path::PathBuf, str::FromStr};

use chrono::TimeDelta;

use crate::errors::AppError;

/// Page size bounds applied to every product listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        PageLimits {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub pagination: PageLimits,
    pub upload_folder: PathBuf,
    pub token_ttl: TimeDelta,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any key lookup, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://pasar_str.db".to_owned());
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned());
        let upload_folder =
            PathBuf::from(lookup("UPLOAD_FOLDER").unwrap_or_else(|| "static/uploads".to_owned()));

        let defaults = PageLimits::default();
        let default_page_size =
            parse_var(&lookup, "DEFAULT_PAGE_SIZE", defaults.default_page_size)?;
        let max_page_size = parse_var(&lookup, "MAX_PAGE_SIZE", defaults.max_page_size)?;
        if default_page_size < 1 || max_page_size < 1 {
            return Err(AppError::Config(
                "DEFAULT_PAGE_SIZE and MAX_PAGE_SIZE must be at least 1".to_owned(),
            ));
        }

        let ttl_hours: i64 = parse_var(&lookup, "TOKEN_TTL_HOURS", 720)?;
        if ttl_hours < 1 {
            return Err(AppError::Config("TOKEN_TTL_HOURS must be at least 1".to_owned()));
        }
        let token_ttl = TimeDelta::try_hours(ttl_hours).ok_or_else(|| {
            AppError::Config(format!("TOKEN_TTL_HOURS out of range: {}", ttl_hours))
        })?;

        log::info!(
            "Configuration loaded: bind={} page_size={}/{} uploads={}",
            bind_addr,
            default_page_size,
            max_page_size,
            upload_folder.display()
        );

        Ok(Config {
            database_url,
            bind_addr,
            pagination: PageLimits {
                default_page_size,
                max_page_size,
            },
            upload_folder,
            token_ttl,
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", name, e))),
    }
}
