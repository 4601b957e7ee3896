//! Runtime configuration
//!
//! Everything is read from the process environment, after `.env` has been
//! loaded by the binary. Missing values fall back to defaults; malformed
//! values are errors.

use crate::error::{Result, Text2SqlError};
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DUMMY_API_KEY: &str = "dummy-api-key";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_LLM_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Connection settings for the Northwind database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DatabaseConfig {
    /// Connection options for sqlx. An explicit `DATABASE_URL` wins; otherwise
    /// each field is set individually, so credentials need no URL escaping.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(ref url) = self.url {
            return url
                .parse::<PgConnectOptions>()
                .map_err(|e| Text2SqlError::Config(format!("Invalid DATABASE_URL: {}", e)));
        }

        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.name);
        if self.password.is_empty() {
            Ok(options)
        } else {
            Ok(options.password(&self.password))
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl LlmConfig {
    /// True when no real key is configured and the canned generator is used.
    pub fn is_dummy(&self) -> bool {
        self.api_key.is_empty() || self.api_key == DUMMY_API_KEY
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub max_clients: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server_addr: String,
    pub rate_limit: RateLimitConfig,
    pub max_rows: u64,
    pub cap_existing_limit: bool,
    pub query_timeout: Duration,
    pub schema_context_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database = DatabaseConfig {
            url: get("DATABASE_URL"),
            host: get("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_or(&get, "DB_PORT", 5432)?,
            name: get("DB_NAME").unwrap_or_else(|| "northwind_db".to_string()),
            user: get("DB_USER").unwrap_or_else(|| "northwind_ro".to_string()),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
        };

        let llm = LlmConfig {
            api_key: get("LLM_API_KEY")
                .or_else(|| get("GEMINI_API_KEY"))
                .unwrap_or_else(|| DUMMY_API_KEY.to_string()),
            model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: get("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
        };

        let rate_limit = RateLimitConfig {
            max_requests: parse_or(&get, "RATE_LIMIT", 5)?,
            window: Duration::from_secs(parse_or(&get, "RATE_WINDOW_SECS", 10)?),
            max_clients: parse_or(&get, "RATE_LIMIT_MAX_CLIENTS", 10_000)?,
        };

        let max_rows: u64 = parse_or(&get, "MAX_ROWS", 1000)?;
        if max_rows == 0 {
            return Err(Text2SqlError::Config("MAX_ROWS must be greater than zero".to_string()));
        }

        Ok(Self {
            database,
            llm,
            server_addr: get("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            rate_limit,
            max_rows,
            cap_existing_limit: parse_or(&get, "CAP_EXISTING_LIMIT", false)?,
            query_timeout: Duration::from_secs(parse_or(&get, "QUERY_TIMEOUT_SECS", 30)?),
            schema_context_path: get("SCHEMA_CONTEXT_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Text2SqlError::Config(format!("Invalid value for {}: '{}' ({})", key, raw, e))),
        None => Ok(default),
    }
}
