//! Runtime configuration
//!
//! Read from environment variables, with a `.env` file loaded first when
//! present.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Messages delivered on joining a room or authenticating
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Upper bound for `CHAT_HISTORY_LIMIT`
pub const MAX_HISTORY_LIMIT: usize = 50;

/// Per-connection outbound queue capacity
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    /// `CHAT_BIND_ADDR`
    pub bind_addr: String,
    /// `DATABASE_URL`; in-memory store when unset
    pub database_url: Option<String>,
    /// `CHAT_IDENTITIES_FILE`
    pub identities_file: Option<PathBuf>,
    /// `CHAT_HISTORY_LIMIT`
    pub history_limit: usize,
    /// `CHAT_OUTBOUND_BUFFER`
    pub outbound_buffer: usize,
    /// `CHAT_EXPLICIT_AUTH_ERRORS`: answer unauthenticated messaging
    /// events with an error instead of dropping them silently
    pub explicit_auth_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            database_url: None,
            identities_file: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            explicit_auth_errors: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = Self {
            bind_addr: env::var("CHAT_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: non_empty_var("DATABASE_URL"),
            identities_file: non_empty_var("CHAT_IDENTITIES_FILE").map(PathBuf::from),
            history_limit: parse_var("CHAT_HISTORY_LIMIT", defaults.history_limit)?,
            outbound_buffer: parse_var("CHAT_OUTBOUND_BUFFER", defaults.outbound_buffer)?,
            explicit_auth_errors: parse_var(
                "CHAT_EXPLICIT_AUTH_ERRORS",
                defaults.explicit_auth_errors,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.history_limit == 0 || self.history_limit > MAX_HISTORY_LIMIT {
            return Err(AppError::Config(format!(
                "CHAT_HISTORY_LIMIT must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }
        if self.outbound_buffer == 0 {
            return Err(AppError::Config("CHAT_OUTBOUND_BUFFER must be positive".to_string()));
        }
        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.bind_addr, DEFAULT_ADDR);
        assert_eq!(config.history_limit, 50);
        assert!(!config.explicit_auth_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_history_limit_rejected() {
        let config = Config {
            history_limit: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_history_limit_capped() {
        let at_cap = Config {
            history_limit: MAX_HISTORY_LIMIT,
            ..Config::default()
        };
        assert!(at_cap.validate().is_ok());

        let over = Config {
            history_limit: MAX_HISTORY_LIMIT + 1,
            ..Config::default()
        };
        assert!(matches!(over.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_parse_var_reports_key() {
        // Unique key so parallel tests do not interfere
        env::set_var("CHAT_TEST_PARSE_VAR_BAD", "lots");
        let err = parse_var::<usize>("CHAT_TEST_PARSE_VAR_BAD", 1).unwrap_err();
        assert!(err.to_string().contains("CHAT_TEST_PARSE_VAR_BAD"));
        assert_eq!(parse_var::<usize>("CHAT_TEST_PARSE_VAR_UNSET", 7).unwrap(), 7);
    }
}
