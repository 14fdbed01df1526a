//! Runtime settings read from the process environment.

use crate::error::{BotError, Result};
use std::time::Duration;

/// Marker value of clients whose records are excluded from every aggregate.
pub const BONUS_MARKER: &str = "Бонус";

/// Default Telegram message budget, kept under the 4096 hard limit.
pub const DEFAULT_CHAR_BUDGET: usize = 4000;

/// Row count above which the full result is offered as an Excel file.
pub const DEFAULT_EXCEL_THRESHOLD: usize = 30;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub pg_max_connections: u32,
    pub pg_command_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub char_budget: usize,
    pub excel_threshold: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// Written to `agent_logs` with every interaction.
    pub bot_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            pg_max_connections: 20,
            pg_command_timeout: Duration::from_secs(60),
            openai_api_key: None,
            openai_model: "gpt-4.1".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            char_budget: DEFAULT_CHAR_BUDGET,
            excel_threshold: DEFAULT_EXCEL_THRESHOLD,
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 1024,
            bot_id: "analytics-bot".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    ///
    /// Call `dotenv::dotenv()` beforehand if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] but with an injectable lookup, used by tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            pg_max_connections: parse_or(
                &lookup,
                "PG_MAX_CONNECTIONS",
                defaults.pg_max_connections,
            )?,
            pg_command_timeout: Duration::from_secs(parse_or(
                &lookup,
                "PG_COMMAND_TIMEOUT_SECS",
                defaults.pg_command_timeout.as_secs(),
            )?),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_model: non_empty("OPENAI_MODEL_CHAT").unwrap_or(defaults.openai_model),
            openai_base_url: non_empty("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            char_budget: parse_or(&lookup, "MESSAGE_CHAR_BUDGET", defaults.char_budget)?,
            excel_threshold: parse_or(&lookup, "EXCEL_THRESHOLD", defaults.excel_threshold)?,
            cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            cache_capacity: parse_or(&lookup, "CACHE_CAPACITY", defaults.cache_capacity)?,
            bot_id: non_empty("BOT_ID").unwrap_or(defaults.bot_id),
        })
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| BotError::Config("DATABASE_URL is not set".to_string()))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| BotError::Config(format!("{} has invalid value '{}'", key, raw))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_empty() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings.char_budget, 4000);
        assert_eq!(settings.excel_threshold, 30);
        assert_eq!(settings.openai_model, "gpt-4.1");
        assert_eq!(settings.bot_id, "analytics-bot");
        assert!(settings.database_url.is_none());
        assert!(settings.require_database_url().is_err());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("MESSAGE_CHAR_BUDGET", "2000"),
            ("EXCEL_THRESHOLD", " 50 "),
            ("DATABASE_URL", "postgres://localhost/milk"),
            ("CACHE_TTL_SECS", "10"),
            ("BOT_ID", "milk-bot"),
        ]))
        .unwrap();
        assert_eq!(settings.char_budget, 2000);
        assert_eq!(settings.excel_threshold, 50);
        assert_eq!(settings.cache_ttl, Duration::from_secs(10));
        assert_eq!(settings.bot_id, "milk-bot");
        assert_eq!(settings.require_database_url().unwrap(), "postgres://localhost/milk");
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = Settings::from_lookup(lookup_from(&[("EXCEL_THRESHOLD", "many")])).unwrap_err();
        assert!(matches!(err, BotError::Config(_)));
    }
}
