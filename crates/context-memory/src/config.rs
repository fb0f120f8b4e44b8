use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::context_engine::MemoryOptions;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub pool_size: u32,
    pub context_enabled: bool,
    pub max_history: usize,
    pub session_idle_seconds: u64,
    pub backend_url: String,
    pub generate_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/context_memory.db"),
            pool_size: 10,
            context_enabled: true,
            max_history: 50,
            session_idle_seconds: 3600,
            backend_url: "http://127.0.0.1:8081".to_string(),
            generate_timeout_seconds: 300,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_path = lookup("MEMORY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);
        let backend_url = lookup("LLM_BACKEND_URL").unwrap_or(defaults.backend_url);

        let pool_size = parse_var(&lookup, "DB_POOL_SIZE", defaults.pool_size)?;
        if pool_size == 0 {
            return Err(anyhow::anyhow!("DB_POOL_SIZE must be at least 1"));
        }

        Ok(Self {
            database_path,
            pool_size,
            context_enabled: parse_var(&lookup, "CONTEXT_ENABLED", defaults.context_enabled)?,
            max_history: parse_var(&lookup, "MAX_HISTORY_MESSAGES", defaults.max_history)?,
            session_idle_seconds: parse_var(&lookup, "SESSION_IDLE_SECONDS", defaults.session_idle_seconds)?,
            backend_url,
            generate_timeout_seconds: parse_var(
                &lookup,
                "GENERATE_TIMEOUT_SECONDS",
                defaults.generate_timeout_seconds,
            )?,
        })
    }

    pub fn memory_options(&self) -> MemoryOptions {
        MemoryOptions {
            context_enabled: self.context_enabled,
            max_history: self.max_history,
        }
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_seconds)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_seconds)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Database Path: {}", self.database_path.display());
        info!("- Pool Size: {}", self.pool_size);
        info!("- Context Enabled: {}", self.context_enabled);
        info!("- Max History: {}", self.max_history);
        info!("- Session Idle: {}s", self.session_idle_seconds);
        info!("- Backend URL: {}", self.backend_url);
        info!("- Generate Timeout: {}s", self.generate_timeout_seconds);
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
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

    // ===== Defaults =====

    #[test]
    fn test_empty_environment_yields_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.database_path, PathBuf::from("data/context_memory.db"));
        assert_eq!(config.pool_size, 10);
        assert!(config.context_enabled);
        assert_eq!(config.max_history, 50);
        assert_eq!(config.session_idle_seconds, 3600);
        assert_eq!(config.backend_url, "http://127.0.0.1:8081");
        assert_eq!(config.generate_timeout_seconds, 300);
    }

    #[test]
    fn test_memory_options_follow_config() {
        let config = Config {
            context_enabled: false,
            max_history: 8,
            ..Config::default()
        };
        let options = config.memory_options();
        assert!(!options.context_enabled);
        assert_eq!(options.max_history, 8);
    }

    // ===== Overrides =====

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("MEMORY_DB_PATH", "/tmp/memory.db"),
            ("DB_POOL_SIZE", "4"),
            ("CONTEXT_ENABLED", "false"),
            ("MAX_HISTORY_MESSAGES", " 20 "),
            ("SESSION_IDLE_SECONDS", "60"),
            ("LLM_BACKEND_URL", "http://localhost:9000"),
            ("GENERATE_TIMEOUT_SECONDS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/memory.db"));
        assert_eq!(config.pool_size, 4);
        assert!(!config.context_enabled);
        assert_eq!(config.max_history, 20);
        assert_eq!(config.session_idle(), Duration::from_secs(60));
        assert_eq!(config.backend_url, "http://localhost:9000");
        assert_eq!(config.generate_timeout(), Duration::from_secs(30));
    }

    // ===== Invalid values =====

    #[test]
    fn test_unparsable_number_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[("MAX_HISTORY_MESSAGES", "lots")])).unwrap_err();
        assert!(err.to_string().contains("MAX_HISTORY_MESSAGES"));
    }

    #[test]
    fn test_unparsable_bool_is_an_error() {
        assert!(Config::from_lookup(lookup_from(&[("CONTEXT_ENABLED", "maybe")])).is_err());
    }

    #[test]
    fn test_zero_pool_size_is_rejected() {
        assert!(Config::from_lookup(lookup_from(&[("DB_POOL_SIZE", "0")])).is_err());
    }
}
