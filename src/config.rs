//! Runtime configuration
//!
//! Everything is read from the environment (a `.env` file is honoured by the
//! binaries through `dotenv`).

use crate::error::OrchestrationError;
use crate::Result;
use std::env;

pub const DEFAULT_GROQ_MODEL: &str = "moonshotai/kimi-k2-instruct";
pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_DECISIONS_PER_TURN: u32 = 8;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub groq_api_key: Option<String>,
    pub groq_model: String,
    pub groq_base_url: String,
    pub financial_api_base_url: Option<String>,
    pub database_url: Option<String>,
    pub port: u16,
    /// Number of Decision-node visits allowed in a single turn
    pub max_decisions_per_turn: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            groq_api_key: None,
            groq_model: DEFAULT_GROQ_MODEL.to_string(),
            groq_base_url: DEFAULT_GROQ_BASE_URL.to_string(),
            financial_api_base_url: None,
            database_url: None,
            port: DEFAULT_PORT,
            max_decisions_per_turn: DEFAULT_MAX_DECISIONS_PER_TURN,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        let defaults = Self::default();

        let port = match get(&["PORT", "API_PORT"]) {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                OrchestrationError::ConfigError(format!("invalid PORT '{}': {}", raw, e))
            })?,
            None => defaults.port,
        };

        let max_decisions_per_turn = match get(&["MAX_DECISIONS_PER_TURN"]) {
            Some(raw) => {
                let value = raw.parse::<u32>().map_err(|e| {
                    OrchestrationError::ConfigError(format!(
                        "invalid MAX_DECISIONS_PER_TURN '{}': {}",
                        raw, e
                    ))
                })?;
                if value == 0 {
                    return Err(OrchestrationError::ConfigError(
                        "MAX_DECISIONS_PER_TURN must be at least 1".to_string(),
                    ));
                }
                value
            }
            None => defaults.max_decisions_per_turn,
        };

        Ok(Self {
            groq_api_key: get(&["GROQ_API_KEY"]),
            groq_model: get(&["GROQ_MODEL"]).unwrap_or(defaults.groq_model),
            groq_base_url: get(&["GROQ_BASE_URL"])
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.groq_base_url),
            financial_api_base_url: get(&["FINANCIAL_API_BASE_URL", "TOOLS_API_BASE_URL"])
                .map(|url| url.trim_end_matches('/').to_string()),
            database_url: get(&["DATABASE_URL", "POSTGRES_URL"]),
            port,
            max_decisions_per_turn,
        })
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
    fn test_defaults_when_environment_is_empty() {
        let config = OrchestratorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.groq_model, DEFAULT_GROQ_MODEL);
        assert_eq!(config.max_decisions_per_turn, DEFAULT_MAX_DECISIONS_PER_TURN);
        assert!(config.groq_api_key.is_none());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_aliases_and_trailing_slashes() {
        let config = OrchestratorConfig::from_lookup(lookup_from(&[
            ("API_PORT", "9090"),
            ("TOOLS_API_BASE_URL", "http://localhost:8000/"),
            ("POSTGRES_URL", "postgres://localhost/db"),
            ("GROQ_API_KEY", "  "),
        ]))
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(
            config.financial_api_base_url.as_deref(),
            Some("http://localhost:8000")
        );
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/db"));
        assert!(config.groq_api_key.is_none());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(OrchestratorConfig::from_lookup(lookup_from(&[("PORT", "eighty")])).is_err());
        assert!(
            OrchestratorConfig::from_lookup(lookup_from(&[("MAX_DECISIONS_PER_TURN", "0")]))
                .is_err()
        );
    }
}
