//! Adapter configuration.

use serde::Deserialize;
use tessera_core::{EngineError, EngineResult};

/// Per-purpose default index toggles. Every flag defaults to `true`, so an
/// absent configuration creates every recognised default index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct IndexCreationConfig {
    pub create_index_user_username: bool,
    pub create_index_user_username_case_insensitive: bool,
    pub create_index_user_email: bool,
    pub create_index_user_email_case_insensitive: bool,
    pub create_index_user_email_verify_token: bool,
    pub create_index_user_password_reset_token: bool,
    pub create_index_role_name: bool,
}

impl Default for IndexCreationConfig {
    fn default() -> Self {
        Self {
            create_index_user_username: true,
            create_index_user_username_case_insensitive: true,
            create_index_user_email: true,
            create_index_user_email_case_insensitive: true,
            create_index_user_email_verify_token: true,
            create_index_user_password_reset_token: true,
            create_index_role_name: true,
        }
    }
}

/// A store event to log, optionally reduced to a set of dotted keys.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedEventConfig {
    pub name: String,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

pub(crate) const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Adapter-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterConfig {
    /// Connection descriptor; credentials are escaped on connect.
    pub database_uri: String,
    /// Global query-time bound in milliseconds.
    pub max_time_ms: Option<u64>,
    /// Schema cache TTL in milliseconds; `0` disables caching.
    pub schema_cache_ttl_ms: u64,
    pub indexes: IndexCreationConfig,
    pub logged_events: Vec<LoggedEventConfig>,
    /// Allows sandboxed server-side expressions for unprivileged callers.
    pub allow_sandboxed_expressions: bool,
    /// Reduces permission and store errors to generic messages.
    pub sanitize_errors: bool,
    /// Upper bound on ids in one include fetch.
    pub include_batch_size: usize,
    /// Retries of a transaction after a transient store error.
    pub transaction_retry_limit: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            database_uri: String::new(),
            max_time_ms: None,
            schema_cache_ttl_ms: 5_000,
            indexes: IndexCreationConfig::default(),
            logged_events: Vec::new(),
            allow_sandboxed_expressions: false,
            sanitize_errors: true,
            include_batch_size: 1_000,
            transaction_retry_limit: 5,
        }
    }
}

impl AdapterConfig {
    /// Parses a JSON configuration object. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on malformed JSON or when [`Self::validate`] fails.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero include batch size, a zero time
    /// bound or an unknown event log level.
    pub fn validate(&self) -> EngineResult<()> {
        if self.include_batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "includeBatchSize must be at least 1".into(),
            ));
        }
        if self.max_time_ms == Some(0) {
            return Err(EngineError::InvalidConfig("maxTimeMs must be positive".into()));
        }
        for event in &self.logged_events {
            if !LOG_LEVELS.contains(&event.level.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "unknown log level '{}' for event {}",
                    event.level, event.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = AdapterConfig::default();
        assert_eq!(config.schema_cache_ttl_ms, 5_000);
        assert!(config.sanitize_errors);
        assert!(!config.allow_sandboxed_expressions);
        assert_eq!(config.include_batch_size, 1_000);
        assert!(config.indexes.create_index_role_name);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = AdapterConfig::from_json(
            r#"{
                "maxTimeMs": 250,
                "indexes": { "createIndexUserEmail": false },
                "loggedEvents": [{ "name": "commandFailed", "keys": ["failure.code"], "level": "warn" }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_time_ms, Some(250));
        assert!(!config.indexes.create_index_user_email);
        assert!(config.indexes.create_index_user_username);
        assert_eq!(config.logged_events[0].keys.as_deref(), Some(&["failure.code".to_string()][..]));
        assert_eq!(config.transaction_retry_limit, 5);
    }

    #[test]
    fn event_level_defaults_to_info() {
        let config =
            AdapterConfig::from_json(r#"{ "loggedEvents": [{ "name": "connectionPoolCreated" }] }"#)
                .unwrap();
        assert_eq!(config.logged_events[0].level, "info");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            AdapterConfig::from_json(r#"{ "includeBatchSize": 0 }"#),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(matches!(
            AdapterConfig::from_json(r#"{ "loggedEvents": [{ "name": "x", "level": "loud" }] }"#),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
