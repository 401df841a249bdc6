//! Engine configuration.
//!
//! Loaded once at boot from a JSON file; every field has a default so an
//! empty object `{}` is a valid configuration (no providers, no push,
//! built-in alert rules).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::rules::AlertRule;
use crate::monitor::MonitorError;

pub const APP_NAME: &str = "care-monitor";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming the JSON config file used by the binary.
pub const CONFIG_ENV: &str = "CARE_MONITOR_CONFIG";
/// Environment variable naming the SQLite database path used by the binary.
pub const DATABASE_ENV: &str = "CARE_MONITOR_DB";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "care_monitor=info"
}

/// Default SQLite location: `<data dir>/care-monitor/monitor.db`.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
        .join("monitor.db")
}

// ═══════════════════════════════════════════
// Types
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `POST {endpoint}/chat/completions` with a bearer key.
    OpenaiCompatible,
    /// `POST {endpoint}/api/generate` on an Ollama server.
    Ollama,
}

/// One entry of the ordered text-generation provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Read the key from this environment variable when `api_key` is unset.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_body_max_len")]
    pub max_response_len: usize,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Explicit key first, then the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret(self.api_key.as_deref(), self.api_key_env.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_push_timeout_ms")]
    pub timeout_ms: u64,
}

impl PushConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret(self.api_key.as_deref(), self.api_key_env.as_deref())
    }
}

/// Retry sweep for records whose push failed on an earlier tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeliveryConfig {
    pub enabled: bool,
    /// Only records at least this old are retried.
    pub min_age_minutes: u32,
    /// Records due longer ago than this are left for the in-app center only.
    pub max_age_minutes: u32,
    pub batch_limit: u32,
}

impl Default for RedeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_age_minutes: 10,
            max_age_minutes: 120,
            batch_limit: 50,
        }
    }
}

impl RedeliveryConfig {
    pub fn min_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.min_age_minutes))
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.max_age_minutes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Milliseconds between timer fires.
    pub tick_interval_ms: u64,
    /// Global advance window in minutes; schedule entries may override it.
    pub advance_window_minutes: u32,
    /// Maximum patients processed concurrently within one tick.
    pub max_concurrency: usize,
    /// Hard cap on notification body length (characters).
    pub body_max_len: usize,
    /// Upper bound on any single store call.
    pub store_timeout_ms: u64,
    pub providers: Vec<ProviderConfig>,
    pub push: Option<PushConfig>,
    /// `None` selects the built-in rule table.
    pub alert_rules: Option<Vec<AlertRule>>,
    pub redelivery: RedeliveryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 60_000,
            advance_window_minutes: 15,
            max_concurrency: 10,
            body_max_len: default_body_max_len(),
            store_timeout_ms: 10_000,
            providers: Vec::new(),
            push: None,
            alert_rules: None,
            redelivery: RedeliveryConfig::default(),
        }
    }
}

fn default_provider_timeout_ms() -> u64 {
    8_000
}

fn default_push_timeout_ms() -> u64 {
    5_000
}

fn default_body_max_len() -> usize {
    220
}

fn resolve_secret(explicit: Option<&str>, env_name: Option<&str>) -> Option<String> {
    explicit
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| env_name.and_then(|name| std::env::var(name).ok()))
        .filter(|k| !k.is_empty())
}

// ═══════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, MonitorError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, MonitorError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.tick_interval_ms == 0 {
            return Err(MonitorError::Config("tick_interval_ms must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(MonitorError::Config("max_concurrency must be > 0".into()));
        }
        if self.body_max_len == 0 {
            return Err(MonitorError::Config("body_max_len must be > 0".into()));
        }
        if self.store_timeout_ms == 0 {
            return Err(MonitorError::Config("store_timeout_ms must be > 0".into()));
        }

        for provider in &self.providers {
            if provider.endpoint.trim().is_empty() || provider.model.trim().is_empty() {
                return Err(MonitorError::Config(format!(
                    "provider '{}' needs an endpoint and a model",
                    provider.name
                )));
            }
            if provider.timeout_ms == 0 {
                return Err(MonitorError::Config(format!(
                    "provider '{}' timeout_ms must be > 0",
                    provider.name
                )));
            }
        }

        if let Some(push) = &self.push {
            if push.endpoint.trim().is_empty() {
                return Err(MonitorError::Config("push.endpoint must not be empty".into()));
            }
        }

        if let Some(rules) = &self.alert_rules {
            for rule in rules {
                rule.validate()?;
            }
        }

        let redelivery = &self.redelivery;
        if redelivery.enabled {
            if redelivery.batch_limit == 0 {
                return Err(MonitorError::Config("redelivery.batch_limit must be > 0".into()));
            }
            if redelivery.max_age_minutes <= redelivery.min_age_minutes {
                return Err(MonitorError::Config(
                    "redelivery.max_age_minutes must exceed min_age_minutes".into(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.tick_interval_ms, 60_000);
        assert_eq!(config.advance_window_minutes, 15);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.body_max_len, 220);
        assert!(config.providers.is_empty());
        assert!(config.push.is_none());
        assert!(config.redelivery.enabled);
        assert_eq!(config.redelivery.max_age(), chrono::Duration::hours(2));
    }

    #[test]
    fn rejects_redelivery_window_that_is_empty() {
        let err = EngineConfig::from_json_str(
            r#"{"redelivery": {"min_age_minutes": 30, "max_age_minutes": 30}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_age_minutes"));

        let disabled = EngineConfig::from_json_str(
            r#"{"redelivery": {"enabled": false, "min_age_minutes": 30, "max_age_minutes": 30}}"#,
        );
        assert!(disabled.is_ok());
    }

    #[test]
    fn parses_provider_chain_in_order() {
        let config = EngineConfig::from_json_str(
            r#"{
                "advance_window_minutes": 30,
                "providers": [
                    {"name": "primary", "kind": "openai_compatible", "endpoint": "https://api.example.com/v1", "model": "gpt-x", "api_key": "k"},
                    {"name": "local", "kind": "ollama", "endpoint": "http://localhost:11434", "model": "llama3", "timeout_ms": 2000}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.advance_window_minutes, 30);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].name, "primary");
        assert_eq!(config.providers[0].timeout_ms, 8_000);
        assert_eq!(config.providers[1].kind, ProviderKind::Ollama);
        assert_eq!(config.providers[1].timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = EngineConfig::from_json_str(r#"{"tick_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn rejects_provider_without_model() {
        let err = EngineConfig::from_json_str(
            r#"{"providers": [{"name": "x", "kind": "ollama", "endpoint": "http://h", "model": " "}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("needs an endpoint and a model"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(MonitorError::Json(_))
        ));
    }

    #[test]
    fn explicit_key_wins_over_env() {
        let provider = ProviderConfig {
            name: "p".into(),
            kind: ProviderKind::OpenaiCompatible,
            endpoint: "https://h".into(),
            model: "m".into(),
            api_key: Some("explicit".into()),
            api_key_env: Some("CARE_MONITOR_TEST_UNSET_KEY".into()),
            timeout_ms: 1000,
            max_response_len: 220,
        };
        assert_eq!(provider.resolve_api_key().as_deref(), Some("explicit"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, r#"{"max_concurrency": 3}"#).unwrap();
        let config = EngineConfig::from_path(&path).unwrap();
        assert_eq!(config.max_concurrency, 3);
    }
}
