//! Configuration for the conversation pipeline
//!
//! Every deployment tunable (top-K, retry counts, backoff durations,
//! TTLs, the history window, the daily budget) lives here rather than
//! as a hardcoded constant. Structures deserialize from
//! TOML with per-field defaults so a partial config file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::retry::RetryConfig;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub session: SessionConfig,
    pub context: ContextConfig,
    pub safety: SafetyConfig,
    pub model: ModelConfig,
    pub retry: RetryPolicies,
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: PipelineConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::TomlParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.context.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "context.top_k".into(),
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.context.history_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "context.history_window".into(),
                reason: "must be at least 1".into(),
            }
            .into());
        }
        if self.session.daily_budget_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.daily_budget_minutes".into(),
                reason: "must be at least 1".into(),
            }
            .into());
        }
        Ok(())
    }
}

/// Session lifecycle tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default daily allotment, used by the local budget tracker.
    pub daily_budget_minutes: u32,
    /// Sliding TTL for connection records.
    pub connection_ttl_secs: u64,
    /// TTL for ledger entries; gives post-session extraction a full
    /// day to complete even under backlog.
    pub ledger_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            daily_budget_minutes: 30,
            connection_ttl_secs: 30 * 60,
            ledger_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Context retrieval tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// How many graph nodes to pull per (user, persona).
    pub top_k: usize,
    /// TTL for cached context snapshots.
    pub snapshot_ttl_secs: u64,
    /// How many recent ledger turns get folded into the prompt.
    pub history_window: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            snapshot_ttl_secs: 60 * 60,
            history_window: 10,
        }
    }
}

/// Safety screening tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Messages longer than this are refused before classification.
    pub max_message_chars: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 2000,
        }
    }
}

/// Completion model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            temperature: 0.7,
            max_tokens: 300,
        }
    }
}

/// Per-collaborator retry policies. Auth and safety fail closed after
/// their attempts are spent; the model call surfaces a recoverable
/// error instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    pub auth: RetryConfig,
    pub safety: RetryConfig,
    pub llm: RetryConfig,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        let short = RetryConfig {
            max_attempts: 2,
            base_backoff_ms: 200,
            max_backoff_ms: 2_000,
            jitter_ms: 100,
        };
        Self {
            auth: short.clone(),
            safety: short.clone(),
            llm: short,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context.top_k, 20);
        assert_eq!(config.context.history_window, 10);
        assert_eq!(config.session.connection_ttl_secs, 1800);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [context]
            top_k = 5

            [session]
            daily_budget_minutes = 15
            "#
        )
        .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.context.top_k, 5);
        assert_eq!(config.session.daily_budget_minutes, 15);
        // untouched sections keep their defaults
        assert_eq!(config.safety.max_message_chars, 2000);
        assert_eq!(config.retry.llm.max_attempts, 2);
    }

    #[test]
    fn zero_top_k_rejected() {
        let mut config = PipelineConfig::default();
        config.context.top_k = 0;
        assert!(config.validate().is_err());
    }
}
