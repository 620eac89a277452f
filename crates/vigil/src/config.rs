use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use vigil_audit::{AuditTrailConfig, RetryPolicy};
use vigil_signal::AggregatorConfig;

use crate::error::{RootError, RootResult};

/// Configuration for the signal aggregation fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Per-adapter deadline in milliseconds.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Missing ratio strictly above this marks the aggregate insufficient.
    #[serde(default = "default_max_missing_ratio")]
    pub max_missing_ratio: f64,
}

fn default_deadline_ms() -> u64 {
    200
}

fn default_max_missing_ratio() -> f64 {
    0.5
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            max_missing_ratio: default_max_missing_ratio(),
        }
    }
}

/// Configuration for the audit trail backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Directory holding the JSONL log partitions.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Path of the SQLite fast-index database.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// TTL in days for operational index rows. 0 disables expiry.
    #[serde(default = "default_index_ttl_days")]
    pub index_ttl_days: u64,

    /// Bounded retries for the immutable-log write.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_log_dir() -> PathBuf {
    dirs_or_default(".vigil/audit")
}

fn default_index_path() -> PathBuf {
    dirs_or_default(".vigil/index.db")
}

fn default_index_ttl_days() -> u64 {
    30
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    25
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            index_path: default_index_path(),
            index_ttl_days: default_index_ttl_days(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Top-level configuration for the vigil binary.
///
/// Loaded from a TOML file (typically `~/.vigil/config.toml`). The policy
/// rule set is a separate versioned JSON document at `policy_path`; this
/// file only says where to find it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VigilConfig {
    /// Environment component of every audit partition key.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Path to the versioned policy document (JSON).
    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,

    #[serde(default)]
    pub signal: SignalConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_policy_path() -> PathBuf {
    dirs_or_default(".vigil/policy.json")
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            policy_path: default_policy_path(),
            signal: SignalConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl VigilConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(RootError::Io)?;
        let config: VigilConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(path, contents).map_err(RootError::Io)?;
        Ok(())
    }

    pub fn validate(&self) -> RootResult<()> {
        if self.environment.trim().is_empty() {
            return Err(RootError::Config("environment must not be empty".into()));
        }
        if self.environment.contains('/') {
            return Err(RootError::Config(
                "environment must not contain '/' (it names audit partitions)".into(),
            ));
        }
        if self.signal.deadline_ms == 0 {
            return Err(RootError::Config("signal.deadline_ms must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.signal.max_missing_ratio) {
            return Err(RootError::Config(format!(
                "signal.max_missing_ratio must be between 0.0 and 1.0, got {}",
                self.signal.max_missing_ratio
            )));
        }
        if self.audit.retry_max_attempts == 0 {
            return Err(RootError::Config(
                "audit.retry_max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            deadline_ms: self.signal.deadline_ms,
            max_missing_ratio: self.signal.max_missing_ratio,
        }
    }

    pub fn audit_trail_config(&self) -> AuditTrailConfig {
        AuditTrailConfig {
            environment: self.environment.clone(),
            retry: RetryPolicy {
                max_attempts: self.audit.retry_max_attempts,
                backoff_ms: self.audit.retry_backoff_ms,
            },
            index_ttl_secs: match self.audit.index_ttl_days {
                0 => None,
                days => Some(days * 24 * 60 * 60),
            },
        }
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".vigil/config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VigilConfig::default();
        assert_eq!(config.environment, "production");
        assert_eq!(config.signal.deadline_ms, 200);
        assert!((config.signal.max_missing_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.audit.retry_max_attempts, 3);
        assert_eq!(config.audit.index_ttl_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
environment = "staging"
policy_path = "/tmp/vigil-policy.json"

[signal]
deadline_ms = 150
max_missing_ratio = 0.34

[audit]
log_dir = "/tmp/vigil-audit"
index_path = "/tmp/vigil-index.db"
index_ttl_days = 7
retry_max_attempts = 5
retry_backoff_ms = 10
"#;
        let config: VigilConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.environment, "staging");
        assert_eq!(config.signal.deadline_ms, 150);
        assert_eq!(config.audit.retry_max_attempts, 5);
        assert_eq!(config.audit.log_dir, PathBuf::from("/tmp/vigil-audit"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut empty_env = VigilConfig::default();
        empty_env.environment = "  ".into();
        assert!(empty_env.validate().is_err());

        let mut slashed = VigilConfig::default();
        slashed.environment = "prod/eu".into();
        assert!(slashed.validate().is_err());

        let mut zero_deadline = VigilConfig::default();
        zero_deadline.signal.deadline_ms = 0;
        assert!(zero_deadline.validate().is_err());

        let mut bad_ratio = VigilConfig::default();
        bad_ratio.signal.max_missing_ratio = 1.2;
        assert!(bad_ratio.validate().is_err());

        let mut no_retries = VigilConfig::default();
        no_retries.audit.retry_max_attempts = 0;
        assert!(no_retries.validate().is_err());
    }

    #[test]
    fn test_ttl_zero_disables_expiry() {
        let mut config = VigilConfig::default();
        config.audit.index_ttl_days = 0;
        assert!(config.audit_trail_config().index_ttl_secs.is_none());

        config.audit.index_ttl_days = 2;
        assert_eq!(
            config.audit_trail_config().index_ttl_secs,
            Some(2 * 24 * 60 * 60)
        );
    }

    #[test]
    fn test_config_load_missing_file_is_default() {
        let config = VigilConfig::load(Path::new("/nonexistent/vigil.toml")).unwrap();
        assert_eq!(config.environment, "production");
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!(
            "vigil-test-config-{:?}-{}",
            std::thread::current().id(),
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("config.toml");

        let mut config = VigilConfig::default();
        config.environment = "staging".into();
        config.signal.deadline_ms = 120;
        config.save(&path).unwrap();

        let loaded = VigilConfig::load(&path).unwrap();
        assert_eq!(loaded.environment, "staging");
        assert_eq!(loaded.signal.deadline_ms, 120);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
