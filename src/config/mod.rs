//! Resolver configuration
//!
//! Loaded from JSON or TOML; every field has a default so partial files work.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which installed resources count as colliding with an incoming one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Same name and version, or a resolved singleton of the same name;
    /// collision hooks are consulted
    #[default]
    Managed,
    /// No collision checks
    Multiple,
    /// Any installed resource with the same symbolic name
    Single,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "bllvm_resolver=debug"); RUST_LOG wins when set
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Module container and resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Bound on acquiring each resource lock when publishing or mutating
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Resolve attempts before giving up on a batch whose snapshot went stale
    #[serde(default = "default_max_resolve_attempts")]
    pub max_resolve_attempts: u32,

    /// Candidate attempts allowed per search
    #[serde(default = "default_max_search_steps")]
    pub max_search_steps: usize,

    #[serde(default)]
    pub collision_policy: CollisionPolicy,

    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_max_resolve_attempts() -> u32 {
    3
}

fn default_max_search_steps() -> usize {
    100_000
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            max_resolve_attempts: default_max_resolve_attempts(),
            max_search_steps: default_max_search_steps(),
            collision_policy: CollisionPolicy::default(),
            logging: None,
        }
    }
}

impl ResolverConfig {
    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ResolverConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ResolverConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(anyhow::anyhow!("lock_timeout_ms must be greater than 0"));
        }
        if self.max_resolve_attempts == 0 {
            return Err(anyhow::anyhow!(
                "max_resolve_attempts must be at least 1"
            ));
        }
        if self.max_search_steps == 0 {
            return Err(anyhow::anyhow!("max_search_steps must be greater than 0"));
        }
        if let Some(filter) = self.logging.as_ref().and_then(|l| l.filter.as_deref()) {
            if filter.trim().is_empty() {
                return Err(anyhow::anyhow!("logging.filter must not be empty when set"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_resolve_attempts, 3);
        assert_eq!(config.collision_policy, CollisionPolicy::Managed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ResolverConfig = toml::from_str(
            r#"
collision_policy = "single"
max_search_steps = 10

[logging]
filter = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.collision_policy, CollisionPolicy::Single);
        assert_eq!(config.max_search_steps, 10);
        assert_eq!(config.lock_timeout_ms, 5000);
        assert_eq!(
            config.logging.unwrap().filter.as_deref(),
            Some("debug")
        );
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolver.json");
        let mut config = ResolverConfig::default();
        config.max_resolve_attempts = 7;
        config.to_json_file(&path).unwrap();

        let loaded = ResolverConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.max_resolve_attempts, 7);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = ResolverConfig::default();
        config.max_resolve_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ResolverConfig::default();
        config.lock_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
