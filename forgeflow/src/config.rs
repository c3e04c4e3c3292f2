//! Engine configuration.
//!
//! Every knob has a serde default so a partial JSON document is enough.
//! Durations are carried as `*_ms` integers.

use crate::core::Target;
use crate::errors::{ForgeflowError, Result};
use crate::pipeline::RetryConfig;
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What the gate does with requests beyond `max_concurrent_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Queue in FIFO order until a slot frees.
    #[default]
    Queue,
    /// Reject synchronously with `ConcurrencyExhausted`.
    Reject,
}

impl std::str::FromStr for AdmissionMode {
    type Err = ForgeflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "reject" => Ok(Self::Reject),
            other => Err(ForgeflowError::Config(format!(
                "unknown admission mode '{other}' (expected 'queue' or 'reject')"
            ))),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_size() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_cache_max_age_ms() -> u64 {
    24 * 60 * 60 * 1000 // 24h
}

/// Cache store bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether cacheable targets consult the cache at all.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Total size ceiling before LRU eviction.
    #[serde(default = "default_cache_max_size")]
    pub max_size_bytes: u64,
    /// Entries older than this are treated as misses and evicted.
    #[serde(default = "default_cache_max_age_ms")]
    pub max_age_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_size_bytes: default_cache_max_size(),
            max_age_ms: default_cache_max_age_ms(),
        }
    }
}

impl CacheConfig {
    /// Maximum entry age as a [`Duration`].
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_auto_rollback() -> bool {
    true
}

fn default_history_limit() -> usize {
    50
}

fn default_event_capacity() -> usize {
    256
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on simultaneously running jobs.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Queue or reject requests beyond the bound.
    #[serde(default)]
    pub admission_mode: AdmissionMode,
    /// Roll failed deploy jobs back automatically.
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback: bool,
    /// Delay between accepting a job and asking the gate for a slot.
    #[serde(default)]
    pub start_delay_ms: u64,
    /// Wait between step attempts.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Cache bounds.
    #[serde(default)]
    pub cache: CacheConfig,
    /// How many past jobs of a target the analyzer looks at.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Capacity of the broadcast channel behind `Engine::subscribe`.
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            admission_mode: AdmissionMode::default(),
            auto_rollback: default_auto_rollback(),
            start_delay_ms: 0,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            history_limit: default_history_limit(),
            event_channel_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the concurrency bound.
    #[must_use]
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Sets the admission mode.
    #[must_use]
    pub fn with_admission_mode(mut self, mode: AdmissionMode) -> Self {
        self.admission_mode = mode;
        self
    }

    /// Enables or disables automatic rollback.
    #[must_use]
    pub fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback = enabled;
        self
    }

    /// Sets the start delay.
    #[must_use]
    pub fn with_start_delay_ms(mut self, delay: u64) -> Self {
        self.start_delay_ms = delay;
        self
    }

    /// Sets the retry backoff.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cache bounds.
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Start delay as a [`Duration`].
    #[must_use]
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    /// Checks the settings for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(ForgeflowError::Config(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(ForgeflowError::Config(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies `FORGEFLOW_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup.
    ///
    /// Recognised keys: `FORGEFLOW_MAX_CONCURRENT_JOBS`,
    /// `FORGEFLOW_ADMISSION_MODE`, `FORGEFLOW_AUTO_ROLLBACK`,
    /// `FORGEFLOW_START_DELAY_MS`, `FORGEFLOW_CACHE_ENABLED`,
    /// `FORGEFLOW_CACHE_MAX_SIZE_BYTES`, `FORGEFLOW_CACHE_MAX_AGE_MS`.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FORGEFLOW_MAX_CONCURRENT_JOBS") {
            self.max_concurrent_jobs = parse_override("FORGEFLOW_MAX_CONCURRENT_JOBS", &v)?;
        }
        if let Some(v) = lookup("FORGEFLOW_ADMISSION_MODE") {
            self.admission_mode = v.parse()?;
        }
        if let Some(v) = lookup("FORGEFLOW_AUTO_ROLLBACK") {
            self.auto_rollback = parse_override("FORGEFLOW_AUTO_ROLLBACK", &v)?;
        }
        if let Some(v) = lookup("FORGEFLOW_START_DELAY_MS") {
            self.start_delay_ms = parse_override("FORGEFLOW_START_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("FORGEFLOW_CACHE_ENABLED") {
            self.cache.enabled = parse_override("FORGEFLOW_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("FORGEFLOW_CACHE_MAX_SIZE_BYTES") {
            self.cache.max_size_bytes = parse_override("FORGEFLOW_CACHE_MAX_SIZE_BYTES", &v)?;
        }
        if let Some(v) = lookup("FORGEFLOW_CACHE_MAX_AGE_MS") {
            self.cache.max_age_ms = parse_override("FORGEFLOW_CACHE_MAX_AGE_MS", &v)?;
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ForgeflowError::Config(format!("invalid value '{value}' for {key}")))
}

/// A full configuration document: engine settings plus the target catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeflowConfig {
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Targets registered at startup.
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl ForgeflowConfig {
    /// Parses a JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.engine.validate()?;
        for target in &config.targets {
            target.validate()?;
        }
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_json_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.admission_mode, AdmissionMode::Queue);
        assert!(config.auto_rollback);
        assert!(config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = EngineConfig::new().with_max_concurrent_jobs(0);
        assert!(matches!(config.validate(), Err(ForgeflowError::Config(_))));
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_concurrent_jobs": 2, "admission_mode": "reject"}"#)
                .unwrap();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.admission_mode, AdmissionMode::Reject);
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("FORGEFLOW_MAX_CONCURRENT_JOBS", "8"),
            ("FORGEFLOW_AUTO_ROLLBACK", "false"),
            ("FORGEFLOW_ADMISSION_MODE", "Reject"),
            ("FORGEFLOW_CACHE_MAX_AGE_MS", "1000"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::default()
            .apply_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.max_concurrent_jobs, 8);
        assert!(!config.auto_rollback);
        assert_eq!(config.admission_mode, AdmissionMode::Reject);
        assert_eq!(config.cache.max_age(), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_override() {
        let result = EngineConfig::default().apply_overrides(|k| {
            (k == "FORGEFLOW_MAX_CONCURRENT_JOBS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ForgeflowError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "engine": {{"max_concurrent_jobs": 2}},
                "targets": [{{
                    "id": "web",
                    "name": "Web bundle",
                    "kind": "build",
                    "output_dir": "dist",
                    "steps": [{{"id": "install", "name": "Install", "kind": "install", "command": "npm ci"}}]
                }}]
            }}"#
        )
        .unwrap();

        let config = ForgeflowConfig::from_file(file.path()).unwrap();
        assert_eq!(config.engine.max_concurrent_jobs, 2);
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].steps[0].id, "install");
    }

    #[test]
    fn test_from_file_rejects_invalid_target() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"targets": [{{"id": "web", "name": "Web", "steps": []}}]}}"#).unwrap();
        let err = ForgeflowConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("at least one step"));
    }
}
