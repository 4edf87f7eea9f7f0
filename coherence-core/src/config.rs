// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validates harness and backend configuration before any backend starts.
//! Any invalid field results in a HardValidationError that prevents the run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::{CoherenceError, CoherenceResult, HardValidationError};
use crate::types::BackendKind;

/// Floor applied to the number of measured iterations.
pub const MIN_MEASUREMENT_ITERATIONS: u32 = 5;

const MAX_OPERATION_TIMEOUT_MS: u64 = 600_000;
const MAX_BULK_SIZE: usize = 100_000;
const MAX_COMMIT_INTERVAL_MS: u64 = 10_000;

/// Raw harness settings as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHarnessConfig {
    #[serde(default = "default_warmup_iterations")]
    warmup_iterations: u32,
    #[serde(default)]
    warmup_min_ms: u64,
    #[serde(default = "default_iterations")]
    iterations: u32,
    #[serde(default = "default_operation_timeout_ms")]
    operation_timeout_ms: u64,
    #[serde(default = "default_bulk_size")]
    bulk_size: usize,
    #[serde(default)]
    parallel_backends: bool,
    #[serde(default = "default_true")]
    keep_raw_samples: bool,
}

fn default_warmup_iterations() -> u32 {
    10
}

fn default_iterations() -> u32 {
    100
}

fn default_operation_timeout_ms() -> u64 {
    5000
}

fn default_bulk_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for RawHarnessConfig {
    fn default() -> Self {
        Self {
            warmup_iterations: default_warmup_iterations(),
            warmup_min_ms: 0,
            iterations: default_iterations(),
            operation_timeout_ms: default_operation_timeout_ms(),
            bulk_size: default_bulk_size(),
            parallel_backends: false,
            keep_raw_samples: true,
        }
    }
}

/// Raw local cache settings.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCacheSettings {
    max_entries: Option<usize>,
    ttl_ms: Option<u64>,
    max_idle_ms: Option<u64>,
}

/// Raw backend entry, tagged by `kind`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
enum RawBackendConfig {
    SnapshotStore {
        name: String,
        directory: Option<String>,
        watch_interval_ms: Option<u64>,
        #[serde(default)]
        latency_us: u64,
        cache: Option<RawCacheSettings>,
    },
    LogView {
        name: String,
        #[serde(default = "default_commit_interval_ms")]
        commit_interval_ms: u64,
        #[serde(default)]
        latency_us: u64,
    },
    DistributedMap {
        name: String,
        #[serde(default)]
        latency_us: u64,
        #[serde(default)]
        invalidation_delay_us: u64,
        cache: Option<RawCacheSettings>,
    },
    TrackedKv {
        name: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
        #[serde(default)]
        tracking: TrackingStrategy,
        #[serde(default)]
        latency_us: u64,
        cache: Option<RawCacheSettings>,
    },
}

fn default_commit_interval_ms() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "user:".to_string()
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    harness: RawHarnessConfig,
    backends: Vec<RawBackendConfig>,
}

/// Validated harness settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub warmup_iterations: u32,
    /// Warmup also lasts at least this long.
    pub warmup_min: Duration,
    /// Measured repetitions per operation kind, never below the floor.
    pub iterations: u32,
    pub operation_timeout: Duration,
    pub bulk_size: usize,
    pub parallel_backends: bool,
    pub keep_raw_samples: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            warmup_iterations: default_warmup_iterations(),
            warmup_min: Duration::ZERO,
            iterations: default_iterations(),
            operation_timeout: Duration::from_millis(default_operation_timeout_ms()),
            bulk_size: default_bulk_size(),
            parallel_backends: false,
            keep_raw_samples: true,
        }
    }
}

/// Validated local cache settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_entries: Option<usize>,
    pub ttl: Option<Duration>,
    pub max_idle: Option<Duration>,
}

impl CacheSettings {
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::default()
        }
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        let mut config = CacheConfig::new();
        if let Some(max) = self.max_entries {
            config = config.with_max_entries(max);
        }
        if let Some(ttl) = self.ttl {
            config = config.with_ttl(ttl);
        }
        if let Some(idle) = self.max_idle {
            config = config.with_max_idle(idle);
        }
        config
    }
}

/// Which clients a tracked key-value store notifies on a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStrategy {
    /// Only keys this client has read.
    #[default]
    Default,
    /// Every key under the configured prefix.
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSettings {
    pub name: String,
    /// Temporary directory when `None`.
    pub directory: Option<PathBuf>,
    /// Background announcement polling; off when `None`.
    pub watch_interval: Option<Duration>,
    pub latency: Duration,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogViewSettings {
    pub name: String,
    pub commit_interval: Duration,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedMapSettings {
    pub name: String,
    pub latency: Duration,
    pub invalidation_delay: Duration,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedKvSettings {
    pub name: String,
    pub key_prefix: String,
    pub tracking: TrackingStrategy,
    pub latency: Duration,
    pub cache: CacheSettings,
}

/// Validated configuration of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    SnapshotStore(SnapshotSettings),
    LogView(LogViewSettings),
    DistributedMap(DistributedMapSettings),
    TrackedKv(TrackedKvSettings),
}

impl BackendConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::SnapshotStore(s) => &s.name,
            Self::LogView(s) => &s.name,
            Self::DistributedMap(s) => &s.name,
            Self::TrackedKv(s) => &s.name,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::SnapshotStore(_) => BackendKind::SnapshotStore,
            Self::LogView(_) => BackendKind::LogView,
            Self::DistributedMap(_) => BackendKind::DistributedMap,
            Self::TrackedKv(_) => BackendKind::TrackedKv,
        }
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub harness: HarnessConfig,
    pub backends: Vec<BackendConfig>,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> CoherenceResult<BenchmarkConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CoherenceError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoherenceError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> CoherenceResult<BenchmarkConfig> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| CoherenceError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// The four-backend suite with in-process defaults.
    pub fn default_config() -> BenchmarkConfig {
        let latency = Duration::from_micros(200);
        BenchmarkConfig {
            harness: HarnessConfig::default(),
            backends: vec![
                BackendConfig::SnapshotStore(SnapshotSettings {
                    name: "snapshot".to_string(),
                    directory: None,
                    watch_interval: None,
                    latency: Duration::ZERO,
                    cache: CacheSettings::bounded(10_000),
                }),
                BackendConfig::LogView(LogViewSettings {
                    name: "log-view".to_string(),
                    commit_interval: Duration::from_millis(default_commit_interval_ms()),
                    latency,
                }),
                BackendConfig::DistributedMap(DistributedMapSettings {
                    name: "near-cache".to_string(),
                    latency,
                    invalidation_delay: Duration::ZERO,
                    cache: CacheSettings::bounded(100_000),
                }),
                BackendConfig::TrackedKv(TrackedKvSettings {
                    name: "tracked-kv".to_string(),
                    key_prefix: default_key_prefix(),
                    tracking: TrackingStrategy::Default,
                    latency,
                    cache: CacheSettings::bounded(10_000),
                }),
            ],
        }
    }

    fn validate(raw: RawConfig) -> CoherenceResult<BenchmarkConfig> {
        let harness = Self::validate_harness(raw.harness)?;

        let mut backends = Vec::with_capacity(raw.backends.len());
        let mut seen_names = HashSet::new();

        for (index, raw_backend) in raw.backends.into_iter().enumerate() {
            let backend = Self::validate_backend(raw_backend, index)?;

            if !seen_names.insert(backend.name().to_string()) {
                return Err(HardValidationError::DuplicateBackendName {
                    name: backend.name().to_string(),
                }
                .into());
            }

            backends.push(backend);
        }

        if backends.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one backend must be defined".to_string(),
            }
            .into());
        }

        Ok(BenchmarkConfig { harness, backends })
    }

    fn validate_harness(raw: RawHarnessConfig) -> CoherenceResult<HarnessConfig> {
        if raw.iterations < MIN_MEASUREMENT_ITERATIONS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "iterations",
                value: raw.iterations.to_string(),
                reason: format!("Must be at least {}", MIN_MEASUREMENT_ITERATIONS),
            }
            .into());
        }

        if raw.operation_timeout_ms == 0 || raw.operation_timeout_ms > MAX_OPERATION_TIMEOUT_MS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "operation_timeout_ms",
                value: raw.operation_timeout_ms.to_string(),
                reason: format!("Must be between 1 and {}ms", MAX_OPERATION_TIMEOUT_MS),
            }
            .into());
        }

        if raw.bulk_size == 0 || raw.bulk_size > MAX_BULK_SIZE {
            return Err(HardValidationError::InvalidFieldValue {
                field: "bulk_size",
                value: raw.bulk_size.to_string(),
                reason: format!("Must be between 1 and {}", MAX_BULK_SIZE),
            }
            .into());
        }

        Ok(HarnessConfig {
            warmup_iterations: raw.warmup_iterations,
            warmup_min: Duration::from_millis(raw.warmup_min_ms),
            iterations: raw.iterations,
            operation_timeout: Duration::from_millis(raw.operation_timeout_ms),
            bulk_size: raw.bulk_size,
            parallel_backends: raw.parallel_backends,
            keep_raw_samples: raw.keep_raw_samples,
        })
    }

    fn validate_backend(raw: RawBackendConfig, index: usize) -> CoherenceResult<BackendConfig> {
        let config = match raw {
            RawBackendConfig::SnapshotStore {
                name,
                directory,
                watch_interval_ms,
                latency_us,
                cache,
            } => {
                if watch_interval_ms == Some(0) {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "watch_interval_ms",
                        value: "0".to_string(),
                        reason: "Watch interval must be greater than 0".to_string(),
                    }
                    .into());
                }
                BackendConfig::SnapshotStore(SnapshotSettings {
                    name: Self::validate_name(name, index)?,
                    directory: directory.map(PathBuf::from),
                    watch_interval: watch_interval_ms.map(Duration::from_millis),
                    latency: Duration::from_micros(latency_us),
                    cache: Self::validate_cache(cache.unwrap_or_default())?,
                })
            }
            RawBackendConfig::LogView {
                name,
                commit_interval_ms,
                latency_us,
            } => {
                if commit_interval_ms > MAX_COMMIT_INTERVAL_MS {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "commit_interval_ms",
                        value: commit_interval_ms.to_string(),
                        reason: format!("Must not exceed {}ms", MAX_COMMIT_INTERVAL_MS),
                    }
                    .into());
                }
                BackendConfig::LogView(LogViewSettings {
                    name: Self::validate_name(name, index)?,
                    commit_interval: Duration::from_millis(commit_interval_ms),
                    latency: Duration::from_micros(latency_us),
                })
            }
            RawBackendConfig::DistributedMap {
                name,
                latency_us,
                invalidation_delay_us,
                cache,
            } => BackendConfig::DistributedMap(DistributedMapSettings {
                name: Self::validate_name(name, index)?,
                latency: Duration::from_micros(latency_us),
                invalidation_delay: Duration::from_micros(invalidation_delay_us),
                cache: Self::validate_cache(cache.unwrap_or_default())?,
            }),
            RawBackendConfig::TrackedKv {
                name,
                key_prefix,
                tracking,
                latency_us,
                cache,
            } => {
                if key_prefix.is_empty() {
                    return Err(HardValidationError::InvalidFieldValue {
                        field: "key_prefix",
                        value: String::new(),
                        reason: "Key prefix cannot be empty".to_string(),
                    }
                    .into());
                }
                BackendConfig::TrackedKv(TrackedKvSettings {
                    name: Self::validate_name(name, index)?,
                    key_prefix,
                    tracking,
                    latency: Duration::from_micros(latency_us),
                    cache: Self::validate_cache(cache.unwrap_or_default())?,
                })
            }
        };

        Ok(config)
    }

    fn validate_name(name: String, index: usize) -> CoherenceResult<String> {
        if name.trim().is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "name",
                context: format!("backend at index {}", index),
            }
            .into());
        }
        Ok(name)
    }

    fn validate_cache(raw: RawCacheSettings) -> CoherenceResult<CacheSettings> {
        if raw.max_entries == Some(0) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "max_entries",
                value: "0".to_string(),
                reason: "Cache capacity must be at least 1".to_string(),
            }
            .into());
        }

        Ok(CacheSettings {
            max_entries: raw.max_entries,
            ttl: raw.ttl_ms.map(Duration::from_millis),
            max_idle: raw.max_idle_ms.map(Duration::from_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
harness:
  warmup_iterations: 10
  iterations: 100
  operation_timeout_ms: 5000
  bulk_size: 50
  parallel_backends: true

backends:
  - kind: snapshot_store
    name: snapshot
    cache: { max_entries: 10000 }
  - kind: log_view
    name: log-view
    commit_interval_ms: 5
    latency_us: 200
  - kind: distributed_map
    name: near-cache
    invalidation_delay_us: 100
    cache: { max_entries: 100000, ttl_ms: 60000 }
  - kind: tracked_kv
    name: tracked-kv
    key_prefix: "user:"
    tracking: broadcast
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.backends.len(), 4);
        assert_eq!(config.harness.bulk_size, 50);
        assert!(config.harness.parallel_backends);

        match &config.backends[2] {
            BackendConfig::DistributedMap(settings) => {
                assert_eq!(settings.invalidation_delay, Duration::from_micros(100));
                assert_eq!(settings.cache.ttl, Some(Duration::from_secs(60)));
            }
            other => panic!("unexpected backend {:?}", other),
        }
        match &config.backends[3] {
            BackendConfig::TrackedKv(settings) => {
                assert_eq!(settings.tracking, TrackingStrategy::Broadcast);
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_missing_backends() {
        let yaml = r#"
harness:
  iterations: 10
backends: []
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_duplicate_names() {
        let yaml = r#"
backends:
  - kind: log_view
    name: same
  - kind: distributed_map
    name: same
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(
            err,
            CoherenceError::HardValidation(HardValidationError::DuplicateBackendName { .. })
        ));
    }

    #[test]
    fn test_iterations_below_floor() {
        let yaml = r#"
harness:
  iterations: 4
backends:
  - kind: log_view
    name: log
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_timeout_out_of_range() {
        let yaml = r#"
harness:
  operation_timeout_ms: 0
backends:
  - kind: log_view
    name: log
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_zero_cache_capacity() {
        let yaml = r#"
backends:
  - kind: distributed_map
    name: near
    cache: { max_entries: 0 }
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_empty_key_prefix() {
        let yaml = r#"
backends:
  - kind: tracked_kv
    name: kv
    key_prefix: ""
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_unknown_kind() {
        let yaml = r#"
backends:
  - kind: carrier_pigeon
    name: coo
"#;
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(CoherenceError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_misspelled_backend_option() {
        let yaml = r#"
backends:
  - kind: distributed_map
    name: near
    latency_ms: 2
"#;
        let err = ConfigLoader::load_string(yaml).unwrap_err();
        assert!(matches!(err, CoherenceError::ConfigParse { .. }));
        assert!(err.to_string().contains("latency_ms"), "{}", err);

        // An option that belongs to another kind is rejected too.
        let yaml = r#"
backends:
  - kind: log_view
    name: log
    key_prefix: "user:"
"#;
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
backends:
  - kind: tracked_kv
    name: kv
"#;
        let config = ConfigLoader::load_string(yaml).unwrap();
        assert_eq!(config.harness, HarnessConfig::default());
        match &config.backends[0] {
            BackendConfig::TrackedKv(settings) => {
                assert_eq!(settings.key_prefix, "user:");
                assert_eq!(settings.tracking, TrackingStrategy::Default);
                assert_eq!(settings.cache, CacheSettings::default());
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_default_suite() {
        let config = ConfigLoader::default_config();
        let kinds: Vec<BackendKind> = config.backends.iter().map(BackendConfig::kind).collect();
        assert_eq!(
            kinds,
            vec![
                BackendKind::SnapshotStore,
                BackendKind::LogView,
                BackendKind::DistributedMap,
                BackendKind::TrackedKv,
            ]
        );
    }

    #[test]
    fn test_shipped_config_matches_default_suite() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../coherence.yaml");
        let config = ConfigLoader::load_file(path).unwrap();
        let default = ConfigLoader::default_config();
        assert_eq!(config.harness, default.harness);
        assert_eq!(config.backends, default.backends);
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::load_file("/nonexistent/coherence.yaml").unwrap_err();
        assert!(matches!(err, CoherenceError::ConfigNotFound { .. }));
    }
}
