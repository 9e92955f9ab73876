//! Replication cache configuration
//!
//! Loaded from environment variables or TOML with defaults suitable for
//! development. Invalid configuration is fatal at startup.

use crate::{CacheError, CacheResult, ConfigError, TenantKey, TEMPLATE_TENANT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default store stem when none is configured.
pub const DEFAULT_DATABASE: &str = "data";

/// Directory used in place of a namespace when none is configured.
pub const DEFAULT_NAMESPACE_DIR: &str = "db";

/// Where replica stores live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// One in-memory store per tenant.
    Memory,
    /// One LMDB environment per tenant under a base directory.
    Disk {
        /// Store stem; tenant and template stores derive their names from it.
        database: String,
        base_dir: String,
        /// Root the base directory in the process temp dir instead of the cwd.
        use_tmp_dir: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl StorageConfig {
    pub fn is_disk(&self) -> bool {
        matches!(self, Self::Disk { .. })
    }
}

/// Replication cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub enabled: bool,
    /// Qualified-name prefix restricting which entities are in scope.
    pub namespace: Option<String>,
    /// Cache group served by this instance.
    pub group: Option<String>,
    /// Replicate derived views, localized data and text variants as deployed.
    pub deploy: bool,
    /// Block reads until preparation settles.
    pub wait: bool,
    pub auto_load: bool,
    /// Warm preload-annotated entities after every eligible read.
    pub preload: bool,
    /// Serve full-text search from the replica.
    pub search: bool,
    /// Run cache and primary side by side to compare latency.
    pub measure: bool,
    /// Validate row counts during and after each load.
    pub validate_rows: bool,
    /// Prune after every completed preparation.
    pub prune: bool,
    pub chunk_size: usize,
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    /// Failures tolerated before an entry becomes invalid.
    pub retries: u32,
    /// Replica size budget in bytes, divided across tenants.
    pub size_budget: u64,
    /// Zero disables periodic pruning.
    #[serde(rename = "prune_interval_ms", with = "duration_ms")]
    pub prune_interval: Duration,
    /// Zero disables periodic statistics logging.
    #[serde(rename = "stats_interval_ms", with = "duration_ms")]
    pub stats_interval: Duration,
    pub storage: StorageConfig,
    /// LMDB map size per tenant store.
    pub max_store_size_mb: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: None,
            group: None,
            deploy: false,
            wait: false,
            auto_load: true,
            preload: false,
            search: false,
            measure: false,
            validate_rows: true,
            prune: false,
            chunk_size: 1000,
            ttl: Duration::from_secs(3600),
            retries: 3,
            size_budget: 10 * 1024 * 1024,
            prune_interval: Duration::ZERO,
            stats_interval: Duration::ZERO,
            storage: StorageConfig::Memory,
            max_store_size_mb: 256,
        }
    }
}

impl ReplicationConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `REPLICA_ENABLED`, `REPLICA_DEPLOY`, `REPLICA_WAIT`, `REPLICA_AUTO_LOAD`,
    ///   `REPLICA_PRELOAD`, `REPLICA_SEARCH`, `REPLICA_MEASURE`,
    ///   `REPLICA_VALIDATE_ROWS`, `REPLICA_PRUNE`: "true" or "false"
    /// - `REPLICA_NAMESPACE`, `REPLICA_GROUP`: optional strings
    /// - `REPLICA_CHUNK_SIZE` (default: 1000)
    /// - `REPLICA_TTL_MS` (default: 3600000)
    /// - `REPLICA_RETRIES` (default: 3)
    /// - `REPLICA_SIZE_BUDGET` bytes (default: 10 MiB)
    /// - `REPLICA_PRUNE_INTERVAL_MS`, `REPLICA_STATS_INTERVAL_MS` (default: 0, off)
    /// - `REPLICA_DATABASE`: store stem; unset or `:memory:` keeps stores in memory
    /// - `REPLICA_BASE_DIR` (default: ".replica"), `REPLICA_USE_TMP_DIR` (default: false)
    /// - `REPLICA_MAX_STORE_SIZE_MB` (default: 256)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let storage = match std::env::var("REPLICA_DATABASE").ok() {
            Some(database) if !database.is_empty() && database != ":memory:" => {
                StorageConfig::Disk {
                    database,
                    base_dir: std::env::var("REPLICA_BASE_DIR")
                        .unwrap_or_else(|_| ".replica".to_string()),
                    use_tmp_dir: env_parse("REPLICA_USE_TMP_DIR", false),
                }
            }
            _ => defaults.storage.clone(),
        };

        Self {
            enabled: env_parse("REPLICA_ENABLED", defaults.enabled),
            namespace: std::env::var("REPLICA_NAMESPACE").ok().or(defaults.namespace),
            group: std::env::var("REPLICA_GROUP").ok().or(defaults.group),
            deploy: env_parse("REPLICA_DEPLOY", defaults.deploy),
            wait: env_parse("REPLICA_WAIT", defaults.wait),
            auto_load: env_parse("REPLICA_AUTO_LOAD", defaults.auto_load),
            preload: env_parse("REPLICA_PRELOAD", defaults.preload),
            search: env_parse("REPLICA_SEARCH", defaults.search),
            measure: env_parse("REPLICA_MEASURE", defaults.measure),
            validate_rows: env_parse("REPLICA_VALIDATE_ROWS", defaults.validate_rows),
            prune: env_parse("REPLICA_PRUNE", defaults.prune),
            chunk_size: env_parse("REPLICA_CHUNK_SIZE", defaults.chunk_size),
            ttl: Duration::from_millis(env_parse(
                "REPLICA_TTL_MS",
                defaults.ttl.as_millis() as u64,
            )),
            retries: env_parse("REPLICA_RETRIES", defaults.retries),
            size_budget: env_parse("REPLICA_SIZE_BUDGET", defaults.size_budget),
            prune_interval: Duration::from_millis(env_parse("REPLICA_PRUNE_INTERVAL_MS", 0)),
            stats_interval: Duration::from_millis(env_parse("REPLICA_STATS_INTERVAL_MS", 0)),
            storage,
            max_store_size_mb: env_parse("REPLICA_MAX_STORE_SIZE_MB", defaults.max_store_size_mb),
        }
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> CacheResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_deploy(mut self, deploy: bool) -> Self {
        self.deploy = deploy;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn with_search(mut self, search: bool) -> Self {
        self.search = search;
        self
    }

    pub fn with_measure(mut self, measure: bool) -> Self {
        self.measure = measure;
        self
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_size_budget(mut self, size_budget: u64) -> Self {
        self.size_budget = size_budget;
        self
    }

    pub fn with_intervals(mut self, prune_interval: Duration, stats_interval: Duration) -> Self {
        self.prune_interval = prune_interval;
        self.stats_interval = stats_interval;
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_max_store_size_mb(mut self, max_store_size_mb: usize) -> Self {
        self.max_store_size_mb = max_store_size_mb;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - chunk_size > 0
    /// - ttl and size_budget are positive
    /// - disk stores have a usable stem and a positive map size
    /// - a temp-dir root is not combined with an absolute base directory
    pub fn validate(&self) -> CacheResult<()> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "0", "chunk_size must be greater than 0"));
        }

        if self.ttl.is_zero() {
            return Err(invalid(
                "ttl",
                &format!("{:?}", self.ttl),
                "ttl must be positive",
            ));
        }

        if self.size_budget == 0 {
            return Err(invalid("size_budget", "0", "size_budget must be positive"));
        }

        if let StorageConfig::Disk {
            database,
            base_dir,
            use_tmp_dir,
        } = &self.storage
        {
            if database.is_empty() || database == TEMPLATE_TENANT {
                return Err(invalid(
                    "storage.database",
                    database,
                    "database must be a non-empty name other than the template name",
                ));
            }
            if self.max_store_size_mb == 0 {
                return Err(invalid(
                    "max_store_size_mb",
                    "0",
                    "max_store_size_mb must be positive",
                ));
            }
            if *use_tmp_dir && Path::new(base_dir).is_absolute() {
                return Err(CacheError::Config(ConfigError::IncompatibleOptions {
                    option_a: "storage.use_tmp_dir".to_string(),
                    option_b: format!("absolute storage.base_dir {base_dir}"),
                }));
            }
        }

        Ok(())
    }

    /// Store location for a tenant, or `None` for in-memory storage.
    pub fn store_path(&self, tenant: &TenantKey) -> Option<PathBuf> {
        let suffix = tenant.name().map(|name| format!("-{name}"));
        self.path_with_suffix(suffix.as_deref())
    }

    /// Location of the template store, or `None` for in-memory storage.
    pub fn template_path(&self) -> Option<PathBuf> {
        self.path_with_suffix(Some(&format!("-{TEMPLATE_TENANT}")))
    }

    fn path_with_suffix(&self, suffix: Option<&str>) -> Option<PathBuf> {
        let StorageConfig::Disk {
            database,
            base_dir,
            use_tmp_dir,
        } = &self.storage
        else {
            return None;
        };

        let root = if *use_tmp_dir {
            std::env::temp_dir()
        } else {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        };

        let mut path = root.join(base_dir);
        path.push(self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE_DIR));
        if let Some(group) = &self.group {
            path.push(group);
        }
        path.push(format!("{database}{}", suffix.unwrap_or_default()));
        Some(path)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> CacheError {
    CacheError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_disk_storage() -> impl Strategy<Value = StorageConfig> {
        ("[a-z]{1,8}", "[a-z]{1,8}(/[a-z]{1,8})?", any::<bool>())
            .prop_filter("template stem", |(database, _, _)| database != TEMPLATE_TENANT)
            .prop_map(|(database, base_dir, use_tmp_dir)| StorageConfig::Disk {
                database,
                base_dir,
                use_tmp_dir,
            })
    }

    fn arb_storage() -> impl Strategy<Value = StorageConfig> {
        prop_oneof![Just(StorageConfig::Memory), arb_disk_storage()]
    }

    fn arb_config() -> impl Strategy<Value = ReplicationConfig> {
        (
            (
                proptest::option::of("[a-z]{1,8}"),
                proptest::option::of("[a-z]{1,8}"),
                any::<bool>(),
                any::<bool>(),
                any::<bool>(),
            ),
            (
                1usize..10_000,
                1u64..10_000_000,
                0u32..10,
                1u64..1_000_000_000,
                0u64..100_000,
            ),
            arb_storage(),
        )
            .prop_map(
                |(
                    (group, namespace, deploy, wait, measure),
                    (chunk_size, ttl_ms, retries, size_budget, interval_ms),
                    storage,
                )| {
                    let mut config = ReplicationConfig::default()
                        .with_deploy(deploy)
                        .with_wait(wait)
                        .with_measure(measure)
                        .with_chunk_size(chunk_size)
                        .with_ttl(Duration::from_millis(ttl_ms))
                        .with_retries(retries)
                        .with_size_budget(size_budget)
                        .with_intervals(
                            Duration::from_millis(interval_ms),
                            Duration::from_millis(interval_ms / 2),
                        )
                        .with_storage(storage);
                    config.group = group;
                    config.namespace = namespace;
                    config
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: a valid configuration survives a TOML round trip
        #[test]
        fn prop_toml_round_trip(config in arb_config()) {
            prop_assert!(config.validate().is_ok());
            let source = toml::to_string(&config).unwrap();
            let parsed = ReplicationConfig::from_toml_str(&source).unwrap();
            prop_assert_eq!(parsed, config);
        }

        /// Property: every named tenant gets its own store, apart from the template
        #[test]
        fn prop_named_stores_are_distinct(
            storage in arb_disk_storage(),
            a in "[a-z]{1,8}",
            b in "[a-z]{1,8}",
        ) {
            prop_assume!(a != TEMPLATE_TENANT && b != TEMPLATE_TENANT);
            let config = ReplicationConfig::default().with_storage(storage);

            let a_path = config.store_path(&TenantKey::from(a.as_str())).unwrap();
            let b_path = config.store_path(&TenantKey::from(b.as_str())).unwrap();
            let default_path = config.store_path(&TenantKey::Default).unwrap();
            let template_path = config.template_path().unwrap();

            prop_assert_eq!(a == b, a_path == b_path);
            prop_assert_ne!(&a_path, &default_path);
            prop_assert_ne!(&a_path, &template_path);
            prop_assert_eq!(a_path.parent(), template_path.parent());
        }
    }
}
