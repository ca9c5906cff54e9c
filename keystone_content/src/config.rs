use std::{fs, path::Path, time::Duration};

use keystone_shared::hardware_concurrency;
use serde::{Deserialize, Serialize};

use crate::{Error, LoadMode, Result};

/// Configuration of the [`AssetCache`](crate::AssetCache).
///
/// # Example
///
/// ```
/// use keystone_content::AssetCacheConfig;
/// let config = AssetCacheConfig::from_yaml_str("max_worker_threads: 2").unwrap();
/// assert_eq!(config.max_worker_threads, 2);
/// assert_eq!(config.commit_batch_limit, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetCacheConfig {
    /// Upper bound for the number of worker threads. The hardware concurrency is the other bound.
    pub max_worker_threads: usize,
    /// Maximum number of work orders committed per tick. `None` drains the queue.
    pub commit_batch_limit: Option<usize>,
    /// Mode of [`AssetCache::load`](crate::AssetCache::load).
    pub default_mode: LoadMode,
    /// Interval in which an inline request checks for the completion of an in-flight load.
    pub inline_wait_poll_ms: u64,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            max_worker_threads: 3,
            commit_batch_limit: None,
            default_mode: LoadMode::Threaded,
            inline_wait_poll_ms: 5,
        }
    }
}

impl AssetCacheConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|err| Error::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_worker_threads == 0 {
            return Err(Error::InvalidConfig("max_worker_threads must be at least 1".to_owned()));
        }
        if self.commit_batch_limit == Some(0) {
            return Err(Error::InvalidConfig("commit_batch_limit must be at least 1".to_owned()));
        }
        if self.inline_wait_poll_ms == 0 {
            return Err(Error::InvalidConfig("inline_wait_poll_ms must be at least 1".to_owned()));
        }
        Ok(())
    }

    /// Number of worker threads the pool starts.
    pub fn worker_count(&self) -> usize {
        self.max_worker_threads.min(hardware_concurrency()).max(1)
    }

    pub fn inline_wait_poll(&self) -> Duration {
        Duration::from_millis(self.inline_wait_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use keystone_test::{
        spectral::{assert_that, asserting, prelude::*},
        write_asset_file,
    };
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn defaults() {
        let config = AssetCacheConfig::default();
        assert_that!(config.max_worker_threads).is_equal_to(3);
        assert_that!(config.default_mode).is_equal_to(LoadMode::Threaded);
        assert_that!(config.validate()).is_ok();
        assert_that!(config.worker_count()).is_greater_than_or_equal_to(1);
        assert_that!(config.worker_count()).is_less_than_or_equal_to(3);
    }

    #[test]
    fn parses_yaml() {
        let config = AssetCacheConfig::from_yaml_str("commit_batch_limit: 4\ndefault_mode: inline\n").unwrap();
        assert_that!(config.commit_batch_limit).is_equal_to(Some(4));
        assert_that!(config.default_mode).is_equal_to(LoadMode::Inline);
        assert_that!(config.max_worker_threads).is_equal_to(3);
    }

    #[test]
    fn rejects_invalid_values() {
        for yaml in ["max_worker_threads: 0", "commit_batch_limit: 0", "inline_wait_poll_ms: 0", "unknown: 1"] {
            let result = AssetCacheConfig::from_yaml_str(yaml);
            asserting(yaml).that(&matches!(result, Err(Error::InvalidConfig(_)))).is_true();
        }
    }

    #[test]
    fn reads_file() {
        let root = TempDir::new("asset_cache_config").unwrap();
        let path = write_asset_file(root.path(), "cache.yaml", "max_worker_threads: 1\n");
        let config = AssetCacheConfig::from_file(path).unwrap();
        assert_that!(config.worker_count()).is_equal_to(1);
        assert_that!(AssetCacheConfig::from_file(root.path().join("missing.yaml"))).is_err();
    }
}
