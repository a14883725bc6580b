//! Cache configuration, loadable from JSON.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::types::{CacheBudget, ReuseContract};

const DEFAULT_MONITOR_THREAD_NAME: &str = "bitmap-reclaim";

/// Settings selected once when a [`crate::cache::BitmapCache`] is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub budget: CacheBudget,
    pub reuse_contract: ReuseContract,
    /// Directory of the optional disk tier. `None` keeps the cache memory-only.
    pub disk_dir: Option<PathBuf>,
    pub monitor_thread_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget: CacheBudget::default(),
            reuse_contract: ReuseContract::default(),
            disk_dir: None,
            monitor_thread_name: DEFAULT_MONITOR_THREAD_NAME.to_string(),
        }
    }
}

impl CacheConfig {
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).context("parsing cache configuration")
    }

    /// Read a JSON configuration file; absent fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading cache configuration at {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn with_budget(mut self, budget: CacheBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_contract(mut self, contract: ReuseContract) -> Self {
        self.reuse_contract = contract;
        self
    }

    pub fn with_disk_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.disk_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            CacheConfig::from_json_str(r#"{ "reuse_contract": "strict" }"#).expect("parse");
        assert_eq!(config.reuse_contract, ReuseContract::Strict);
        assert_eq!(config.budget, CacheBudget::default());
        assert_eq!(config.monitor_thread_name, DEFAULT_MONITOR_THREAD_NAME);
        assert!(config.disk_dir.is_none());
    }

    #[test]
    fn loads_from_file() -> crate::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("cache.json");
        let expected = CacheConfig::default()
            .with_budget(CacheBudget::new(4096))
            .with_contract(ReuseContract::Unsupported)
            .with_disk_dir(temp.path().join("tiles"));
        fs::write(&path, serde_json::to_string_pretty(&expected)?)?;

        assert_eq!(CacheConfig::load(&path)?, expected);
        Ok(())
    }

    #[test]
    fn malformed_json_reports_context() {
        let err = CacheConfig::from_json_str("{ budget: }").unwrap_err();
        assert!(err.to_string().contains("parsing cache configuration"));
    }
}
