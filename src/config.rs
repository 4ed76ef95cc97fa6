//! Store configuration.
//!
//! The launcher owns config loading and hands the parsed section to the
//! core; the core only needs to know which KVS to talk to and which node
//! it is running as.

use anyhow::{bail, Result};
use serde::Deserialize;

fn default_scan_count() -> u64 {
    100
}

/// Configuration for one broker node's view of the shared store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// KVS endpoint, scheme-addressed (e.g. `mem://local`). The scheme
    /// selects the registered backend.
    pub kvs_uri: String,
    /// This broker node's cluster-unique id, used for the presence pair.
    pub node_id: String,
    /// Page size for presence scans.
    #[serde(default = "default_scan_count")]
    pub scan_count: u64,
}

impl StoreConfig {
    pub fn new(kvs_uri: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            kvs_uri: kvs_uri.into(),
            node_id: node_id.into(),
            scan_count: default_scan_count(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.kvs_uri.contains("://") {
            bail!("kvs_uri {:?} has no scheme", self.kvs_uri);
        }
        if self.node_id.is_empty() {
            bail!("node_id must not be empty");
        }
        if self.scan_count == 0 {
            bail!("scan_count must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(StoreConfig::new("mem://local", "node-1").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(StoreConfig::new("localhost", "node-1").validate().is_err());
        assert!(StoreConfig::new("mem://local", "").validate().is_err());
        let mut config = StoreConfig::new("mem://local", "node-1");
        config.scan_count = 0;
        assert!(config.validate().is_err());
    }
}
