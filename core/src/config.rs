//! Node configuration
//!
//! One `NodeConfig` per process, loaded from a JSON file. Every field has a
//! default so a config file only needs to name what differs.

use crate::types::FacilityId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which side of the synchronization this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Offline-capable field node
    #[default]
    LocalMachine,
    /// Central, always-connected node
    OnlineWeb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: NodeRole,

    /// Facility this node acts for
    pub facility_id: FacilityId,

    /// Facilities whose addressed events this node pulls (its own included)
    pub known_facilities: Vec<FacilityId>,

    /// Directory holding the event and backup databases
    pub storage_path: PathBuf,

    pub replay_interval_secs: u64,
    pub exchange_interval_secs: u64,

    /// Upper bound of the random delay before the first exchange
    pub max_start_jitter_secs: u64,

    /// Maximum encoded size of one push request
    pub push_byte_budget: usize,

    pub archive_interval_secs: u64,
    pub archive_page_size: usize,

    pub lock_lease_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::LocalMachine,
            facility_id: FacilityId::default(),
            known_facilities: Vec::new(),
            storage_path: PathBuf::from("./fieldsync-data"),
            replay_interval_secs: 30,
            exchange_interval_secs: 300,
            max_start_jitter_secs: 60,
            push_byte_budget: 512 * 1024,
            archive_interval_secs: 3600,
            archive_page_size: 100,
            lock_lease_secs: 30,
        }
    }
}

impl NodeConfig {
    /// Default configuration for a node of `role` acting for `facility_id`
    pub fn new(role: NodeRole, facility_id: FacilityId) -> Self {
        Self {
            role,
            facility_id,
            known_facilities: vec![facility_id],
            ..Self::default()
        }
    }

    /// Read and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: NodeConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.facility_id.is_nil() {
            return Err(Error::Config("facility_id must be set".to_string()));
        }
        if self.role == NodeRole::LocalMachine && !self.known_facilities.contains(&self.facility_id) {
            return Err(Error::Config(
                "known_facilities must include the node's own facility".to_string(),
            ));
        }
        if self.push_byte_budget == 0 {
            return Err(Error::Config("push_byte_budget must be positive".to_string()));
        }
        if self.archive_page_size == 0 {
            return Err(Error::Config("archive_page_size must be positive".to_string()));
        }
        if self.replay_interval_secs == 0 || self.exchange_interval_secs == 0 || self.archive_interval_secs == 0 {
            return Err(Error::Config("job intervals must be positive".to_string()));
        }
        if self.lock_lease_secs == 0 {
            return Err(Error::Config("lock_lease_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_secs(self.replay_interval_secs)
    }

    pub fn exchange_interval(&self) -> Duration {
        Duration::from_secs(self.exchange_interval_secs)
    }

    pub fn max_start_jitter(&self) -> Duration {
        Duration::from_secs(self.max_start_jitter_secs)
    }

    pub fn archive_interval(&self) -> Duration {
        Duration::from_secs(self.archive_interval_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_uses_defaults() {
        let facility = FacilityId::new();
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"role": "online_web", "facility_id": "{}", "push_byte_budget": 1024}}"#,
            facility
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.role, NodeRole::OnlineWeb);
        assert_eq!(config.push_byte_budget, 1024);
        assert_eq!(config.archive_page_size, 100);
        assert_eq!(config.replay_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(NodeConfig::default().validate(), Err(Error::Config(_))));

        let facility = FacilityId::new();
        let config = NodeConfig::new(NodeRole::LocalMachine, facility);
        assert!(config.validate().is_ok());

        let mut orphan = config.clone();
        orphan.known_facilities.clear();
        assert!(matches!(orphan.validate(), Err(Error::Config(_))));

        let mut no_budget = config;
        no_budget.push_byte_budget = 0;
        assert!(no_budget.validate().is_err());
    }
}
