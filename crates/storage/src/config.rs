use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thicket_common::error::Result;
use thicket_common::traits::NodeStore;
use tracing::info;

use crate::memory::MemoryNodeStore;
use crate::sled::SledNodeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Database directory, ignored by the memory backend
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_path(),
        }
    }
}

fn default_backend() -> StorageBackend { StorageBackend::Sled }
fn default_path() -> PathBuf { PathBuf::from("data/forest") }

/// Open the backend named by the configuration.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn NodeStore>> {
    match config.backend {
        StorageBackend::Sled => {
            info!("Opening sled node store at {:?}", config.path);
            Ok(Arc::new(SledNodeStore::new(&config.path)?))
        }
        StorageBackend::Memory => {
            info!("Using in-memory node store");
            Ok(Arc::new(MemoryNodeStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_each_backend() {
        let store = open_store(&StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        })
        .unwrap();
        assert!(store.scan_nodes().unwrap().is_empty());

        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&StorageConfig {
            backend: StorageBackend::Sled,
            path: temp_dir.path().join("forest"),
        })
        .unwrap();
        assert!(store.next_id().unwrap() > 0);
    }
}
