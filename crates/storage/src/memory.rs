use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thicket_common::error::{ForestError, Result};
use thicket_common::traits::{NodeStore, WriteBatch};
use thicket_common::types::{BlockNode, ChainId, ChainInfo, Hash, NodeId, SpaceId};

#[derive(Default)]
struct MemoryState {
    nodes: BTreeMap<NodeId, BlockNode>,
    hashes: HashMap<Hash, NodeId>,
    chains: BTreeMap<ChainId, ChainInfo>,
}

/// In-process [`NodeStore`]; a commit is applied under one write lock.
pub struct MemoryNodeStore {
    state: RwLock<MemoryState>,
    next_id: AtomicU64,
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| ForestError::Internal("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| ForestError::Internal("memory store lock poisoned".to_string()))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.nodes.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.nodes.is_empty())
    }
}

impl NodeStore for MemoryNodeStore {
    fn get_node(&self, id: NodeId) -> Result<Option<BlockNode>> {
        Ok(self.read()?.nodes.get(&id).cloned())
    }

    fn node_id_by_hash(&self, hash: &Hash) -> Result<Option<NodeId>> {
        Ok(self.read()?.hashes.get(hash).copied())
    }

    fn scan_nodes(&self) -> Result<Vec<BlockNode>> {
        Ok(self.read()?.nodes.values().cloned().collect())
    }

    fn scan_space(&self, space: SpaceId) -> Result<Vec<BlockNode>> {
        Ok(self
            .read()?
            .nodes
            .values()
            .filter(|node| node.space == space)
            .cloned()
            .collect())
    }

    fn get_chain(&self, chain_id: ChainId) -> Result<Option<ChainInfo>> {
        Ok(self.read()?.chains.get(&chain_id).cloned())
    }

    fn scan_chains(&self) -> Result<Vec<(ChainId, ChainInfo)>> {
        Ok(self
            .read()?
            .chains
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect())
    }

    fn next_id(&self) -> Result<u64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut state = self.write()?;
        for node in batch.delete_nodes {
            state.nodes.remove(&node.id);
            if state.hashes.get(&node.hash) == Some(&node.id) {
                state.hashes.remove(&node.hash);
            }
        }
        for node in batch.put_nodes {
            state.hashes.insert(node.hash, node.id);
            state.nodes.insert(node.id, node);
        }
        for chain_id in batch.delete_chains {
            state.chains.remove(&chain_id);
        }
        for (chain_id, info) in batch.put_chains {
            state.chains.insert(chain_id, info);
        }
        Ok(())
    }
}
