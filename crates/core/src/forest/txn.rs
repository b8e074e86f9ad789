//! Read-your-writes transaction over a [`NodeStore`].
//!
//! Every organizer call runs inside one `ForestTxn`: reads see the store plus
//! the pending overlay, and nothing reaches the store until [`ForestTxn::commit`]
//! hands the whole overlay over as a single atomic [`WriteBatch`]. Dropping the
//! transaction without committing discards it.

use std::collections::{BTreeMap, HashMap};
use thicket_common::error::{ErrorContext, ForestError, Result};
use thicket_common::traits::{NodeStore, WriteBatch};
use thicket_common::types::{BlockNode, ChainId, ChainInfo, Hash, NodeId, SpaceId};
use tracing::debug;

pub struct ForestTxn<'a> {
    store: &'a dyn NodeStore,
    nodes: BTreeMap<NodeId, Option<BlockNode>>,
    /// Last known row of every node deleted in this transaction.
    deleted: HashMap<NodeId, BlockNode>,
    hashes: HashMap<Hash, Option<NodeId>>,
    chains: BTreeMap<ChainId, Option<ChainInfo>>,
}

impl<'a> ForestTxn<'a> {
    pub fn begin(store: &'a dyn NodeStore) -> Self {
        Self {
            store,
            nodes: BTreeMap::new(),
            deleted: HashMap::new(),
            hashes: HashMap::new(),
            chains: BTreeMap::new(),
        }
    }

    pub fn get_node(&self, id: NodeId) -> Result<Option<BlockNode>> {
        match self.nodes.get(&id) {
            Some(pending) => Ok(pending.clone()),
            None => self.store.get_node(id),
        }
    }

    /// Like [`get_node`](Self::get_node) but a missing row is `NotFound`.
    pub fn node(&self, id: NodeId) -> Result<BlockNode> {
        self.get_node(id)?.ok_or(ForestError::NotFound(id))
    }

    pub fn node_id_by_hash(&self, hash: &Hash) -> Result<Option<NodeId>> {
        if let Some(pending) = self.hashes.get(hash) {
            return Ok(*pending);
        }
        match self.store.node_id_by_hash(hash)? {
            Some(id) if matches!(self.nodes.get(&id), Some(None)) => Ok(None),
            found => Ok(found),
        }
    }

    pub fn node_by_hash(&self, hash: &Hash) -> Result<Option<BlockNode>> {
        match self.node_id_by_hash(hash)? {
            Some(id) => self.get_node(id),
            None => Ok(None),
        }
    }

    /// Every live row, ascending by id.
    pub fn scan_nodes(&self) -> Result<Vec<BlockNode>> {
        let mut rows: BTreeMap<NodeId, BlockNode> = self
            .store
            .scan_nodes()?
            .into_iter()
            .map(|node| (node.id, node))
            .collect();
        self.overlay_onto(&mut rows, |_| true);
        Ok(rows.into_values().collect())
    }

    /// Live rows of one space, ascending by id.
    pub fn scan_space(&self, space: SpaceId) -> Result<Vec<BlockNode>> {
        let mut rows: BTreeMap<NodeId, BlockNode> = self
            .store
            .scan_space(space)?
            .into_iter()
            .map(|node| (node.id, node))
            .collect();
        self.overlay_onto(&mut rows, |node| node.space == space);
        Ok(rows.into_values().collect())
    }

    fn overlay_onto(&self, rows: &mut BTreeMap<NodeId, BlockNode>, keep: impl Fn(&BlockNode) -> bool) {
        for (id, pending) in &self.nodes {
            match pending {
                Some(node) if keep(node) => {
                    rows.insert(*id, node.clone());
                }
                _ => {
                    rows.remove(id);
                }
            }
        }
    }

    pub fn put_node(&mut self, node: BlockNode) {
        self.hashes.insert(node.hash, Some(node.id));
        self.deleted.remove(&node.id);
        self.nodes.insert(node.id, Some(node));
    }

    pub fn delete_node(&mut self, node: &BlockNode) {
        self.hashes.insert(node.hash, None);
        self.nodes.insert(node.id, None);
        self.deleted.insert(node.id, node.clone());
    }

    pub fn get_chain(&self, chain_id: ChainId) -> Result<Option<ChainInfo>> {
        match self.chains.get(&chain_id) {
            Some(pending) => Ok(pending.clone()),
            None => self.store.get_chain(chain_id),
        }
    }

    /// Every live chain row, ascending by chain id.
    pub fn scan_chains(&self) -> Result<Vec<(ChainId, ChainInfo)>> {
        let mut rows: BTreeMap<ChainId, ChainInfo> = self.store.scan_chains()?.into_iter().collect();
        for (chain_id, pending) in &self.chains {
            match pending {
                Some(info) => {
                    rows.insert(*chain_id, info.clone());
                }
                None => {
                    rows.remove(chain_id);
                }
            }
        }
        Ok(rows.into_iter().collect())
    }

    pub fn put_chain(&mut self, chain_id: ChainId, info: ChainInfo) {
        self.chains.insert(chain_id, Some(info));
    }

    pub fn delete_chain(&mut self, chain_id: ChainId) {
        self.chains.insert(chain_id, None);
    }

    pub fn next_id(&self) -> Result<u64> {
        self.store.next_id()
    }

    pub fn is_dirty(&self) -> bool {
        !self.nodes.is_empty() || !self.chains.is_empty()
    }

    /// Hand the overlay to the store as one batch. Returns the number of row changes.
    pub fn commit(mut self) -> Result<usize> {
        let mut batch = WriteBatch::default();
        for (id, pending) in std::mem::take(&mut self.nodes) {
            match pending {
                Some(node) => batch.put_nodes.push(node),
                None => {
                    if let Some(node) = self.deleted.remove(&id) {
                        batch.delete_nodes.push(node);
                    }
                }
            }
        }
        for (chain_id, pending) in std::mem::take(&mut self.chains) {
            match pending {
                Some(info) => batch.put_chains.push((chain_id, info)),
                None => batch.delete_chains.push(chain_id),
            }
        }
        let changes = batch.len();
        self.store
            .commit(batch)
            .with_context(&format!("committing {} forest changes", changes))?;
        debug!("Forest transaction committed {} changes", changes);
        Ok(changes)
    }
}
