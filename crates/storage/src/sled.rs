use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Transactional, Tree};
use std::path::Path;
use thicket_common::error::{DatabaseError, ForestError, Result};
use thicket_common::traits::{NodeStore, WriteBatch};
use thicket_common::types::{BlockNode, ChainId, ChainInfo, Hash, NodeId, SpaceId};
use thicket_common::utils::codec;
use thicket_common::utils::db_keys::{
    block_hash_to_db_key, chain_id_to_db_key, db_key_to_chain_id, db_key_to_node_id,
    node_id_to_db_key, space_key_to_node_id, space_node_to_db_key, space_prefix, CHAINS_TREE,
    HASHES_TREE, NODES_TREE, SPACES_TREE,
};
use tracing::debug;

/// Persistent [`NodeStore`] on four sled trees.
///
/// `nodes` maps id -> row, `hashes` maps block hash -> id, `spaces` holds
/// one empty-valued `space ‖ id` key per row, `chains` maps chain id -> chain
/// info. A commit touches all of them inside one sled transaction.
pub struct SledNodeStore {
    db: sled::Db,
    nodes: Tree,
    hashes: Tree,
    spaces: Tree,
    chains: Tree,
}

impl SledNodeStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path).map_err(|e| {
            ForestError::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to open Sled database: {}",
                e
            )))
        })?;
        Self::from_db(db)
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Create a new store from an existing sled::Db
    pub fn from_db(db: sled::Db) -> Result<Self> {
        let nodes = db.open_tree(NODES_TREE)?;
        let hashes = db.open_tree(HASHES_TREE)?;
        let spaces = db.open_tree(SPACES_TREE)?;
        let chains = db.open_tree(CHAINS_TREE)?;
        Ok(Self {
            db,
            nodes,
            hashes,
            spaces,
            chains,
        })
    }

    /// Block until everything committed so far is on disk.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }

    fn decode_node(key: &[u8], value: &[u8]) -> Result<BlockNode> {
        let node: BlockNode = codec::deserialize(value)?;
        match db_key_to_node_id(key) {
            Some(id) if id == node.id => Ok(node),
            _ => Err(ForestError::Database(DatabaseError::Corruption(format!(
                "row stored under key {:?} claims id {}",
                key, node.id
            )))),
        }
    }
}

impl NodeStore for SledNodeStore {
    fn get_node(&self, id: NodeId) -> Result<Option<BlockNode>> {
        match self.nodes.get(node_id_to_db_key(id))? {
            Some(value) => Ok(Some(codec::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn node_id_by_hash(&self, hash: &Hash) -> Result<Option<NodeId>> {
        match self.hashes.get(block_hash_to_db_key(hash))? {
            Some(value) => db_key_to_node_id(&value).map(Some).ok_or_else(|| {
                ForestError::Database(DatabaseError::Corruption(format!(
                    "hash index entry for {} is {} bytes",
                    hash,
                    value.len()
                )))
            }),
            None => Ok(None),
        }
    }

    fn scan_nodes(&self) -> Result<Vec<BlockNode>> {
        self.nodes
            .iter()
            .map(|item| {
                let (key, value) = item?;
                Self::decode_node(&key, &value)
            })
            .collect()
    }

    fn scan_space(&self, space: SpaceId) -> Result<Vec<BlockNode>> {
        let mut rows = Vec::new();
        for item in self.spaces.scan_prefix(space_prefix(space)) {
            let (key, _) = item?;
            let id = space_key_to_node_id(&key).ok_or_else(|| {
                ForestError::Database(DatabaseError::Corruption(format!("space key {:?} is not 16 bytes", key)))
            })?;
            let value = self.nodes.get(node_id_to_db_key(id))?.ok_or_else(|| {
                ForestError::Database(DatabaseError::Corruption(format!(
                    "space {} lists {} but the row is missing",
                    space, id
                )))
            })?;
            rows.push(Self::decode_node(&node_id_to_db_key(id), &value)?);
        }
        Ok(rows)
    }

    fn get_chain(&self, chain_id: ChainId) -> Result<Option<ChainInfo>> {
        match self.chains.get(chain_id_to_db_key(chain_id))? {
            Some(value) => Ok(Some(codec::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn scan_chains(&self) -> Result<Vec<(ChainId, ChainInfo)>> {
        self.chains
            .iter()
            .map(|item| {
                let (key, value) = item?;
                let chain_id = db_key_to_chain_id(&key).ok_or_else(|| {
                    ForestError::Database(DatabaseError::Corruption(format!(
                        "chain key {:?} is not 8 bytes",
                        key
                    )))
                })?;
                Ok((chain_id, codec::deserialize(&value)?))
            })
            .collect()
    }

    fn next_id(&self) -> Result<u64> {
        // sled ids start at zero; zero is reserved for the canonical space
        Ok(self.db.generate_id()? + 1)
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Encode outside the closure: sled may run it more than once.
        let mut node_puts = Vec::with_capacity(batch.put_nodes.len());
        for node in &batch.put_nodes {
            node_puts.push((
                node_id_to_db_key(node.id),
                block_hash_to_db_key(&node.hash),
                space_node_to_db_key(node.space, node.id),
                codec::serialize(node)?,
            ));
        }
        let node_deletes: Vec<_> = batch
            .delete_nodes
            .iter()
            .map(|node| (node_id_to_db_key(node.id), block_hash_to_db_key(&node.hash)))
            .collect();
        let mut chain_puts = Vec::with_capacity(batch.put_chains.len());
        for (chain_id, info) in &batch.put_chains {
            chain_puts.push((chain_id_to_db_key(*chain_id), codec::serialize(info)?));
        }
        let chain_deletes: Vec<_> = batch.delete_chains.iter().map(|id| chain_id_to_db_key(*id)).collect();

        let rows = batch.len();
        (&self.nodes, &self.hashes, &self.spaces, &self.chains)
            .transaction(|(nodes, hashes, spaces, chains)| {
                for (key, hash_key) in &node_deletes {
                    // The stored row, not the batch copy, says which space key to drop.
                    if let Some(old) = nodes.remove(&key[..])? {
                        let old: BlockNode = codec::deserialize(&old).map_err(ConflictableTransactionError::Abort)?;
                        spaces.remove(&space_node_to_db_key(old.space, old.id)[..])?;
                    }
                    if hashes.get(&hash_key[..])?.as_deref() == Some(&key[..]) {
                        hashes.remove(&hash_key[..])?;
                    }
                }
                for (key, hash_key, space_key, value) in &node_puts {
                    if let Some(old) = nodes.insert(&key[..], value.as_slice())? {
                        let old: BlockNode = codec::deserialize(&old).map_err(ConflictableTransactionError::Abort)?;
                        spaces.remove(&space_node_to_db_key(old.space, old.id)[..])?;
                    }
                    spaces.insert(&space_key[..], &b""[..])?;
                    hashes.insert(&hash_key[..], &key[..])?;
                }
                for key in &chain_deletes {
                    chains.remove(&key[..])?;
                }
                for (key, value) in &chain_puts {
                    chains.insert(&key[..], value.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<ForestError>>(())
            })
            .map_err(|e: TransactionError<ForestError>| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => ForestError::from(err),
            })?;

        debug!("Committed {} row changes to sled", rows);
        Ok(())
    }
}
