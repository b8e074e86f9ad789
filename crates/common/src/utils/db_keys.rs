use crate::types::{ChainId, Hash, NodeId, SpaceId};

/// Tree names used by persistent backends.
pub const NODES_TREE: &str = "nodes";
pub const HASHES_TREE: &str = "hashes";
pub const CHAINS_TREE: &str = "chains";
pub const SPACES_TREE: &str = "spaces";

// Big-endian so that sled's lexicographic order matches numeric order.

pub fn node_id_to_db_key(id: NodeId) -> [u8; 8] {
    id.0.to_be_bytes()
}

pub fn db_key_to_node_id(key: &[u8]) -> Option<NodeId> {
    let arr: [u8; 8] = key.try_into().ok()?;
    Some(NodeId(u64::from_be_bytes(arr)))
}

pub fn chain_id_to_db_key(chain_id: ChainId) -> [u8; 8] {
    chain_id.to_be_bytes()
}

pub fn db_key_to_chain_id(key: &[u8]) -> Option<ChainId> {
    let arr: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

pub fn block_hash_to_db_key(hash: &Hash) -> [u8; 32] {
    hash.0
}

pub fn space_prefix(space: SpaceId) -> [u8; 8] {
    space.to_be_bytes()
}

/// `space ‖ id`, so one space's rows are a contiguous run ordered by id.
pub fn space_node_to_db_key(space: SpaceId, id: NodeId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&space_prefix(space));
    key[8..].copy_from_slice(&node_id_to_db_key(id));
    key
}

pub fn space_key_to_node_id(key: &[u8]) -> Option<NodeId> {
    if key.len() != 16 {
        return None;
    }
    db_key_to_node_id(&key[8..])
}
