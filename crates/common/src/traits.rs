use crate::error::Result;
use crate::types::{BlockNode, ChainId, ChainInfo, Hash, NodeId, SpaceId};

/// Everything a single forest transaction wants written.
///
/// Stores must apply a batch atomically: either every row lands or none does.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    /// Rows to insert or overwrite, keyed by their id.
    pub put_nodes: Vec<BlockNode>,
    /// Rows to remove. The full row is carried so backends can drop the hash index entry.
    pub delete_nodes: Vec<BlockNode>,
    pub put_chains: Vec<(ChainId, ChainInfo)>,
    pub delete_chains: Vec<ChainId>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.put_nodes.is_empty()
            && self.delete_nodes.is_empty()
            && self.put_chains.is_empty()
            && self.delete_chains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.put_nodes.len() + self.delete_nodes.len() + self.put_chains.len() + self.delete_chains.len()
    }
}

/// Persisted block rows plus the chain table.
///
/// Range-predicated updates are expressed by the caller as a [`WriteBatch`]
/// computed from consistent reads; `commit` is the single atomic step.
pub trait NodeStore: Send + Sync {
    fn get_node(&self, id: NodeId) -> Result<Option<BlockNode>>;
    fn node_id_by_hash(&self, hash: &Hash) -> Result<Option<NodeId>>;
    /// All rows, ascending by id.
    fn scan_nodes(&self) -> Result<Vec<BlockNode>>;

    /// All rows of one space, ascending by id.
    fn scan_space(&self, space: SpaceId) -> Result<Vec<BlockNode>> {
        Ok(self
            .scan_nodes()?
            .into_iter()
            .filter(|node| node.space == space)
            .collect())
    }

    fn get_chain(&self, chain_id: ChainId) -> Result<Option<ChainInfo>>;
    /// All chain rows, ascending by chain id.
    fn scan_chains(&self) -> Result<Vec<(ChainId, ChainInfo)>>;

    /// Hands out a fresh, never reused, non-zero id.
    fn next_id(&self) -> Result<u64>;

    fn commit(&self, batch: WriteBatch) -> Result<()>;
}
