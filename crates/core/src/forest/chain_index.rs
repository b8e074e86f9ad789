//! Chain table of the canonical space.
//!
//! Every slot of space 0 is a chain id. Its row holds the summed work of the
//! verified blocks whose span covers the slot, along with the deepest of them.

use num_bigint::BigUint;
use num_traits::CheckedSub;
use std::collections::BTreeMap;
use thicket_common::error::{ForestError, Result};
use thicket_common::types::{BlockNode, BlockStatus, ChainId, ChainInfo, Span, CANONICAL_SPACE};
use tracing::debug;

use super::difficulty::DifficultyCalculator;
use super::txn::ForestTxn;

pub struct ChainIndex<'t, 'a> {
    txn: &'t mut ForestTxn<'a>,
    calculator: &'t dyn DifficultyCalculator,
}

impl<'t, 'a> ChainIndex<'t, 'a> {
    pub fn new(txn: &'t mut ForestTxn<'a>, calculator: &'t dyn DifficultyCalculator) -> Self {
        Self { txn, calculator }
    }

    /// Work and depth of the verified path through `slot`, counting blocks no
    /// deeper than `max_depth`.
    pub fn path_info(&self, slot: ChainId, max_depth: u64) -> Result<ChainInfo> {
        let mut info = ChainInfo::default();
        for node in self.txn.scan_space(CANONICAL_SPACE)? {
            if node.status == BlockStatus::Verified && node.depth <= max_depth && node.span.covers(slot) {
                info.work += self.calculator.work(node.bits)?;
                info.depth = info.depth.max(node.depth);
            }
        }
        Ok(info)
    }

    /// Move every chain id above `above` up by `width`.
    pub fn shift_up(&mut self, above: ChainId, width: u64) -> Result<()> {
        let moving: Vec<_> = self
            .txn
            .scan_chains()?
            .into_iter()
            .filter(|(chain_id, _)| *chain_id > above)
            .collect();
        for (chain_id, _) in &moving {
            self.txn.delete_chain(*chain_id);
        }
        for (chain_id, info) in moving {
            self.txn.put_chain(chain_id + width, info);
        }
        Ok(())
    }

    /// Give every slot of `span` without a row the supplied path info.
    pub fn fill_missing(&mut self, span: Span, info: &ChainInfo) -> Result<usize> {
        let mut filled = 0;
        for slot in span.left..=span.right {
            if self.txn.get_chain(slot)?.is_none() {
                self.txn.put_chain(slot, info.clone());
                filled += 1;
            }
        }
        if filled > 0 {
            debug!("Opened {} chains in {}", filled, span);
        }
        Ok(filled)
    }

    /// Roll the work of a freshly verified node into every chain it covers.
    pub fn credit(&mut self, node: &BlockNode, work: &BigUint) -> Result<()> {
        for slot in node.span.left..=node.span.right {
            let mut info = match self.txn.get_chain(slot)? {
                Some(info) => info,
                None => self.path_info(slot, node.depth.saturating_sub(1))?,
            };
            info.work += work;
            info.depth = info.depth.max(node.depth);
            self.txn.put_chain(slot, info);
        }
        Ok(())
    }

    /// Drop chains `left..=right` and close the hole by `width`.
    pub fn remove_range(&mut self, left: ChainId, right: ChainId, width: u64) -> Result<()> {
        let chains = self.txn.scan_chains()?;
        for (chain_id, _) in chains.iter().filter(|(id, _)| (left..=right).contains(id)) {
            self.txn.delete_chain(*chain_id);
        }
        let moving: Vec<_> = chains.into_iter().filter(|(chain_id, _)| *chain_id > right).collect();
        for (chain_id, _) in &moving {
            self.txn.delete_chain(*chain_id);
        }
        for (chain_id, info) in moving {
            let target = chain_id.checked_sub(width).ok_or_else(|| {
                ForestError::InvariantViolation(format!("chain {} cannot move down by {}", chain_id, width))
            })?;
            self.txn.put_chain(target, info);
        }
        Ok(())
    }

    /// Take the work of deleted verified blocks covering `slot` back out of it.
    pub fn unwind(&mut self, slot: ChainId, deleted: &[BlockNode]) -> Result<()> {
        let Some(mut info) = self.txn.get_chain(slot)? else {
            return Ok(());
        };
        for node in deleted {
            if node.status == BlockStatus::Verified && node.span.covers(slot) {
                let work = self.calculator.work(node.bits)?;
                info.work = info.work.checked_sub(&work).ok_or_else(|| {
                    ForestError::InvariantViolation(format!(
                        "chain {} holds less work than deleted block {}",
                        slot, node.id
                    ))
                })?;
            }
        }
        info.depth = self.path_info(slot, u64::MAX)?.depth;
        self.txn.put_chain(slot, info);
        Ok(())
    }

    /// Chain work derived directly from the verified rows.
    pub fn recompute_from_scratch(&self) -> Result<BTreeMap<ChainId, BigUint>> {
        let verified: Vec<_> = self
            .txn
            .scan_space(CANONICAL_SPACE)?
            .into_iter()
            .filter(|node| node.status == BlockStatus::Verified)
            .collect();
        let mut totals = BTreeMap::new();
        for (chain_id, _) in self.txn.scan_chains()? {
            let mut work = BigUint::default();
            for node in verified.iter().filter(|node| node.span.covers(chain_id)) {
                work += self.calculator.work(node.bits)?;
            }
            totals.insert(chain_id, work);
        }
        Ok(totals)
    }

    /// Heaviest chain, lowest id on ties.
    pub fn best_chain(&self) -> Result<Option<(ChainId, ChainInfo)>> {
        let mut best: Option<(ChainId, ChainInfo)> = None;
        for (chain_id, info) in self.txn.scan_chains()? {
            match &best {
                Some((_, current)) if current.work >= info.work => {}
                _ => best = Some((chain_id, info)),
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::difficulty::CompactWork;
    use chrono::Utc;
    use thicket_common::traits::{NodeStore, WriteBatch};
    use thicket_common::types::{BlockHeader, Hash, NodeId};
    use thicket_storage::MemoryNodeStore;

    // 0x207fffff is worth 2
    fn verified(id: u64, depth: u64, left: u64, right: u64) -> BlockNode {
        let header = BlockHeader {
            hash: Hash([id as u8; 32]),
            prev_hash: Hash::default(),
            bits: 0x207fffff,
            timestamp: Utc::now(),
        };
        let mut node = BlockNode::pending(NodeId(id), CANONICAL_SPACE, &header);
        node.depth = depth;
        node.span = Span { left, right };
        node.status = BlockStatus::Verified;
        node
    }

    fn chain(work: u32, depth: u64) -> ChainInfo {
        ChainInfo {
            work: BigUint::from(work),
            depth,
        }
    }

    #[test]
    fn test_path_info_and_best_chain() {
        let store = MemoryNodeStore::new();
        store
            .commit(WriteBatch {
                put_nodes: vec![verified(1, 0, 0, 1), verified(2, 1, 0, 0), verified(3, 1, 1, 1), verified(4, 2, 1, 1)],
                put_chains: vec![(0, chain(4, 1)), (1, chain(6, 2))],
                ..Default::default()
            })
            .unwrap();
        let mut txn = ForestTxn::begin(&store);
        let index = ChainIndex::new(&mut txn, &CompactWork);

        assert_eq!(index.path_info(1, 1).unwrap(), chain(4, 1));
        assert_eq!(index.path_info(1, u64::MAX).unwrap(), chain(6, 2));
        assert_eq!(index.best_chain().unwrap(), Some((1, chain(6, 2))));

        let totals = index.recompute_from_scratch().unwrap();
        assert_eq!(totals[&0], BigUint::from(4u32));
        assert_eq!(totals[&1], BigUint::from(6u32));
    }

    #[test]
    fn test_best_chain_prefers_lowest_id_on_ties() {
        let store = MemoryNodeStore::new();
        store
            .commit(WriteBatch {
                put_chains: vec![(0, chain(2, 0)), (1, chain(5, 1)), (2, chain(5, 1))],
                ..Default::default()
            })
            .unwrap();
        let mut txn = ForestTxn::begin(&store);
        let index = ChainIndex::new(&mut txn, &CompactWork);
        assert_eq!(index.best_chain().unwrap().map(|(id, _)| id), Some(1));
    }

    #[test]
    fn test_shift_and_remove_are_inverse() {
        let store = MemoryNodeStore::new();
        store
            .commit(WriteBatch {
                put_chains: vec![(0, chain(1, 0)), (1, chain(2, 0)), (2, chain(3, 0))],
                ..Default::default()
            })
            .unwrap();
        let mut txn = ForestTxn::begin(&store);
        let mut index = ChainIndex::new(&mut txn, &CompactWork);

        index.shift_up(0, 2).unwrap();
        assert_eq!(index.fill_missing(Span { left: 0, right: 2 }, &chain(9, 0)).unwrap(), 2);
        let ids: Vec<_> = txn.scan_chains().unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(txn.get_chain(4).unwrap(), Some(chain(3, 0)));

        ChainIndex::new(&mut txn, &CompactWork).remove_range(1, 2, 2).unwrap();
        assert_eq!(
            txn.scan_chains().unwrap(),
            vec![(0, chain(1, 0)), (1, chain(2, 0)), (2, chain(3, 0))]
        );
    }

    #[test]
    fn test_credit_and_unwind() {
        let store = MemoryNodeStore::new();
        let root = verified(1, 0, 0, 1);
        store
            .commit(WriteBatch {
                put_nodes: vec![root],
                put_chains: vec![(0, chain(2, 0)), (1, chain(2, 0))],
                ..Default::default()
            })
            .unwrap();
        let mut txn = ForestTxn::begin(&store);
        let child = verified(2, 1, 1, 1);
        txn.put_node(child.clone());

        let mut index = ChainIndex::new(&mut txn, &CompactWork);
        index.credit(&child, &BigUint::from(2u32)).unwrap();
        assert_eq!(txn.get_chain(1).unwrap(), Some(chain(4, 1)));

        txn.delete_node(&child);
        ChainIndex::new(&mut txn, &CompactWork).unwind(1, &[child]).unwrap();
        assert_eq!(txn.get_chain(1).unwrap(), Some(chain(2, 0)));
    }
}
