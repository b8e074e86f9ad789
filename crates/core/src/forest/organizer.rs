use serde::Serialize;
use std::sync::Arc;
use thicket_common::error::{ForestError, Result};
use thicket_common::traits::NodeStore;
use thicket_common::types::{BlockStatus, NodeId, SpaceId, Span, CANONICAL_SPACE};
use tracing::{debug, info, warn};

use super::chain_index::ChainIndex;
use super::difficulty::DifficultyCalculator;
use super::span_index::SpanIndex;
use super::txn::ForestTxn;

/// Candidates attached by one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Space roots moved under their parent, in the order they were merged.
    pub merged: Vec<NodeId>,
    /// Rows relocated, the roots included.
    pub moved: usize,
}

/// Result of pruning one subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub removed: Vec<NodeId>,
    /// Slots given back to the space.
    pub width: u64,
    /// The subtree was its parent's only chain; the parent kept one slot.
    pub lonely: bool,
}

/// Mutates the forest: merges connectable orphan spaces, prunes subtrees.
///
/// Every call is one [`ForestTxn`]; a failure part way leaves the store untouched.
#[derive(Clone)]
pub struct Organizer {
    store: Arc<dyn NodeStore>,
    calculator: Arc<dyn DifficultyCalculator>,
}

impl Organizer {
    pub fn new(store: Arc<dyn NodeStore>, calculator: Arc<dyn DifficultyCalculator>) -> Self {
        Self { store, calculator }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Space roots whose parent hash resolves, ascending by id.
    fn candidates(&self, txn: &ForestTxn<'_>) -> Result<Vec<(NodeId, NodeId)>> {
        let mut found = Vec::new();
        for node in txn.scan_nodes()? {
            if node.space == CANONICAL_SPACE || !node.is_space_root() {
                continue;
            }
            if let Some(parent) = txn.node_id_by_hash(&node.prev_hash)? {
                found.push((node.id, parent));
            }
        }
        Ok(found)
    }

    /// Attach every orphan space whose root's parent is known.
    ///
    /// Candidates are picked once, up front. A parent that only becomes
    /// reachable through this pass is picked up by the next one.
    pub fn merge(&self) -> Result<MergeReport> {
        let mut txn = ForestTxn::begin(self.store.as_ref());
        let candidates = self.candidates(&txn)?;
        if candidates.is_empty() {
            return Ok(MergeReport::default());
        }
        debug!("Merge pass over {} candidates", candidates.len());

        let mut report = MergeReport::default();
        for (child, parent) in candidates {
            match self.merge_one(&mut txn, child, parent) {
                Ok(moved) => {
                    report.merged.push(child);
                    report.moved += moved;
                }
                Err(err @ ForestError::NotFound(_)) => {
                    warn!("Merge of {} under {} abandoned: {}", child, parent, err);
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }

        txn.commit()?;
        info!("Merged {} spaces ({} rows moved)", report.merged.len(), report.moved);
        Ok(report)
    }

    fn merge_one(&self, txn: &mut ForestTxn<'_>, child: NodeId, parent: NodeId) -> Result<usize> {
        let (parent_pos, child_pos, parent_width) = {
            let index = SpanIndex::new(txn);
            let parent_pos = index.load_position(parent)?;
            let child_pos = index.load_position(child)?;
            let parent_width = index.child_width(parent_pos.space, parent_pos.depth, parent_pos.span)?;
            (parent_pos, child_pos, parent_width)
        };

        // A root may already have been widened by merges under it this pass.
        if child_pos.span.left != 0 || child_pos.depth != 0 {
            return Err(ForestError::InvariantViolation(format!(
                "space root {} sits at depth {} span {}",
                child, child_pos.depth, child_pos.span
            )));
        }

        let child_width = child_pos.span.width();
        let new_left = if parent_width == 0 {
            parent_pos.span.right
        } else {
            parent_pos.span.right + 1
        };
        let new_depth = parent_pos.depth + 1;

        let path = if parent_pos.space == CANONICAL_SPACE {
            Some(ChainIndex::new(txn, self.calculator.as_ref()).path_info(parent_pos.span.right, parent_pos.depth)?)
        } else {
            None
        };

        let shifted = SpanIndex::new(txn).reserve_area(
            parent_pos.space,
            parent_width,
            parent_pos.span.right,
            new_depth,
            child_width,
        )?;

        if let Some(path) = path {
            let mut chains = ChainIndex::new(txn, self.calculator.as_ref());
            if shifted {
                chains.shift_up(parent_pos.span.right, child_width)?;
            }
            let grown = Span::new(
                parent_pos.span.left,
                parent_pos.span.right + if shifted { child_width } else { 0 },
            )?;
            chains.fill_missing(grown, &path)?;
        }

        let moved = SpanIndex::new(txn).reparent(child_pos.space, parent_pos.space, new_depth, new_left)?;
        let mut root = txn.node(child)?;
        root.status = BlockStatus::Orphan;
        txn.put_node(root);

        debug!(
            "Merged {} (width {}) under {} into space {} at depth {} from slot {}",
            child, child_width, parent, parent_pos.space, new_depth, new_left
        );
        Ok(moved.len())
    }

    /// Remove the subtree at `(space, depth, [left, right])` and compact its range.
    ///
    /// When the subtree is its parent's only chain the parent keeps the first
    /// slot; the chain behind it loses the deleted work instead of vanishing.
    pub fn delete_subtree(&self, space: SpaceId, depth: u64, left: u64, right: u64) -> Result<DeleteReport> {
        let range = Span::new(left, right)?;
        let mut txn = ForestTxn::begin(self.store.as_ref());

        let lonely = depth > 0
            && txn
                .scan_space(space)?
                .iter()
                .any(|node| node.depth + 1 == depth && node.span == range);

        let (deleted, width) = if lonely {
            let mut index = SpanIndex::new(&mut txn);
            let deleted = index.delete_rows(space, depth, range)?;
            index.close_gap(space, right, range.width() - 1)?;
            (deleted, range.width() - 1)
        } else {
            let deleted = SpanIndex::new(&mut txn).delete_range(space, depth, left, right)?;
            (deleted, range.width())
        };

        if deleted.is_empty() {
            debug!("Nothing to delete at depth {} {} in space {}", depth, range, space);
            return Ok(DeleteReport {
                removed: Vec::new(),
                width: 0,
                lonely,
            });
        }

        if space == CANONICAL_SPACE {
            let mut chains = ChainIndex::new(&mut txn, self.calculator.as_ref());
            if lonely {
                if right > left {
                    chains.remove_range(left + 1, right, width)?;
                }
                chains.unwind(left, &deleted)?;
            } else {
                chains.remove_range(left, right, width)?;
            }
        }

        txn.commit()?;
        let removed: Vec<NodeId> = deleted.iter().map(|node| node.id).collect();
        info!(
            "Deleted {} rows at depth {} {} from space {} ({} slots reclaimed{})",
            removed.len(),
            depth,
            range,
            space,
            width,
            if lonely { ", lonely branch" } else { "" }
        );
        Ok(DeleteReport { removed, width, lonely })
    }

    /// Check every space's layout.
    pub fn audit(&self) -> Result<()> {
        let mut txn = ForestTxn::begin(self.store.as_ref());
        let mut spaces: Vec<SpaceId> = txn.scan_nodes()?.iter().map(|node| node.space).collect();
        spaces.sort_unstable();
        spaces.dedup();
        let index = SpanIndex::new(&mut txn);
        for space in spaces {
            index.audit(space)?;
        }
        Ok(())
    }
}
