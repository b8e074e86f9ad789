//! Nested-interval primitives over one [`ForestTxn`].
//!
//! Each space is a tree flattened into rows carrying `(depth, span)`. A child's
//! span is contained (closed intervals) in its parent's, siblings are disjoint.
//! A single-chain parent shares its child's span, so `[0, 0]` under `[0, 0]` is
//! a legal layout.

use std::collections::HashMap;
use thicket_common::error::{ForestError, Result};
use thicket_common::types::{BlockNode, BlockStatus, Hash, NodeId, Position, SpaceId, Span};
use tracing::{debug, trace};

use super::txn::ForestTxn;

pub struct SpanIndex<'t, 'a> {
    txn: &'t mut ForestTxn<'a>,
}

impl<'t, 'a> SpanIndex<'t, 'a> {
    pub fn new(txn: &'t mut ForestTxn<'a>) -> Self {
        Self { txn }
    }

    pub fn load_span(&self, id: NodeId) -> Result<Span> {
        Ok(self.txn.node(id)?.span)
    }

    pub fn load_position(&self, id: NodeId) -> Result<Position> {
        Ok(self.txn.node(id)?.position())
    }

    /// Materialized width of the subtree below a node.
    ///
    /// Exact when the span has been widened. A point span with descendants
    /// reports `1` regardless of how many there are; insertion offsets of
    /// existing data depend on that value.
    pub fn child_width(&self, space: SpaceId, depth: u64, span: Span) -> Result<u64> {
        if span.right > span.left {
            return Ok(span.width());
        }
        let has_children = self
            .txn
            .scan_space(space)?
            .iter()
            .any(|node| node.depth > depth && span.contains(&node.span));
        Ok(if has_children { 1 } else { 0 })
    }

    /// Open a gap of `child_width` slots after `parent_span_right`.
    ///
    /// Bounds past the parent's right edge move up, ancestors ending at that
    /// edge are widened. Both predicates are evaluated on the bounds as they
    /// were before this call. Returns whether anything was shifted.
    pub fn reserve_area(
        &mut self,
        parent_space: SpaceId,
        parent_width: u64,
        parent_span_right: u64,
        new_child_depth: u64,
        child_width: u64,
    ) -> Result<bool> {
        if parent_width == 0 && child_width == 1 {
            return Ok(false);
        }

        let mut touched = 0usize;
        for mut node in self.txn.scan_space(parent_space)? {
            let before = node.span;
            if before.left > parent_span_right {
                node.span.left += child_width;
            }
            if before.right > parent_span_right {
                node.span.right += child_width;
            } else if before.right == parent_span_right && node.depth < new_child_depth {
                node.span.right += child_width;
            }
            if node.span != before {
                trace!("{} widened {} -> {}", node.id, before, node.span);
                self.txn.put_node(node);
                touched += 1;
            }
        }
        debug!(
            "Reserved {} slots after {} in space {} ({} rows touched)",
            child_width, parent_span_right, parent_space, touched
        );
        Ok(true)
    }

    /// Move every row of `old_space` into `new_space`, offsetting depth and span.
    /// Returns the moved ids, ascending.
    pub fn reparent(
        &mut self,
        old_space: SpaceId,
        new_space: SpaceId,
        depth_delta: u64,
        offset: u64,
    ) -> Result<Vec<NodeId>> {
        let rows = self.txn.scan_space(old_space)?;
        let mut moved = Vec::with_capacity(rows.len());
        for mut node in rows {
            node.space = new_space;
            node.depth += depth_delta;
            node.span = node.span.shifted(offset);
            moved.push(node.id);
            self.txn.put_node(node);
        }
        debug!(
            "Reparented {} rows from space {} into space {} (depth +{}, offset +{})",
            moved.len(),
            old_space,
            new_space,
            depth_delta,
            offset
        );
        Ok(moved)
    }

    /// Delete the subtree occupying `[left, right]` from `depth` down and close
    /// the gap it leaves. Returns the deleted rows.
    pub fn delete_range(&mut self, space: SpaceId, depth: u64, left: u64, right: u64) -> Result<Vec<BlockNode>> {
        let range = Span::new(left, right)?;
        let deleted = self.delete_rows(space, depth, range)?;
        self.close_gap(space, right, range.width())?;
        Ok(deleted)
    }

    /// Remove every row in `space` at or below `depth` whose span lies inside `range`.
    pub fn delete_rows(&mut self, space: SpaceId, depth: u64, range: Span) -> Result<Vec<BlockNode>> {
        let doomed: Vec<BlockNode> = self
            .txn
            .scan_space(space)?
            .into_iter()
            .filter(|node| node.depth >= depth && range.contains(&node.span))
            .collect();
        for node in &doomed {
            self.txn.delete_node(node);
        }
        debug!("Deleted {} rows under {} in space {}", doomed.len(), range, space);
        Ok(doomed)
    }

    /// Pull every bound past `above` down by `width`; right bounds equal to
    /// `above` shrink as well.
    pub fn close_gap(&mut self, space: SpaceId, above: u64, width: u64) -> Result<()> {
        if width == 0 {
            return Ok(());
        }
        for mut node in self.txn.scan_space(space)? {
            let before = node.span;
            let left = if before.left > above {
                shrink(node.id, before.left, width)?
            } else {
                before.left
            };
            let right = if before.right >= above {
                shrink(node.id, before.right, width)?
            } else {
                before.right
            };
            if (left, right) != (before.left, before.right) {
                node.span = Span::new(left, right).map_err(|_| {
                    ForestError::InvariantViolation(format!(
                        "{} collapses from {} to [{}, {}] closing {} slots after {}",
                        node.id, before, left, right, width, above
                    ))
                })?;
                self.txn.put_node(node);
            }
        }
        Ok(())
    }

    /// Check the layout of one space: spans well formed, every non-root row
    /// one level below a parent in the same space whose span contains it,
    /// siblings disjoint, and only the root still pending.
    pub fn audit(&self, space: SpaceId) -> Result<()> {
        let rows = self.txn.scan_space(space)?;
        let by_hash: HashMap<Hash, &BlockNode> = rows.iter().map(|node| (node.hash, node)).collect();
        let mut children: HashMap<NodeId, Vec<&BlockNode>> = HashMap::new();
        let mut roots = 0usize;

        for node in &rows {
            Span::new(node.span.left, node.span.right)?;
            if node.is_space_root() {
                roots += 1;
                continue;
            }
            let parent = by_hash.get(&node.prev_hash).ok_or_else(|| {
                ForestError::InvariantViolation(format!(
                    "{} at depth {} has no parent in space {}",
                    node.id, node.depth, space
                ))
            })?;
            if parent.depth + 1 != node.depth || !parent.span.contains(&node.span) {
                return Err(ForestError::InvariantViolation(format!(
                    "{} {} at depth {} is not nested in parent {} {} at depth {}",
                    node.id, node.span, node.depth, parent.id, parent.span, parent.depth
                )));
            }
            if node.status == BlockStatus::PendingOrphan {
                return Err(ForestError::InvariantViolation(format!(
                    "{} is attached but still pending",
                    node.id
                )));
            }
            children.entry(parent.id).or_default().push(node);
        }

        if roots > 1 {
            return Err(ForestError::InvariantViolation(format!(
                "space {} has {} roots",
                space, roots
            )));
        }

        for (parent, mut siblings) in children {
            siblings.sort_by_key(|node| node.span.left);
            for pair in siblings.windows(2) {
                if pair[0].span.overlaps(&pair[1].span) {
                    return Err(ForestError::InvariantViolation(format!(
                        "children {} {} and {} {} of {} overlap",
                        pair[0].id, pair[0].span, pair[1].id, pair[1].span, parent
                    )));
                }
            }
        }
        Ok(())
    }
}

fn shrink(id: NodeId, bound: u64, width: u64) -> Result<u64> {
    bound.checked_sub(width).ok_or_else(|| {
        ForestError::InvariantViolation(format!("{} bound {} cannot drop by {}", id, bound, width))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use thicket_common::traits::{NodeStore, WriteBatch};
    use thicket_common::types::BlockHeader;
    use thicket_storage::MemoryNodeStore;

    fn row(id: u64, parent: u64, space: SpaceId, depth: u64, left: u64, right: u64) -> BlockNode {
        let header = BlockHeader {
            hash: Hash([id as u8; 32]),
            prev_hash: if parent == 0 { Hash::default() } else { Hash([parent as u8; 32]) },
            bits: 0x207fffff,
            timestamp: Utc::now(),
        };
        let mut node = BlockNode::pending(NodeId(id), space, &header);
        node.depth = depth;
        node.span = Span { left, right };
        node.status = if depth == 0 { BlockStatus::PendingOrphan } else { BlockStatus::Orphan };
        node
    }

    fn seeded(rows: Vec<BlockNode>) -> MemoryNodeStore {
        let store = MemoryNodeStore::new();
        store
            .commit(WriteBatch {
                put_nodes: rows,
                ..Default::default()
            })
            .unwrap();
        store
    }

    fn span_of(txn: &ForestTxn<'_>, id: u64) -> Span {
        txn.node(NodeId(id)).unwrap().span
    }

    /// root [0,2] -> a [0,1] -> (c [0,0], d [1,1]); root -> b [2,2]
    fn small_tree() -> Vec<BlockNode> {
        vec![
            row(1, 0, 7, 0, 0, 2),
            row(2, 1, 7, 1, 0, 1),
            row(3, 1, 7, 1, 2, 2),
            row(4, 2, 7, 2, 0, 0),
            row(5, 2, 7, 2, 1, 1),
        ]
    }

    #[test]
    fn test_child_width() {
        let store = seeded(vec![row(1, 0, 3, 0, 0, 0), row(2, 1, 3, 1, 0, 0), row(9, 0, 4, 0, 0, 0)]);
        let mut txn = ForestTxn::begin(&store);
        let index = SpanIndex::new(&mut txn);

        // Point span with a materialized child: sentinel.
        assert_eq!(index.child_width(3, 0, Span::LEAF).unwrap(), 1);
        // Leaf.
        assert_eq!(index.child_width(3, 1, Span::LEAF).unwrap(), 0);
        assert_eq!(index.child_width(4, 0, Span::LEAF).unwrap(), 0);
        // Widened span is exact.
        assert_eq!(index.child_width(3, 0, Span { left: 2, right: 6 }).unwrap(), 5);
    }

    #[test]
    fn test_reserve_area_is_noop_for_first_single_child() {
        let store = seeded(small_tree());
        let mut txn = ForestTxn::begin(&store);
        let mut index = SpanIndex::new(&mut txn);
        assert!(!index.reserve_area(7, 0, 2, 2, 1).unwrap());
        assert!(!txn.is_dirty());
    }

    #[test]
    fn test_reserve_area_shifts_and_widens() {
        let store = seeded(small_tree());
        let mut txn = ForestTxn::begin(&store);
        // Append a 2-wide subtree under a [0,1].
        assert!(SpanIndex::new(&mut txn).reserve_area(7, 2, 1, 2, 2).unwrap());

        assert_eq!(span_of(&txn, 1), Span { left: 0, right: 4 });
        assert_eq!(span_of(&txn, 2), Span { left: 0, right: 3 });
        assert_eq!(span_of(&txn, 3), Span { left: 4, right: 4 });
        // Deepest row ending at the edge is not an ancestor.
        assert_eq!(span_of(&txn, 5), Span { left: 1, right: 1 });
        assert_eq!(span_of(&txn, 4), Span { left: 0, right: 0 });
    }

    #[test]
    fn test_reparent_moves_whole_space() {
        let store = seeded(vec![row(1, 0, 0, 0, 0, 0), row(5, 1, 5, 0, 0, 1), row(6, 5, 5, 1, 0, 0), row(7, 5, 5, 1, 1, 1)]);
        let mut txn = ForestTxn::begin(&store);
        let moved = SpanIndex::new(&mut txn).reparent(5, 0, 1, 3).unwrap();
        assert_eq!(moved, vec![NodeId(5), NodeId(6), NodeId(7)]);
        assert!(txn.scan_space(5).unwrap().is_empty());

        let index = SpanIndex::new(&mut txn);
        let position = index.load_position(NodeId(7)).unwrap();
        assert_eq!(position.space, 0);
        assert_eq!(position.depth, 2);
        assert_eq!(position.span, Span { left: 4, right: 4 });
        assert_eq!(index.load_span(NodeId(5)).unwrap(), Span { left: 3, right: 4 });
    }

    #[test]
    fn test_delete_range_closes_gap() {
        let store = seeded(small_tree());
        let mut txn = ForestTxn::begin(&store);
        let deleted = SpanIndex::new(&mut txn).delete_range(7, 1, 0, 1).unwrap();
        let mut ids: Vec<_> = deleted.iter().map(|node| node.id).collect();
        ids.sort();
        assert_eq!(ids, vec![NodeId(2), NodeId(4), NodeId(5)]);

        assert_eq!(span_of(&txn, 1), Span { left: 0, right: 0 });
        assert_eq!(span_of(&txn, 3), Span { left: 0, right: 0 });
        SpanIndex::new(&mut txn).audit(7).unwrap();
    }

    #[test]
    fn test_delete_range_rejects_inverted_range() {
        let store = seeded(small_tree());
        let mut txn = ForestTxn::begin(&store);
        let result = SpanIndex::new(&mut txn).delete_range(7, 1, 2, 1);
        assert!(matches!(result, Err(ForestError::InvariantViolation(_))));
    }

    #[test]
    fn test_close_gap_refuses_to_invert_spans() {
        let store = seeded(vec![row(1, 0, 2, 0, 3, 3)]);
        let mut txn = ForestTxn::begin(&store);
        let result = SpanIndex::new(&mut txn).close_gap(2, 0, 5);
        assert!(matches!(result, Err(ForestError::InvariantViolation(_))));
    }

    #[test]
    fn test_audit_catches_overlapping_siblings() {
        let mut rows = small_tree();
        rows[2].span = Span { left: 1, right: 2 };
        let store = seeded(rows);
        let mut txn = ForestTxn::begin(&store);
        let result = SpanIndex::new(&mut txn).audit(7);
        assert!(matches!(result, Err(ForestError::InvariantViolation(_))));
    }
}
