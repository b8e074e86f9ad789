use serde::Serialize;
use std::sync::Arc;
use thicket_common::error::Result;
use thicket_common::traits::NodeStore;
use thicket_common::types::{BlockStatus, NodeId, CANONICAL_SPACE};
use thicket_common::utils::error_handler::ErrorHandler;
use tracing::{debug, info};

use super::chain_index::ChainIndex;
use super::difficulty::DifficultyCalculator;
use super::txn::ForestTxn;

/// Outcome of one verify scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub verified: Vec<NodeId>,
    pub failed: Vec<NodeId>,
}

impl VerifyReport {
    pub fn is_empty(&self) -> bool {
        self.verified.is_empty() && self.failed.is_empty()
    }
}

/// Rolls connected orphans of the canonical space into the chain table.
pub trait Verifier: Send + Sync {
    fn verify(&self, store: &dyn NodeStore) -> Result<VerifyReport>;
}

/// Verifier that credits each orphan's proof of work, shallowest first.
///
/// A node whose bits cannot be turned into work stays `Orphan` and the scan
/// moves on.
pub struct WorkVerifier {
    calculator: Arc<dyn DifficultyCalculator>,
}

impl WorkVerifier {
    pub fn new(calculator: Arc<dyn DifficultyCalculator>) -> Self {
        Self { calculator }
    }
}

impl Verifier for WorkVerifier {
    fn verify(&self, store: &dyn NodeStore) -> Result<VerifyReport> {
        let mut txn = ForestTxn::begin(store);
        let mut pending: Vec<_> = txn
            .scan_space(CANONICAL_SPACE)?
            .into_iter()
            .filter(|node| node.status == BlockStatus::Orphan)
            .collect();
        pending.sort_by_key(|node| (node.depth, node.id));

        let mut report = VerifyReport::default();
        for mut node in pending {
            let work = match self.calculator.work(node.bits) {
                Ok(work) => work,
                Err(err) => {
                    ErrorHandler::log_error(&err, "verify");
                    report.failed.push(node.id);
                    continue;
                }
            };
            ChainIndex::new(&mut txn, self.calculator.as_ref()).credit(&node, &work)?;
            debug!("Verified {} at depth {} over {} (work {})", node.id, node.depth, node.span, work);
            node.status = BlockStatus::Verified;
            report.verified.push(node.id);
            txn.put_node(node);
        }

        if txn.is_dirty() {
            txn.commit()?;
        }
        if !report.is_empty() {
            info!(
                "Verify pass: {} verified, {} failed",
                report.verified.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }
}
