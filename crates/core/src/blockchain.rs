use num_bigint::BigUint;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thicket_common::error::{DatabaseError, ForestError, Result};
use thicket_common::traits::NodeStore;
use thicket_common::types::{
    BlockHeader, BlockNode, BlockStatus, ChainId, ChainInfo, Hash, NodeId, Position, SpaceId, CANONICAL_SPACE,
};
use thicket_storage::open_store;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::barrier::{PassReport, ReorgBarrier, ReorgPass, Trigger};
use crate::config::{BarrierConfig, ThicketConfig};
use crate::events::{EventPublisher, ForestEvent};
use crate::forest::{
    ChainIndex, CompactWork, DeleteReport, DifficultyCalculator, ForestTxn, Organizer, Verifier, WorkVerifier,
};
use crate::metrics::ForestMetrics;

/// Single steps taken from the tip before the locator starts doubling.
const LOCATOR_DENSE_STEPS: usize = 10;

/// Outcome of handing a block header to the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Stored as the root of a fresh orphan space.
    Stored(NodeId),
    /// Already known, with its current status.
    Duplicate(BlockStatus),
}

/// The merge then verify pass driven by the barrier.
pub struct ForestReorganizer {
    organizer: Organizer,
    verifier: Arc<dyn Verifier>,
    metrics: Arc<ForestMetrics>,
    events: EventPublisher,
}

impl ForestReorganizer {
    pub fn new(
        organizer: Organizer,
        verifier: Arc<dyn Verifier>,
        metrics: Arc<ForestMetrics>,
        events: EventPublisher,
    ) -> Self {
        Self {
            organizer,
            verifier,
            metrics,
            events,
        }
    }

    pub fn organizer(&self) -> &Organizer {
        &self.organizer
    }
}

impl ReorgPass for ForestReorganizer {
    fn run_pass(&mut self, trigger: Trigger) -> Result<PassReport> {
        let started = Instant::now();
        let merge = self.organizer.merge()?;
        let verify = self.verifier.verify(self.organizer.store().as_ref())?;
        let report = PassReport { trigger, merge, verify };

        self.metrics
            .record_pass(trigger, &report.merge, &report.verify, started.elapsed());
        if report.changed() {
            info!(
                "{:?} pass merged {} spaces, verified {} blocks, {} failed",
                trigger,
                report.merge.merged.len(),
                report.verify.verified.len(),
                report.verify.failed.len()
            );
            self.events.publish(ForestEvent::Reorganized(report.clone()));
        } else {
            debug!("{:?} pass found nothing to do", trigger);
        }
        Ok(report)
    }

    fn observe_level(&self, level: u64) {
        self.metrics.set_barrier_level(level);
    }
}

/// Block forest over a [`NodeStore`]: admission, debounced reorganization,
/// pruning and chain queries.
///
/// Every operation runs under the barrier lock, so reads never interleave
/// with a pass.
pub struct BlockForest {
    store: Arc<dyn NodeStore>,
    calculator: Arc<dyn DifficultyCalculator>,
    barrier: ReorgBarrier<ForestReorganizer>,
    metrics: Arc<ForestMetrics>,
    events: EventPublisher,
}

impl BlockForest {
    /// Forest with compact-bits work and the default verifier.
    pub fn new(store: Arc<dyn NodeStore>, config: &BarrierConfig) -> Result<Self> {
        let calculator: Arc<dyn DifficultyCalculator> = Arc::new(CompactWork);
        let verifier = Arc::new(WorkVerifier::new(calculator.clone()));
        Self::with_components(store, calculator, verifier, config)
    }

    pub fn with_components(
        store: Arc<dyn NodeStore>,
        calculator: Arc<dyn DifficultyCalculator>,
        verifier: Arc<dyn Verifier>,
        config: &BarrierConfig,
    ) -> Result<Self> {
        let metrics = Arc::new(
            ForestMetrics::new().map_err(|e| ForestError::Internal(format!("metrics registry: {}", e)))?,
        );
        let events = EventPublisher::default();
        let organizer = Organizer::new(store.clone(), calculator.clone());
        let pass = ForestReorganizer::new(organizer, verifier, metrics.clone(), events.clone());

        info!(
            "Block forest ready (clearance {}, quiet period {:?})",
            config.clearance,
            config.quiet_period()
        );
        Ok(Self {
            store,
            calculator,
            barrier: ReorgBarrier::new(pass, config),
            metrics,
            events,
        })
    }

    /// Open the configured store and build a forest over it.
    pub fn open(config: &ThicketConfig) -> Result<Self> {
        let store = open_store(&config.storage)?;
        Self::new(store, &config.barrier)
    }

    pub fn barrier(&self) -> &ReorgBarrier<ForestReorganizer> {
        &self.barrier
    }

    pub fn metrics(&self) -> &Arc<ForestMetrics> {
        &self.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForestEvent> {
        self.events.subscribe()
    }

    /// Root the canonical space. Only allowed while it is empty.
    pub async fn admit_genesis(&self, header: &BlockHeader) -> Result<NodeId> {
        let store = self.store.as_ref();
        let calculator = self.calculator.as_ref();
        self.barrier
            .with_pass(|_| {
                let mut txn = ForestTxn::begin(store);
                if let Some(existing) = txn.node_by_hash(&header.hash)? {
                    return Err(ForestError::Database(DatabaseError::Duplicate(format!(
                        "genesis {} already stored as {} in space {}",
                        header.hash, existing.id, existing.space
                    ))));
                }
                if let Some(root) = txn.scan_space(CANONICAL_SPACE)?.first() {
                    return Err(ForestError::Database(DatabaseError::Duplicate(format!(
                        "canonical space already rooted at {} ({})",
                        root.id, root.hash
                    ))));
                }
                let work = calculator.work(header.bits)?;
                let id = NodeId(txn.next_id()?);
                let mut genesis = BlockNode::pending(id, CANONICAL_SPACE, header);
                genesis.status = BlockStatus::Verified;
                txn.put_node(genesis);
                txn.put_chain(0, ChainInfo { work, depth: 0 });
                txn.commit()?;
                info!("Genesis {} stored as {}", header.hash, id);
                Ok(id)
            })
            .await
    }

    /// Store a block as the root of its own orphan space.
    pub async fn admit(&self, header: &BlockHeader) -> Result<Admission> {
        let store = self.store.as_ref();
        self.barrier.with_pass(|_| admit_orphan(store, header)).await
    }

    /// Admit a block and raise the barrier for it.
    pub async fn new_block(&self, header: &BlockHeader) -> Result<Admission> {
        let admission = self.admit(header).await?;
        if let Admission::Stored(_) = admission {
            self.barrier.raise().await?;
        }
        Ok(admission)
    }

    /// Run a pass right away.
    pub async fn reorganize(&self) -> Result<PassReport> {
        self.barrier.flush().await
    }

    /// Delete the subtree rooted at `hash`.
    pub async fn prune(&self, hash: &Hash) -> Result<DeleteReport> {
        let store = self.store.as_ref();
        let node = self
            .barrier
            .with_pass(|_| ForestTxn::begin(store).node_by_hash(hash))
            .await?
            .ok_or(ForestError::HashNotFound(*hash))?;
        let report = self
            .delete_subtree(node.space, node.depth, node.span.left, node.span.right)
            .await?;
        if !report.removed.is_empty() {
            self.events.publish(ForestEvent::BranchPruned {
                root: node.id,
                removed: report.removed.len(),
                width: report.width,
            });
        }
        Ok(report)
    }

    pub async fn delete_subtree(&self, space: SpaceId, depth: u64, left: u64, right: u64) -> Result<DeleteReport> {
        let report = self
            .barrier
            .with_pass(|pass| pass.organizer().delete_subtree(space, depth, left, right))
            .await?;
        self.metrics.record_delete(&report);
        Ok(report)
    }

    pub async fn node(&self, hash: &Hash) -> Result<Option<BlockNode>> {
        let store = self.store.as_ref();
        self.barrier
            .with_pass(|_| ForestTxn::begin(store).node_by_hash(hash))
            .await
    }

    pub async fn status(&self, hash: &Hash) -> Result<Option<BlockStatus>> {
        Ok(self.node(hash).await?.map(|node| node.status))
    }

    pub async fn position(&self, hash: &Hash) -> Result<Option<Position>> {
        Ok(self.node(hash).await?.map(|node| node.position()))
    }

    /// Heaviest chain, lowest chain id on ties.
    pub async fn best_chain(&self) -> Result<Option<(ChainId, ChainInfo)>> {
        let store = self.store.as_ref();
        let calculator = self.calculator.as_ref();
        self.barrier
            .with_pass(|_| {
                let mut txn = ForestTxn::begin(store);
                ChainIndex::new(&mut txn, calculator).best_chain()
            })
            .await
    }

    /// Verified blocks of the best chain, genesis first.
    pub async fn main_chain(&self) -> Result<Vec<BlockNode>> {
        let store = self.store.as_ref();
        let calculator = self.calculator.as_ref();
        self.barrier
            .with_pass(|_| {
                let mut txn = ForestTxn::begin(store);
                let Some((chain_id, _)) = ChainIndex::new(&mut txn, calculator).best_chain()? else {
                    return Ok(Vec::new());
                };
                let mut path: Vec<BlockNode> = txn
                    .scan_space(CANONICAL_SPACE)?
                    .into_iter()
                    .filter(|node| node.status == BlockStatus::Verified && node.span.covers(chain_id))
                    .collect();
                path.sort_by_key(|node| node.depth);
                Ok(path)
            })
            .await
    }

    /// Hashes walking back from the tip of the main chain: ten single steps,
    /// then doubling strides, always ending at genesis.
    pub async fn block_locator(&self) -> Result<Vec<Hash>> {
        let path = self.main_chain().await?;
        if path.is_empty() {
            return Ok(Vec::new());
        }

        let mut hashes = Vec::new();
        let mut index = path.len() - 1;
        let mut step = 1usize;
        loop {
            hashes.push(path[index].hash);
            if index == 0 {
                break;
            }
            if hashes.len() >= LOCATOR_DENSE_STEPS {
                step *= 2;
            }
            index = index.saturating_sub(step);
        }
        Ok(hashes)
    }

    pub async fn chains(&self) -> Result<Vec<(ChainId, ChainInfo)>> {
        let store = self.store.as_ref();
        self.barrier.with_pass(|_| store.scan_chains()).await
    }

    /// Chain work summed straight from the verified rows, for checking the
    /// incrementally maintained table.
    pub async fn chain_work_from_scratch(&self) -> Result<BTreeMap<ChainId, BigUint>> {
        let store = self.store.as_ref();
        let calculator = self.calculator.as_ref();
        self.barrier
            .with_pass(|_| {
                let mut txn = ForestTxn::begin(store);
                ChainIndex::new(&mut txn, calculator).recompute_from_scratch()
            })
            .await
    }

    /// Check the nested-interval layout of every space.
    pub async fn audit(&self) -> Result<()> {
        self.barrier.with_pass(|pass| pass.organizer().audit()).await
    }
}

fn admit_orphan(store: &dyn NodeStore, header: &BlockHeader) -> Result<Admission> {
    let mut txn = ForestTxn::begin(store);
    if let Some(existing) = txn.node_by_hash(&header.hash)? {
        warn!("Block {} already stored as {} ({})", header.hash, existing.id, existing.status);
        return Ok(Admission::Duplicate(existing.status));
    }
    let id = txn.next_id()?;
    txn.put_node(BlockNode::pending(NodeId(id), id, header));
    txn.commit()?;
    debug!("Admitted {} as {} in space {}", header.hash, NodeId(id), id);
    Ok(Admission::Stored(NodeId(id)))
}
