//! Prometheus counters for forest reorganization.

use prometheus::{histogram_opts, opts, Counter, Encoder, Gauge, Histogram, Registry, TextEncoder};
use std::time::Duration;
use tracing::debug;

use crate::barrier::Trigger;
use crate::forest::{DeleteReport, MergeReport, VerifyReport};

#[derive(Debug)]
pub struct ForestMetrics {
    registry: Registry,

    pub passes_total: Counter,
    pub pass_duration: Histogram,
    pub threshold_triggers_total: Counter,
    pub timer_triggers_total: Counter,
    pub manual_triggers_total: Counter,

    pub merged_total: Counter,
    pub moved_rows_total: Counter,
    pub verified_total: Counter,
    pub verify_failures_total: Counter,
    pub pruned_total: Counter,

    pub barrier_level: Gauge,
}

impl ForestMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let passes_total = Counter::with_opts(opts!(
            "thicket_reorg_passes_total",
            "Total number of merge and verify passes"
        ))?;
        let pass_duration = Histogram::with_opts(histogram_opts!(
            "thicket_reorg_pass_duration_seconds",
            "Time spent in one merge and verify pass"
        ))?;
        let threshold_triggers_total = Counter::with_opts(opts!(
            "thicket_barrier_threshold_triggers_total",
            "Passes started because the barrier level passed its clearance"
        ))?;
        let timer_triggers_total = Counter::with_opts(opts!(
            "thicket_barrier_timer_triggers_total",
            "Passes started by the quiet period elapsing"
        ))?;
        let manual_triggers_total = Counter::with_opts(opts!(
            "thicket_barrier_manual_triggers_total",
            "Passes requested directly"
        ))?;
        let merged_total = Counter::with_opts(opts!(
            "thicket_spaces_merged_total",
            "Orphan spaces attached to their parent"
        ))?;
        let moved_rows_total = Counter::with_opts(opts!(
            "thicket_rows_moved_total",
            "Rows relocated by merges"
        ))?;
        let verified_total = Counter::with_opts(opts!(
            "thicket_blocks_verified_total",
            "Blocks rolled into the chain table"
        ))?;
        let verify_failures_total = Counter::with_opts(opts!(
            "thicket_verify_failures_total",
            "Blocks left unverified by a verify pass"
        ))?;
        let pruned_total = Counter::with_opts(opts!(
            "thicket_rows_pruned_total",
            "Rows removed by subtree deletes"
        ))?;
        let barrier_level = Gauge::with_opts(opts!(
            "thicket_barrier_level",
            "Signals raised since the last pass"
        ))?;

        registry.register(Box::new(passes_total.clone()))?;
        registry.register(Box::new(pass_duration.clone()))?;
        registry.register(Box::new(threshold_triggers_total.clone()))?;
        registry.register(Box::new(timer_triggers_total.clone()))?;
        registry.register(Box::new(manual_triggers_total.clone()))?;
        registry.register(Box::new(merged_total.clone()))?;
        registry.register(Box::new(moved_rows_total.clone()))?;
        registry.register(Box::new(verified_total.clone()))?;
        registry.register(Box::new(verify_failures_total.clone()))?;
        registry.register(Box::new(pruned_total.clone()))?;
        registry.register(Box::new(barrier_level.clone()))?;

        Ok(Self {
            registry,
            passes_total,
            pass_duration,
            threshold_triggers_total,
            timer_triggers_total,
            manual_triggers_total,
            merged_total,
            moved_rows_total,
            verified_total,
            verify_failures_total,
            pruned_total,
            barrier_level,
        })
    }

    pub fn record_pass(&self, trigger: Trigger, merge: &MergeReport, verify: &VerifyReport, elapsed: Duration) {
        self.passes_total.inc();
        self.pass_duration.observe(elapsed.as_secs_f64());
        match trigger {
            Trigger::Threshold => self.threshold_triggers_total.inc(),
            Trigger::Timer => self.timer_triggers_total.inc(),
            Trigger::Manual => self.manual_triggers_total.inc(),
        }
        self.merged_total.inc_by(merge.merged.len() as f64);
        self.moved_rows_total.inc_by(merge.moved as f64);
        self.verified_total.inc_by(verify.verified.len() as f64);
        self.verify_failures_total.inc_by(verify.failed.len() as f64);
        debug!("Recorded {:?} pass in {:?}", trigger, elapsed);
    }

    pub fn record_delete(&self, report: &DeleteReport) {
        self.pruned_total.inc_by(report.removed.len() as f64);
    }

    pub fn set_barrier_level(&self, level: u64) {
        self.barrier_level.set(level as f64);
    }

    /// Text exposition of every registered metric.
    pub fn gather(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
