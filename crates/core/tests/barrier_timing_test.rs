//! Barrier timing under a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use thicket_common::error::{ForestError, Result};
use thicket_common::types::{BlockHeader, BlockStatus, Hash};
use thicket_core::{
    BarrierConfig, BlockForest, ForestEvent, MergeReport, PassReport, ReorgBarrier, ReorgPass, Trigger,
    VerifyReport,
};
use thicket_storage::MemoryNodeStore;

#[derive(Clone, Default)]
struct Recorder {
    runs: Arc<Mutex<Vec<Trigger>>>,
    broken: bool,
}

impl Recorder {
    fn runs(&self) -> Vec<Trigger> {
        self.runs.lock().unwrap().clone()
    }
}

impl ReorgPass for Recorder {
    fn run_pass(&mut self, trigger: Trigger) -> Result<PassReport> {
        self.runs.lock().unwrap().push(trigger);
        if self.broken {
            return Err(ForestError::InvariantViolation("overlapping siblings".to_string()));
        }
        Ok(PassReport {
            trigger,
            merge: MergeReport::default(),
            verify: VerifyReport::default(),
        })
    }
}

fn barrier(recorder: &Recorder, clearance: u64) -> ReorgBarrier<Recorder> {
    let config = BarrierConfig {
        clearance,
        quiet_period_ms: 500,
    };
    ReorgBarrier::new(recorder.clone(), &config)
}

async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_threshold_runs_exactly_one_pass() {
    let recorder = Recorder::default();
    let barrier = barrier(&recorder, 3);

    for _ in 0..3 {
        assert!(barrier.raise().await.unwrap().is_none());
    }
    assert!(barrier.timer_pending().await);
    assert_eq!(barrier.level().await, 3);

    let report = barrier.raise().await.unwrap().expect("threshold pass");
    assert_eq!(report.trigger, Trigger::Threshold);
    assert_eq!(barrier.level().await, 0);
    assert!(!barrier.timer_pending().await);

    // The timer armed by the first raise must not fire a second pass.
    wait(2_000).await;
    assert_eq!(recorder.runs(), vec![Trigger::Threshold]);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_period_runs_one_timer_pass() {
    let recorder = Recorder::default();
    let barrier = barrier(&recorder, 10);

    for _ in 0..10 {
        assert!(barrier.raise().await.unwrap().is_none());
    }
    wait(400).await;
    assert!(recorder.runs().is_empty());
    assert!(barrier.timer_pending().await);

    wait(200).await;
    assert_eq!(recorder.runs(), vec![Trigger::Timer]);
    assert_eq!(barrier.level().await, 0);
    assert!(!barrier.timer_pending().await);

    wait(2_000).await;
    assert_eq!(recorder.runs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_raises_do_not_extend_quiet_period() {
    let recorder = Recorder::default();
    let barrier = barrier(&recorder, 10);

    barrier.raise().await.unwrap();
    wait(300).await;
    barrier.raise().await.unwrap();
    // 500ms after the first raise, not the last one.
    wait(250).await;
    assert_eq!(recorder.runs(), vec![Trigger::Timer]);
}

#[tokio::test(start_paused = true)]
async fn test_timer_rearms_after_pass() {
    let recorder = Recorder::default();
    let barrier = barrier(&recorder, 10);

    barrier.raise().await.unwrap();
    wait(600).await;
    assert_eq!(recorder.runs(), vec![Trigger::Timer]);

    barrier.raise().await.unwrap();
    assert!(barrier.timer_pending().await);
    assert_eq!(barrier.level().await, 1);
    wait(600).await;
    assert_eq!(recorder.runs(), vec![Trigger::Timer, Trigger::Timer]);
}

#[tokio::test(start_paused = true)]
async fn test_flush_disarms_timer() {
    let recorder = Recorder::default();
    let barrier = barrier(&recorder, 10);

    barrier.raise().await.unwrap();
    barrier.raise().await.unwrap();
    let report = barrier.flush().await.unwrap();
    assert_eq!(report.trigger, Trigger::Manual);
    assert!(!barrier.timer_pending().await);

    wait(1_000).await;
    assert_eq!(recorder.runs(), vec![Trigger::Manual]);
}

#[tokio::test(start_paused = true)]
async fn test_invariant_violation_halts_barrier() {
    let recorder = Recorder {
        broken: true,
        ..Default::default()
    };
    let barrier = barrier(&recorder, 0);

    let err = barrier.raise().await.unwrap_err();
    assert!(matches!(err, ForestError::InvariantViolation(_)));
    assert!(barrier.halted().await.is_some());

    // Nothing runs once halted.
    assert!(barrier.raise().await.is_err());
    assert!(barrier.flush().await.is_err());
    assert_eq!(recorder.runs(), vec![Trigger::Threshold]);
}

#[tokio::test(start_paused = true)]
async fn test_halt_from_timer_pass() {
    let recorder = Recorder {
        broken: true,
        ..Default::default()
    };
    let barrier = barrier(&recorder, 10);

    assert!(barrier.raise().await.unwrap().is_none());
    wait(600).await;
    assert_eq!(recorder.runs(), vec![Trigger::Timer]);
    assert!(barrier.halted().await.is_some());
    assert!(barrier.raise().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_runtime_reconfiguration() {
    let recorder = Recorder::default();
    let barrier = barrier(&recorder, 10);

    barrier.set_quiet_period(Duration::from_millis(50)).await;
    barrier.raise().await.unwrap();
    wait(60).await;
    assert_eq!(recorder.runs(), vec![Trigger::Timer]);

    barrier.set_clearance(1).await;
    assert!(barrier.raise().await.unwrap().is_none());
    assert!(barrier.raise().await.unwrap().is_some());
    assert_eq!(recorder.runs(), vec![Trigger::Timer, Trigger::Threshold]);
}

fn header(name: &str, parent: Option<&str>) -> BlockHeader {
    BlockHeader {
        hash: Hash::from_slice(name.as_bytes()),
        prev_hash: parent.map(|p| Hash::from_slice(p.as_bytes())).unwrap_or_default(),
        bits: 0x207fffff,
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_new_block_connects_after_quiet_period() {
    let config = BarrierConfig {
        clearance: 10,
        quiet_period_ms: 500,
    };
    let forest = BlockForest::new(Arc::new(MemoryNodeStore::new()), &config).unwrap();
    let mut events = forest.subscribe();
    forest.admit_genesis(&header("root", None)).await.unwrap();

    forest.new_block(&header("a", Some("root"))).await.unwrap();
    forest.new_block(&header("b", Some("a"))).await.unwrap();
    let b = Hash::from_slice(b"b");
    assert_eq!(forest.status(&b).await.unwrap(), Some(BlockStatus::PendingOrphan));

    wait(600).await;
    assert_eq!(forest.status(&b).await.unwrap(), Some(BlockStatus::Verified));
    match events.recv().await.unwrap() {
        ForestEvent::Reorganized(report) => {
            assert_eq!(report.trigger, Trigger::Timer);
            assert_eq!(report.merge.merged.len(), 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
    forest.audit().await.unwrap();
}
