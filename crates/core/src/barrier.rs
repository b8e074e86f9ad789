//! Debounced reorganization trigger.
//!
//! Every new block raises the barrier. Once the level passes the clearance a
//! pass runs right away in the raising task; below it, the first raise arms a
//! one-shot timer and the pass runs when the quiet period is over. Raises
//! arriving while a timer is armed only bump the level.

use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thicket_common::error::{ForestError, Result};
use thicket_common::utils::error_handler::ErrorHandler;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info};

use crate::config::BarrierConfig;
use crate::forest::{MergeReport, VerifyReport};

/// What started a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    Threshold,
    Timer,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub trigger: Trigger,
    pub merge: MergeReport,
    pub verify: VerifyReport,
}

impl PassReport {
    pub fn changed(&self) -> bool {
        !self.merge.merged.is_empty() || !self.verify.verified.is_empty()
    }
}

/// One merge then verify round over the forest.
pub trait ReorgPass: Send + 'static {
    fn run_pass(&mut self, trigger: Trigger) -> Result<PassReport>;

    /// Called whenever the barrier level changes.
    fn observe_level(&self, _level: u64) {}
}

/// How an armed timer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOutcome {
    Elapsed,
    Canceled,
    Failed(String),
}

struct PendingTimer {
    epoch: u64,
    cancel: oneshot::Sender<()>,
}

struct BarrierInner<P> {
    level: u64,
    timer: Option<PendingTimer>,
    /// Bumped on every reset; a timer from an older epoch is stale.
    epoch: u64,
    clearance: u64,
    quiet_period: Duration,
    pass: P,
    halted: Option<String>,
}

impl<P: ReorgPass> BarrierInner<P> {
    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(ForestError::InvariantViolation(format!(
                "reorganization halted: {}",
                reason
            ))),
            None => Ok(()),
        }
    }

    fn reset(&mut self) {
        if let Some(timer) = self.timer.take() {
            // The receiver is gone once the timer has fired.
            let _ = timer.cancel.send(());
        }
        self.level = 0;
        self.epoch += 1;
        self.pass.observe_level(0);
    }

    fn run(&mut self, trigger: Trigger) -> Result<PassReport> {
        match self.pass.run_pass(trigger) {
            Err(err @ ForestError::InvariantViolation(_)) => {
                error!("Halting reorganization after {:?} pass: {}", trigger, err);
                self.halted = Some(err.to_string());
                Err(err)
            }
            other => other,
        }
    }

    fn on_timer(&mut self, epoch: u64, outcome: TimerOutcome) {
        if !matches!(&self.timer, Some(timer) if timer.epoch == epoch) {
            debug!("Ignoring {:?} from stale barrier timer (epoch {})", outcome, epoch);
            return;
        }
        match outcome {
            TimerOutcome::Canceled => {
                self.timer = None;
            }
            TimerOutcome::Elapsed => {
                self.reset();
                if self.halted.is_some() {
                    return;
                }
                let result = self.run(Trigger::Timer);
                if let Some(report) = ErrorHandler::handle_error(result, "timer reorganization") {
                    debug!(
                        "Quiet period pass merged {} and verified {}",
                        report.merge.merged.len(),
                        report.verify.verified.len()
                    );
                }
            }
            TimerOutcome::Failed(reason) => {
                self.reset();
                ErrorHandler::log_error(&ForestError::Timer(reason), "barrier timer");
            }
        }
    }
}

/// Threshold plus quiet-period trigger around a [`ReorgPass`].
///
/// The pass only ever runs under the barrier's lock, so raises, timer
/// callbacks and [`with_pass`](Self::with_pass) callers are serialized.
pub struct ReorgBarrier<P> {
    inner: Arc<Mutex<BarrierInner<P>>>,
}

impl<P> Clone for ReorgBarrier<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: ReorgPass> ReorgBarrier<P> {
    pub fn new(pass: P, config: &BarrierConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BarrierInner {
                level: 0,
                timer: None,
                epoch: 0,
                clearance: config.clearance,
                quiet_period: config.quiet_period(),
                pass,
                halted: None,
            })),
        }
    }

    /// Signal a new block. Returns the report when the threshold forced a pass.
    ///
    /// A threshold pass that fails recoverably is logged and yields `None`;
    /// only errors that leave the forest suspect reach the caller.
    pub async fn raise(&self) -> Result<Option<PassReport>> {
        let mut inner = self.inner.lock().await;
        inner.ensure_running()?;

        inner.level += 1;
        inner.pass.observe_level(inner.level);
        if inner.level > inner.clearance {
            info!("Barrier level {} passed clearance {}", inner.level, inner.clearance);
            inner.reset();
            return match inner.run(Trigger::Threshold) {
                Err(err) if !ErrorHandler::is_recoverable(&err) => Err(err),
                // The block that raised is stored either way; the next trigger retries.
                result => Ok(ErrorHandler::handle_error(result, "threshold reorganization")),
            };
        }

        if inner.timer.is_none() {
            let epoch = inner.epoch;
            let (cancel, canceled) = oneshot::channel();
            inner.timer = Some(PendingTimer { epoch, cancel });
            spawn_timer(Arc::downgrade(&self.inner), epoch, inner.quiet_period, canceled);
            debug!("Barrier timer armed for {:?} (epoch {})", inner.quiet_period, epoch);
        }
        Ok(None)
    }

    /// Run a pass now, disarming any pending timer.
    pub async fn flush(&self) -> Result<PassReport> {
        let mut inner = self.inner.lock().await;
        inner.ensure_running()?;
        inner.reset();
        let result = inner.run(Trigger::Manual);
        ErrorHandler::handle_error_propagate(result, "manual reorganization")
    }

    /// Borrow the pass while holding the barrier lock.
    pub async fn with_pass<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut inner = self.inner.lock().await;
        f(&mut inner.pass)
    }

    pub async fn level(&self) -> u64 {
        self.inner.lock().await.level
    }

    pub async fn timer_pending(&self) -> bool {
        self.inner.lock().await.timer.is_some()
    }

    pub async fn halted(&self) -> Option<String> {
        self.inner.lock().await.halted.clone()
    }

    pub async fn set_clearance(&self, clearance: u64) {
        self.inner.lock().await.clearance = clearance;
    }

    /// Applies to timers armed from now on.
    pub async fn set_quiet_period(&self, quiet_period: Duration) {
        self.inner.lock().await.quiet_period = quiet_period;
    }
}

fn spawn_timer<P: ReorgPass>(
    inner: Weak<Mutex<BarrierInner<P>>>,
    epoch: u64,
    quiet_period: Duration,
    canceled: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        let outcome = tokio::select! {
            _ = tokio::time::sleep(quiet_period) => TimerOutcome::Elapsed,
            signal = canceled => match signal {
                Ok(()) => TimerOutcome::Canceled,
                Err(_) => TimerOutcome::Failed("cancel handle dropped".to_string()),
            },
        };
        if let Some(inner) = inner.upgrade() {
            inner.lock().await.on_timer(epoch, outcome);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct Recorder {
        runs: Arc<StdMutex<Vec<Trigger>>>,
        fail_with: Option<fn() -> ForestError>,
    }

    impl ReorgPass for Recorder {
        fn run_pass(&mut self, trigger: Trigger) -> Result<PassReport> {
            self.runs.lock().unwrap().push(trigger);
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(PassReport {
                trigger,
                merge: MergeReport::default(),
                verify: VerifyReport::default(),
            })
        }
    }

    fn inner(pass: Recorder) -> BarrierInner<Recorder> {
        BarrierInner {
            level: 2,
            timer: None,
            epoch: 0,
            clearance: 5,
            quiet_period: Duration::from_millis(10),
            pass,
            halted: None,
        }
    }

    fn arm(inner: &mut BarrierInner<Recorder>) -> oneshot::Receiver<()> {
        let (cancel, canceled) = oneshot::channel();
        inner.timer = Some(PendingTimer {
            epoch: inner.epoch,
            cancel,
        });
        canceled
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let recorder = Recorder::default();
        let mut state = inner(recorder.clone());
        let _rx = arm(&mut state);
        state.on_timer(state.epoch + 1, TimerOutcome::Elapsed);
        assert!(recorder.runs.lock().unwrap().is_empty());
        assert!(state.timer.is_some());
        assert_eq!(state.level, 2);
    }

    #[test]
    fn test_elapsed_timer_runs_pass() {
        let recorder = Recorder::default();
        let mut state = inner(recorder.clone());
        let _rx = arm(&mut state);
        state.on_timer(0, TimerOutcome::Elapsed);
        assert_eq!(*recorder.runs.lock().unwrap(), vec![Trigger::Timer]);
        assert!(state.timer.is_none());
        assert_eq!(state.level, 0);
        assert_eq!(state.epoch, 1);
    }

    #[test]
    fn test_failed_timer_skips_cycle() {
        let recorder = Recorder::default();
        let mut state = inner(recorder.clone());
        let _rx = arm(&mut state);
        state.on_timer(0, TimerOutcome::Failed("aborted".to_string()));
        assert!(recorder.runs.lock().unwrap().is_empty());
        assert!(state.timer.is_none());
        assert_eq!(state.level, 0);
    }

    #[test]
    fn test_canceled_timer_is_a_noop() {
        let recorder = Recorder::default();
        let mut state = inner(recorder.clone());
        let _rx = arm(&mut state);
        state.on_timer(0, TimerOutcome::Canceled);
        assert!(recorder.runs.lock().unwrap().is_empty());
        assert_eq!(state.level, 2);
    }

    #[test]
    fn test_invariant_violation_halts() {
        let recorder = Recorder {
            fail_with: Some(|| ForestError::InvariantViolation("broken".to_string())),
            ..Default::default()
        };
        let mut state = inner(recorder);
        let _rx = arm(&mut state);
        state.on_timer(0, TimerOutcome::Elapsed);
        assert!(state.halted.is_some());
        assert!(matches!(state.ensure_running(), Err(ForestError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_recoverable_threshold_failure_is_absorbed() {
        let recorder = Recorder {
            fail_with: Some(|| ForestError::NotFound(thicket_common::types::NodeId(2))),
            ..Default::default()
        };
        let config = BarrierConfig {
            clearance: 0,
            quiet_period_ms: 500,
        };
        let barrier = ReorgBarrier::new(recorder.clone(), &config);

        assert_eq!(barrier.raise().await.unwrap(), None);
        assert_eq!(*recorder.runs.lock().unwrap(), vec![Trigger::Threshold]);
        assert!(barrier.halted().await.is_none());
        assert_eq!(barrier.level().await, 0);

        // A manual flush still reports the failure.
        assert!(matches!(barrier.flush().await, Err(ForestError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fatal_threshold_failure_reaches_caller() {
        let recorder = Recorder {
            fail_with: Some(|| ForestError::Internal("registry gone".to_string())),
            ..Default::default()
        };
        let config = BarrierConfig {
            clearance: 0,
            quiet_period_ms: 500,
        };
        let barrier = ReorgBarrier::new(recorder, &config);
        assert!(matches!(barrier.raise().await, Err(ForestError::Internal(_))));
        assert!(barrier.halted().await.is_none());
    }

    #[test]
    fn test_recoverable_failure_does_not_halt() {
        use thicket_common::types::NodeId;
        let recorder = Recorder {
            fail_with: Some(|| ForestError::NotFound(NodeId(9))),
            ..Default::default()
        };
        let mut state = inner(recorder);
        let _rx = arm(&mut state);
        state.on_timer(0, TimerOutcome::Elapsed);
        assert!(state.halted.is_none());
        assert!(state.ensure_running().is_ok());
    }
}
