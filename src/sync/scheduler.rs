//! Periodic cycle runner

use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::SyncCycle;

/// Lifecycle of a [`Scheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick
    Idle,
    /// A cycle is in progress
    Running,
    /// Shut down; terminal
    Stopped,
}

/// Runs a cycle immediately and then once per interval until shutdown.
///
/// Cycles never overlap. A tick that falls due while a cycle is still running
/// is delayed rather than replayed. Shutdown is only observed between cycles.
pub struct Scheduler<C> {
    cycle: C,
    interval: Duration,
    state: watch::Sender<SchedulerState>,
}

impl<C: SyncCycle> Scheduler<C> {
    /// Create a scheduler in the `Idle` state
    pub fn new(cycle: C, interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            cycle,
            interval,
            state,
        }
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Current state
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Run until `shutdown_rx` fires or its sender is dropped.
    ///
    /// Returns the number of cycles run.
    pub async fn run(&self, mut shutdown_rx: oneshot::Receiver<()>) -> u64 {
        // tokio panics on a zero period
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first cycle stands in for it.
        ticker.tick().await;

        let mut cycles = 0u64;
        loop {
            cycles += 1;
            self.run_once(cycles).await;

            tokio::select! {
                _ = ticker.tick() => {}
                res = &mut shutdown_rx => {
                    if res.is_err() {
                        warn!("Shutdown sender dropped, stopping scheduler");
                    } else {
                        info!("Shutdown signal received, stopping scheduler");
                    }
                    break;
                }
            }
        }

        self.state.send_replace(SchedulerState::Stopped);
        cycles
    }

    async fn run_once(&self, n: u64) {
        self.state.send_replace(SchedulerState::Running);
        info!("========== SYNC #{} START ==========", n);
        let started = Instant::now();

        match self.cycle.run_cycle().await {
            Ok(report) if report.is_success() => {
                info!("SYNC #{} OK in {:?}: {}", n, started.elapsed(), report);
            }
            Ok(report) => {
                error!(
                    "SYNC #{} FAILED in {:?}: {}",
                    n,
                    started.elapsed(),
                    report
                );
            }
            Err(e) => {
                error!("SYNC #{} FAILED after {:?}: {}", n, started.elapsed(), e);
            }
        }

        info!("========== SYNC #{} END ==========", n);
        self.state.send_replace(SchedulerState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UpsertStats;
    use crate::sync::{CycleReport, EntityOutcome};
    use crate::{SyncError, SyncResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct FakeCycle {
        runs: AtomicU64,
        fail: bool,
        notify: mpsc::UnboundedSender<u64>,
    }

    impl FakeCycle {
        fn new(fail: bool) -> (Self, mpsc::UnboundedReceiver<u64>) {
            let (notify, rx) = mpsc::unbounded_channel();
            (
                Self {
                    runs: AtomicU64::new(0),
                    fail,
                    notify,
                },
                rx,
            )
        }
    }

    #[async_trait]
    impl SyncCycle for FakeCycle {
        async fn run_cycle(&self) -> SyncResult<CycleReport> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.notify.send(n);
            if self.fail {
                return Err(SyncError::Graph("store locked".to_string()));
            }
            let ok = EntityOutcome::Synced(UpsertStats::default());
            Ok(CycleReport {
                channels: ok.clone(),
                nodes: ok.clone(),
                addresses: ok,
            })
        }
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_runs_immediately_and_repeats() {
        let (cycle, mut runs) = FakeCycle::new(false);
        let scheduler = Scheduler::new(cycle, Duration::from_millis(20));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        for expected in 1..=3 {
            let n = timeout(WAIT, runs.recv()).await.unwrap().unwrap();
            assert_eq!(n, expected);
        }

        shutdown_tx.send(()).unwrap();
        let cycles = timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(cycles >= 3);
    }

    #[tokio::test]
    async fn test_survives_failing_cycles() {
        let (cycle, mut runs) = FakeCycle::new(true);
        let scheduler = Scheduler::new(cycle, Duration::from_millis(10));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        for _ in 0..2 {
            timeout(WAIT, runs.recv()).await.unwrap().unwrap();
        }

        shutdown_tx.send(()).unwrap();
        assert!(timeout(WAIT, handle).await.unwrap().unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_runs_once() {
        let (cycle, _runs) = FakeCycle::new(false);
        let scheduler = Scheduler::new(cycle, Duration::from_secs(3600));
        let mut state = scheduler.subscribe();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        shutdown_tx.send(()).unwrap();

        let cycles = timeout(WAIT, scheduler.run(shutdown_rx)).await.unwrap();
        assert_eq!(cycles, 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(*state.borrow_and_update(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops() {
        let (cycle, _runs) = FakeCycle::new(false);
        let scheduler = Scheduler::new(cycle, Duration::from_secs(3600));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        drop(shutdown_tx);

        let cycles = timeout(WAIT, scheduler.run(shutdown_rx)).await.unwrap();
        assert_eq!(cycles, 1);
    }

    #[tokio::test]
    async fn test_idle_between_cycles() {
        let (cycle, mut runs) = FakeCycle::new(false);
        let scheduler = std::sync::Arc::new(Scheduler::new(cycle, Duration::from_secs(3600)));
        let mut state = scheduler.subscribe();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

        timeout(WAIT, runs.recv()).await.unwrap().unwrap();
        timeout(WAIT, state.wait_for(|s| *s == SchedulerState::Idle))
            .await
            .unwrap()
            .unwrap();

        shutdown_tx.send(()).unwrap();
        assert_eq!(timeout(WAIT, handle).await.unwrap().unwrap(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
