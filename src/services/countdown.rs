//! One-second countdown per active poll.
//!
//! Each timer is a spawned task whose abort handle lives in a table keyed by poll id.
//! Only the scheduler touches that table; a timer that finishes naturally removes its
//! own entry before reporting expiry, so expiry fires at most once per start.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::{
    task::AbortHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info};
use uuid::Uuid;

const TICK: Duration = Duration::from_secs(1);

/// Receives countdown progress.
pub trait CountdownSink: Send + Sync + 'static {
    /// Called once per second with the seconds left, never increasing, ending at 0.
    ///
    /// Runs while the timer entry is locked: it must not call back into the scheduler.
    fn tick(&self, poll_id: Uuid, remaining: u64);
    /// Called once after the tick that reached 0, unless the timer was stopped first.
    fn expired(&self, poll_id: Uuid) -> BoxFuture<'static, ()>;
}

/// Table of running countdowns.
#[derive(Clone, Default)]
pub struct CountdownScheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    timers: DashMap<Uuid, TimerEntry>,
    generation: AtomicU64,
}

struct TimerEntry {
    generation: u64,
    started: Instant,
    duration: Duration,
    handle: AbortHandle,
}

impl CountdownScheduler {
    /// Empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting down `duration_secs` for `poll_id`, replacing any timer it already had.
    pub fn start(&self, poll_id: Uuid, duration_secs: u32, sink: Arc<dyn CountdownSink>) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let task = tokio::spawn(run_countdown(
            self.inner.clone(),
            poll_id,
            generation,
            duration_secs,
            started,
            sink,
        ));

        let entry = TimerEntry {
            generation,
            started,
            duration: Duration::from_secs(u64::from(duration_secs)),
            handle: task.abort_handle(),
        };
        if let Some(previous) = self.inner.timers.insert(poll_id, entry) {
            previous.handle.abort();
            debug!(poll_id = %poll_id, "replaced running countdown");
        }
        info!(poll_id = %poll_id, duration_secs, "countdown started");
    }

    /// Cancel the timer of `poll_id`. Returns whether one was running.
    pub fn stop(&self, poll_id: Uuid) -> bool {
        match self.inner.timers.remove(&poll_id) {
            Some((_, entry)) => {
                entry.handle.abort();
                debug!(poll_id = %poll_id, "countdown stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel every timer, returning how many were running.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<Uuid> = self.inner.timers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.stop(*id)).count()
    }

    /// Seconds left on the timer of `poll_id`, if one is running.
    pub fn time_remaining(&self, poll_id: Uuid) -> Option<u64> {
        self.inner.timers.get(&poll_id).map(|entry| {
            entry
                .duration
                .saturating_sub(entry.started.elapsed())
                .as_secs()
        })
    }

    /// Whether a timer is running for `poll_id`.
    pub fn is_running(&self, poll_id: Uuid) -> bool {
        self.inner.timers.contains_key(&poll_id)
    }

    /// Number of running timers.
    pub fn active_count(&self) -> usize {
        self.inner.timers.len()
    }
}

async fn run_countdown(
    inner: Arc<SchedulerInner>,
    poll_id: Uuid,
    generation: u64,
    duration_secs: u32,
    started: Instant,
    sink: Arc<dyn CountdownSink>,
) {
    let duration = u64::from(duration_secs);
    let mut ticker = interval_at(started + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut counter = duration;

    while counter > 0 {
        ticker.tick().await;
        {
            // The entry guard is held through the tick so `stop` cannot return mid-emit.
            let Some(entry) = inner.timers.get(&poll_id) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            counter -= 1;
            // A stalled runtime skips ticks; the wall clock keeps the value honest.
            let by_clock = duration.saturating_sub(started.elapsed().as_secs());
            counter = counter.min(by_clock);
            sink.tick(poll_id, counter);
        }
    }

    let finished = inner
        .timers
        .remove_if(&poll_id, |_, entry| entry.generation == generation)
        .is_some();
    if finished {
        info!(poll_id = %poll_id, "countdown expired");
        tokio::spawn(sink.expired(poll_id));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicUsize};

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        ticks: Mutex<Vec<u64>>,
        expirations: AtomicUsize,
    }

    impl CountdownSink for RecordingSink {
        fn tick(&self, _poll_id: Uuid, remaining: u64) {
            self.ticks.lock().unwrap().push(remaining);
        }

        fn expired(&self, _poll_id: Uuid) -> BoxFuture<'static, ()> {
            self.expirations.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ten_second_countdown_ticks_down_to_zero_then_expires_once() {
        let scheduler = CountdownScheduler::new();
        let sink = Arc::new(RecordingSink::default());
        let poll_id = Uuid::new_v4();

        scheduler.start(poll_id, 10, sink.clone());
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(
            *sink.ticks.lock().unwrap(),
            vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]
        );
        assert_eq!(sink.expirations.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running(poll_id));
        assert!(!scheduler.stop(poll_id));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_never_ticks_or_expires_again() {
        let scheduler = CountdownScheduler::new();
        let sink = Arc::new(RecordingSink::default());
        let poll_id = Uuid::new_v4();

        scheduler.start(poll_id, 10, sink.clone());
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(scheduler.time_remaining(poll_id), Some(6));

        assert!(scheduler.stop(poll_id));
        assert!(!scheduler.stop(poll_id));
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(*sink.ticks.lock().unwrap(), vec![9, 8, 7]);
        assert_eq!(sink.expirations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_a_poll_replaces_its_timer() {
        let scheduler = CountdownScheduler::new();
        let sink = Arc::new(RecordingSink::default());
        let poll_id = Uuid::new_v4();

        scheduler.start(poll_id, 10, sink.clone());
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        scheduler.start(poll_id, 10, sink.clone());
        assert_eq!(scheduler.active_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.expirations.load(Ordering::SeqCst), 1);
    }

    /// Parks inside its first tick until released.
    struct ParkedSink {
        entered: Mutex<Option<std::sync::mpsc::Sender<()>>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl CountdownSink for ParkedSink {
        fn tick(&self, _poll_id: Uuid, _remaining: u64) {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
                let _ = self
                    .release
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(5));
            }
            self.log.lock().unwrap().push("tick");
        }

        fn expired(&self, _poll_id: Uuid) -> BoxFuture<'static, ()> {
            Box::pin(async {})
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_an_in_flight_tick() {
        let scheduler = CountdownScheduler::new();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(ParkedSink {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
            log: log.clone(),
        });
        let poll_id = Uuid::new_v4();

        scheduler.start(poll_id, 5, sink);
        tokio::task::spawn_blocking(move || entered_rx.recv().unwrap())
            .await
            .unwrap();

        let stopper = {
            let scheduler = scheduler.clone();
            let log = log.clone();
            tokio::task::spawn_blocking(move || {
                let stopped = scheduler.stop(poll_id);
                log.lock().unwrap().push("stopped");
                stopped
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        release_tx.send(()).unwrap();

        assert!(stopper.await.unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["tick", "stopped"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_reports_how_many_were_running() {
        let scheduler = CountdownScheduler::new();
        let sink = Arc::new(RecordingSink::default());
        for _ in 0..3 {
            scheduler.start(Uuid::new_v4(), 60, sink.clone());
        }

        assert_eq!(scheduler.stop_all(), 3);
        assert_eq!(scheduler.stop_all(), 0);
        assert_eq!(scheduler.active_count(), 0);
    }
}
