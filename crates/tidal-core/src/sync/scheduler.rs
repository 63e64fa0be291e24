//! Periodic and debounced sync triggers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Something that can run a sync session on demand.
pub trait SyncTrigger: Send + Sync + 'static {
    fn trigger_sync(&self) -> impl Future<Output = ()> + Send;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fires the trigger on a fixed interval and after bursts of local edits.
///
/// Sessions are spawned as their own tasks, so stopping the scheduler or
/// replacing a debounce timer never interrupts a session that already began.
/// Must be used from within a Tokio runtime.
pub struct SyncScheduler<T> {
    trigger: Arc<T>,
    interval: Duration,
    debounce: Duration,
    periodic: Mutex<Option<JoinHandle<()>>>,
    pending: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl<T: SyncTrigger> SyncScheduler<T> {
    pub fn new(trigger: Arc<T>, interval: Duration, debounce: Duration) -> Self {
        Self {
            trigger,
            interval,
            debounce,
            periodic: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Start the periodic timer. The first tick fires one interval from now.
    /// A zero interval leaves periodic sync off.
    pub fn start(&self) {
        if self.interval.is_zero() {
            tracing::warn!("Periodic sync disabled: interval is zero");
            return;
        }
        let mut periodic = lock(&self.periodic);
        if periodic.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let trigger = Arc::clone(&self.trigger);
        let period = self.interval;
        *periodic = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                tracing::debug!("Periodic sync tick");
                fire(&trigger);
            }
        }));
        tracing::debug!("Sync scheduler started with a {period:?} interval");
    }

    /// Sync once `table`/`record_id` has seen no further edit for the
    /// debounce delay. A newer edit restarts the timer.
    pub fn schedule_debounced(&self, table: &str, record_id: &str) {
        let trigger = Arc::clone(&self.trigger);
        let delay = self.debounce;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(&trigger);
        });

        let mut pending = lock(&self.pending);
        pending.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = pending.insert((table.to_string(), record_id.to_string()), timer) {
            previous.abort();
        }
    }

    /// Cancel the periodic timer and every pending debounce.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.periodic).take() {
            handle.abort();
        }
        for (_, handle) in lock(&self.pending).drain() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.periodic)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Debounce timers still waiting to fire
    pub fn pending_debounces(&self) -> usize {
        lock(&self.pending)
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl<T> Drop for SyncScheduler<T> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.periodic).take() {
            handle.abort();
        }
        for (_, handle) in lock(&self.pending).drain() {
            handle.abort();
        }
    }
}

fn fire<T: SyncTrigger>(trigger: &Arc<T>) {
    let trigger = Arc::clone(trigger);
    tokio::spawn(async move { trigger.trigger_sync().await });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTrigger {
        fired: AtomicUsize,
    }

    impl SyncTrigger for CountingTrigger {
        async fn trigger_sync(&self) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scheduler(interval_ms: u64, debounce_ms: u64) -> (SyncScheduler<CountingTrigger>, Arc<CountingTrigger>) {
        let trigger = Arc::new(CountingTrigger::default());
        let scheduler = SyncScheduler::new(
            Arc::clone(&trigger),
            Duration::from_millis(interval_ms),
            Duration::from_millis(debounce_ms),
        );
        (scheduler, trigger)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_burst_of_edits_fires_once() {
        let (scheduler, trigger) = scheduler(60_000, 100);

        for _ in 0..5 {
            scheduler.schedule_debounced("notes", "n1");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.pending_debounces(), 1);
        assert_eq!(trigger.fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(trigger.fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_debounces(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_debounce_is_per_record() {
        let (scheduler, trigger) = scheduler(60_000, 50);

        scheduler.schedule_debounced("notes", "n1");
        scheduler.schedule_debounced("notes", "n2");
        assert_eq!(scheduler.pending_debounces(), 2);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(trigger.fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_periodic_timer_and_stop() {
        let (scheduler, trigger) = scheduler(50, 1_000);

        scheduler.start();
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(trigger.fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(trigger.fired.load(Ordering::SeqCst) >= 2);

        scheduler.schedule_debounced("notes", "n1");
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.pending_debounces(), 0);

        // Let any trigger spawned just before stop() land first
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fired = trigger.fired.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(trigger.fired.load(Ordering::SeqCst), fired);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_interval_never_starts() {
        let (scheduler, trigger) = scheduler(0, 10);

        scheduler.start();
        assert!(!scheduler.is_running());

        scheduler.schedule_debounced("notes", "n1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(trigger.fired.load(Ordering::SeqCst), 1);
    }
}
