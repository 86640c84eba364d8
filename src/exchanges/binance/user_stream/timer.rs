use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::trace;

/// Repeating background callback with synchronous disarm.
///
/// Each `arm` starts a task bound to a fresh generation; `disarm` bumps the
/// generation so the running task exits at its next check. Callbacks receive
/// their generation and must re-check `is_current` once they hold whatever
/// lock the disarming side holds. A task may disarm its own timer from inside
/// the callback.
#[derive(Debug)]
pub(crate) struct RepeatingTimer {
    name: &'static str,
    generation: Arc<AtomicU64>,
    armed: AtomicBool,
    wake: Arc<Notify>,
}

impl RepeatingTimer {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: Arc::new(AtomicU64::new(0)),
            armed: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Start ticking every `period`, first tick one period from now.
    /// Re-arming replaces the previous schedule. The task stops when the
    /// callback returns `false`.
    pub(crate) fn arm<F, Fut>(&self, period: Duration, mut on_tick: F) -> u64
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.armed.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();

        let current = self.generation.clone();
        let wake = self.wake.clone();
        let name = self.name;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let disarmed = wake.notified();
                if current.load(Ordering::SeqCst) != generation {
                    break;
                }
                tokio::select! {
                    _ = disarmed => continue,
                    _ = ticker.tick() => {}
                }
                if current.load(Ordering::SeqCst) != generation {
                    break;
                }
                trace!(timer = name, generation, "Tick");
                if !on_tick(generation).await {
                    break;
                }
            }
            trace!(timer = name, generation, "Timer task exited");
        });

        generation
    }

    pub(crate) fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.armed.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnMut(u64) -> std::future::Ready<bool> {
        let counter = counter.clone();
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_period() {
        let timer = RepeatingTimer::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));
        timer.arm(Duration::from_secs(30), counting(&ticks));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_stops_ticks() {
        let timer = RepeatingTimer::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));
        timer.arm(Duration::from_secs(10), counting(&ticks));

        tokio::time::sleep(Duration::from_secs(15)).await;
        timer.disarm();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_schedule() {
        let timer = RepeatingTimer::new("test");
        let old_ticks = Arc::new(AtomicUsize::new(0));
        let new_ticks = Arc::new(AtomicUsize::new(0));

        let first = timer.arm(Duration::from_secs(10), counting(&old_ticks));
        tokio::time::sleep(Duration::from_secs(5)).await;
        let second = timer.arm(Duration::from_secs(10), counting(&new_ticks));
        assert!(!timer.is_current(first));
        assert!(timer.is_current(second));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(old_ticks.load(Ordering::SeqCst), 0);
        assert_eq!(new_ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_returning_false_ends_task() {
        let timer = RepeatingTimer::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        timer.arm(Duration::from_secs(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(false)
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
