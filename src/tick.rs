//! Fixed-interval task runner with drop-missed-tick semantics.
//!
//! `tokio::time::interval` queues up missed ticks by default, which
//! would let a slow handler run back-to-back once it finally returns.
//! Each task instead carries its own in-flight guard: a tick that lands
//! while the previous invocation is still running is simply skipped.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::task::JoinHandle;

pub type TickHandler = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct TickTask {
    pub name: String,
    pub interval_ms: u64,
    pub handler: TickHandler,
    pub run_on_start: bool,
}

/// Owns the spawned task handles; dropping it does not stop them — call
/// [`TickDriver::stop`] explicitly during orchestrated shutdown.
pub struct TickDriver {
    handles: Vec<JoinHandle<()>>,
}

impl TickDriver {
    /// Spawns one task per entry in `tasks`, each guarded against
    /// re-entrancy by its own `AtomicBool`.
    pub fn start(tasks: Vec<TickTask>) -> Self {
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let in_flight = Arc::new(AtomicBool::new(false));
            let handle = tokio::spawn(run_task(task, in_flight));
            handles.push(handle);
        }
        Self { handles }
    }

    pub fn stop(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

async fn run_task(task: TickTask, in_flight: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(Duration::from_millis(task.interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    if task.run_on_start {
        fire(&task, &in_flight).await;
    }
    loop {
        interval.tick().await;
        fire(&task, &in_flight).await;
    }
}

async fn fire(task: &TickTask, in_flight: &Arc<AtomicBool>) {
    if in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("tick task '{}' skipped: previous invocation still running", task.name);
        return;
    }
    (task.handler)().await;
    in_flight.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    fn counting_handler(counter: Arc<AtomicU32>) -> TickHandler {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_on_interval_and_respects_run_on_start() {
        let counter = Arc::new(AtomicU32::new(0));
        let driver = TickDriver::start(vec![TickTask {
            name: "t1".into(),
            interval_ms: 100,
            handler: counting_handler(counter.clone()),
            run_on_start: true,
        }]);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        driver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_drops_the_overlapping_tick() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let run_count = Arc::new(AtomicU32::new(0));

        let started_clone = started.clone();
        let release_clone = release.clone();
        let run_count_clone = run_count.clone();
        let handler: TickHandler = Arc::new(move || {
            let started = started_clone.clone();
            let release = release_clone.clone();
            let run_count = run_count_clone.clone();
            Box::pin(async move {
                run_count.fetch_add(1, Ordering::SeqCst);
                started.notify_one();
                release.notified().await;
            })
        });

        let driver = TickDriver::start(vec![TickTask {
            name: "slow".into(),
            interval_ms: 50,
            handler,
            run_on_start: true,
        }]);

        started.notified().await;
        // Advance two full intervals while the handler is still blocked;
        // both should be skipped since the in-flight guard is held.
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(run_count.load(Ordering::SeqCst), 1);

        release.notify_one();
        driver.stop();
    }
}
