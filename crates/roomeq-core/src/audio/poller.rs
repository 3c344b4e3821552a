//! Cancellable fixed-interval polling task

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default interval for position/level polling
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A tokio task that runs a tick closure at a fixed interval
///
/// The tick returns `false` to stop polling (e.g. the session it reads has
/// ended). Dropping the task aborts it, so an owner that replaces its task
/// never leaves a stale poller reading a destroyed session.
pub struct PeriodicTask {
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn on the current tokio runtime
    pub fn spawn<F, Fut>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick().await {
                    break;
                }
            }
        });
        Self { handle }
    }

    /// Stop polling now
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
