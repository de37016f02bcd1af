use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::warn;

/// A periodic job on its own tokio task.
///
/// Ticks are spaced from the schedule's start (fixed rate): the first one
/// fires immediately and a slow tick body makes the overdue ticks fire back
/// to back. Tick bodies never overlap.
#[derive(Debug)]
pub struct FixedRateTask {
    period: Duration,
    handle: JoinHandle<()>,
}

impl FixedRateTask {
    /// Panics if `period` is zero.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                interval.tick().await;
                tick().await;
            }
        });

        Self { period, handle }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Aborts the task, interrupting an in-flight tick at its next await
    /// point, and waits until it is gone.
    pub async fn cancel(mut self) {
        self.handle.abort();
        if let Err(err) = (&mut self.handle).await {
            if err.is_panic() {
                warn!("Scheduled task panicked: {}", err);
            }
        }
    }
}

impl Drop for FixedRateTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
