//! Repeating background refresh owned by a cache instance.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A cancellable interval task.
///
/// The first run happens one full `period` after spawning. `tick` returning
/// `None` means the owner is gone and ends the task. A run already in
/// progress is allowed to finish when the task is cancelled.
///
/// Dropping the task cancels it.
#[derive(Debug)]
pub(crate) struct RefreshTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
    period: Duration,
}

impl RefreshTask {
    /// `period` must be non-zero.
    pub(crate) fn spawn<F, Fut>(runtime: &Handle, period: Duration, tick: F) -> Self
    where
        F: Fn() -> Option<Fut> + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match tick() {
                    Some(run) => run.await,
                    None => break,
                }
            }

            tracing::debug!(?period, "Refresh task stopped");
        });

        tracing::debug!(?period, "Refresh task started");
        Self {
            token,
            handle,
            period,
        }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
