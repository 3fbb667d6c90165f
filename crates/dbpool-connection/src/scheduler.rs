//! Cancellable periodic background task
//!
//! Drives the pool's maintenance pass and the transaction manager's cleanup
//! pass. The task only holds a `Weak` to the state it services, so it never
//! keeps a pool or manager alive, and it exits on its own once that state
//! is dropped.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn a task that calls `tick` every `interval`, starting one
    /// interval from now.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<T, F, Fut>(
        name: &'static str,
        interval: Duration,
        target: Weak<T>,
        mut tick: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: FnMut(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(target) = target.upgrade() else {
                            break;
                        };
                        tick(target).await;
                    }
                }
            }

            tracing::debug!(task = name, "background task stopped");
        });

        tracing::debug!(task = name, interval = ?interval, "background task started");

        Self {
            name,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Cancel the task and wait for an in-flight pass to finish
    pub(crate) async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(task = self.name, error = %e, "background task ended abnormally");
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
