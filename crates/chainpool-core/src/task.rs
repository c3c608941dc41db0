//! Background task bookkeeping shared by nodes, the pool and the sender.
//!
//! Every spawned task holds a clone of an mpsc sender it never uses. Once the
//! group is stopped and its own sender dropped, `wait` resolves when the last
//! task has finished.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

pub(crate) struct TaskGroup {
    stop: watch::Sender<bool>,
    guard: Mutex<Option<mpsc::Sender<()>>>,
    done: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl TaskGroup {
    pub(crate) fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (guard, done) = mpsc::channel(1);
        Self {
            stop,
            guard: Mutex::new(Some(guard)),
            done: tokio::sync::Mutex::new(done),
        }
    }

    /// Spawn `fut` as part of the group. Returns `false` once stopped.
    pub(crate) fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(guard) = self.guard.lock().clone() else {
            return false;
        };
        tokio::spawn(
            async move {
                fut.await;
                drop(guard);
            }
            .in_current_span(),
        );
        true
    }

    pub(crate) fn stop_signal(&self) -> StopSignal {
        StopSignal(self.stop.subscribe())
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Signal every task to exit and refuse new spawns.
    pub(crate) fn stop(&self) {
        self.stop.send_replace(true);
        self.guard.lock().take();
    }

    /// Wait until every spawned task has returned. Call after [`stop`](Self::stop).
    pub(crate) async fn wait(&self) {
        let mut done = self.done.lock().await;
        while done.recv().await.is_some() {}
    }
}

/// Receiver side of a [`TaskGroup`] stop signal.
#[derive(Clone)]
pub(crate) struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Resolves once the group is stopped.
    pub(crate) async fn stopped(&mut self) {
        let _ = self.0.wait_for(|stopped| *stopped).await;
    }

    /// Run `fut` unless the group stops first.
    pub(crate) async fn guard<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.stopped() => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_returns_after_tasks_exit() {
        let group = TaskGroup::new();
        let exited = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let mut stop = group.stop_signal();
            let exited = exited.clone();
            assert!(group.spawn(async move {
                stop.stopped().await;
                exited.fetch_add(1, Ordering::SeqCst);
            }));
        }
        group.stop();
        group.wait().await;
        assert_eq!(exited.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn spawn_refused_after_stop() {
        let group = TaskGroup::new();
        group.stop();
        assert!(group.is_stopped());
        assert!(!group.spawn(async {}));
        group.wait().await;
    }

    #[tokio::test]
    async fn guard_short_circuits_when_stopped() {
        let group = TaskGroup::new();
        let mut stop = group.stop_signal();
        group.stop();
        assert_eq!(stop.guard(std::future::pending::<()>()).await, None);
    }
}
