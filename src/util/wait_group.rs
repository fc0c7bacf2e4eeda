//! # Task Wait-Group
//!
//! Tracks every task spawned through it so a caller can wait for all of them
//! to actually finish instead of dropping the `JoinHandle` and hoping —
//! shared between the uplink consumer loop and the deduplicator so
//! `NetworkServer::shutdown` can drain it and know every per-packet pipeline
//! run and dedup completion timer has completed before returning. No forced
//! cancellation, per `SPEC_FULL.md` §5.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

#[derive(Clone, Default)]
pub struct WaitGroup {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `fut` on the current runtime and tracks its handle.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.handles.lock().unwrap().push(handle);
    }

    /// Awaits every tracked task, including ones spawned while this call is
    /// already in flight (a dedup completion timer spawns no further task
    /// itself anymore, but this stays correct even if a future task does).
    /// Returns once the wait-group is empty.
    pub async fn drain(&self) {
        loop {
            let batch: Vec<_> = {
                let mut handles = self.handles.lock().unwrap();
                std::mem::take(&mut *handles)
            };
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                let _ = handle.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn drain_waits_for_slow_task() {
        let wg = WaitGroup::new();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        wg.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            done2.store(1, Ordering::SeqCst);
        });
        wg.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drain_collects_tasks_spawned_from_within_a_tracked_task() {
        let wg = WaitGroup::new();
        let wg2 = wg.clone();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        wg.spawn(async move {
            wg2.spawn(async move {
                done2.store(1, Ordering::SeqCst);
            });
        });
        wg.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
