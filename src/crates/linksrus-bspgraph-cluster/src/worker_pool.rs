//! Worker pool: the master-side registry of idle workers available to
//! be reserved for a job.
//!
//! Workers register themselves (a stream connects, `add_worker` is called)
//! and are health-checked for as long as they sit idle: the moment a
//! worker's stream disconnects, it's dropped from the pool without waiting
//! for anyone to reserve it. `reserve_workers` hands out a snapshot of
//! everything currently idle, clearing the pool — reserved workers are the
//! caller's responsibility until released back with `return_workers`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ClusterError, Result};
use crate::stream::Stream;

/// An idle worker's connection, as seen by the master: its outbound stream
/// and the receiver its `handle_send_recv` driver forwards inbound
/// `WorkerPayload`s into.
pub struct WorkerHandle<Out: Send + 'static, In: Send + 'static> {
    pub id: u64,
    pub stream: Arc<Stream<Out>>,
    pub inbound: mpsc::Receiver<In>,
}

struct Idle<Out: Send + 'static, In: Send + 'static> {
    workers: HashMap<u64, WorkerHandle<Out, In>>,
    health_tasks: HashMap<u64, JoinHandle<()>>,
}

struct PoolInner<Out: Send + 'static, In: Send + 'static> {
    idle: AsyncMutex<Idle<Out, In>>,
    next_id: AtomicU64,
    changed_tx: mpsc::Sender<()>,
    changed_rx: AsyncMutex<mpsc::Receiver<()>>,
    closed: CancellationToken,
}

/// Master-side registry of idle workers, shared across the job-acceptance
/// loop and every per-worker health-check task.
pub struct WorkerPool<Out: Send + 'static, In: Send + 'static>(Arc<PoolInner<Out, In>>);

impl<Out: Send + 'static, In: Send + 'static> Clone for WorkerPool<Out, In> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<Out: Send + 'static, In: Send + 'static> WorkerPool<Out, In> {
    pub fn new() -> Self {
        // Capacity 1, not 0: `reserve_workers` only cares that *something*
        // changed since it last looked, not how many times — a single
        // coalesced slot is exactly the "has anything changed" signal it
        // needs, and keeps a burst of registrations from backing up sends.
        let (changed_tx, changed_rx) = mpsc::channel(1);
        Self(Arc::new(PoolInner {
            idle: AsyncMutex::new(Idle { workers: HashMap::new(), health_tasks: HashMap::new() }),
            next_id: AtomicU64::new(0),
            changed_tx,
            changed_rx: AsyncMutex::new(changed_rx),
            closed: CancellationToken::new(),
        }))
    }

    fn mark_changed(&self) {
        let _ = self.0.changed_tx.try_send(());
    }

    /// Registers a newly-connected worker as idle and spawns a task that
    /// removes it the moment its stream disconnects (or the pool closes).
    pub async fn add_worker(&self, stream: Arc<Stream<Out>>, inbound: mpsc::Receiver<In>) -> u64 {
        let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
        let pool = self.clone();
        let health_stream = stream.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = health_stream.cancel_token().cancelled() => {
                    debug!(worker_id = id, "worker stream disconnected while idle");
                }
                _ = pool.0.closed.cancelled() => {
                    debug!(worker_id = id, "pool closed, dropping idle worker health check");
                }
            }
            pool.remove(id).await;
        });

        let mut idle = self.0.idle.lock().await;
        idle.workers.insert(id, WorkerHandle { id, stream, inbound });
        idle.health_tasks.insert(id, handle);
        drop(idle);
        self.mark_changed();
        info!(worker_id = id, "worker registered");
        id
    }

    async fn remove(&self, id: u64) {
        let mut idle = self.0.idle.lock().await;
        if idle.workers.remove(&id).is_some() {
            drop(idle);
            self.mark_changed();
        }
    }

    /// Blocks until at least `min` workers are idle, then atomically takes
    /// every idle worker (not just `min`) and returns them, leaving the pool
    /// empty. Fails with [`ClusterError::MasterShuttingDown`] if `close` is
    /// called first, or [`ClusterError::UnableToReserveWorkers`] if
    /// `cancel` fires (e.g. an acquire-timeout-derived context) before `min`
    /// is reached.
    pub async fn reserve_workers(&self, min: usize, cancel: &CancellationToken) -> Result<Vec<WorkerHandle<Out, In>>> {
        loop {
            {
                let mut idle = self.0.idle.lock().await;
                if idle.workers.len() >= min {
                    let workers: Vec<_> = idle.workers.drain().map(|(_, w)| w).collect();
                    for (_, handle) in idle.health_tasks.drain() {
                        handle.abort();
                    }
                    return Ok(workers);
                }
            }

            if self.0.closed.is_cancelled() {
                return Err(ClusterError::MasterShuttingDown);
            }

            let mut changed_rx = self.0.changed_rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClusterError::UnableToReserveWorkers { min }),
                _ = self.0.closed.cancelled() => return Err(ClusterError::MasterShuttingDown),
                _ = changed_rx.recv() => {}
            }
        }
    }

    /// Puts a previously-reserved worker back into the idle pool, re-arming
    /// its health check. A worker whose stream already disconnected while
    /// reserved is silently dropped instead.
    pub async fn return_worker(&self, worker: WorkerHandle<Out, In>) {
        if worker.stream.cancel_token().is_cancelled() {
            return;
        }
        self.add_worker(worker.stream, worker.inbound).await;
    }

    pub async fn idle_count(&self) -> usize {
        self.0.idle.lock().await.workers.len()
    }

    /// Closes the pool: every blocked `reserve_workers` call fails with
    /// `MasterShuttingDown`, and every still-idle worker's health task
    /// exits without removing itself one by one (moot, since the pool is
    /// being torn down anyway).
    pub fn close(&self) {
        self.0.closed.cancel();
    }
}

impl<Out: Send + 'static, In: Send + 'static> Default for WorkerPool<Out, In> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;
    use std::time::Duration;

    fn fake_worker() -> (Arc<Stream<()>>, mpsc::Receiver<()>) {
        let (tx, _rx) = mpsc::channel(1);
        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        (Stream::new(tx), inbound_rx)
    }

    #[tokio::test]
    async fn reserve_blocks_until_min_workers_are_idle() {
        let pool = WorkerPool::<(), ()>::new();
        let cancel = CancellationToken::new();

        let pool_clone = pool.clone();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { pool_clone.reserve_workers(2, &cancel_clone).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let (s1, i1) = fake_worker();
        pool.add_worker(s1, i1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let (s2, i2) = fake_worker();
        pool.add_worker(s2, i2).await;

        let reserved = handle.await.unwrap().unwrap();
        assert_eq!(reserved.len(), 2);
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test]
    async fn disconnected_worker_is_dropped_from_the_idle_pool() {
        let pool = WorkerPool::<(), ()>::new();
        let (stream, inbound) = fake_worker();
        pool.add_worker(stream.clone(), inbound).await;
        assert_eq!(pool.idle_count().await, 1);

        stream.cancel_token().cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.idle_count().await, 0);
    }

    #[tokio::test]
    async fn cancelling_the_acquire_context_fails_reservation() {
        let pool = WorkerPool::<(), ()>::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pool.reserve_workers(1, &cancel).await;
        assert!(matches!(result, Err(ClusterError::UnableToReserveWorkers { min: 1 })));
    }

    #[tokio::test]
    async fn closed_pool_rejects_reservation() {
        let pool = WorkerPool::<(), ()>::new();
        pool.close();
        let cancel = CancellationToken::new();
        let result = pool.reserve_workers(1, &cancel).await;
        assert!(matches!(result, Err(ClusterError::MasterShuttingDown)));
    }
}
