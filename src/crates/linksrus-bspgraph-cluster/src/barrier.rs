//! Step barrier: a phase-tagged rendezvous point between a master and
//! its workers.
//!
//! The same type serves both sides of the protocol, just with a different
//! arity. On the master, `expected` is the worker count: `wait_for_workers`
//! blocks until every worker has `arrive`d for a phase, and `notify_workers`
//! broadcasts the master's reduced result back to each of them. On a
//! worker, `expected` is 1: the worker's own executor hook calls `arrive`
//! (aliased as [`StepBarrier::wait`]) to hand its local step up and block
//! for the master's reply, and the worker's stream-receive task calls
//! `notify_workers` (aliased as [`StepBarrier::notify`]) the moment that
//! reply comes off the wire.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{ClusterError, Result};
use crate::messages::StepType;

struct PhaseState<T> {
    arrived: Vec<T>,
    notifiers: Vec<oneshot::Sender<T>>,
    pending_notify: Option<Vec<oneshot::Sender<T>>>,
    ready: Arc<Notify>,
}

impl<T> PhaseState<T> {
    fn new() -> Self {
        Self { arrived: Vec::new(), notifiers: Vec::new(), pending_notify: None, ready: Arc::new(Notify::new()) }
    }
}

/// A phase-tagged N-to-1-to-N rendezvous. `T` is the step payload
/// (ordinarily [`crate::messages::Step`]) carried in both directions.
pub struct StepBarrier<T: Clone + Send + 'static> {
    expected: usize,
    phases: HashMap<StepType, AsyncMutex<PhaseState<T>>>,
}

impl<T: Clone + Send + 'static> StepBarrier<T> {
    /// `expected` is the number of `arrive` calls `wait_for_workers` waits
    /// for per phase — the worker count on the master side, always 1 on a
    /// worker's own local barrier.
    pub fn new(expected: usize) -> Self {
        let mut phases = HashMap::new();
        for phase in StepType::ALL {
            phases.insert(phase, AsyncMutex::new(PhaseState::new()));
        }
        Self { expected: expected.max(1), phases }
    }

    fn phase_state(&self, phase: StepType) -> Result<&AsyncMutex<PhaseState<T>>> {
        self.phases.get(&phase).ok_or(ClusterError::UnsupportedStepType)
    }

    /// Registers one arrival for `phase` and blocks until the matching
    /// `notify_workers` call for that phase delivers a result, or `cancel`
    /// fires first.
    pub async fn arrive(&self, phase: StepType, step: T, cancel: &CancellationToken) -> Result<T> {
        let state = self.phase_state(phase)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = state.lock().await;
            guard.arrived.push(step);
            guard.notifiers.push(tx);
            if guard.arrived.len() >= self.expected {
                guard.ready.notify_waiters();
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClusterError::JobAborted),
            received = rx => received.map_err(|_| ClusterError::JobAborted),
        }
    }

    /// Worker-side alias for [`Self::arrive`]: hand the local executor's
    /// step up and block for the master's broadcast reply.
    pub async fn wait(&self, phase: StepType, step: T, cancel: &CancellationToken) -> Result<T> {
        self.arrive(phase, step, cancel).await
    }

    /// Blocks until `expected` workers have `arrive`d for `phase`, returning
    /// their steps in arrival order. The corresponding `notify_workers` call
    /// must follow before the next `wait_for_workers` on the same phase —
    /// the two are always called back to back by a single coordinator task,
    /// never interleaved across phases.
    pub async fn wait_for_workers(&self, phase: StepType, cancel: &CancellationToken) -> Result<Vec<T>> {
        let state = self.phase_state(phase)?;
        loop {
            {
                let mut guard = state.lock().await;
                if guard.arrived.len() >= self.expected {
                    let arrived = std::mem::take(&mut guard.arrived);
                    let notifiers = std::mem::take(&mut guard.notifiers);
                    guard.pending_notify = Some(notifiers);
                    return Ok(arrived);
                }
            }

            let ready = state.lock().await.ready.clone();
            let notified = ready.notified();
            {
                let guard = state.lock().await;
                if guard.arrived.len() >= self.expected {
                    continue;
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClusterError::JobAborted),
                _ = notified => {}
            }
        }
    }

    /// Broadcasts `step` to every arrival collected by the last
    /// `wait_for_workers` call for `phase`.
    pub async fn notify_workers(&self, phase: StepType, step: T, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ClusterError::JobAborted);
        }
        let state = self.phase_state(phase)?;
        let notifiers = {
            let mut guard = state.lock().await;
            guard.pending_notify.take().unwrap_or_default()
        };
        for tx in notifiers {
            let _ = tx.send(step.clone());
        }
        Ok(())
    }

    /// Worker-side alias for [`Self::notify_workers`]: deliver the master's
    /// broadcast to the single local waiter.
    pub async fn notify(&self, phase: StepType, step: T, cancel: &CancellationToken) -> Result<()> {
        self.notify_workers(phase, step, cancel).await
    }
}
