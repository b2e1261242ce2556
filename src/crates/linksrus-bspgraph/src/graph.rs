//! The single-process BSP graph: vertex/edge storage, aggregators, and
//! the superstep algorithm.
//!
//! The compute side is a fan-out-then-barrier task pool: a fixed number of
//! worker tasks pull work off a shared `tokio::sync::mpsc` channel and
//! report completion through a oneshot, the same shape used for dispatching
//! bounded concurrent work elsewhere in this workspace. Here the pool is
//! *persistent* — the worker tasks are spawned once at `Graph::new` and
//! live for the graph's lifetime, rather than being spun up per superstep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::aggregator::Aggregator;
use crate::error::{GraphError, Result};
use crate::queue::MessageQueueFactory;
use crate::vertex::Vertex;

/// User hook for delivering a message to a vertex ID this graph doesn't
/// own. Only consulted when `SendMessage`/`BroadcastToNeighbors` targets an
/// unknown local vertex — typically wired up to the partition/cluster layer
/// in a distributed pass.
pub trait Relayer: Send + Sync {
    fn relay(&self, dst_id: &str, message: serde_json::Value) -> Result<()>;
}

/// The per-vertex compute callback. Receives the graph (to send/broadcast
/// messages and touch aggregators), the vertex being processed, and the
/// messages queued for it at the start of this superstep.
pub type ComputeFn =
    Arc<dyn Fn(&Graph, &Vertex, Vec<serde_json::Value>) -> Result<()> + Send + Sync>;

struct WorkItem {
    vertex_id: String,
    superstep: u64,
    compute: ComputeFn,
    pending: Arc<AtomicUsize>,
    active_count: Arc<AtomicU64>,
    first_error: Arc<Mutex<Option<GraphError>>>,
    done: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

struct GraphInner {
    vertices: DashMap<String, Vertex>,
    aggregators: DashMap<String, Arc<dyn Aggregator>>,
    relayer: RwLock<Option<Arc<dyn Relayer>>>,
    queue_factory: Arc<dyn MessageQueueFactory>,
    superstep: AtomicU64,
    work_tx: mpsc::Sender<WorkItem>,
    cancel: CancellationToken,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// A single-process BSP graph. Cheap to clone — internally an `Arc` handle,
/// so a `Graph` can be captured by the compute worker tasks it itself
/// spawned without creating a borrow-lifetime problem.
#[derive(Clone)]
pub struct Graph(Arc<GraphInner>);

impl Graph {
    /// Spawns exactly `compute_workers` (clamped to at least 1) persistent
    /// worker tasks, each pulling `WorkItem`s off a shared receiver guarded
    /// by an async mutex — a simple, idiomatic way to turn a single-consumer
    /// `mpsc::Receiver` into a work-stealing queue for several tasks.
    pub fn new(compute_workers: usize, queue_factory: Arc<dyn MessageQueueFactory>) -> Self {
        let compute_workers = compute_workers.max(1);
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(1);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let cancel = CancellationToken::new();

        let inner = Arc::new(GraphInner {
            vertices: DashMap::new(),
            aggregators: DashMap::new(),
            relayer: RwLock::new(None),
            queue_factory,
            superstep: AtomicU64::new(0),
            work_tx,
            cancel: cancel.clone(),
            worker_handles: Mutex::new(Vec::new()),
        });
        let graph = Graph(inner);

        let mut handles = Vec::with_capacity(compute_workers);
        for worker_id in 0..compute_workers {
            let graph = graph.clone();
            let work_rx = work_rx.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                graph.worker_loop(worker_id, work_rx, cancel).await;
            }));
        }
        *graph.0.worker_handles.lock().unwrap() = handles;
        graph
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        work_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let item = {
                let mut rx = work_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = rx.recv() => item,
                }
            };
            let Some(item) = item else {
                trace!(worker_id, "compute worker shutting down");
                return;
            };
            self.process_one(item);
        }
    }

    fn process_one(&self, item: WorkItem) {
        let WorkItem { vertex_id, superstep, compute, pending, active_count, first_error, done } = item;

        if let Some(vertex) = self.0.vertices.get(&vertex_id) {
            let messages = vertex.current_inbox(superstep).drain();
            vertex.set_active(true);
            if let Err(err) = (compute)(self, &vertex, messages) {
                let wrapped = match err {
                    GraphError::Vertex { .. } => err,
                    other => GraphError::vertex(vertex_id.clone(), other),
                };
                warn!(vertex = %vertex_id, error = %wrapped, "vertex compute failed");
                let mut slot = first_error.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(wrapped);
                }
            } else if vertex.is_active() {
                active_count.fetch_add(1, Ordering::SeqCst);
            }
        }

        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(tx) = done.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }
    }

    /// Add a fresh vertex. Errors are not possible here (unlike `AddEdge`) —
    /// a duplicate ID silently replaces the previous vertex, mirroring
    /// `DashMap::insert`'s own semantics.
    pub fn add_vertex(&self, id: impl Into<String>, value: serde_json::Value) {
        let id = id.into();
        let factory = self.0.queue_factory.clone();
        let vertex = Vertex::new(id.clone(), value, move || factory.make());
        self.0.vertices.insert(id, vertex);
    }

    /// Append a directed edge from `src_id` to `dst_id`. `src_id` must
    /// already be a local vertex; `dst_id` is not validated here — it may
    /// resolve to a remote partition at message-send time.
    pub fn add_edge(&self, src_id: &str, dst_id: impl Into<String>, value: serde_json::Value) -> Result<()> {
        let mut vertex = self
            .0
            .vertices
            .get_mut(src_id)
            .ok_or_else(|| GraphError::UnknownEdgeSource(src_id.to_string()))?;
        vertex.edges.push(crate::vertex::Edge::new(dst_id, value));
        Ok(())
    }

    pub fn register_aggregator(&self, name: impl Into<String>, aggregator: Arc<dyn Aggregator>) {
        self.0.aggregators.insert(name.into(), aggregator);
    }

    pub fn aggregator(&self, name: &str) -> Result<Arc<dyn Aggregator>> {
        self.0
            .aggregators
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| GraphError::UnknownAggregator(name.to_string()))
    }

    /// Snapshot of every registered aggregator's current value, keyed by
    /// name. Used by the cluster coordinator to fold per-partition deltas
    /// during the lock-step superstep protocol.
    pub fn aggregators(&self) -> HashMap<String, Arc<dyn Aggregator>> {
        self.0.aggregators.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn register_relayer(&self, relayer: Arc<dyn Relayer>) {
        *self.0.relayer.write().unwrap() = Some(relayer);
    }

    /// Deliver `message` to `dst_id`. If `dst_id` names a local vertex, the
    /// message lands in that vertex's *next* inbox (the one that will be
    /// current at `superstep + 1`). Otherwise, if a `Relayer` is
    /// registered, it's given the chance to deliver the message externally.
    /// A relayer reporting [`GraphError::DestinationIsLocal`] is treated as
    /// the late-arriving-vertex case this layer does not yet support, and
    /// is surfaced to the caller as [`GraphError::InvalidMessageDestination`].
    pub fn send_message(&self, dst_id: &str, message: serde_json::Value) -> Result<()> {
        let superstep = self.0.superstep.load(Ordering::SeqCst);
        if let Some(vertex) = self.0.vertices.get(dst_id) {
            vertex.next_inbox(superstep).enqueue(message);
            return Ok(());
        }

        let relayer = self.0.relayer.read().unwrap().clone();
        match relayer {
            Some(relayer) => match relayer.relay(dst_id, message) {
                Ok(()) => Ok(()),
                Err(GraphError::DestinationIsLocal(id)) => Err(GraphError::InvalidMessageDestination(id)),
                Err(other) => Err(other),
            },
            None => Err(GraphError::InvalidMessageDestination(dst_id.to_string())),
        }
    }

    /// Send `message` to every outgoing edge of `vertex`. `vertex` must be
    /// the same reference the caller's compute invocation was given — this
    /// avoids a second, redundant map lookup for the vertex currently being
    /// processed (which would otherwise be a self-deadlock risk were
    /// vertex access guarded by an exclusive lock; it isn't, but the
    /// signature keeps the call site honest about which vertex is
    /// broadcasting).
    pub fn broadcast_to_neighbors(&self, vertex: &Vertex, message: serde_json::Value) -> Result<()> {
        for edge in &vertex.edges {
            self.send_message(&edge.dst_id, message.clone())?;
        }
        Ok(())
    }

    pub fn superstep(&self) -> u64 {
        self.0.superstep.load(Ordering::SeqCst)
    }

    pub fn vertex_count(&self) -> usize {
        self.0.vertices.len()
    }

    /// The current value of vertex `id`, or `None` if no such vertex
    /// exists. Intended for reading out results after a run completes, not
    /// for use from inside a compute callback (which already holds `&Vertex`
    /// directly).
    pub fn vertex_value(&self, id: &str) -> Option<serde_json::Value> {
        self.0.vertices.get(id).map(|v| v.value())
    }

    /// Run a single superstep with the given compute function. Returns the
    /// number of vertices that remained (or became) active during the step,
    /// and the first compute error encountered, if any. Always advances the
    /// superstep counter by one, even if no vertex was eligible.
    pub async fn step(&self, compute: ComputeFn) -> (u64, Option<GraphError>) {
        let superstep = self.superstep();
        let ids: Vec<String> = self
            .0
            .vertices
            .iter()
            .filter(|e| e.value().is_eligible(superstep))
            .map(|e| e.key().clone())
            .collect();

        debug!(superstep, eligible = ids.len(), "running superstep");

        if ids.is_empty() {
            self.0.superstep.fetch_add(1, Ordering::SeqCst);
            return (0, None);
        }

        let pending = Arc::new(AtomicUsize::new(ids.len()));
        let active_count = Arc::new(AtomicU64::new(0));
        let first_error = Arc::new(Mutex::new(None));
        let (done_tx, done_rx) = oneshot::channel();
        let done = Arc::new(Mutex::new(Some(done_tx)));

        for vertex_id in ids {
            let item = WorkItem {
                vertex_id,
                superstep,
                compute: compute.clone(),
                pending: pending.clone(),
                active_count: active_count.clone(),
                first_error: first_error.clone(),
                done: done.clone(),
            };
            if self.0.work_tx.send(item).await.is_err() {
                break;
            }
        }

        let _ = done_rx.await;
        self.0.superstep.fetch_add(1, Ordering::SeqCst);
        let error = first_error.lock().unwrap().take();
        (active_count.load(Ordering::SeqCst), error)
    }

    /// Discard all vertices, edges, and aggregators and reset the superstep
    /// counter to zero, closing every vertex's message queues first. The
    /// first queue-close error encountered (if any) is returned, but every
    /// queue is still attempted. The compute worker pool is left running —
    /// it's reused by the next pass.
    pub fn reset(&self) -> Result<()> {
        let mut first_error = None;
        for entry in self.0.vertices.iter() {
            if let Err(e) = entry.value().close_queues() {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        self.0.vertices.clear();
        self.0.aggregators.clear();
        *self.0.relayer.write().unwrap() = None;
        self.0.superstep.store(0, Ordering::SeqCst);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the compute worker pool and close every vertex's queues.
    /// Idempotent: calling `close` twice is safe, the second call simply
    /// finds no workers left to join.
    pub async fn close(&self) -> Result<()> {
        self.0.cancel.cancel();
        let handles = std::mem::take(&mut *self.0.worker_handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
        let mut first_error = None;
        for entry in self.0.vertices.iter() {
            if let Err(e) = entry.value().close_queues() {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AggregatorValue, IntSumAggregator};
    use crate::queue::InMemoryQueueFactory;
    use serde_json::json;

    fn new_graph(workers: usize) -> Graph {
        Graph::new(workers, Arc::new(InMemoryQueueFactory))
    }

    #[tokio::test]
    async fn two_vertex_message_exchange_reactivates_frozen_peer() {
        let graph = new_graph(2);
        graph.add_vertex("a", json!(0));
        graph.add_vertex("b", json!(0));
        graph.add_edge("a", "b", json!(null)).unwrap();

        let compute: ComputeFn = Arc::new(|g, v, messages| {
            if v.id == "a" && g.superstep() == 0 {
                g.broadcast_to_neighbors(v, json!("ping"))?;
            }
            if !messages.is_empty() {
                v.set_value(json!(messages.len()));
            }
            v.freeze();
            Ok(())
        });

        let (active, err) = graph.step(compute.clone()).await;
        assert!(err.is_none());
        assert_eq!(active, 0);

        let (active, err) = graph.step(compute).await;
        assert!(err.is_none());
        // "b" was reactivated by the pending message from step 0.
        assert_eq!(active, 0);
        assert_eq!(graph.superstep(), 2);

        graph.close().await.unwrap();
    }

    #[tokio::test]
    async fn aggregator_accumulates_across_a_thousand_vertex_broadcast() {
        let graph = new_graph(8);
        for i in 0..1000 {
            graph.add_vertex(format!("v{i}"), json!(0));
        }
        graph.register_aggregator("count", Arc::new(IntSumAggregator::new(0)));

        let compute: ComputeFn = Arc::new(|g, _v, _messages| {
            g.aggregator("count")?.aggregate(AggregatorValue::Int(1)).map_err(|e| {
                GraphError::AggregatorTypeMismatch { name: "count".into(), expected: e.expected, actual: e.actual }
            })?;
            Ok(())
        });

        let (active, err) = graph.step(compute).await;
        assert!(err.is_none());
        assert_eq!(active, 0);
        assert_eq!(graph.aggregator("count").unwrap().get(), AggregatorValue::Int(1000));

        graph.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_message_to_unknown_vertex_without_relayer_errors() {
        let graph = new_graph(1);
        graph.add_vertex("a", json!(null));
        let err = graph.send_message("ghost", json!(1)).unwrap_err();
        assert!(matches!(err, GraphError::InvalidMessageDestination(id) if id == "ghost"));
        graph.close().await.unwrap();
    }

    #[tokio::test]
    async fn compute_error_is_wrapped_with_vertex_id_and_does_not_abort_other_vertices() {
        let graph = new_graph(2);
        graph.add_vertex("ok", json!(null));
        graph.add_vertex("bad", json!(null));

        let compute: ComputeFn = Arc::new(|_g, v, _messages| {
            if v.id == "bad" {
                return Err(GraphError::UnknownAggregator("boom".into()));
            }
            v.freeze();
            Ok(())
        });

        let (_active, err) = graph.step(compute).await;
        match err.unwrap() {
            GraphError::Vertex { vertex_id, .. } => assert_eq!(vertex_id, "bad"),
            other => panic!("expected Vertex error, got {other:?}"),
        }
        // "ok" still ran and froze despite "bad" failing.
        assert!(!graph.0.vertices.get("ok").unwrap().is_active());

        graph.close().await.unwrap();
    }

    #[tokio::test]
    async fn reset_clears_state_and_superstep_counter() {
        let graph = new_graph(1);
        graph.add_vertex("a", json!(null));
        graph.register_aggregator("x", Arc::new(IntSumAggregator::new(1)));
        graph.step(Arc::new(|_g, v, _m| { v.freeze(); Ok(()) })).await;

        graph.reset().unwrap();
        assert_eq!(graph.vertex_count(), 0);
        assert_eq!(graph.superstep(), 0);
        assert!(graph.aggregator("x").is_err());

        graph.close().await.unwrap();
    }

    #[tokio::test]
    async fn empty_graph_step_still_advances_superstep() {
        let graph = new_graph(1);
        let (active, err) = graph.step(Arc::new(|_g, _v, _m| Ok(()))).await;
        assert_eq!(active, 0);
        assert!(err.is_none());
        assert_eq!(graph.superstep(), 1);
        graph.close().await.unwrap();
    }
}
