//! Drives a [`Graph`] through repeated supersteps.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{GraphError, Result};
use crate::graph::{ComputeFn, Graph};

/// Hooks invoked around each superstep. All methods default to a no-op (or
/// `true`, for the ones that gate continued execution) so callers only
/// override what they need — mirrors the optional-callback shape of
/// `BspExecutorHooks` used by the cluster coordinator.
pub trait BspExecutorHooks: Send + Sync {
    /// Called immediately before a superstep runs. An `Err` here aborts the
    /// run without executing the step.
    fn pre_step(&self, _superstep: u64) -> Result<()> {
        Ok(())
    }

    /// Called after a superstep completes, with the number of vertices
    /// that remained or became active and any compute error observed.
    fn post_step(&self, _superstep: u64, _active: u64, _error: Option<&GraphError>) -> Result<()> {
        Ok(())
    }

    /// Called after `post_step` to decide whether another superstep should
    /// run. Default: keep going as long as at least one vertex is active
    /// and `post_step` raised no error.
    fn post_step_keep_running(&self, active: u64, error: Option<&GraphError>) -> bool {
        error.is_none() && active > 0
    }
}

/// The hooks a bare [`Graph`] run uses when the caller doesn't need to
/// observe individual supersteps.
#[derive(Default)]
pub struct NoopHooks;

impl BspExecutorHooks for NoopHooks {}

/// Lets an `Executor` be built from a type-erased hooks object — the
/// cluster coordinator assembles its lock-step wrapper around whatever
/// hooks a `JobRunner` hands it and doesn't know the concrete type.
impl BspExecutorHooks for Arc<dyn BspExecutorHooks> {
    fn pre_step(&self, superstep: u64) -> Result<()> {
        self.as_ref().pre_step(superstep)
    }

    fn post_step(&self, superstep: u64, active: u64, error: Option<&GraphError>) -> Result<()> {
        self.as_ref().post_step(superstep, active, error)
    }

    fn post_step_keep_running(&self, active: u64, error: Option<&GraphError>) -> bool {
        self.as_ref().post_step_keep_running(active, error)
    }
}

/// Drives supersteps on a [`Graph`] until `post_step_keep_running` says
/// stop, the caller's [`CancellationToken`] fires, or an explicit step
/// count is exhausted.
pub struct Executor<H: BspExecutorHooks> {
    graph: Graph,
    compute: ComputeFn,
    hooks: H,
}

impl<H: BspExecutorHooks> Executor<H> {
    pub fn new(graph: Graph, compute: ComputeFn, hooks: H) -> Self {
        Self { graph, compute, hooks }
    }

    /// The graph this executor drives — the cluster coordinator reads
    /// aggregator deltas off it between supersteps.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Run supersteps until the hooks say to stop or `cancel` fires. The
    /// first superstep executed in a fresh pass is numbered 0. Returns the
    /// number of supersteps actually executed and the last compute error
    /// observed, if any.
    pub async fn run(&self, cancel: &CancellationToken) -> (u64, Option<GraphError>) {
        self.run_steps(u64::MAX, cancel).await
    }

    /// Like [`Self::run`], but stops after at most `max_steps` supersteps
    /// even if the hooks would otherwise keep going.
    pub async fn run_steps(&self, max_steps: u64, cancel: &CancellationToken) -> (u64, Option<GraphError>) {
        let mut executed = 0u64;
        let mut last_error = None;

        while executed < max_steps {
            if cancel.is_cancelled() {
                info!(executed, "executor run cancelled");
                break;
            }

            let superstep = self.graph.superstep();
            if let Err(e) = self.hooks.pre_step(superstep) {
                last_error = Some(e);
                break;
            }

            let (active, error) = self.graph.step(self.compute.clone()).await;
            executed += 1;

            if let Err(e) = self.hooks.post_step(superstep, active, error.as_ref()) {
                last_error = Some(e);
                break;
            }

            let keep_running = self.hooks.post_step_keep_running(active, error.as_ref());
            last_error = error;
            if !keep_running {
                break;
            }
        }

        (executed, last_error)
    }
}

/// Convenience constructor mirroring common call sites: a [`Graph`] driven
/// by `compute` with no observation hooks.
pub fn bare_executor(graph: Graph, compute: ComputeFn) -> Executor<NoopHooks> {
    Executor::new(graph, compute, NoopHooks)
}

/// Wraps a user-supplied closure pair into [`BspExecutorHooks`] without
/// requiring a dedicated type — handy for tests and small programs.
pub struct FnHooks {
    pub post_step: Arc<dyn Fn(u64, u64, Option<&GraphError>) -> Result<()> + Send + Sync>,
    pub keep_running: Arc<dyn Fn(u64, Option<&GraphError>) -> bool + Send + Sync>,
}

impl BspExecutorHooks for FnHooks {
    fn post_step(&self, superstep: u64, active: u64, error: Option<&GraphError>) -> Result<()> {
        (self.post_step)(superstep, active, error)
    }

    fn post_step_keep_running(&self, active: u64, error: Option<&GraphError>) -> bool {
        (self.keep_running)(active, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueFactory;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn runs_until_no_vertex_is_active() {
        let graph = Graph::new(2, Arc::new(InMemoryQueueFactory));
        graph.add_vertex("a", json!(0));
        graph.add_vertex("b", json!(0));

        let compute: ComputeFn = Arc::new(|_g, v, _messages| {
            let n = v.value().as_i64().unwrap_or(0);
            if n < 2 {
                v.set_value(json!(n + 1));
            } else {
                v.freeze();
            }
            Ok(())
        });

        let executor = bare_executor(graph.clone(), compute);
        let cancel = CancellationToken::new();
        let (executed, error) = executor.run(&cancel).await;

        assert!(error.is_none());
        assert_eq!(executed, 3);
        assert_eq!(graph.superstep(), 3);

        graph.close().await.unwrap();
    }

    #[tokio::test]
    async fn run_steps_caps_execution_even_if_vertices_remain_active() {
        let graph = Graph::new(1, Arc::new(InMemoryQueueFactory));
        graph.add_vertex("a", json!(null));

        let compute: ComputeFn = Arc::new(|_g, _v, _m| Ok(()));
        let executor = bare_executor(graph.clone(), compute);
        let cancel = CancellationToken::new();
        let (executed, _) = executor.run_steps(3, &cancel).await;

        assert_eq!(executed, 3);
        graph.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_run_before_further_steps() {
        let graph = Graph::new(1, Arc::new(InMemoryQueueFactory));
        graph.add_vertex("a", json!(null));

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();
        let compute: ComputeFn = Arc::new(move |_g, _v, _m| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let executor = bare_executor(graph.clone(), compute);
        let (executed, _) = executor.run(&cancel).await;

        assert_eq!(executed, 0);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        graph.close().await.unwrap();
    }

    #[tokio::test]
    async fn pre_step_error_aborts_without_running_the_step() {
        struct AbortFirst;
        impl BspExecutorHooks for AbortFirst {
            fn pre_step(&self, _superstep: u64) -> Result<()> {
                Err(GraphError::UnknownAggregator("nope".into()))
            }
        }

        let graph = Graph::new(1, Arc::new(InMemoryQueueFactory));
        graph.add_vertex("a", json!(null));
        let compute: ComputeFn = Arc::new(|_g, _v, _m| Ok(()));
        let executor = Executor::new(graph.clone(), compute, AbortFirst);
        let cancel = CancellationToken::new();
        let (executed, error) = executor.run(&cancel).await;

        assert_eq!(executed, 0);
        assert!(matches!(error, Some(GraphError::UnknownAggregator(_))));
        graph.close().await.unwrap();
    }
}
