//! The `JobRunner` collaborator trait: the one piece of this crate that
//! actually knows what the graph being computed *means* — populating
//! vertices and edges from storage, persisting results afterwards, and
//! supplying whatever domain-specific `BspExecutorHooks` the computation
//! needs (a PageRank convergence check, a link-count threshold, etc).

use std::sync::Arc;

use async_trait::async_trait;
use linksrus_bspgraph::{BspExecutorHooks, ComputeFn, Graph};

use crate::error::Result;
use crate::messages::JobDetails;

/// Wraps a user's `BspExecutorHooks` with the lock-step barrier
/// synchronization, producing the hooks the coordinator
/// actually drives the executor with. The coordinator hands a `JobRunner`
/// one of these so `start_job` can fold in whatever additional hooks of its
/// own it needs before returning.
pub type ExecutorFactory = Arc<dyn Fn(Arc<dyn BspExecutorHooks>) -> Arc<dyn BspExecutorHooks> + Send + Sync>;

/// Everything a coordinator needs to drive a job once `start_job` returns:
/// the populated graph, the compute callback, and the (already
/// barrier-wrapped) hooks to run it with.
pub struct StartedJob {
    pub graph: Graph,
    pub compute: ComputeFn,
    pub hooks: Arc<dyn BspExecutorHooks>,
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Populate a `Graph` for `details`'s partition range and return it
    /// along with the compute callback and hooks to run it with.
    /// `executor_factory` must be applied to whatever hooks this job runner
    /// wants to observe supersteps with — the coordinator relies on the
    /// result already including the barrier synchronization.
    async fn start_job(&self, details: &JobDetails, executor_factory: ExecutorFactory) -> Result<StartedJob>;

    /// Persist this partition's results. Called once the graph has
    /// stopped iterating and every worker has reached `PersistedResults`.
    async fn complete_job(&self, details: &JobDetails) -> Result<()>;

    /// The job was aborted (cancelled context, a peer disconnected, a
    /// sibling worker's `CompleteJob` failed). Best-effort cleanup only —
    /// its own errors are logged, not propagated.
    async fn abort_job(&self, details: &JobDetails);
}
