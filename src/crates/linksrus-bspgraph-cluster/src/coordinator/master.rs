//! Master-side job loop: reserves workers, partitions the vertex-ID
//! space across them, and drives the lock-step superstep protocol —
//! alternating `WaitForWorkers`/`NotifyWorkers` rounds on the
//! step barrier until every worker agrees the graph has converged, then
//! walking the three closing handshakes (`ExecutedGraph`,
//! `PersistedResults`, `CompletedJob`).
//!
//! The master never holds a vertex — every one lives on a worker. The
//! `Graph` its own `JobRunner::start_job` returns carries no vertices at
//! all; it exists solely to hold the long-lived, named aggregator instances
//! the master reduces worker deltas into each round before broadcasting the
//! combined result back, and to route `RelayMessage`s between workers that
//! don't talk to each other directly.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use linksrus_bspgraph::{BspExecutorHooks, Graph, GraphError};
use linksrus_bspgraph::PartitionRange;

use crate::barrier::StepBarrier;
use crate::config::MasterConfig;
use crate::error::{ClusterError, Result};
use crate::job_runner::{ExecutorFactory, JobRunner};
use crate::messages::{JobDetails, MasterPayload, RelayMessage, Step, StepType, WireAggregatorValue, WorkerPayload};
use crate::stream::Stream;
use crate::worker_pool::{WorkerHandle, WorkerPool};

/// Ties a [`WorkerPool`], [`MasterConfig`] and [`JobRunner`] together into
/// the job acceptance loop: reserve workers, run the job, and (on success)
/// let the reserved connections drop rather than returning them — a fresh
/// reservation happens per job.
pub struct Master {
    pub pool: WorkerPool<MasterPayload, WorkerPayload>,
    pub config: MasterConfig,
    pub job_runner: Arc<dyn JobRunner>,
}

impl Master {
    pub fn new(config: MasterConfig, job_runner: Arc<dyn JobRunner>) -> Self {
        Self { pool: WorkerPool::new(), config, job_runner }
    }

    /// Reserves `min_workers` (per config) and runs `job_id` across them.
    pub async fn run_job(&self, job_id: impl Into<String>, id_range: (Uuid, Uuid), cancel: &CancellationToken) -> Result<()> {
        let acquire_cancel = cancel.child_token();
        let acquire_timeout = self.config.worker_acquire_timeout;
        let timeout_guard = tokio::spawn({
            let acquire_cancel = acquire_cancel.clone();
            async move {
                tokio::time::sleep(acquire_timeout).await;
                acquire_cancel.cancel();
            }
        });
        let workers = self.pool.reserve_workers(self.config.min_workers, &acquire_cancel).await;
        timeout_guard.abort();
        let workers = workers?;

        run_job(job_id, id_range, workers, self.job_runner.clone(), cancel).await
    }
}

/// Drives one job to completion across `workers`, returning once every
/// worker has reached `CompletedJob` or the job aborts. Reserved workers
/// are consumed, not returned to any pool — a disconnect or failure mid-job
/// means the connection is no longer trustworthy to reuse anyway.
pub async fn run_job(
    job_id: impl Into<String>,
    id_range: (Uuid, Uuid),
    workers: Vec<WorkerHandle<MasterPayload, WorkerPayload>>,
    job_runner: Arc<dyn JobRunner>,
    cancel: &CancellationToken,
) -> Result<()> {
    let job_id = job_id.into();
    let num_workers = workers.len();
    if num_workers == 0 {
        return Err(ClusterError::UnableToReserveWorkers { min: 1 });
    }

    let partitions = PartitionRange::from_uuid_bounds(id_range.0, id_range.1, num_workers)?;
    let barrier = Arc::new(StepBarrier::<Step>::new(num_workers));
    let job_cancel = cancel.child_token();
    let created_at = current_timestamp();

    // The master holds no partition of its own — this `JobDetails` only
    // carries the job identity for `start_job`/`complete_job`/`abort_job`;
    // `partition_index`/`partition_count` are meaningless on this side and
    // never read by a master-side `JobRunner`.
    let master_details =
        JobDetails { job_id: job_id.clone(), created_at, partition_index: 0, partition_count: num_workers };

    // The master drives its own global aggregator reduction, not a
    // per-superstep graph computation, so the hooks it wraps with don't
    // need the worker-side barrier-observer treatment — it already does
    // the barrier rendezvous itself in `drive_superstep_protocol`. The
    // returned graph holds no vertices; it exists only to carry the
    // long-lived, named aggregator instances `drive_superstep_protocol`
    // reduces worker deltas into across every superstep of this job.
    let identity_factory: ExecutorFactory = Arc::new(|inner| inner);
    let started = match job_runner.start_job(&master_details, identity_factory).await {
        Ok(started) => started,
        Err(e) => {
            job_runner.abort_job(&master_details).await;
            return Err(e);
        }
    };
    let global_graph = started.graph;
    let global_hooks = started.hooks;

    // A worker relays a message to another worker by vertex ID; this map
    // lets the routing task for any one worker look up which worker's
    // stream actually owns that ID's partition.
    let routes: Arc<HashMap<usize, Arc<Stream<MasterPayload>>>> =
        Arc::new(workers.iter().enumerate().map(|(i, w)| (i, w.stream.clone())).collect());

    let mut receive_tasks = Vec::with_capacity(num_workers);
    let mut setup_result: Result<()> = Ok(());

    for (partition_index, worker) in workers.into_iter().enumerate() {
        let details =
            JobDetails { job_id: job_id.clone(), created_at, partition_index, partition_count: num_workers };
        if let Err(_e) = worker.stream.sender().send(MasterPayload::JobDetails(details)).await {
            setup_result = Err(ClusterError::JobAborted);
            break;
        }

        worker
            .stream
            .register_disconnect_callback({
                let job_cancel = job_cancel.clone();
                move || job_cancel.cancel()
            })
            .await;

        let barrier = barrier.clone();
        let stream = worker.stream.clone();
        let mut inbound = worker.inbound;
        let routes = routes.clone();
        let routes_partitions = partitions.clone();
        let task_cancel = job_cancel.clone();
        let worker_id = worker.id;

        receive_tasks.push(tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    m = inbound.recv() => m,
                };
                let Some(msg) = msg else {
                    // The worker's outbound sender was dropped — it
                    // disconnected (or exited) without completing the
                    // handshake. Treat it the same as an explicit stream
                    // disconnect: abort the whole job.
                    task_cancel.cancel();
                    break;
                };

                match msg {
                    WorkerPayload::Step(step) => {
                        let phase = step.step_type;
                        match barrier.arrive(phase, step, &task_cancel).await {
                            Ok(reply) => {
                                if stream.sender().send(MasterPayload::Step(reply)).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    WorkerPayload::RelayMessage(relay) => {
                        route_relay(&routes, &routes_partitions, worker_id, relay).await;
                    }
                }
            }
        }));
    }

    let result = match setup_result {
        Ok(()) => {
            let superstep_result =
                drive_superstep_protocol(&barrier, &global_graph, &global_hooks, &job_cancel).await;
            match superstep_result {
                Ok(()) => match job_runner.complete_job(&master_details).await {
                    Ok(()) => finish_handshakes(&barrier, &job_cancel).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    };

    if result.is_err() {
        // One worker's failure (a disconnect, a barrier abort, its own
        // `CompleteJob` erroring) must not leave the others waiting forever
        // on a barrier phase nobody will ever complete — close every
        // worker's stream so each one's disconnect callback fires, which
        // cancels its own job context and drives it to call `AbortJob`.
        job_cancel.cancel();
        for stream in routes.values() {
            stream.close(None).await;
        }
        job_runner.abort_job(&master_details).await;
    }

    for task in receive_tasks {
        task.abort();
    }

    let _ = global_graph.close().await;

    if let Err(e) = &result {
        warn!(job_id = %job_id, error = %e, "job aborted");
    } else {
        info!(job_id = %job_id, "job completed");
    }
    result
}

async fn route_relay(
    routes: &HashMap<usize, Arc<Stream<MasterPayload>>>,
    partitions: &PartitionRange,
    from_worker: u64,
    relay: RelayMessage,
) {
    let Ok(dst) = Uuid::parse_str(&relay.destination_id) else {
        warn!(worker_id = from_worker, destination = %relay.destination_id, "relay destination is not a valid vertex id");
        return;
    };
    let owner = partitions.partition_for_id(dst.as_u128());
    let Some(stream) = routes.get(&owner) else {
        warn!(owner, "relay destination has no connected worker");
        return;
    };
    let _ = stream.sender().send(MasterPayload::RelayMessage(relay)).await;
}

/// Runs the Pre/Post/PostKeepRunning lock-step loop until every worker
/// agrees no vertex remains active, then the `ExecutedGraph` handshake.
/// `graph` holds the master's own long-lived aggregator instances — the
/// same ones for the whole job, never rebuilt per superstep — so that each
/// round's reduction is a true accumulation across supersteps, not just a
/// sum of this round's deltas. `hooks` is the `JobRunner`'s own
/// `BspExecutorHooks`, threaded through `post_step`/`post_step_keep_running`
/// exactly as a single-process `Executor` would, so a job runner can observe
/// (or veto continuing) the distributed pass the same way it would a local
/// one.
async fn drive_superstep_protocol(
    barrier: &Arc<StepBarrier<Step>>,
    graph: &Graph,
    hooks: &Arc<dyn BspExecutorHooks>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut superstep: u64 = 0;
    loop {
        hooks.pre_step(superstep)?;

        barrier.wait_for_workers(StepType::Pre, cancel).await?;
        barrier.notify_workers(StepType::Pre, Step::new(StepType::Pre), cancel).await?;

        let posts = barrier.wait_for_workers(StepType::Post, cancel).await?;
        let total_active: u64 = posts.iter().map(|s| s.active_in_step).sum();

        // Fold every worker's reported delta into the matching global
        // aggregator instance. An unknown name from a peer is fatal — the
        // cluster would silently diverge on whatever it dropped otherwise.
        for step in &posts {
            for (name, delta) in &step.aggregators {
                let aggregator = graph.aggregator(name)?;
                aggregator
                    .aggregate((*delta).into())
                    .map_err(|e| GraphError::AggregatorTypeMismatch { name: name.clone(), expected: e.expected, actual: e.actual })?;
            }
        }

        let reduced: HashMap<String, WireAggregatorValue> =
            graph.aggregators().into_iter().map(|(name, aggregator)| (name, aggregator.get().into())).collect();

        let mut global_post = Step::new(StepType::Post);
        global_post.active_in_step = total_active;
        global_post.aggregators = reduced;
        barrier.notify_workers(StepType::Post, global_post, cancel).await?;

        hooks.post_step(superstep, total_active, None)?;

        let keeps = barrier.wait_for_workers(StepType::PostKeepRunning, cancel).await?;
        let any_active = keeps.iter().any(|s| s.active_in_step > 0);
        let keep_running = any_active && hooks.post_step_keep_running(total_active, None);
        let mut global_keep = Step::new(StepType::PostKeepRunning);
        global_keep.active_in_step = if keep_running { 1 } else { 0 };
        barrier.notify_workers(StepType::PostKeepRunning, global_keep, cancel).await?;

        superstep += 1;

        if !keep_running {
            break;
        }
    }

    barrier.wait_for_workers(StepType::ExecutedGraph, cancel).await?;
    barrier.notify_workers(StepType::ExecutedGraph, Step::new(StepType::ExecutedGraph), cancel).await?;

    Ok(())
}

/// The two closing handshakes that run after `JobRunner::complete_job`:
/// `PersistedResults` (every worker has written its partition's results)
/// and `CompletedJob` (workers may return to the idle pool).
async fn finish_handshakes(barrier: &Arc<StepBarrier<Step>>, cancel: &CancellationToken) -> Result<()> {
    barrier.wait_for_workers(StepType::PersistedResults, cancel).await?;
    barrier.notify_workers(StepType::PersistedResults, Step::new(StepType::PersistedResults), cancel).await?;

    barrier.wait_for_workers(StepType::CompletedJob, cancel).await?;
    barrier.notify_workers(StepType::CompletedJob, Step::new(StepType::CompletedJob), cancel).await?;

    Ok(())
}

fn current_timestamp() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
