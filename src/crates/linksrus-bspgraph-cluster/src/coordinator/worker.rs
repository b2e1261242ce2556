//! Worker-side job loop: receives a partition assignment from the
//! master, asks a [`JobRunner`] to populate the local graph, and drives
//! supersteps one at a time, pausing at each lock-step barrier phase for
//! the master's broadcast before continuing — the mirror image of
//! [`crate::coordinator::master::run_job`], with `expected = 1` on its own
//! local [`StepBarrier`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use linksrus_bspgraph::{BspExecutorHooks, Executor, GraphError, Relayer};

use crate::barrier::StepBarrier;
use crate::error::{ClusterError, Result};
use crate::job_runner::{ExecutorFactory, JobRunner};
use crate::messages::{JobDetails, MasterPayload, RelayMessage, Step, StepType, WireAggregatorValue, WorkerPayload};
use crate::stream::Stream;

/// Forwards a vertex's message to a destination this worker doesn't own, by
/// handing it to the master as a [`RelayMessage`]. Called synchronously
/// from inside a compute callback, so a full channel is a drop, not a
/// block — matching the rest of this workspace's backpressure posture of
/// never blocking a compute worker on a slow peer.
struct WorkerRelayer {
    outbound: mpsc::Sender<WorkerPayload>,
}

impl Relayer for WorkerRelayer {
    fn relay(&self, dst_id: &str, message: serde_json::Value) -> linksrus_bspgraph::Result<()> {
        let relay = RelayMessage { destination_id: dst_id.to_string(), payload: message };
        if self.outbound.try_send(WorkerPayload::RelayMessage(relay)).is_err() {
            warn!(destination = dst_id, "dropped relay message, outbound channel to master is full or closed");
        }
        Ok(())
    }
}

/// Wraps a job runner's own hooks to capture the active-vertex count and
/// whether the step errored, since `BspExecutorHooks` is synchronous and
/// can't itself drive the async barrier rendezvous — the coordinator reads
/// these back after each `run_steps(1, ..)` call instead.
struct StepObserver {
    active: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
    message: Arc<StdMutex<Option<String>>>,
    inner: Arc<dyn BspExecutorHooks>,
}

impl BspExecutorHooks for StepObserver {
    fn pre_step(&self, superstep: u64) -> linksrus_bspgraph::Result<()> {
        self.inner.pre_step(superstep)
    }

    fn post_step(&self, superstep: u64, active: u64, error: Option<&GraphError>) -> linksrus_bspgraph::Result<()> {
        self.active.store(active, Ordering::SeqCst);
        if let Some(e) = error {
            self.failed.store(true, Ordering::SeqCst);
            *self.message.lock().unwrap() = Some(e.to_string());
        }
        self.inner.post_step(superstep, active, error)
    }

    fn post_step_keep_running(&self, active: u64, error: Option<&GraphError>) -> bool {
        self.inner.post_step_keep_running(active, error)
    }
}

/// Submits `local` to this worker's own barrier, forwards it to the master
/// over `stream`, and returns the master's broadcast reply for `phase`.
/// `wait_for_workers` and `arrive` race safely here because `join!` polls
/// its arguments in order: `arrive`'s synchronous prefix (push + maybe
/// `notify_waiters`) always runs before `wait_for_workers`'s first check.
async fn round(
    barrier: &StepBarrier<Step>,
    phase: StepType,
    local: Step,
    stream: &Arc<Stream<WorkerPayload>>,
    cancel: &CancellationToken,
) -> Result<Step> {
    let arrive = barrier.wait(phase, local, cancel);
    let harvest = async {
        let collected = barrier.wait_for_workers(phase, cancel).await?;
        if let Some(step) = collected.into_iter().next() {
            stream.sender().send(WorkerPayload::Step(step)).await.map_err(|_| ClusterError::JobAborted)?;
        }
        Ok::<(), ClusterError>(())
    };
    let (reply, sent) = tokio::join!(arrive, harvest);
    sent?;
    reply
}

/// Drives one job to completion on this worker. `stream` is this worker's
/// outbound half to the master; `master_inbound` is the matching inbound
/// half, expected to have already delivered nothing but is about to
/// deliver the opening `JobDetails`.
pub async fn run_job(
    stream: Arc<Stream<WorkerPayload>>,
    mut master_inbound: mpsc::Receiver<MasterPayload>,
    job_runner: Arc<dyn JobRunner>,
    cancel: &CancellationToken,
) -> Result<()> {
    let details = match master_inbound.recv().await {
        Some(MasterPayload::JobDetails(details)) => details,
        Some(_) => return Err(ClusterError::JobAborted),
        None => return Err(ClusterError::JobAborted),
    };

    let barrier = Arc::new(StepBarrier::<Step>::new(1));
    let job_cancel = cancel.child_token();
    stream
        .register_disconnect_callback({
            let job_cancel = job_cancel.clone();
            move || job_cancel.cancel()
        })
        .await;

    let active = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicBool::new(false));
    let message: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));

    let factory: ExecutorFactory = {
        let active = active.clone();
        let failed = failed.clone();
        let message = message.clone();
        Arc::new(move |inner| {
            Arc::new(StepObserver { active: active.clone(), failed: failed.clone(), message: message.clone(), inner })
                as Arc<dyn BspExecutorHooks>
        })
    };

    let started = match job_runner.start_job(&details, factory).await {
        Ok(started) => started,
        Err(e) => {
            job_runner.abort_job(&details).await;
            return Err(e);
        }
    };

    started.graph.register_relayer(Arc::new(WorkerRelayer { outbound: stream.sender() }));
    let executor = Executor::new(started.graph.clone(), started.compute, started.hooks);

    let receive_barrier = barrier.clone();
    let receive_graph = started.graph.clone();
    let receive_cancel = job_cancel.clone();
    let receive_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = receive_cancel.cancelled() => break,
                m = master_inbound.recv() => m,
            };
            let Some(msg) = msg else {
                // The master's outbound sender was dropped — it closed the
                // stream or vanished. Either way the job can no longer
                // make progress.
                receive_cancel.cancel();
                break;
            };
            match msg {
                MasterPayload::Step(step) => {
                    let _ = receive_barrier.notify(step.step_type, step, &receive_cancel).await;
                }
                MasterPayload::RelayMessage(relay) => {
                    if let Err(e) = receive_graph.send_message(&relay.destination_id, relay.payload) {
                        warn!(error = %e, destination = %relay.destination_id, "failed to deliver relayed message");
                    }
                }
                MasterPayload::JobDetails(_) => {
                    warn!("received a second JobDetails mid-job, ignoring");
                }
            }
        }
    });

    let result =
        drive(&barrier, &executor, &stream, &active, &failed, &message, &job_runner, &details, &job_cancel).await;

    receive_task.abort();

    if result.is_err() {
        job_runner.abort_job(&details).await;
    }

    let _ = started.graph.close().await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    barrier: &Arc<StepBarrier<Step>>,
    executor: &Executor<Arc<dyn BspExecutorHooks>>,
    stream: &Arc<Stream<WorkerPayload>>,
    active: &Arc<AtomicU64>,
    failed: &Arc<AtomicBool>,
    message: &Arc<StdMutex<Option<String>>>,
    job_runner: &Arc<dyn JobRunner>,
    details: &JobDetails,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        round(barrier, StepType::Pre, Step::new(StepType::Pre), stream, cancel).await?;

        executor.run_steps(1, cancel).await;

        if failed.load(Ordering::SeqCst) {
            let reason = message.lock().unwrap().clone().unwrap_or_default();
            warn!(error = reason, "superstep compute failed on this partition, aborting job");
            stream.close(None).await;
            return Err(ClusterError::JobAborted);
        }

        let active_in_step = active.load(Ordering::SeqCst);
        let mut post = Step::new(StepType::Post);
        post.active_in_step = active_in_step;
        for (name, aggregator) in executor_aggregators(executor) {
            let delta: WireAggregatorValue = aggregator.delta().into();
            post.aggregators.insert(name, delta);
        }

        let global_post = round(barrier, StepType::Post, post, stream, cancel).await?;
        for (name, value) in &global_post.aggregators {
            if let Ok(aggregator) = executor_graph(executor).aggregator(name) {
                let _ = aggregator.set((*value).into());
            }
        }

        let mut keep = Step::new(StepType::PostKeepRunning);
        keep.active_in_step = if active_in_step > 0 { 1 } else { 0 };
        let global_keep = round(barrier, StepType::PostKeepRunning, keep, stream, cancel).await?;

        if global_keep.active_in_step == 0 {
            break;
        }
    }

    round(barrier, StepType::ExecutedGraph, Step::new(StepType::ExecutedGraph), stream, cancel).await?;

    if let Err(e) = job_runner.complete_job(details).await {
        warn!(error = %e, "CompleteJob failed on this partition, disconnecting so the master aborts the job");
        stream.close(None).await;
        return Err(e);
    }

    round(barrier, StepType::PersistedResults, Step::new(StepType::PersistedResults), stream, cancel).await?;
    round(barrier, StepType::CompletedJob, Step::new(StepType::CompletedJob), stream, cancel).await?;

    Ok(())
}

fn executor_graph(executor: &Executor<Arc<dyn BspExecutorHooks>>) -> &linksrus_bspgraph::Graph {
    executor.graph()
}

fn executor_aggregators(
    executor: &Executor<Arc<dyn BspExecutorHooks>>,
) -> std::collections::HashMap<String, Arc<dyn linksrus_bspgraph::Aggregator>> {
    executor_graph(executor).aggregators()
}
