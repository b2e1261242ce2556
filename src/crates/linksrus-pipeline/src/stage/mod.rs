//! The four stage topologies: [`fifo::Fifo`],
//! [`fixed_pool::FixedWorkerPool`], [`dynamic_pool::DynamicWorkerPool`],
//! and [`broadcast::Broadcast`]. All four implement [`crate::processor::StageRunner`].

pub mod broadcast;
pub mod dynamic_pool;
pub mod fifo;
pub mod fixed_pool;

pub use broadcast::Broadcast;
pub use dynamic_pool::DynamicWorkerPool;
pub use fifo::Fifo;
pub use fixed_pool::FixedWorkerPool;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::context::Context;
use crate::error::PipelineError;
use crate::payload::Payload;
use crate::processor::{ProcessOutcome, Processor};

/// Runs one payload through `processor` and does whatever the outcome
/// demands: forward it, mark it processed and drop it, or mark it
/// processed, report the error, and cancel the pipeline. Returns `false`
/// if the caller's read-loop should stop (forwarding failed because
/// downstream is gone, or the processor errored).
async fn process_one<P: Payload>(
    stage_id: usize,
    ctx: &Context,
    processor: &dyn Processor<P>,
    payload: P,
    output: &mpsc::Sender<P>,
    errors: &mpsc::Sender<PipelineError>,
) -> bool {
    match processor.process(ctx, payload).await {
        ProcessOutcome::Forward(out) => match output.send(out).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(mut undelivered)) => {
                undelivered.mark_as_processed();
                false
            }
        },
        ProcessOutcome::Filtered(mut dropped) => {
            dropped.mark_as_processed();
            true
        }
        ProcessOutcome::Failed(mut dropped, err) => {
            dropped.mark_as_processed();
            trace!(stage_id, error = %err, "stage processor failed");
            let _ = errors.try_send(PipelineError::stage(stage_id, err));
            ctx.cancel();
            false
        }
    }
}

/// The read-process-forward loop shared by [`Fifo`] and every FIFO lane a
/// [`Broadcast`] spawns. Exits promptly on cancellation, draining (and
/// marking processed) any payload already sitting in `input` so the
/// "exactly once" invariant holds even for in-flight work orphaned by a
/// cancellation mid-run.
pub(crate) async fn run_fifo_loop<P: Payload>(
    stage_id: usize,
    ctx: Context,
    processor: Arc<dyn Processor<P>>,
    mut input: mpsc::Receiver<P>,
    output: mpsc::Sender<P>,
    errors: mpsc::Sender<PipelineError>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            p = input.recv() => p,
        };

        let Some(payload) = payload else {
            break;
        };

        if !process_one(stage_id, &ctx, processor.as_ref(), payload, &output, &errors).await {
            break;
        }
    }

    // Drain anything still buffered so every payload that made it into
    // this stage's input channel gets marked exactly once, even under
    // cancellation.
    while let Ok(mut leftover) = input.try_recv() {
        leftover.mark_as_processed();
    }
}

/// Identical to [`run_fifo_loop`] but reads from a receiver shared by
/// several lanes (used by [`FixedWorkerPool`]). The shared lock makes the
/// channel a simple work-stealing queue: whichever lane is free grabs the
/// next payload.
pub(crate) async fn run_fifo_loop_shared<P: Payload>(
    stage_id: usize,
    ctx: Context,
    processor: Arc<dyn Processor<P>>,
    input: Arc<tokio::sync::Mutex<mpsc::Receiver<P>>>,
    output: mpsc::Sender<P>,
    errors: mpsc::Sender<PipelineError>,
) {
    loop {
        let payload = {
            let mut guard = input.lock().await;
            tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                p = guard.recv() => p,
            }
        };

        let Some(payload) = payload else {
            break;
        };

        if !process_one(stage_id, &ctx, processor.as_ref(), payload, &output, &errors).await {
            break;
        }
    }

    let mut guard = input.lock().await;
    while let Ok(mut leftover) = guard.try_recv() {
        leftover.mark_as_processed();
    }
}
