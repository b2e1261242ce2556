//! Token-bucket worker pool: up to `max_n` payloads processed concurrently,
//! each on its own spawned task.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::PipelineError;
use crate::payload::Payload;
use crate::processor::{Processor, StageRunner};

/// A bucket of `max_n` tokens. Reading the next payload acquires a token
/// (blocking if none are free), spawns a task to process it, and the token
/// returns to the bucket when that task finishes — whether it forwarded,
/// filtered, or failed. Shutdown is graceful: the stage doesn't report
/// itself done until every in-flight task (and therefore every token) has
/// returned.
pub struct DynamicWorkerPool<P: Payload> {
    stage_id: usize,
    processor: Arc<dyn Processor<P>>,
    max_n: usize,
}

impl<P: Payload> DynamicWorkerPool<P> {
    pub fn new(stage_id: usize, processor: Arc<dyn Processor<P>>, max_n: usize) -> Self {
        Self { stage_id, processor, max_n: max_n.max(1) }
    }
}

impl<P: Payload> StageRunner<P> for DynamicWorkerPool<P> {
    fn run(
        self: Box<Self>,
        ctx: Context,
        mut input: mpsc::Receiver<P>,
        output: mpsc::Sender<P>,
        errors: mpsc::Sender<PipelineError>,
    ) -> JoinHandle<()> {
        let stage_id = self.stage_id;
        let processor = self.processor;
        let tokens = Arc::new(Semaphore::new(self.max_n));

        tokio::spawn(async move {
            let mut in_flight = Vec::new();

            loop {
                let payload = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => None,
                    p = input.recv() => p,
                };

                let Some(payload) = payload else {
                    break;
                };

                // Blocks until a token is free — this is the backpressure
                // point: at most `max_n` payloads are ever in flight.
                let permit = match tokens.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break, // semaphore closed, pool is shutting down
                };

                let ctx = ctx.clone();
                let processor = processor.clone();
                let output = output.clone();
                let errors = errors.clone();
                in_flight.push(tokio::spawn(async move {
                    super::process_one(stage_id, &ctx, processor.as_ref(), payload, &output, &errors).await;
                    drop(permit);
                }));
            }

            // Graceful shutdown: wait for every spawned task (and therefore
            // every token) to come back before declaring the stage done.
            for handle in in_flight {
                let _ = handle.await;
            }

            while let Ok(mut leftover) = input.try_recv() {
                leftover.mark_as_processed();
            }
        })
    }
}
