//! `n` parallel FIFO lanes sharing one input and one output channel.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::PipelineError;
use crate::payload::Payload;
use crate::processor::{Processor, StageRunner};

/// `n ≥ 1` lanes, each an independent FIFO loop, all pulling from the same
/// shared input and pushing to the same shared output. Order across lanes
/// is not preserved.
pub struct FixedWorkerPool<P: Payload> {
    stage_id: usize,
    processor: Arc<dyn Processor<P>>,
    workers: usize,
}

impl<P: Payload> FixedWorkerPool<P> {
    pub fn new(stage_id: usize, processor: Arc<dyn Processor<P>>, workers: usize) -> Self {
        Self { stage_id, processor, workers: workers.max(1) }
    }
}

impl<P: Payload> StageRunner<P> for FixedWorkerPool<P> {
    fn run(
        self: Box<Self>,
        ctx: Context,
        input: mpsc::Receiver<P>,
        output: mpsc::Sender<P>,
        errors: mpsc::Sender<PipelineError>,
    ) -> JoinHandle<()> {
        let stage_id = self.stage_id;
        let processor = self.processor;
        let workers = self.workers;
        let shared_input = Arc::new(Mutex::new(input));

        tokio::spawn(async move {
            let lanes = (0..workers).map(|_| {
                let ctx = ctx.clone();
                let processor = processor.clone();
                let shared_input = shared_input.clone();
                let output = output.clone();
                let errors = errors.clone();
                super::run_fifo_loop_shared(stage_id, ctx, processor, shared_input, output, errors)
            });
            join_all(lanes).await;
        })
    }
}
