//! Single-threaded FIFO stage.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::PipelineError;
use crate::payload::Payload;
use crate::processor::{Processor, StageRunner};

/// Reads one payload at a time, runs it through `processor`, and forwards
/// the (possibly transformed) result. This is the base topology every
/// other stage is built from.
pub struct Fifo<P: Payload> {
    stage_id: usize,
    processor: Arc<dyn Processor<P>>,
}

impl<P: Payload> Fifo<P> {
    pub fn new(stage_id: usize, processor: Arc<dyn Processor<P>>) -> Self {
        Self { stage_id, processor }
    }
}

impl<P: Payload> StageRunner<P> for Fifo<P> {
    fn run(
        self: Box<Self>,
        ctx: Context,
        input: mpsc::Receiver<P>,
        output: mpsc::Sender<P>,
        errors: mpsc::Sender<PipelineError>,
    ) -> JoinHandle<()> {
        let stage_id = self.stage_id;
        let processor = self.processor;
        tokio::spawn(async move {
            super::run_fifo_loop(stage_id, ctx, processor, input, output, errors).await;
        })
    }
}
