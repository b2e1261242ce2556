//! The user-extension point (`Processor`) and the internal stage-topology
//! abstraction (`StageRunner`).

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::PipelineError;
use crate::payload::Payload;

/// What a [`Processor`] decided to do with the payload it was given. The
/// payload is always handed back — even when filtered or failed — so the
/// calling stage (never the processor) is the one responsible for calling
/// `mark_as_processed`, matching the stage topology's assignment of that duty to
/// the stage.
pub enum ProcessOutcome<P: Payload> {
    /// Forward `P` to the next stage (or the sink).
    Forward(P),
    /// Drop `P` here — filter semantics.
    Filtered(P),
    /// Processing failed; `P` is dropped and the error propagates.
    Failed(P, Box<dyn std::error::Error + Send + Sync>),
}

/// A single unit of pipeline work: given a payload, decide whether to
/// forward it (possibly transformed), filter it out, or fail.
#[async_trait]
pub trait Processor<P: Payload>: Send + Sync {
    async fn process(&self, ctx: &Context, payload: P) -> ProcessOutcome<P>;
}

/// Internal abstraction over the four stage topologies (FIFO,
/// FixedWorkerPool, DynamicWorkerPool, Broadcast). `Pipeline::process`
/// wires one of these per configured stage, feeding the previous stage's
/// output channel as this stage's input and this stage's output as the
/// next stage's input.
pub trait StageRunner<P: Payload>: Send {
    /// Spawns whatever tasks this topology needs and returns a single
    /// handle the pipeline can join to know the stage has fully drained.
    fn run(
        self: Box<Self>,
        ctx: Context,
        input: mpsc::Receiver<P>,
        output: mpsc::Sender<P>,
        errors: mpsc::Sender<PipelineError>,
    ) -> JoinHandle<()>;
}
