//! Generic multi-stage data-flow pipeline engine.
//!
//! A [`Pipeline`](pipeline::Pipeline) wires a source, an ordered list of
//! stages, and a sink into one data-flow graph: `source -> stage[0] -> ... ->
//! stage[k-1] -> sink`. Every stage is one of four topologies
//! ([`stage::Fifo`], [`stage::FixedWorkerPool`], [`stage::DynamicWorkerPool`],
//! [`stage::Broadcast`]); channels between stages are unbuffered, so
//! backpressure runs end to end. This crate has no knowledge of what a
//! crawler, a graph, or a stored document looks like — [`payload::Payload`]
//! is the only thing it knows how to move.

pub mod context;
pub mod error;
pub mod payload;
pub mod pipeline;
pub mod processor;
pub mod stage;

pub use context::Context;
pub use error::{PipelineError, Result};
pub use payload::Payload;
pub use pipeline::{Pipeline, Sink, Source, StageSpec};
pub use processor::{ProcessOutcome, Processor, StageRunner};
