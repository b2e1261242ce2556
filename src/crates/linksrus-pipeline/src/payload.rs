//! The unit of work flowing through a pipeline.

/// A value that moves through a pipeline stage by stage.
///
/// `clone_payload` backs [`crate::stage::broadcast::Broadcast`]'s fan-out
/// (the original goes to the first processor, clones to the rest — see
/// a broadcast fan-out's identity/clone split). `mark_as_processed` must be
/// called exactly once for every payload that entered the pipeline,
/// whether it reaches the sink, is filtered out by a stage, or is dropped
/// because a processor errored.
pub trait Payload: Send + 'static {
    fn clone_payload(&self) -> Self;
    fn mark_as_processed(&mut self);
}
