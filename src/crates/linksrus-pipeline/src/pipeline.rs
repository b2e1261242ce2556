//! Wires a source, an ordered list of stages, and a sink into one data-flow
//! graph: `source -> stage[0] -> ... -> stage[k-1] -> sink`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{self, PipelineError, Result};
use crate::payload::Payload;
use crate::processor::{Processor, StageRunner};
use crate::stage::{Broadcast, DynamicWorkerPool, Fifo, FixedWorkerPool};

/// Feeds the pipeline's first stage. `next` returning `None` signals the
/// source is exhausted and the pipeline should drain and finish.
#[async_trait]
pub trait Source<P: Payload>: Send {
    async fn next(&mut self) -> Option<P>;
}

/// Consumes whatever the last stage forwards. The sink-task (not the
/// `Sink` impl) calls `mark_as_processed` immediately after `consume`
/// returns, matching the stage convention that the topology driving a
/// payload — never the user callback — owns that bookkeeping.
#[async_trait]
pub trait Sink<P: Payload>: Send {
    async fn consume(&mut self, payload: &P) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Declarative description of one stage's topology, resolved into a boxed
/// [`StageRunner`] (with its stage index assigned) when the pipeline runs.
/// Mirrors the four stage topologies one-to-one.
pub enum StageSpec<P: Payload> {
    Fifo(Arc<dyn Processor<P>>),
    FixedWorkerPool(Arc<dyn Processor<P>>, usize),
    DynamicWorkerPool(Arc<dyn Processor<P>>, usize),
    Broadcast(Vec<Arc<dyn Processor<P>>>),
}

impl<P: Payload> StageSpec<P> {
    fn into_runner(self, stage_id: usize) -> Box<dyn StageRunner<P>> {
        match self {
            StageSpec::Fifo(processor) => Box::new(Fifo::new(stage_id, processor)),
            StageSpec::FixedWorkerPool(processor, n) => Box::new(FixedWorkerPool::new(stage_id, processor, n)),
            StageSpec::DynamicWorkerPool(processor, max_n) => {
                Box::new(DynamicWorkerPool::new(stage_id, processor, max_n))
            }
            StageSpec::Broadcast(procs) => Box::new(Broadcast::new(stage_id, procs)),
        }
    }
}

/// An ordered chain of stages connecting a [`Source`] to a [`Sink`].
pub struct Pipeline<P: Payload> {
    stages: Vec<StageSpec<P>>,
}

impl<P: Payload> Pipeline<P> {
    pub fn new(stages: Vec<StageSpec<P>>) -> Self {
        Self { stages }
    }

    /// Run the pipeline to completion: every payload the source yields
    /// either reaches the sink or is dropped (filtered, or failed) by
    /// exactly one stage. Returns once the whole graph has drained —
    /// either the source is exhausted and every payload in flight has
    /// been accounted for, or `ctx` was cancelled, or a stage failed.
    ///
    /// `ctx` is never itself cancelled by this call; a *child* of it is,
    /// so a caller reusing `ctx` across multiple `process` calls is
    /// unaffected by one run's internal stage failures.
    pub async fn process(
        self,
        ctx: &Context,
        mut source: Box<dyn Source<P>>,
        mut sink: Box<dyn Sink<P>>,
    ) -> Result<()> {
        let pipeline_ctx = ctx.child();
        let num_stages = self.stages.len();
        let (errors_tx, mut errors_rx) = mpsc::channel::<PipelineError>(num_stages + 2);

        // One channel between every pair of adjacent nodes: source -> stage
        // 0 -> ... -> stage k-1 -> sink. Capacity 1 approximates the fully
        // unbuffered channel: a sender blocks until the
        // receiver is ready, as close to zero-buffering as an mpsc channel
        // gets.
        let mut senders: VecDeque<mpsc::Sender<P>> = VecDeque::with_capacity(num_stages + 1);
        let mut receivers: VecDeque<mpsc::Receiver<P>> = VecDeque::with_capacity(num_stages + 1);
        for _ in 0..=num_stages {
            let (tx, rx) = mpsc::channel::<P>(1);
            senders.push_back(tx);
            receivers.push_back(rx);
        }

        let mut handles = Vec::with_capacity(num_stages + 2);

        let source_output = senders.pop_front().expect("at least one channel");
        let source_ctx = pipeline_ctx.clone();
        handles.push(tokio::spawn(async move {
            run_source(source_ctx, source.as_mut(), source_output).await;
        }));

        for (stage_id, spec) in self.stages.into_iter().enumerate() {
            let input = receivers.pop_front().expect("one receiver per stage");
            let output = senders.pop_front().expect("one sender per stage");
            let runner = spec.into_runner(stage_id);
            handles.push(runner.run(pipeline_ctx.clone(), input, output, errors_tx.clone()));
        }

        let sink_input = receivers.pop_front().expect("final receiver for the sink");
        let sink_ctx = pipeline_ctx.clone();
        let sink_errors = errors_tx.clone();
        handles.push(tokio::spawn(async move {
            run_sink(sink_ctx, num_stages, sink.as_mut(), sink_input, sink_errors).await;
        }));

        drop(errors_tx);
        for handle in handles {
            let _ = handle.await;
        }

        let mut collected = Vec::new();
        while let Ok(err) = errors_rx.try_recv() {
            collected.push(err);
        }

        match error::combine(collected) {
            Some(err) => Err(err),
            None if pipeline_ctx.is_cancelled() => Err(PipelineError::Cancelled),
            None => Ok(()),
        }
    }
}

async fn run_source<P: Payload>(ctx: Context, source: &mut dyn Source<P>, output: mpsc::Sender<P>) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            p = source.next() => p,
        };

        let Some(payload) = payload else {
            debug!("source exhausted or cancelled");
            break;
        };

        if output.send(payload).await.is_err() {
            break;
        }
    }
}

async fn run_sink<P: Payload>(
    ctx: Context,
    stage_id: usize,
    sink: &mut dyn Sink<P>,
    mut input: mpsc::Receiver<P>,
    errors: mpsc::Sender<PipelineError>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            p = input.recv() => p,
        };

        let Some(mut payload) = payload else {
            break;
        };

        if let Err(e) = sink.consume(&payload).await {
            warn!(error = %e, "sink failed");
            let _ = errors.try_send(PipelineError::stage(stage_id, e));
            ctx.cancel();
        }
        payload.mark_as_processed();
    }

    while let Ok(mut leftover) = input.try_recv() {
        leftover.mark_as_processed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessOutcome;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    struct CountingPayload {
        value: u64,
        processed: Arc<AtomicU64>,
    }

    impl Payload for CountingPayload {
        fn clone_payload(&self) -> Self {
            self.clone()
        }

        fn mark_as_processed(&mut self) {
            self.processed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct VecSource {
        items: std::vec::IntoIter<CountingPayload>,
    }

    #[async_trait]
    impl Source<CountingPayload> for VecSource {
        async fn next(&mut self) -> Option<CountingPayload> {
            self.items.next()
        }
    }

    struct CollectingSink {
        collected: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl Sink<CountingPayload> for CollectingSink {
        async fn consume(&mut self, payload: &CountingPayload) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.collected.lock().unwrap().push(payload.value);
            Ok(())
        }
    }

    struct PassThrough;

    #[async_trait]
    impl Processor<CountingPayload> for PassThrough {
        async fn process(&self, _ctx: &Context, payload: CountingPayload) -> ProcessOutcome<CountingPayload> {
            ProcessOutcome::Forward(payload)
        }
    }

    struct SlowPassThrough;

    #[async_trait]
    impl Processor<CountingPayload> for SlowPassThrough {
        async fn process(&self, ctx: &Context, payload: CountingPayload) -> ProcessOutcome<CountingPayload> {
            tokio::select! {
                _ = ctx.cancelled() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(3600)) => {}
            }
            ProcessOutcome::Forward(payload)
        }
    }

    fn make_payloads(n: u64) -> (Vec<CountingPayload>, Vec<Arc<AtomicU64>>) {
        let counters: Vec<_> = (0..n).map(|_| Arc::new(AtomicU64::new(0))).collect();
        let payloads = counters.iter().enumerate().map(|(i, c)| CountingPayload { value: i as u64, processed: c.clone() }).collect();
        (payloads, counters)
    }

    #[tokio::test]
    async fn every_payload_reaches_the_sink_exactly_once() {
        let (payloads, counters) = make_payloads(5);
        let stages = (0..10)
            .map(|_| StageSpec::Fifo(Arc::new(PassThrough) as Arc<dyn Processor<CountingPayload>>))
            .collect();
        let pipeline = Pipeline::new(stages);

        let source = Box::new(VecSource { items: payloads.into_iter() });
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(CollectingSink { collected: collected.clone() });

        let ctx = Context::new();
        pipeline.process(&ctx, source, sink).await.unwrap();

        let mut values = collected.lock().unwrap().clone();
        values.sort();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        for counter in counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn cancellation_mid_flight_surfaces_context_error_and_marks_every_payload() {
        let (payloads, counters) = make_payloads(3);
        let stages: Vec<StageSpec<CountingPayload>> = (0..10)
            .map(|_| StageSpec::Fifo(Arc::new(SlowPassThrough) as Arc<dyn Processor<CountingPayload>>))
            .collect();
        let pipeline = Pipeline::new(stages);

        let source = Box::new(VecSource { items: payloads.into_iter() });
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(CollectingSink { collected: collected.clone() });

        let ctx = Context::new();
        let ctx_clone = ctx.clone();
        let run = tokio::spawn(async move { pipeline.process(&ctx_clone, source, sink).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        ctx.cancel();

        let result = run.await.unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));

        for counter in counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1, "every payload that entered the pipeline must be marked processed exactly once");
        }
    }
}
