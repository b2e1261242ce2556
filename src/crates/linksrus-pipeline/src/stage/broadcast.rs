//! Fan-out stage: each input payload is duplicated to every configured
//! processor, the first getting the original and the rest a `clone_payload()`.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::PipelineError;
use crate::payload::Payload;
use crate::processor::{Processor, StageRunner};

/// Duplicates every input payload across `procs.len()` independent FIFO
/// lanes, all writing into the same shared output channel. Only the first
/// lane receives the original payload — the rest get `clone_payload()`ed
/// copies, since always cloning would be correct but wasteful when most
/// fan-outs don't need to mutate independently.
pub struct Broadcast<P: Payload> {
    stage_id: usize,
    procs: Vec<Arc<dyn Processor<P>>>,
}

impl<P: Payload> Broadcast<P> {
    pub fn new(stage_id: usize, procs: Vec<Arc<dyn Processor<P>>>) -> Self {
        assert!(!procs.is_empty(), "Broadcast requires at least one processor");
        Self { stage_id, procs }
    }
}

impl<P: Payload> StageRunner<P> for Broadcast<P> {
    fn run(
        self: Box<Self>,
        ctx: Context,
        mut input: mpsc::Receiver<P>,
        output: mpsc::Sender<P>,
        errors: mpsc::Sender<PipelineError>,
    ) -> JoinHandle<()> {
        let stage_id = self.stage_id;
        let procs = self.procs;
        let fan_out: Vec<(mpsc::Sender<P>, mpsc::Receiver<P>)> = procs.iter().map(|_| mpsc::channel(1)).collect();
        let (senders, receivers): (Vec<_>, Vec<_>) = fan_out.into_iter().unzip();

        let lane_handles: Vec<JoinHandle<()>> = procs
            .into_iter()
            .zip(receivers)
            .map(|(proc, rx)| {
                super::fifo::Fifo::new(stage_id, proc).run(ctx.clone(), rx, output.clone(), errors.clone())
            })
            .collect();

        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => None,
                    p = input.recv() => p,
                };

                let Some(mut payload) = payload else {
                    break;
                };

                // Clone for every lane but the first; the first lane gets
                // the original payload itself, moved in on the final send.
                let mut aborted = false;
                for tx in senders.iter().skip(1) {
                    let clone = payload.clone_payload();
                    let sent = tokio::select! {
                        biased;
                        _ = ctx.cancelled() => None,
                        r = tx.send(clone) => Some(r),
                    };
                    match sent {
                        Some(Ok(())) => {}
                        Some(Err(mpsc::error::SendError(mut undelivered))) => {
                            undelivered.mark_as_processed();
                            aborted = true;
                            break;
                        }
                        None => {
                            aborted = true;
                            break;
                        }
                    }
                }

                if aborted {
                    payload.mark_as_processed();
                    break;
                }

                if let Some(first_tx) = senders.first() {
                    let sent = tokio::select! {
                        biased;
                        _ = ctx.cancelled() => None,
                        r = first_tx.send(payload) => Some(r),
                    };
                    match sent {
                        Some(Ok(())) => {}
                        Some(Err(mpsc::error::SendError(mut undelivered))) => {
                            undelivered.mark_as_processed();
                        }
                        None => {}
                    }
                }
            }

            // Drop every sender to close the fan-out channels, then join
            // every lane so the stage only reports done once all sub-stages
            // have fully drained.
            drop(senders);
            join_all(lane_handles).await;

            while let Ok(mut leftover) = input.try_recv() {
                leftover.mark_as_processed();
            }
        })
    }
}
