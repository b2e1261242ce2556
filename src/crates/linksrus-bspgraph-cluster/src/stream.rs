//! Stream abstraction: a bidirectional channel over a remote
//! transport, with disconnect detection.
//!
//! The actual wire format (gRPC framing, retries, TLS) is out of scope —
//! that's a `Transport`'s job, and here a transport is simply whatever pair
//! of channels the caller hands in. In production those channels would be
//! driven by a gRPC bidi-streaming client/server; in tests they're plain
//! `tokio::mpsc` pairs, which makes a simulated network partition as easy
//! as dropping a sender.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One end of a bidirectional message channel to a peer (master or worker).
/// `Out` is whatever this side sends; the matching inbound message type is
/// handed to [`handle_send_recv`] directly rather than stored here, since
/// callers almost always want to `recv` it concurrently with other work
/// rather than through a method on `Stream` itself.
pub struct Stream<Out: Send + 'static> {
    local_send_tx: mpsc::Sender<Out>,
    cancel: CancellationToken,
    disconnected: AtomicBool,
    on_disconnect: AsyncMutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl<Out: Send + 'static> Stream<Out> {
    /// `transport_out` is the sink the driver (`handle_send_recv`) forwards
    /// locally-sent messages into — ordinarily the write half of a gRPC
    /// stream.
    pub fn new(transport_out: mpsc::Sender<Out>) -> Arc<Self> {
        let (local_send_tx, local_send_rx) = mpsc::channel(1);
        let stream = Arc::new(Self {
            local_send_tx,
            cancel: CancellationToken::new(),
            disconnected: AtomicBool::new(false),
            on_disconnect: AsyncMutex::new(Vec::new()),
        });
        // The forwarding half of the driver starts immediately: callers get
        // a `sender()` that works right away, without needing to also wire
        // up an inbound half if they only ever send (as a worker's relay
        // task sometimes does).
        tokio::spawn(forward_outbound(stream.clone(), local_send_rx, transport_out));
        stream
    }

    /// A sender local code uses to enqueue an outbound message. Cloned
    /// freely — every sender feeds the same underlying transport.
    pub fn sender(&self) -> mpsc::Sender<Out> {
        self.local_send_tx.clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    /// Runs `cb` exactly once, the first time this stream disconnects
    /// (including if it already has by the time this is called).
    pub async fn register_disconnect_callback(&self, cb: impl FnOnce() + Send + 'static) {
        if self.disconnected.load(Ordering::SeqCst) {
            cb();
            return;
        }
        self.on_disconnect.lock().await.push(Box::new(cb));
    }

    async fn fire_disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let callbacks = std::mem::take(&mut *self.on_disconnect.lock().await);
        for cb in callbacks {
            cb();
        }
    }

    /// Master-side graceful close: stop accepting further sends and cancel
    /// this stream's context. `err`, if present, is the reason surfaced to
    /// local code (e.g. logged by the caller) — this abstraction has no
    /// terminal-error wire frame of its own, since framing is a transport
    /// concern out of scope here.
    pub async fn close(self: &Arc<Self>, err: Option<&(dyn std::error::Error + Send + Sync)>) {
        if let Some(err) = err {
            debug!(error = %err, "closing stream with error");
        }
        self.fire_disconnect().await;
    }
}

async fn forward_outbound<Out: Send + 'static>(
    stream: Arc<Stream<Out>>,
    mut local_send_rx: mpsc::Receiver<Out>,
    transport_out: mpsc::Sender<Out>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stream.cancel.cancelled() => break,
            msg = local_send_rx.recv() => {
                let Some(msg) = msg else { break };
                if transport_out.send(msg).await.is_err() {
                    stream.fire_disconnect().await;
                    break;
                }
            }
        }
    }
}

/// Drives the inbound half of a stream: reads `transport_in` until it
/// closes (the peer disconnected, or the stream was locally closed) and
/// forwards every message to `local_recv_tx`. Pair with [`Stream::sender`]
/// for the outbound half, which is already driven by `Stream::new`.
pub async fn handle_send_recv<Out: Send + 'static, In: Send + 'static>(
    stream: Arc<Stream<Out>>,
    mut transport_in: mpsc::Receiver<In>,
    local_recv_tx: mpsc::Sender<In>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stream.cancel.cancelled() => break,
            msg = transport_in.recv() => {
                match msg {
                    Some(msg) => {
                        if local_recv_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        stream.fire_disconnect().await;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    #[tokio::test]
    async fn sent_messages_reach_the_transport() {
        let (transport_tx, mut transport_rx) = mpsc::channel::<u32>(4);
        let stream = Stream::new(transport_tx);
        stream.sender().send(42).await.unwrap();
        assert_eq!(transport_rx.recv().await, Some(42));
    }

    #[tokio::test]
    async fn transport_closing_fires_disconnect_and_cancels() {
        let (transport_tx, transport_rx) = mpsc::channel::<u32>(4);
        let stream = Stream::new(transport_tx);

        let fired = Arc::new(AtomicU64::new(0));
        let fired_clone = fired.clone();
        stream.register_disconnect_callback(move || { fired_clone.fetch_add(1, Ordering::SeqCst); }).await;

        drop(transport_rx);
        stream.sender().send(1).await.ok();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(stream.cancel_token().is_cancelled());
        assert!(!stream.is_connected());
    }

    #[tokio::test]
    async fn inbound_close_fires_disconnect_exactly_once() {
        let (transport_tx, _transport_rx) = mpsc::channel::<u32>(4);
        let stream = Stream::new(transport_tx);

        let (inbound_tx, inbound_rx) = mpsc::channel::<u32>(4);
        let (local_recv_tx, mut local_recv_rx) = mpsc::channel::<u32>(4);

        let fired = Arc::new(AtomicU64::new(0));
        let fired_clone = fired.clone();
        stream.register_disconnect_callback(move || { fired_clone.fetch_add(1, Ordering::SeqCst); }).await;

        inbound_tx.send(7).await.unwrap();
        drop(inbound_tx);

        handle_send_recv(stream.clone(), inbound_rx, local_recv_tx).await;

        assert_eq!(local_recv_rx.recv().await, Some(7));
        assert_eq!(local_recv_rx.recv().await, None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_registered_after_disconnect_runs_immediately() {
        let (transport_tx, transport_rx) = mpsc::channel::<u32>(4);
        let stream = Stream::new(transport_tx);
        drop(transport_rx);
        stream.sender().send(1).await.ok();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fired = Arc::new(AtomicU64::new(0));
        let fired_clone = fired.clone();
        stream.register_disconnect_callback(move || { fired_clone.fetch_add(1, Ordering::SeqCst); }).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
