//! Per-vertex message queues.
//!
//! A queue is safe for concurrent `enqueue` callers (multiple neighbors can
//! deliver to the same vertex's inbox in the same superstep) but is drained
//! by a single consumer — the vertex's own compute invocation.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{GraphError, Result};

/// A per-vertex FIFO-addressable message queue.
///
/// The reference in-memory implementation is intentionally LIFO internally
/// (see [`InMemoryMessageQueue`]) — BSP correctness does not depend on
/// delivery order within a superstep, so tests assert the *set* of
/// delivered messages, never their order.
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message. Safe to call from multiple threads concurrently.
    fn enqueue(&self, message: serde_json::Value);

    /// `true` iff at least one message is currently queued.
    fn pending_messages(&self) -> bool;

    /// Drop all currently queued messages without delivering them.
    fn discard_messages(&self);

    /// Drain and return every currently queued message. Single-consumer:
    /// callers must not drain the same queue from two tasks concurrently.
    fn drain(&self) -> Vec<serde_json::Value>;

    /// Release any resources held by the queue. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Constructs [`MessageQueue`] instances. The default, [`InMemoryQueueFactory`],
/// is used unless a caller supplies its own queue factory.
pub trait MessageQueueFactory: Send + Sync {
    fn make(&self) -> Box<dyn MessageQueue>;
}

/// Reference in-memory message queue. Dequeues in reverse-of-insertion
/// (LIFO) order.
#[derive(Default)]
pub struct InMemoryMessageQueue {
    messages: Mutex<VecDeque<serde_json::Value>>,
    closed: std::sync::atomic::AtomicBool,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageQueue for InMemoryMessageQueue {
    fn enqueue(&self, message: serde_json::Value) {
        self.messages.lock().unwrap().push_back(message);
    }

    fn pending_messages(&self) -> bool {
        !self.messages.lock().unwrap().is_empty()
    }

    fn discard_messages(&self) {
        self.messages.lock().unwrap().clear();
    }

    fn drain(&self) -> Vec<serde_json::Value> {
        let mut guard = self.messages.lock().unwrap();
        let drained: Vec<_> = guard.drain(..).collect();
        drained.into_iter().rev().collect()
    }

    fn close(&self) -> Result<()> {
        // Idempotent: repeated Close calls are not an error.
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.discard_messages();
        Ok(())
    }
}

/// Builds [`InMemoryMessageQueue`] instances.
#[derive(Default)]
pub struct InMemoryQueueFactory;

impl MessageQueueFactory for InMemoryQueueFactory {
    fn make(&self) -> Box<dyn MessageQueue> {
        Box::new(InMemoryMessageQueue::new())
    }
}

/// Helper used by [`crate::graph::Graph::close`]/`reset` to fold a queue's
/// `Close` error into a single [`GraphError`] without losing the first one
/// encountered.
pub fn close_all<'a>(queues: impl Iterator<Item = &'a dyn MessageQueue>) -> Result<()> {
    for q in queues {
        q.close().map_err(|e| GraphError::Queue(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drain_returns_lifo_order() {
        let q = InMemoryMessageQueue::new();
        q.enqueue(json!(1));
        q.enqueue(json!(2));
        q.enqueue(json!(3));
        assert_eq!(q.drain(), vec![json!(3), json!(2), json!(1)]);
    }

    #[test]
    fn pending_messages_reflects_queue_state() {
        let q = InMemoryMessageQueue::new();
        assert!(!q.pending_messages());
        q.enqueue(json!("hi"));
        assert!(q.pending_messages());
        q.discard_messages();
        assert!(!q.pending_messages());
    }

    #[test]
    fn drain_empties_the_queue() {
        let q = InMemoryMessageQueue::new();
        q.enqueue(json!(1));
        let _ = q.drain();
        assert!(!q.pending_messages());
        assert!(q.drain().is_empty());
    }

    #[test]
    fn close_is_idempotent() {
        let q = InMemoryMessageQueue::new();
        q.enqueue(json!(1));
        assert!(q.close().is_ok());
        assert!(q.close().is_ok());
        assert!(!q.pending_messages());
    }

    #[test]
    fn concurrent_enqueue_is_safe() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(InMemoryMessageQueue::new());
        let mut handles = vec![];
        for i in 0..8 {
            let q = q.clone();
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    q.enqueue(json!(i * 100 + j));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.drain().len(), 800);
    }
}
