//! Vertex and edge data model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::queue::MessageQueue;

/// A directed edge, owned by its source vertex. The destination may be a
/// vertex local to this graph or one owned by another partition in a
/// distributed pass — the graph doesn't know or care which until it tries
/// to deliver a message there.
pub struct Edge {
    pub dst_id: String,
    pub value: serde_json::Value,
}

impl Edge {
    pub fn new(dst_id: impl Into<String>, value: serde_json::Value) -> Self {
        Self { dst_id: dst_id.into(), value }
    }
}

/// A vertex in the BSP graph.
///
/// All mutable state (`value`, `active`) is held behind interior mutability
/// (`Mutex`/`AtomicBool`) rather than requiring `&mut Vertex`. This is
/// deliberate: the compute worker pool looks vertices up in a concurrent
/// map by shared reference only (see [`crate::graph::Graph`]), and a user
/// compute callback is free to call `SendMessage`/`BroadcastToNeighbors`
/// for *any* destination — including, for self-loops, its own vertex ID —
/// from inside its own invocation. Requiring `&mut Vertex` for compute
/// would force the worker to hold an exclusive map guard for the duration
/// of the callback, which would self-deadlock the moment a self-loop
/// looked its own entry back up. Interior mutability keeps every map
/// access a shared read.
///
/// Carries two alternating message-queue slots: one holds the current
/// superstep's inbox, the other holds messages that will become the next
/// superstep's inbox. Which slot plays which role alternates with the
/// superstep parity (`superstep % 2`), so no messages are ever copied
/// between queues.
pub struct Vertex {
    pub id: String,
    value: Mutex<serde_json::Value>,
    active: AtomicBool,
    pub edges: Vec<Edge>,
    inboxes: [Box<dyn MessageQueue>; 2],
}

impl Vertex {
    pub fn new(id: impl Into<String>, value: serde_json::Value, make_queue: impl Fn() -> Box<dyn MessageQueue>) -> Self {
        Self {
            id: id.into(),
            value: Mutex::new(value),
            active: AtomicBool::new(true),
            edges: Vec::new(),
            inboxes: [make_queue(), make_queue()],
        }
    }

    pub fn value(&self) -> serde_json::Value {
        self.value.lock().unwrap().clone()
    }

    pub fn set_value(&self, value: serde_json::Value) {
        *self.value.lock().unwrap() = value;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// The inbox messages sent *during* `superstep` will land in — i.e. the
    /// slot for `(superstep + 1) % 2`.
    pub fn next_inbox(&self, superstep: u64) -> &dyn MessageQueue {
        self.inboxes[((superstep + 1) % 2) as usize].as_ref()
    }

    /// The inbox a vertex reads *during* `superstep` — the slot for
    /// `superstep % 2`.
    pub fn current_inbox(&self, superstep: u64) -> &dyn MessageQueue {
        self.inboxes[(superstep % 2) as usize].as_ref()
    }

    /// Clear the `active` flag. A message arriving in either inbox after a
    /// freeze makes the vertex eligible for processing again — `active`
    /// alone does not gate eligibility, `active || inbox.pending_messages()`
    /// does (see [`Self::is_eligible`]).
    pub fn freeze(&self) {
        self.set_active(false);
    }

    /// Eligibility test for superstep `superstep`: `active ∨ inbox_s
    /// non-empty`.
    pub fn is_eligible(&self, superstep: u64) -> bool {
        self.is_active() || self.current_inbox(superstep).pending_messages()
    }

    pub fn close_queues(&self) -> crate::error::Result<()> {
        crate::queue::close_all(self.inboxes.iter().map(|q| q.as_ref()))
    }
}
