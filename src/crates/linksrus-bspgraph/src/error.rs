//! Error types for the single-process BSP graph engine.
//!
//! # Error Categories
//!
//! - **Construction**: [`GraphError::UnknownEdgeSource`]
//! - **Messaging**: [`GraphError::InvalidMessageDestination`],
//!   [`GraphError::DestinationIsLocal`]
//! - **Aggregators**: [`GraphError::UnknownAggregator`],
//!   [`GraphError::AggregatorTypeMismatch`]
//! - **Compute**: [`GraphError::Vertex`] wraps a user compute error with the
//!   failing vertex ID for diagnostics.
//! - **Queue**: [`GraphError::Queue`] surfaces a message queue's `Close`
//!   failure through `Graph::reset`/`Graph::close`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    /// `AddEdge` was called with a source vertex that isn't local to this graph.
    #[error("unknown edge source vertex: {0}")]
    UnknownEdgeSource(String),

    /// `SendMessage` targeted an unknown destination with no relayer (or the
    /// relayer declined it) registered.
    #[error("invalid message destination: {0}")]
    InvalidMessageDestination(String),

    /// Signalled by a [`crate::graph::Relayer`] to mean "this ID is actually
    /// local, enqueue it here" — surfaced to callers of `SendMessage` as
    /// [`GraphError::InvalidMessageDestination`] since late-arriving
    /// vertices are not yet supported.
    #[error("destination is local: {0}")]
    DestinationIsLocal(String),

    /// `Aggregator`/`Aggregators` was called with a name that was never
    /// registered.
    #[error("unknown aggregator: {0}")]
    UnknownAggregator(String),

    /// `Set`/`Aggregate` was called with a value whose kind doesn't match
    /// the aggregator's own kind (e.g. a float into an integer sum).
    #[error("aggregator type mismatch for {name}: expected {expected}, got {actual}")]
    AggregatorTypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A user compute callback failed while processing vertex `vertex_id`.
    #[error("vertex '{vertex_id}' compute failed: {source}")]
    Vertex {
        vertex_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A message queue's `Close` returned an error, surfaced through
    /// `Graph::reset`/`Graph::close`.
    #[error("message queue close failed: {0}")]
    Queue(String),
}

impl GraphError {
    pub fn vertex(
        vertex_id: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Vertex {
            vertex_id: vertex_id.into(),
            source: Box::new(source),
        }
    }
}
