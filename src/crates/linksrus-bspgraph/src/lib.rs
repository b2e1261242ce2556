//! Single-process Bulk-Synchronous-Parallel graph engine.
//!
//! A [`Graph`](graph::Graph) holds vertices and their outgoing edges, runs
//! them through repeated supersteps (a Pregel-style compute/communicate/
//! barrier cycle), and lets vertices combine partial results through named
//! [`Aggregator`](aggregator::Aggregator)s. This crate only knows about a
//! single process's worth of partitions — distributing a graph across
//! multiple workers and coordinating their supersteps is `linksrus-bspgraph-cluster`'s job.

pub mod aggregator;
pub mod error;
pub mod executor;
pub mod graph;
pub mod partition;
pub mod queue;
pub mod vertex;

pub use aggregator::{Aggregator, AggregatorValue};
pub use error::{GraphError, Result};
pub use executor::{BspExecutorHooks, Executor, NoopHooks};
pub use graph::{ComputeFn, Graph, Relayer};
pub use partition::{PartitionError, PartitionRange};
pub use queue::{InMemoryMessageQueue, InMemoryQueueFactory, MessageQueue, MessageQueueFactory};
pub use vertex::{Edge, Vertex};
