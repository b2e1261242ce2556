//! Distributed coordination for `linksrus-bspgraph`: a master reserves
//! workers from a [`WorkerPool`](worker_pool::WorkerPool), carves the
//! vertex-ID space into a [`PartitionRange`](linksrus_bspgraph::PartitionRange)
//! per worker, and drives every partition's [`Graph`](linksrus_bspgraph::Graph)
//! through the same superstep in lock-step via a
//! [`StepBarrier`](barrier::StepBarrier), relaying cross-partition messages
//! between workers that otherwise can't talk to each other directly.
//!
//! What actually populates a graph and persists its results is left to a
//! caller-supplied [`JobRunner`](job_runner::JobRunner) — this crate only
//! knows how to keep many of those graphs' supersteps synchronized.

pub mod barrier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod job_runner;
pub mod messages;
pub mod partition_detector;
pub mod serializer;
pub mod stream;
pub mod worker_pool;

pub use barrier::StepBarrier;
pub use config::{MasterConfig, WorkerConfig, MAX_DIAL_ATTEMPTS};
pub use coordinator::master::{run_job as run_master_job, Master};
pub use coordinator::worker::run_job as run_worker_job;
pub use error::{ClusterError, Result};
pub use job_runner::{ExecutorFactory, JobRunner, StartedJob};
pub use messages::{JobDetails, MasterPayload, RelayMessage, Step, StepType, WireAggregatorValue, WorkerPayload};
pub use partition_detector::{PartitionDetector, StaticPartitionDetector};
pub use serializer::{JsonSerializer, Serializer};
pub use stream::{handle_send_recv, Stream};
pub use worker_pool::{WorkerHandle, WorkerPool};
