//! Error types for the distributed coordination layer.
//!
//! # Error Categories
//!
//! - **Job lifecycle**: [`ClusterError::JobAborted`], [`ClusterError::MasterShuttingDown`]
//! - **Worker pool**: [`ClusterError::UnableToReserveWorkers`]
//! - **Step barrier**: [`ClusterError::UnsupportedStepType`]
//! - **Collaborators**: [`ClusterError::Serialization`], [`ClusterError::JobRunner`]
//! - **Wrapped**: [`ClusterError::Graph`], [`ClusterError::Partition`]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Error, Debug)]
pub enum ClusterError {
    /// Raised to every still-running caller once a job's context is
    /// cancelled — by an explicit `AbortJob`, a disconnected worker, or the
    /// master shutting down mid-job.
    #[error("job aborted")]
    JobAborted,

    /// A job or worker-pool operation was attempted after `Close` was
    /// called on the master.
    #[error("master is shutting down")]
    MasterShuttingDown,

    /// `ReserveWorkers` could not collect `min` idle workers before its
    /// acquire timeout elapsed.
    #[error("unable to reserve {min} workers before the acquire timeout")]
    UnableToReserveWorkers { min: usize },

    /// A `Step` carried the reserved `Invalid` tag, or a tag the receiving
    /// side doesn't know how to handle.
    #[error("unsupported step type")]
    UnsupportedStepType,

    /// A `RelayMessage` named a destination vertex that isn't owned by any
    /// known partition.
    #[error("unknown relay destination: {0}")]
    UnknownDestination(String),

    /// A `Serializer` implementation failed to encode or decode a payload.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A user `JobRunner` callback returned an error.
    #[error("job runner failed: {0}")]
    JobRunner(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("graph error: {0}")]
    Graph(#[from] linksrus_bspgraph::GraphError),

    #[error("partition error: {0}")]
    Partition(#[from] linksrus_bspgraph::PartitionError),
}

impl ClusterError {
    pub fn job_runner(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::JobRunner(Box::new(source))
    }
}
