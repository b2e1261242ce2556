//! The logical message set exchanged between a master and its workers.
//!
//! These are wire-format-agnostic: a real deployment would frame them over
//! a gRPC bidi stream (out of scope here — see [`crate::stream`]), but
//! nothing downstream of [`Serializer`](crate::serializer::Serializer) cares
//! how they got there.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use linksrus_bspgraph::AggregatorValue;

/// The seven phase tags a [`crate::barrier::StepBarrier`] rendezvous on.
/// `Invalid` is a reserved sentinel: any side that receives it rejects the
/// step with [`crate::error::ClusterError::UnsupportedStepType`] rather than
/// acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepType {
    /// Before a superstep runs.
    Pre,
    /// After a superstep completes.
    Post,
    /// After `Post`, carrying whether another superstep should run.
    PostKeepRunning,
    /// The graph has stopped iterating; persistence is about to start.
    ExecutedGraph,
    /// Each worker has persisted its partition's results.
    PersistedResults,
    /// The job is fully done; workers may return to the idle pool.
    CompletedJob,
    /// Reserved; never legitimately sent.
    Invalid,
}

impl StepType {
    /// The phases a [`crate::barrier::StepBarrier`] actually rendezvous on,
    /// in protocol order. `Invalid` is deliberately excluded.
    pub const ALL: [StepType; 6] = [
        StepType::Pre,
        StepType::Post,
        StepType::PostKeepRunning,
        StepType::ExecutedGraph,
        StepType::PersistedResults,
        StepType::CompletedJob,
    ];
}

/// One aggregator's value as carried on the wire, keyed by aggregator name
/// in [`Step::aggregators`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum WireAggregatorValue {
    Int(i64),
    Float(f64),
}

impl From<AggregatorValue> for WireAggregatorValue {
    fn from(value: AggregatorValue) -> Self {
        match value {
            AggregatorValue::Int(v) => WireAggregatorValue::Int(v),
            AggregatorValue::Float(v) => WireAggregatorValue::Float(v),
        }
    }
}

impl From<WireAggregatorValue> for AggregatorValue {
    fn from(value: WireAggregatorValue) -> Self {
        match value {
            WireAggregatorValue::Int(v) => AggregatorValue::Int(v),
            WireAggregatorValue::Float(v) => AggregatorValue::Float(v),
        }
    }
}

/// A step-barrier rendezvous message: a worker's local delta on arrival, or
/// the master's reduced result on broadcast. `aggregators` carries deltas on
/// the way up to the master and the new global baseline on the way back
/// down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_type: StepType,
    pub aggregators: HashMap<String, WireAggregatorValue>,
    pub active_in_step: u64,
}

impl Step {
    pub fn new(step_type: StepType) -> Self {
        Self { step_type, aggregators: HashMap::new(), active_in_step: 0 }
    }
}

/// Assigns one worker the partition of vertex-ID space it owns for a job,
/// plus the job's identity. Sent once, at job start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    pub job_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub partition_index: usize,
    pub partition_count: usize,
}

/// A message addressed to a vertex this side doesn't own, relayed through
/// the side that does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    pub destination_id: String,
    pub payload: serde_json::Value,
}

/// Everything a master may send down a worker's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MasterPayload {
    JobDetails(JobDetails),
    Step(Step),
    RelayMessage(RelayMessage),
}

/// Everything a worker may send up its stream to the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerPayload {
    Step(Step),
    RelayMessage(RelayMessage),
}
