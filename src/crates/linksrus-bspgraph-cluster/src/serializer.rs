//! The `Serializer` collaborator trait: turns domain values into bytes for
//! `RelayMessage` payloads and back, independent of whatever wire framing
//! eventually carries them.

use crate::error::{ClusterError, Result};

pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>>;
    fn unserialize(&self, data: &[u8]) -> Result<serde_json::Value>;
}

/// The default `Serializer`: JSON, matching every other wire structure in
/// this crate (`Step`, `JobDetails`, `RelayMessage` are all `serde`-derived
/// already).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| ClusterError::Serialization(e.to_string()))
    }

    fn unserialize(&self, data: &[u8]) -> Result<serde_json::Value> {
        serde_json::from_slice(data).map_err(|e| ClusterError::Serialization(e.to_string()))
    }
}
