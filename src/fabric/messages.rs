//! Wire protocol for the archive fabric.
//!
//! A closed set of tagged message kinds with fixed, versioned field layouts,
//! decoded at the fabric boundary. Binary content travels base64-encoded
//! inside the JSON envelope.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ArchiveError, ReplicaId, Result};

/// Version stamped on every message. Receivers reject newer layouts.
pub const PROTOCOL_VERSION: u32 = 1;

/// Outcome of one replica's store attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOutcome {
    Completed,
    Failed,
}

/// One failed file inside a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub filename: String,
    pub error: String,
}

/// The closed set of batch operations a replica can be asked to run.
///
/// The local engine accepts arbitrary jobs; over the wire only these named
/// operations exist, so the protocol never carries opaque code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchSpec {
    /// Emit `filename##checksum` lines for every matching file.
    Checksum {
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    /// Emit one filename per line.
    FileList {
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    /// Emit `filename<SP>bytes` lines.
    Size {
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
}

impl BatchSpec {
    pub fn operation(&self) -> &'static str {
        match self {
            BatchSpec::Checksum { .. } => "checksum",
            BatchSpec::FileList { .. } => "file_list",
            BatchSpec::Size { .. } => "size",
        }
    }
}

/// All messages that cross the archive fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveMessage {
    /// Coordinator -> node: store a file on this replica.
    StoreRequest {
        version: u32,
        request_id: String,
        reply_to: String,
        filename: String,
        #[serde(with = "base64_bytes")]
        content: Vec<u8>,
        checksum: String,
    },
    /// Node -> coordinator: store acknowledgement.
    StoreAck {
        version: u32,
        request_id: String,
        filename: String,
        replica: ReplicaId,
        outcome: StoreOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RetrieveRequest {
        version: u32,
        request_id: String,
        reply_to: String,
        filename: String,
    },
    RetrieveReply {
        version: u32,
        request_id: String,
        filename: String,
        replica: ReplicaId,
        #[serde(default, with = "opt_base64_bytes")]
        content: Option<Vec<u8>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Administrative, checksum-gated removal on one replica. The target
    /// replica is named when the request is addressed to the coordinator;
    /// on a node queue the receiving replica is implicit.
    RemoveRequest {
        version: u32,
        request_id: String,
        reply_to: String,
        filename: String,
        checksum: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replica: Option<ReplicaId>,
    },
    RemoveReply {
        version: u32,
        request_id: String,
        filename: String,
        replica: ReplicaId,
        removed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ChecksumRequest {
        version: u32,
        request_id: String,
        reply_to: String,
        filename: String,
    },
    ChecksumReply {
        version: u32,
        request_id: String,
        filename: String,
        replica: ReplicaId,
        #[serde(skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    BatchRequest {
        version: u32,
        request_id: String,
        reply_to: String,
        spec: BatchSpec,
    },
    BatchReply {
        version: u32,
        request_id: String,
        replica: ReplicaId,
        processed: usize,
        failures: Vec<BatchFailure>,
        #[serde(with = "base64_bytes")]
        output: Vec<u8>,
        cancelled: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Checksum-batch output from a full-content replica, pushed to the
    /// checksum archive for ingestion. The only way entries enter it.
    ChecksumReport {
        version: u32,
        request_id: String,
        reply_to: String,
        /// Replica whose files produced the report.
        source: ReplicaId,
        /// `filename##checksum` lines.
        #[serde(with = "base64_bytes")]
        report: Vec<u8>,
    },
    ChecksumReportAck {
        version: u32,
        request_id: String,
        replica: ReplicaId,
        added: usize,
        diverged: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Broadcast on the status topic when a node comes up or changes state.
    NodeStatus {
        version: u32,
        replica: ReplicaId,
        node_id: String,
        state: String,
        roots: usize,
        timestamp: DateTime<Utc>,
    },
}

impl ArchiveMessage {
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(serde_json::to_vec(self)?.into())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let msg: ArchiveMessage = serde_json::from_slice(data)?;
        let version = msg.version();
        if version > PROTOCOL_VERSION {
            return Err(ArchiveError::Protocol(format!(
                "message version {version} is newer than supported {PROTOCOL_VERSION}"
            )));
        }
        Ok(msg)
    }

    pub fn version(&self) -> u32 {
        match self {
            ArchiveMessage::StoreRequest { version, .. }
            | ArchiveMessage::StoreAck { version, .. }
            | ArchiveMessage::RetrieveRequest { version, .. }
            | ArchiveMessage::RetrieveReply { version, .. }
            | ArchiveMessage::RemoveRequest { version, .. }
            | ArchiveMessage::RemoveReply { version, .. }
            | ArchiveMessage::ChecksumRequest { version, .. }
            | ArchiveMessage::ChecksumReply { version, .. }
            | ArchiveMessage::BatchRequest { version, .. }
            | ArchiveMessage::BatchReply { version, .. }
            | ArchiveMessage::ChecksumReport { version, .. }
            | ArchiveMessage::ChecksumReportAck { version, .. }
            | ArchiveMessage::NodeStatus { version, .. } => *version,
        }
    }

    /// Correlation id, where the message kind carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ArchiveMessage::StoreRequest { request_id, .. }
            | ArchiveMessage::StoreAck { request_id, .. }
            | ArchiveMessage::RetrieveRequest { request_id, .. }
            | ArchiveMessage::RetrieveReply { request_id, .. }
            | ArchiveMessage::RemoveRequest { request_id, .. }
            | ArchiveMessage::RemoveReply { request_id, .. }
            | ArchiveMessage::ChecksumRequest { request_id, .. }
            | ArchiveMessage::ChecksumReply { request_id, .. }
            | ArchiveMessage::BatchRequest { request_id, .. }
            | ArchiveMessage::BatchReply { request_id, .. }
            | ArchiveMessage::ChecksumReport { request_id, .. }
            | ArchiveMessage::ChecksumReportAck { request_id, .. } => Some(request_id),
            ArchiveMessage::NodeStatus { .. } => None,
        }
    }
}

/// Base64 encoding for binary payloads inside JSON envelopes.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(&s)
            .map_err(|e| serde::de::Error::custom(format!("base64 decode error: {e}")))
    }
}

mod opt_base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        bytes
            .as_ref()
            .map(|b| STANDARD.encode(b))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| {
            STANDARD
                .decode(&s)
                .map_err(|e| serde::de::Error::custom(format!("base64 decode error: {e}")))
        })
        .transpose()
    }
}
