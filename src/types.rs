//! Shared types and the error taxonomy for the archive.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Missing or invalid static settings. Fatal at startup, never
    /// recovered automatically.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No storage root has sufficient free space for the file.
    #[error("No space left for {filename} ({length} bytes) on any storage root")]
    NoSpaceLeft { filename: String, length: u64 },

    /// The target replica does not hold the requested file.
    #[error("Unknown file: {0}")]
    UnknownFile(String),

    /// Safety-check failure: the declared checksum does not match the
    /// on-disk content. Never triggers automatic deletion.
    #[error("Checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// Local I/O error, transient or permanent.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A replica did not acknowledge within its budget. Counts as FAILED
    /// for quorum purposes but is logged distinctly.
    #[error("Timed out waiting on {channel}")]
    Timeout { channel: String },

    /// Message fabric failure (connect, publish, subscribe).
    #[error("Fabric error: {0}")]
    Fabric(String),

    /// Admin/checksum ledger failure.
    #[error("Ledger error: {0}")]
    Ledger(#[from] sled::Error),

    /// Malformed or unexpected message on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Batch execution was cancelled before completion.
    #[error("Batch cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Identifier of one independently operated replica of the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a replica stores: full file content, or checksums only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaKind {
    FullContent,
    ChecksumOnly,
}

impl ReplicaKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "full-content" | "full_content" => Ok(ReplicaKind::FullContent),
            "checksum" | "checksum-only" | "checksum_only" => Ok(ReplicaKind::ChecksumOnly),
            other => Err(ArchiveError::Configuration(format!(
                "unknown replica kind '{other}' (expected 'full' or 'checksum')"
            ))),
        }
    }
}

/// One replica in the configured topology. Defined at deployment,
/// never created or destroyed at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSpec {
    pub id: ReplicaId,
    pub kind: ReplicaKind,
}

/// Per (filename, replica) upload progress. Transitions only forward,
/// except Failed -> Started on retry; terminal at Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Unknown,
    Started,
    Completed,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_kind_parse() {
        assert_eq!(ReplicaKind::parse("full").unwrap(), ReplicaKind::FullContent);
        assert_eq!(
            ReplicaKind::parse("checksum-only").unwrap(),
            ReplicaKind::ChecksumOnly
        );
        assert!(ReplicaKind::parse("partial").is_err());
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = ArchiveError::ChecksumMismatch {
            filename: "f.warc".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("f.warc"));
        assert!(text.contains("aa"));
        assert!(text.contains("bb"));
    }
}
