//! Configuration for the archive daemons.
//!
//! CLI arguments and environment variable handling using clap. One value
//! object is parsed and validated at startup and threaded explicitly into
//! each component's constructor; nothing reads ambient settings later.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::CoordinatorSettings;
use crate::fabric::FabricArgs;
use crate::freespace::{
    DiskFreeSpaceProvider, FilebasedFreeSpaceProvider, MockFreeSpaceProvider,
    SharedFreeSpaceProvider,
};
use crate::types::{ArchiveError, ReplicaId, ReplicaKind, ReplicaSpec, Result};

/// Coordinator daemon arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "reliquary")]
#[command(about = "Replicated bit-archive coordinator")]
#[command(version)]
pub struct Args {
    /// Environment name prefixing every channel (e.g. PROD)
    #[arg(long, env = "ENVIRONMENT_NAME")]
    pub environment: String,

    /// Application instance id appended to unicast channels
    #[arg(long, env = "APPLICATION_INSTANCE_ID", default_value = "")]
    pub instance_id: String,

    /// Replica topology, e.g. "KB:full,SB:full,CS:checksum"
    #[arg(long, env = "REPLICAS")]
    pub replicas: String,

    /// Replicas that must acknowledge a store (0 = all full-content)
    #[arg(long, env = "STORE_QUORUM", default_value = "0")]
    pub quorum: usize,

    /// Retry rounds for failed replicas after the first store attempt
    #[arg(long, env = "STORE_RETRIES", default_value = "2")]
    pub store_retries: u32,

    /// Budget in seconds for each cross-replica wait
    #[arg(long, env = "REPLY_TIMEOUT_SECS", default_value = "30")]
    pub reply_timeout_secs: u64,

    /// Reconciliation interval in seconds (0 = on demand only)
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value = "0")]
    pub reconcile_interval_secs: u64,

    /// Directory receiving JSON preservation reports (optional)
    #[arg(long, env = "REPORT_DIR")]
    pub report_dir: Option<PathBuf>,

    /// Fabric connection
    #[command(flatten)]
    pub fabric: FabricArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Startup-fatal validation; configuration errors are never recovered
    /// automatically.
    pub fn validate(&self) -> Result<()> {
        let replicas = self.replica_specs()?;
        let full = replicas
            .iter()
            .filter(|r| r.kind == ReplicaKind::FullContent)
            .count();
        if full == 0 {
            return Err(ArchiveError::Configuration(
                "topology needs at least one full-content replica".to_string(),
            ));
        }
        if self.quorum > full {
            return Err(ArchiveError::Configuration(format!(
                "quorum {} exceeds the {} full-content replicas",
                self.quorum, full
            )));
        }
        Ok(())
    }

    pub fn replica_specs(&self) -> Result<Vec<ReplicaSpec>> {
        parse_replicas(&self.replicas)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            quorum: self.quorum,
            store_retries: self.store_retries,
            reply_timeout: Duration::from_secs(self.reply_timeout_secs),
        }
    }
}

/// Replica daemon arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "reliquary-node")]
#[command(about = "Replica node for the replicated bit-archive")]
#[command(version)]
pub struct NodeArgs {
    /// Environment name prefixing every channel (e.g. PROD)
    #[arg(long, env = "ENVIRONMENT_NAME")]
    pub environment: String,

    /// Application instance id appended to unicast channels
    #[arg(long, env = "APPLICATION_INSTANCE_ID", default_value = "")]
    pub instance_id: String,

    /// Replica this node belongs to
    #[arg(long, env = "REPLICA_ID")]
    pub replica_id: String,

    /// What this replica stores: full | checksum
    #[arg(long, env = "REPLICA_KIND", default_value = "full")]
    pub replica_kind: String,

    /// Node identifier within the replica (defaults to the hostname)
    #[arg(long, env = "NODE_ID")]
    pub node_id: Option<String>,

    /// Storage roots in placement priority order, comma separated
    #[arg(long, env = "STORAGE_ROOTS", default_value = "")]
    pub storage_roots: String,

    /// Headroom in bytes a root must keep after placement
    #[arg(long, env = "MIN_SPACE_LEFT", default_value = "67108864")]
    pub min_space_left: u64,

    /// Ledger directory (defaults to <first root>/ledger)
    #[arg(long, env = "LEDGER_PATH")]
    pub ledger_path: Option<PathBuf>,

    /// Free-space provider: disk | mock | filebased
    #[arg(long, env = "FREESPACE_PROVIDER", default_value = "disk")]
    pub freespace_provider: String,

    /// Fixed byte count for the mock provider
    #[arg(long, env = "FREESPACE_MOCK_BYTES", default_value_t = MockFreeSpaceProvider::ONE_TIB)]
    pub freespace_mock_bytes: u64,

    /// Sidecar directory for the filebased provider
    #[arg(long, env = "FREESPACE_DIR")]
    pub freespace_dir: Option<PathBuf>,

    /// Fabric connection
    #[command(flatten)]
    pub fabric: FabricArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl NodeArgs {
    pub fn validate(&self) -> Result<()> {
        if self.replica_id.trim().is_empty() {
            return Err(ArchiveError::Configuration(
                "replica id must not be empty".to_string(),
            ));
        }
        let kind = ReplicaKind::parse(&self.replica_kind)?;
        if kind == ReplicaKind::FullContent && self.root_paths().is_empty() {
            return Err(ArchiveError::Configuration(
                "a full-content replica needs at least one storage root".to_string(),
            ));
        }
        if self.freespace_provider == "filebased" && self.freespace_dir.is_none() {
            return Err(ArchiveError::Configuration(
                "the filebased provider needs --freespace-dir".to_string(),
            ));
        }
        Ok(())
    }

    pub fn replica(&self) -> ReplicaId {
        ReplicaId::new(self.replica_id.clone())
    }

    pub fn kind(&self) -> Result<ReplicaKind> {
        ReplicaKind::parse(&self.replica_kind)
    }

    pub fn root_paths(&self) -> Vec<PathBuf> {
        self.storage_roots
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    pub fn ledger_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.ledger_path {
            return Ok(path.clone());
        }
        self.root_paths()
            .first()
            .map(|root| root.join("ledger"))
            .ok_or_else(|| {
                ArchiveError::Configuration("no storage root to derive a ledger path".to_string())
            })
    }

    pub fn node_id(&self) -> String {
        self.node_id.clone().unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
        })
    }

    pub fn free_space_provider(&self) -> Result<SharedFreeSpaceProvider> {
        match self.freespace_provider.as_str() {
            "disk" => Ok(Arc::new(DiskFreeSpaceProvider::new())),
            "mock" => Ok(Arc::new(MockFreeSpaceProvider::new(
                self.freespace_mock_bytes,
            ))),
            "filebased" => {
                let dir = self.freespace_dir.clone().ok_or_else(|| {
                    ArchiveError::Configuration(
                        "the filebased provider needs --freespace-dir".to_string(),
                    )
                })?;
                Ok(Arc::new(FilebasedFreeSpaceProvider::new(dir)))
            }
            other => Err(ArchiveError::Configuration(format!(
                "unknown free-space provider '{other}'"
            ))),
        }
    }
}

/// Parse "ID:kind,ID:kind" topology strings.
pub fn parse_replicas(raw: &str) -> Result<Vec<ReplicaSpec>> {
    let mut specs = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((id, kind)) = part.split_once(':') else {
            return Err(ArchiveError::Configuration(format!(
                "replica entry '{part}' is not ID:kind"
            )));
        };
        let id = id.trim();
        if id.is_empty() {
            return Err(ArchiveError::Configuration(format!(
                "replica entry '{part}' has an empty id"
            )));
        }
        specs.push(ReplicaSpec {
            id: ReplicaId::new(id),
            kind: ReplicaKind::parse(kind)?,
        });
    }
    if specs.is_empty() {
        return Err(ArchiveError::Configuration(
            "replica topology must not be empty".to_string(),
        ));
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replicas() {
        let specs = parse_replicas("KB:full, SB:full ,CS:checksum").unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].id.as_str(), "KB");
        assert_eq!(specs[0].kind, ReplicaKind::FullContent);
        assert_eq!(specs[2].kind, ReplicaKind::ChecksumOnly);

        assert!(parse_replicas("").is_err());
        assert!(parse_replicas("KB").is_err());
        assert!(parse_replicas(":full").is_err());
        assert!(parse_replicas("KB:sideways").is_err());
    }

    #[test]
    fn test_args_validation() {
        let args = Args::parse_from([
            "reliquary",
            "--environment",
            "TEST",
            "--replicas",
            "KB:full,SB:full",
            "--quorum",
            "2",
        ]);
        assert!(args.validate().is_ok());

        let args = Args::parse_from([
            "reliquary",
            "--environment",
            "TEST",
            "--replicas",
            "KB:full",
            "--quorum",
            "2",
        ]);
        assert!(args.validate().is_err());

        let args = Args::parse_from([
            "reliquary",
            "--environment",
            "TEST",
            "--replicas",
            "CS:checksum",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_node_args_roots_and_ledger() {
        let args = NodeArgs::parse_from([
            "reliquary-node",
            "--environment",
            "TEST",
            "--replica-id",
            "KB",
            "--storage-roots",
            "/archive/dir1, /archive/dir2",
        ]);
        assert!(args.validate().is_ok());
        assert_eq!(
            args.root_paths(),
            vec![PathBuf::from("/archive/dir1"), PathBuf::from("/archive/dir2")]
        );
        assert_eq!(
            args.ledger_path().unwrap(),
            PathBuf::from("/archive/dir1/ledger")
        );
    }

    #[test]
    fn test_node_args_full_replica_needs_roots() {
        let args = NodeArgs::parse_from([
            "reliquary-node",
            "--environment",
            "TEST",
            "--replica-id",
            "KB",
        ]);
        assert!(args.validate().is_err());

        let args = NodeArgs::parse_from([
            "reliquary-node",
            "--environment",
            "TEST",
            "--replica-id",
            "CS",
            "--replica-kind",
            "checksum",
            "--ledger-path",
            "/archive/cs-ledger",
        ]);
        assert!(args.validate().is_ok());
    }
}
