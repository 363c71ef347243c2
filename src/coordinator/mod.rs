//! Repository coordinator: one logical store in front of all replicas.
//!
//! Fans store requests out to every full-content replica, collects per
//! replica acknowledgements on a fresh reply inbox, retries only the
//! replicas that failed, and reports exactly which replicas ended up
//! inconsistent. Retrieval routes to any replica able to serve the file;
//! removal is single-replica, checksum-gated and audited.

pub mod service;

pub use service::CoordinatorService;

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::batch::jobs::checksum_bytes;
use crate::channels::ChannelDirectory;
use crate::fabric::messages::{
    ArchiveMessage, BatchFailure, BatchSpec, StoreOutcome, PROTOCOL_VERSION,
};
use crate::fabric::{publish_message, request, MessageFabric};
use crate::types::{ArchiveError, ReplicaId, ReplicaKind, ReplicaSpec, Result, UploadState};

/// Coordinator tunables. Threaded in from configuration; the algorithms
/// never hard-code their own values.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Replicas that must acknowledge a store. 0 means all full-content
    /// replicas.
    pub quorum: usize,
    /// Retry rounds for failed replicas after the first attempt.
    pub store_retries: u32,
    /// Budget for each cross-replica wait.
    pub reply_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            quorum: 0,
            store_retries: 2,
            reply_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-replica outcome of a coordinated store.
#[derive(Debug, Clone)]
pub struct ReplicaStoreResult {
    pub replica: ReplicaId,
    pub state: UploadState,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Outcome of one coordinated store across all replicas.
#[derive(Debug, Clone)]
pub struct StoreReport {
    pub filename: String,
    pub checksum: String,
    pub outcome: StoreOutcome,
    pub replicas: Vec<ReplicaStoreResult>,
}

impl StoreReport {
    pub fn failed_replicas(&self) -> Vec<&ReplicaStoreResult> {
        self.replicas
            .iter()
            .filter(|r| r.state != UploadState::Completed)
            .collect()
    }
}

/// One replica's contribution to a distributed batch.
#[derive(Debug, Clone)]
pub struct ReplicaBatchResult {
    pub replica: ReplicaId,
    pub processed: usize,
    pub failures: Vec<BatchFailure>,
    pub output: Vec<u8>,
    pub cancelled: bool,
    /// Engine-level fault or timeout; per-file failures live in `failures`.
    pub error: Option<String>,
}

/// Merged outcome of a batch fanned out to all replicas, in replica order.
#[derive(Debug, Clone)]
pub struct DistributedBatchStatus {
    pub processed: usize,
    pub failures: Vec<BatchFailure>,
    pub output: Vec<u8>,
    pub per_replica: Vec<ReplicaBatchResult>,
}

/// The client-facing entry point of the archive.
pub struct RepositoryCoordinator {
    fabric: Arc<dyn MessageFabric>,
    directory: ChannelDirectory,
    replicas: Vec<ReplicaSpec>,
    settings: CoordinatorSettings,
    /// Upload records per filename, per replica.
    uploads: DashMap<String, HashMap<ReplicaId, UploadState>>,
}

impl RepositoryCoordinator {
    pub fn new(
        fabric: Arc<dyn MessageFabric>,
        directory: ChannelDirectory,
        replicas: Vec<ReplicaSpec>,
        settings: CoordinatorSettings,
    ) -> Result<Self> {
        if replicas.is_empty() {
            return Err(ArchiveError::Configuration(
                "coordinator needs at least one replica".to_string(),
            ));
        }
        let full_count = replicas
            .iter()
            .filter(|r| r.kind == ReplicaKind::FullContent)
            .count();
        if full_count == 0 {
            return Err(ArchiveError::Configuration(
                "coordinator needs at least one full-content replica".to_string(),
            ));
        }
        if settings.quorum > full_count {
            return Err(ArchiveError::Configuration(format!(
                "quorum {} exceeds the {} full-content replicas",
                settings.quorum, full_count
            )));
        }
        Ok(Self {
            fabric,
            directory,
            replicas,
            settings,
            uploads: DashMap::new(),
        })
    }

    pub fn replicas(&self) -> &[ReplicaSpec] {
        &self.replicas
    }

    pub fn directory(&self) -> &ChannelDirectory {
        &self.directory
    }

    fn full_replicas(&self) -> Vec<ReplicaId> {
        self.replicas
            .iter()
            .filter(|r| r.kind == ReplicaKind::FullContent)
            .map(|r| r.id.clone())
            .collect()
    }

    fn quorum_needed(&self, targets: usize) -> usize {
        if self.settings.quorum == 0 {
            targets
        } else {
            self.settings.quorum
        }
    }

    /// Upload record for a filename, if any store was ever attempted.
    pub fn upload_record(&self, filename: &str) -> Option<HashMap<ReplicaId, UploadState>> {
        self.uploads.get(filename).map(|r| r.value().clone())
    }

    /// Store a file on every full-content replica.
    ///
    /// Overall outcome is Completed only when at least the configured
    /// quorum acknowledged; anything less is reported as Failed with the
    /// failing replicas and their reasons, even if some replicas
    /// succeeded. Replicas that acknowledged are never retried.
    pub async fn store(&self, filename: &str, content: &[u8]) -> Result<StoreReport> {
        let checksum = checksum_bytes(content);
        let targets = self.full_replicas();
        info!(
            "Coordinated store of {} ({} bytes) to {} replica(s)",
            filename,
            content.len(),
            targets.len()
        );

        let mut results: HashMap<ReplicaId, ReplicaStoreResult> = targets
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    ReplicaStoreResult {
                        replica: id.clone(),
                        state: UploadState::Unknown,
                        error: None,
                        attempts: 0,
                    },
                )
            })
            .collect();

        for round in 0..=self.settings.store_retries {
            let pending: Vec<ReplicaId> = targets
                .iter()
                .filter(|id| results[*id].state != UploadState::Completed)
                .cloned()
                .collect();
            if pending.is_empty() {
                break;
            }
            if round > 0 {
                info!(
                    "Store retry {}/{} for {} on {:?}",
                    round, self.settings.store_retries, filename, pending
                );
            }
            self.store_round(filename, content, &checksum, &pending, &mut results)
                .await?;
        }

        let completed = results
            .values()
            .filter(|r| r.state == UploadState::Completed)
            .count();
        let needed = self.quorum_needed(targets.len());
        let outcome = if completed >= needed {
            StoreOutcome::Completed
        } else {
            StoreOutcome::Failed
        };

        let report = StoreReport {
            filename: filename.to_string(),
            checksum,
            outcome,
            replicas: targets.iter().map(|id| results[id].clone()).collect(),
        };

        self.uploads.insert(
            filename.to_string(),
            report
                .replicas
                .iter()
                .map(|r| (r.replica.clone(), r.state))
                .collect(),
        );

        match outcome {
            StoreOutcome::Completed => {
                info!(
                    "Store of {} completed on {}/{} replica(s)",
                    filename,
                    completed,
                    targets.len()
                );
            }
            StoreOutcome::Failed => {
                warn!(
                    "Store of {} FAILED: {}/{} acknowledged, quorum {} not met; failed: {:?}",
                    filename,
                    completed,
                    targets.len(),
                    needed,
                    report
                        .failed_replicas()
                        .iter()
                        .map(|r| r.replica.as_str())
                        .collect::<Vec<_>>()
                );
            }
        }
        Ok(report)
    }

    /// One fan-out round: publish to every pending replica, then collect
    /// acknowledgements on a fresh inbox until all answered or the reply
    /// timeout elapses. Unanswered replicas are failed with a timeout,
    /// logged distinctly from replica-reported failures.
    async fn store_round(
        &self,
        filename: &str,
        content: &[u8],
        checksum: &str,
        pending: &[ReplicaId],
        results: &mut HashMap<ReplicaId, ReplicaStoreResult>,
    ) -> Result<()> {
        let inbox = self.directory.reply_inbox("store");
        let mut sub = self.fabric.subscribe(&inbox).await?;
        let request_id = uuid::Uuid::new_v4().to_string();

        for replica in pending {
            let entry = results.get_mut(replica).expect("pending replica tracked");
            entry.state = UploadState::Started;
            entry.attempts += 1;
            let msg = ArchiveMessage::StoreRequest {
                version: PROTOCOL_VERSION,
                request_id: request_id.clone(),
                reply_to: inbox.name().to_string(),
                filename: filename.to_string(),
                content: content.to_vec(),
                checksum: checksum.to_string(),
            };
            publish_message(self.fabric.as_ref(), &self.directory.any_node(replica), &msg)
                .await?;
        }

        let deadline = Instant::now() + self.settings.reply_timeout;
        let mut awaiting: Vec<ReplicaId> = pending.to_vec();
        while !awaiting.is_empty() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
            else {
                break;
            };
            let payload = match tokio::time::timeout(remaining, sub.next()).await {
                Ok(Some(payload)) => payload,
                Ok(None) | Err(_) => break,
            };
            let ack = match ArchiveMessage::from_bytes(&payload) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Undecodable store ack: {}", e);
                    continue;
                }
            };
            let ArchiveMessage::StoreAck {
                request_id: ack_request,
                replica,
                outcome,
                error,
                ..
            } = ack
            else {
                debug!("Ignoring non-ack on store inbox");
                continue;
            };
            if ack_request != request_id {
                debug!("Ignoring stale ack from round {}", ack_request);
                continue;
            }
            let Some(index) = awaiting.iter().position(|id| *id == replica) else {
                continue;
            };
            awaiting.swap_remove(index);
            let entry = results.get_mut(&replica).expect("acked replica tracked");
            match outcome {
                StoreOutcome::Completed => {
                    entry.state = UploadState::Completed;
                    entry.error = None;
                }
                StoreOutcome::Failed => {
                    entry.state = UploadState::Failed;
                    entry.error = error;
                }
            }
        }

        for replica in awaiting {
            // Timed out: counts like a failure for quorum, logged apart.
            warn!(
                "Replica {} did not acknowledge store of {} within {:?}",
                replica, filename, self.settings.reply_timeout
            );
            let entry = results.get_mut(&replica).expect("awaited replica tracked");
            entry.state = UploadState::Failed;
            entry.error = Some(
                ArchiveError::Timeout {
                    channel: self.directory.any_node(&replica).to_string(),
                }
                .to_string(),
            );
        }
        Ok(())
    }

    /// Retrieve a file from one replica holding it: the preferred replica
    /// first when given, then the remaining full-content replicas.
    /// UnknownFile only when no replica can serve it.
    pub async fn retrieve(
        &self,
        filename: &str,
        preferred: Option<&ReplicaId>,
    ) -> Result<Vec<u8>> {
        let mut order = self.full_replicas();
        if let Some(preferred) = preferred {
            if let Some(index) = order.iter().position(|id| id == preferred) {
                order.swap(0, index);
            }
        }

        for replica in &order {
            let inbox = self.directory.reply_inbox("retrieve");
            let msg = ArchiveMessage::RetrieveRequest {
                version: PROTOCOL_VERSION,
                request_id: uuid::Uuid::new_v4().to_string(),
                reply_to: inbox.name().to_string(),
                filename: filename.to_string(),
            };
            let reply = request(
                self.fabric.as_ref(),
                &self.directory.any_node(replica),
                &inbox,
                &msg,
                self.settings.reply_timeout,
            )
            .await;
            match reply {
                Ok(ArchiveMessage::RetrieveReply {
                    content: Some(content),
                    ..
                }) => {
                    debug!("Retrieved {} from {}", filename, replica);
                    return Ok(content);
                }
                Ok(ArchiveMessage::RetrieveReply { error, .. }) => {
                    debug!(
                        "Replica {} cannot serve {}: {}",
                        replica,
                        filename,
                        error.unwrap_or_default()
                    );
                }
                Ok(other) => {
                    warn!("Unexpected retrieve reply kind: {:?}", other.request_id());
                }
                Err(e) => {
                    warn!("Retrieve of {} from {} failed: {}", filename, replica, e);
                }
            }
        }
        Err(ArchiveError::UnknownFile(filename.to_string()))
    }

    /// Administrative, single-replica removal; the declared checksum must
    /// match on the replica. Audited there and logged here.
    pub async fn remove(
        &self,
        filename: &str,
        replica: &ReplicaId,
        checksum: &str,
    ) -> Result<u64> {
        let inbox = self.directory.reply_inbox("remove");
        let msg = ArchiveMessage::RemoveRequest {
            version: PROTOCOL_VERSION,
            request_id: uuid::Uuid::new_v4().to_string(),
            reply_to: inbox.name().to_string(),
            filename: filename.to_string(),
            checksum: checksum.to_string(),
            replica: None,
        };
        let reply = request(
            self.fabric.as_ref(),
            &self.directory.any_node(replica),
            &inbox,
            &msg,
            self.settings.reply_timeout,
        )
        .await?;
        match reply {
            ArchiveMessage::RemoveReply {
                removed: true,
                size,
                ..
            } => {
                info!("Removed {} from {} ({:?} bytes)", filename, replica, size);
                Ok(size.unwrap_or(0))
            }
            ArchiveMessage::RemoveReply { error, .. } => Err(ArchiveError::Internal(format!(
                "remove of {filename} on {replica} refused: {}",
                error.unwrap_or_else(|| "no reason given".to_string())
            ))),
            other => Err(ArchiveError::Protocol(format!(
                "unexpected reply to remove: {:?}",
                other.request_id()
            ))),
        }
    }

    /// Fan a batch out to every replica and merge the replies in replica
    /// order: counts summed, failure lists and outputs concatenated. A
    /// replica that does not answer within the budget contributes an
    /// error entry instead of silently vanishing from the merge.
    pub async fn run_distributed_batch(&self, spec: BatchSpec) -> Result<DistributedBatchStatus> {
        let inbox = self.directory.reply_inbox("batch");
        let mut sub = self.fabric.subscribe(&inbox).await?;
        let request_id = uuid::Uuid::new_v4().to_string();

        for replica in &self.replicas {
            let msg = ArchiveMessage::BatchRequest {
                version: PROTOCOL_VERSION,
                request_id: request_id.clone(),
                reply_to: inbox.name().to_string(),
                spec: spec.clone(),
            };
            publish_message(
                self.fabric.as_ref(),
                &self.directory.any_node(&replica.id),
                &msg,
            )
            .await?;
        }

        let mut replies: HashMap<ReplicaId, ReplicaBatchResult> = HashMap::new();
        let deadline = Instant::now() + self.settings.reply_timeout;
        while replies.len() < self.replicas.len() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
            else {
                break;
            };
            let payload = match tokio::time::timeout(remaining, sub.next()).await {
                Ok(Some(payload)) => payload,
                Ok(None) | Err(_) => break,
            };
            match ArchiveMessage::from_bytes(&payload) {
                Ok(ArchiveMessage::BatchReply {
                    request_id: reply_request,
                    replica,
                    processed,
                    failures,
                    output,
                    cancelled,
                    error,
                    ..
                }) if reply_request == request_id => {
                    replies.insert(
                        replica.clone(),
                        ReplicaBatchResult {
                            replica,
                            processed,
                            failures,
                            output,
                            cancelled,
                            error,
                        },
                    );
                }
                Ok(_) => debug!("Ignoring unrelated message on batch inbox"),
                Err(e) => warn!("Undecodable batch reply: {}", e),
            }
        }

        let mut status = DistributedBatchStatus {
            processed: 0,
            failures: Vec::new(),
            output: Vec::new(),
            per_replica: Vec::new(),
        };
        for replica in &self.replicas {
            let result = replies.remove(&replica.id).unwrap_or_else(|| {
                warn!(
                    "Replica {} did not answer batch within {:?}",
                    replica.id, self.settings.reply_timeout
                );
                ReplicaBatchResult {
                    replica: replica.id.clone(),
                    processed: 0,
                    failures: Vec::new(),
                    output: Vec::new(),
                    cancelled: false,
                    error: Some(
                        ArchiveError::Timeout {
                            channel: self.directory.any_node(&replica.id).to_string(),
                        }
                        .to_string(),
                    ),
                }
            });
            status.processed += result.processed;
            status.failures.extend(result.failures.iter().cloned());
            status.output.extend_from_slice(&result.output);
            status.per_replica.push(result);
        }
        Ok(status)
    }

    /// Push a checksum-batch report from `source` into the checksum
    /// archive replica and await its ingest acknowledgement.
    pub async fn ingest_checksum_report(
        &self,
        archive: &ReplicaId,
        source: &ReplicaId,
        report: &[u8],
    ) -> Result<(usize, usize)> {
        let inbox = self.directory.reply_inbox("ingest");
        let msg = ArchiveMessage::ChecksumReport {
            version: PROTOCOL_VERSION,
            request_id: uuid::Uuid::new_v4().to_string(),
            reply_to: inbox.name().to_string(),
            source: source.clone(),
            report: report.to_vec(),
        };
        let reply = request(
            self.fabric.as_ref(),
            &self.directory.any_node(archive),
            &inbox,
            &msg,
            self.settings.reply_timeout,
        )
        .await?;
        match reply {
            ArchiveMessage::ChecksumReportAck {
                added,
                diverged,
                error: None,
                ..
            } => Ok((added, diverged)),
            ArchiveMessage::ChecksumReportAck { error, .. } => Err(ArchiveError::Internal(
                format!(
                    "checksum ingest on {archive} failed: {}",
                    error.unwrap_or_default()
                ),
            )),
            other => Err(ArchiveError::Protocol(format!(
                "unexpected reply to checksum ingest: {:?}",
                other.request_id()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelDirectory;
    use crate::fabric::MemoryFabric;
    use crate::freespace::MockFreeSpaceProvider;
    use crate::node::{NodeService, ReplicaBackend};
    use crate::storage::{StorageNode, StorageNodeConfig};

    struct Cluster {
        _dir: tempfile::TempDir,
        fabric: MemoryFabric,
        directory: ChannelDirectory,
        nodes: HashMap<String, Arc<StorageNode>>,
    }

    /// Start node services for `running`, while `configured` names the
    /// replica topology the coordinator believes in.
    async fn cluster(running: &[&str]) -> Cluster {
        let dir = tempfile::tempdir().unwrap();
        let fabric = MemoryFabric::new();
        let directory = ChannelDirectory::new("TEST", "").unwrap();
        let mut nodes = HashMap::new();
        for id in running {
            let node = Arc::new(
                StorageNode::open(
                    StorageNodeConfig {
                        roots: vec![dir.path().join(id).join("root0")],
                        min_space_left: 0,
                        ledger_path: dir.path().join(id).join("ledger"),
                    },
                    Arc::new(MockFreeSpaceProvider::default()),
                )
                .unwrap(),
            );
            nodes.insert(id.to_string(), Arc::clone(&node));
            let service = Arc::new(NodeService::new(
                Arc::new(fabric.clone()),
                directory.clone(),
                ReplicaId::new(*id),
                format!("{id}-node"),
                ReplicaBackend::Full(node),
            ));
            tokio::spawn(async move {
                let _ = service.run().await;
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Cluster {
            _dir: dir,
            fabric,
            directory,
            nodes,
        }
    }

    fn coordinator(
        cluster: &Cluster,
        configured: &[&str],
        settings: CoordinatorSettings,
    ) -> RepositoryCoordinator {
        let replicas = configured
            .iter()
            .map(|id| ReplicaSpec {
                id: ReplicaId::new(*id),
                kind: ReplicaKind::FullContent,
            })
            .collect();
        RepositoryCoordinator::new(
            Arc::new(cluster.fabric.clone()),
            cluster.directory.clone(),
            replicas,
            settings,
        )
        .unwrap()
    }

    fn fast_settings(quorum: usize, retries: u32) -> CoordinatorSettings {
        CoordinatorSettings {
            quorum,
            store_retries: retries,
            reply_timeout: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn test_store_reaches_all_replicas() {
        let cluster = cluster(&["A", "B", "C"]).await;
        let coordinator = coordinator(&cluster, &["A", "B", "C"], fast_settings(0, 1));

        let report = coordinator.store("f.warc", b"payload").await.unwrap();
        assert_eq!(report.outcome, StoreOutcome::Completed);
        assert!(report.failed_replicas().is_empty());

        for node in cluster.nodes.values() {
            assert_eq!(node.retrieve("f.warc").unwrap(), b"payload");
        }
    }

    #[tokio::test]
    async fn test_quorum_met_with_one_replica_down() {
        // C is configured but not running: its queue never answers.
        let cluster = cluster(&["A", "B"]).await;
        let coordinator = coordinator(&cluster, &["A", "B", "C"], fast_settings(2, 1));

        let report = coordinator.store("f.warc", b"payload").await.unwrap();
        assert_eq!(report.outcome, StoreOutcome::Completed);

        let failed = report.failed_replicas();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].replica.as_str(), "C");
        assert!(failed[0].error.as_deref().unwrap().contains("Timed out"));
        // The down replica was retried, the healthy ones were not.
        assert_eq!(failed[0].attempts, 2);
        assert!(report
            .replicas
            .iter()
            .filter(|r| r.state == UploadState::Completed)
            .all(|r| r.attempts == 1));
    }

    #[tokio::test]
    async fn test_quorum_missed_names_failed_replicas() {
        let cluster = cluster(&["A"]).await;
        let coordinator = coordinator(&cluster, &["A", "B", "C"], fast_settings(2, 1));

        let report = coordinator.store("f.warc", b"payload").await.unwrap();
        assert_eq!(report.outcome, StoreOutcome::Failed);

        let mut failed: Vec<&str> = report
            .failed_replicas()
            .iter()
            .map(|r| r.replica.as_str())
            .collect();
        failed.sort();
        assert_eq!(failed, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_retrieve_routes_to_holding_replica() {
        let cluster = cluster(&["A", "B"]).await;
        let coordinator = coordinator(&cluster, &["A", "B"], fast_settings(0, 0));

        // Only replica B holds the file.
        cluster.nodes["B"].store("only-b.warc", b"data").await.unwrap();

        let content = coordinator.retrieve("only-b.warc", None).await.unwrap();
        assert_eq!(content, b"data");

        // Preferred replica wins when it can serve.
        let preferred = ReplicaId::new("B");
        let content = coordinator
            .retrieve("only-b.warc", Some(&preferred))
            .await
            .unwrap();
        assert_eq!(content, b"data");

        assert!(matches!(
            coordinator.retrieve("nowhere.warc", None).await.unwrap_err(),
            ArchiveError::UnknownFile(_)
        ));
    }

    #[tokio::test]
    async fn test_remove_is_checksum_gated() {
        let cluster = cluster(&["A"]).await;
        let coordinator = coordinator(&cluster, &["A"], fast_settings(0, 0));
        let report = coordinator.store("f.warc", b"precious").await.unwrap();

        let replica = ReplicaId::new("A");
        assert!(coordinator
            .remove("f.warc", &replica, "wrong")
            .await
            .is_err());
        assert!(cluster.nodes["A"].retrieve("f.warc").is_ok());

        let size = coordinator
            .remove("f.warc", &replica, &report.checksum)
            .await
            .unwrap();
        assert_eq!(size, 8);
        assert!(cluster.nodes["A"].retrieve("f.warc").is_err());
    }

    #[tokio::test]
    async fn test_distributed_batch_merges_in_replica_order() {
        let cluster = cluster(&["A", "B"]).await;
        let coordinator = coordinator(&cluster, &["A", "B"], fast_settings(0, 0));
        cluster.nodes["A"].store("a.warc", b"aa").await.unwrap();
        cluster.nodes["B"].store("b.warc", b"bb").await.unwrap();

        let status = coordinator
            .run_distributed_batch(BatchSpec::FileList { filter: None })
            .await
            .unwrap();

        assert_eq!(status.processed, 2);
        assert!(status.failures.is_empty());
        assert_eq!(status.per_replica.len(), 2);
        assert_eq!(status.per_replica[0].replica.as_str(), "A");
        assert_eq!(status.per_replica[1].replica.as_str(), "B");
        let merged = String::from_utf8(status.output).unwrap();
        assert_eq!(merged, "a.warc\nb.warc\n");
    }

    #[tokio::test]
    async fn test_distributed_batch_reports_silent_replica() {
        let cluster = cluster(&["A"]).await;
        let coordinator = coordinator(&cluster, &["A", "B"], fast_settings(0, 0));

        let status = coordinator
            .run_distributed_batch(BatchSpec::FileList { filter: None })
            .await
            .unwrap();
        let silent = &status.per_replica[1];
        assert_eq!(silent.replica.as_str(), "B");
        assert!(silent.error.as_deref().unwrap().contains("Timed out"));
    }
}
