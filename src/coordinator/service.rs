//! Fabric-facing side of the coordinator daemon.
//!
//! External collaborators (the harvest pipeline, the admin surface) reach
//! the archive on the coordinator's common entry queue; each inbound
//! request is served in its own task against the repository coordinator.

use std::sync::Arc;
use tracing::{debug, error, info};

use super::RepositoryCoordinator;
use crate::channels::ChannelAddress;
use crate::fabric::messages::{ArchiveMessage, StoreOutcome, PROTOCOL_VERSION};
use crate::fabric::{publish_message, MessageFabric};
use crate::types::{ArchiveError, ReplicaId, Result};

/// Replica slot used in replies that speak for the archive as a whole
/// rather than for one replica.
fn common_replica() -> ReplicaId {
    ReplicaId::new(crate::channels::COMMON)
}

/// Serves client requests arriving on the coordinator entry queue.
pub struct CoordinatorService {
    fabric: Arc<dyn MessageFabric>,
    coordinator: Arc<RepositoryCoordinator>,
}

impl CoordinatorService {
    pub fn new(fabric: Arc<dyn MessageFabric>, coordinator: Arc<RepositoryCoordinator>) -> Self {
        Self {
            fabric,
            coordinator,
        }
    }

    /// Serve until the fabric drops the subscription.
    pub async fn run(&self) -> Result<()> {
        let entry = self.coordinator.directory().the_coordinator();
        let mut sub = self.fabric.subscribe(&entry).await?;
        info!("Coordinator serving on {}", entry);

        while let Some(payload) = sub.next().await {
            let fabric = Arc::clone(&self.fabric);
            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                match ArchiveMessage::from_bytes(&payload) {
                    Ok(msg) => handle_request(fabric, coordinator, msg).await,
                    Err(e) => error!("Dropping undecodable coordinator request: {}", e),
                }
            });
        }
        Ok(())
    }
}

async fn handle_request(
    fabric: Arc<dyn MessageFabric>,
    coordinator: Arc<RepositoryCoordinator>,
    msg: ArchiveMessage,
) {
    let reply = match msg {
        ArchiveMessage::StoreRequest {
            request_id,
            reply_to,
            filename,
            content,
            ..
        } => {
            let result = coordinator.store(&filename, &content).await;
            let ack = match result {
                Ok(report) => {
                    let error = match report.outcome {
                        StoreOutcome::Completed => None,
                        StoreOutcome::Failed => Some(format!(
                            "store failed on replica(s): {}",
                            report
                                .failed_replicas()
                                .iter()
                                .map(|r| {
                                    format!(
                                        "{} ({})",
                                        r.replica,
                                        r.error.as_deref().unwrap_or("no reason")
                                    )
                                })
                                .collect::<Vec<_>>()
                                .join(", ")
                        )),
                    };
                    ArchiveMessage::StoreAck {
                        version: PROTOCOL_VERSION,
                        request_id,
                        filename,
                        replica: common_replica(),
                        outcome: report.outcome,
                        error,
                    }
                }
                Err(e) => ArchiveMessage::StoreAck {
                    version: PROTOCOL_VERSION,
                    request_id,
                    filename,
                    replica: common_replica(),
                    outcome: StoreOutcome::Failed,
                    error: Some(e.to_string()),
                },
            };
            Some((reply_to, ack))
        }

        ArchiveMessage::RetrieveRequest {
            request_id,
            reply_to,
            filename,
            ..
        } => {
            let result = coordinator.retrieve(&filename, None).await;
            let (content, checksum, error) = match result {
                Ok(content) => {
                    let checksum = crate::batch::jobs::checksum_bytes(&content);
                    (Some(content), Some(checksum), None)
                }
                Err(e) => (None, None, Some(e.to_string())),
            };
            Some((
                reply_to,
                ArchiveMessage::RetrieveReply {
                    version: PROTOCOL_VERSION,
                    request_id,
                    filename,
                    replica: common_replica(),
                    content,
                    checksum,
                    error,
                },
            ))
        }

        ArchiveMessage::RemoveRequest {
            request_id,
            reply_to,
            filename,
            checksum,
            replica,
            ..
        } => {
            let result = match replica {
                Some(target) => coordinator.remove(&filename, &target, &checksum).await,
                None => Err(ArchiveError::Protocol(
                    "removal via the coordinator must name a replica".to_string(),
                )),
            };
            let (removed, size, error) = match result {
                Ok(size) => (true, Some(size), None),
                Err(e) => (false, None, Some(e.to_string())),
            };
            Some((
                reply_to,
                ArchiveMessage::RemoveReply {
                    version: PROTOCOL_VERSION,
                    request_id,
                    filename,
                    replica: common_replica(),
                    removed,
                    size,
                    error,
                },
            ))
        }

        ArchiveMessage::BatchRequest {
            request_id,
            reply_to,
            spec,
            ..
        } => {
            let reply = match coordinator.run_distributed_batch(spec).await {
                Ok(status) => ArchiveMessage::BatchReply {
                    version: PROTOCOL_VERSION,
                    request_id,
                    replica: common_replica(),
                    processed: status.processed,
                    failures: status.failures,
                    output: status.output,
                    cancelled: status.per_replica.iter().any(|r| r.cancelled),
                    error: None,
                },
                Err(e) => ArchiveMessage::BatchReply {
                    version: PROTOCOL_VERSION,
                    request_id,
                    replica: common_replica(),
                    processed: 0,
                    failures: Vec::new(),
                    output: Vec::new(),
                    cancelled: false,
                    error: Some(e.to_string()),
                },
            };
            Some((reply_to, reply))
        }

        other => {
            debug!(
                "Ignoring {:?} on the coordinator queue",
                other.request_id()
            );
            None
        }
    };

    if let Some((reply_to, message)) = reply {
        let addr = ChannelAddress::queue(reply_to);
        if let Err(e) = publish_message(fabric.as_ref(), &addr, &message).await {
            error!("Failed to publish coordinator reply to {}: {}", addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::jobs::checksum_bytes;
    use crate::channels::ChannelDirectory;
    use crate::coordinator::CoordinatorSettings;
    use crate::fabric::{request, MemoryFabric};
    use crate::freespace::MockFreeSpaceProvider;
    use crate::node::{NodeService, ReplicaBackend};
    use crate::storage::{StorageNode, StorageNodeConfig};
    use crate::types::{ReplicaKind, ReplicaSpec};
    use std::time::Duration;

    async fn archive_stack() -> (tempfile::TempDir, MemoryFabric, ChannelDirectory) {
        let dir = tempfile::tempdir().unwrap();
        let fabric = MemoryFabric::new();
        let directory = ChannelDirectory::new("TEST", "").unwrap();

        let node = Arc::new(
            StorageNode::open(
                StorageNodeConfig {
                    roots: vec![dir.path().join("A").join("root0")],
                    min_space_left: 0,
                    ledger_path: dir.path().join("A").join("ledger"),
                },
                Arc::new(MockFreeSpaceProvider::default()),
            )
            .unwrap(),
        );
        let node_service = Arc::new(NodeService::new(
            Arc::new(fabric.clone()),
            directory.clone(),
            ReplicaId::new("A"),
            "a-node".to_string(),
            ReplicaBackend::Full(node),
        ));
        tokio::spawn(async move {
            let _ = node_service.run().await;
        });

        let coordinator = Arc::new(
            RepositoryCoordinator::new(
                Arc::new(fabric.clone()),
                directory.clone(),
                vec![ReplicaSpec {
                    id: ReplicaId::new("A"),
                    kind: ReplicaKind::FullContent,
                }],
                CoordinatorSettings {
                    quorum: 0,
                    store_retries: 0,
                    reply_timeout: Duration::from_millis(300),
                },
            )
            .unwrap(),
        );
        let service = CoordinatorService::new(Arc::new(fabric.clone()), coordinator);
        tokio::spawn(async move {
            let _ = service.run().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        (dir, fabric, directory)
    }

    #[tokio::test]
    async fn test_client_store_then_retrieve_via_entry_queue() {
        let (_dir, fabric, directory) = archive_stack().await;
        let entry = directory.the_coordinator();

        let content = b"harvested page".to_vec();
        let inbox = directory.reply_inbox("client");
        let store = ArchiveMessage::StoreRequest {
            version: PROTOCOL_VERSION,
            request_id: "c1".to_string(),
            reply_to: inbox.name().to_string(),
            filename: "page.warc".to_string(),
            checksum: checksum_bytes(&content),
            content,
        };
        let ack = request(&fabric, &entry, &inbox, &store, Duration::from_secs(5))
            .await
            .unwrap();
        match ack {
            ArchiveMessage::StoreAck { outcome, .. } => {
                assert_eq!(outcome, StoreOutcome::Completed)
            }
            other => panic!("unexpected reply {other:?}"),
        }

        let inbox = directory.reply_inbox("client");
        let get = ArchiveMessage::RetrieveRequest {
            version: PROTOCOL_VERSION,
            request_id: "c2".to_string(),
            reply_to: inbox.name().to_string(),
            filename: "page.warc".to_string(),
        };
        let reply = request(&fabric, &entry, &inbox, &get, Duration::from_secs(5))
            .await
            .unwrap();
        match reply {
            ArchiveMessage::RetrieveReply { content, .. } => {
                assert_eq!(content.unwrap(), b"harvested page");
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_without_replica_is_refused() {
        let (_dir, fabric, directory) = archive_stack().await;
        let entry = directory.the_coordinator();

        let inbox = directory.reply_inbox("client");
        let remove = ArchiveMessage::RemoveRequest {
            version: PROTOCOL_VERSION,
            request_id: "c3".to_string(),
            reply_to: inbox.name().to_string(),
            filename: "page.warc".to_string(),
            checksum: "whatever".to_string(),
            replica: None,
        };
        let reply = request(&fabric, &entry, &inbox, &remove, Duration::from_secs(5))
            .await
            .unwrap();
        match reply {
            ArchiveMessage::RemoveReply { removed, error, .. } => {
                assert!(!removed);
                assert!(error.unwrap().contains("must name a replica"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
