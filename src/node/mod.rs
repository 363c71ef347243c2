//! Replica node service: the fabric-facing side of one replica instance.
//!
//! Subscribes the replica's shared work queue and its own unicast queue,
//! decodes each inbound message at the boundary and dispatches it to the
//! backend in an independent task, so a slow batch on this node never
//! blocks store or retrieve traffic.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::batch::jobs::job_for_spec;
use crate::batch::CancelToken;
use crate::channels::{ChannelAddress, ChannelDirectory};
use crate::checksum::ChecksumArchive;
use crate::fabric::messages::{ArchiveMessage, BatchFailure, StoreOutcome, PROTOCOL_VERSION};
use crate::fabric::{publish_message, MessageFabric};
use crate::storage::StorageNode;
use crate::types::{ArchiveError, ReplicaId, Result};

/// What this replica instance holds.
pub enum ReplicaBackend {
    /// Full-content replica backed by a storage node.
    Full(Arc<StorageNode>),
    /// Checksum-only replica: integrity witness without content.
    ChecksumOnly(Arc<ChecksumArchive>),
}

/// One replica daemon's message loop.
pub struct NodeService {
    fabric: Arc<dyn MessageFabric>,
    directory: ChannelDirectory,
    replica: ReplicaId,
    node_id: String,
    backend: Arc<ReplicaBackend>,
    /// Cancellation tokens of in-flight batches, by request id.
    running_batches: Arc<DashMap<String, CancelToken>>,
}

impl NodeService {
    pub fn new(
        fabric: Arc<dyn MessageFabric>,
        directory: ChannelDirectory,
        replica: ReplicaId,
        node_id: String,
        backend: ReplicaBackend,
    ) -> Self {
        Self {
            fabric,
            directory,
            replica,
            node_id,
            backend: Arc::new(backend),
            running_batches: Arc::new(DashMap::new()),
        }
    }

    /// Serve until the fabric drops the subscriptions. Announces readiness
    /// on the status topic first.
    pub async fn run(&self) -> Result<()> {
        let shared = self.directory.any_node(&self.replica);
        let unicast = self.directory.this_node(&self.replica, &self.node_id);
        let mut shared_sub = self.fabric.subscribe(&shared).await?;
        let mut unicast_sub = self.fabric.subscribe(&unicast).await?;
        info!(
            "Replica {} node {} listening on {} and {}",
            self.replica, self.node_id, shared, unicast
        );

        self.announce("ready").await;

        loop {
            let payload = tokio::select! {
                p = shared_sub.next() => p,
                p = unicast_sub.next() => p,
            };
            let Some(payload) = payload else {
                warn!("Replica {} node {} subscriptions closed", self.replica, self.node_id);
                return Ok(());
            };

            let fabric = Arc::clone(&self.fabric);
            let backend = Arc::clone(&self.backend);
            let replica = self.replica.clone();
            let batches = Arc::clone(&self.running_batches);
            tokio::spawn(async move {
                match ArchiveMessage::from_bytes(&payload) {
                    Ok(msg) => handle_message(fabric, backend, replica, batches, msg).await,
                    Err(e) => error!("Dropping undecodable message: {}", e),
                }
            });
        }
    }

    /// Cooperatively cancel every in-flight batch (between files).
    pub fn cancel_batches(&self) {
        for entry in self.running_batches.iter() {
            entry.value().cancel();
        }
    }

    async fn announce(&self, state: &str) {
        let status = ArchiveMessage::NodeStatus {
            version: PROTOCOL_VERSION,
            replica: self.replica.clone(),
            node_id: self.node_id.clone(),
            state: state.to_string(),
            roots: match self.backend.as_ref() {
                ReplicaBackend::Full(node) => node.roots().len(),
                ReplicaBackend::ChecksumOnly(_) => 0,
            },
            timestamp: Utc::now(),
        };
        if let Err(e) = publish_message(
            self.fabric.as_ref(),
            &self.directory.node_status(),
            &status,
        )
        .await
        {
            warn!("Failed to announce node status: {}", e);
        }
    }
}

async fn handle_message(
    fabric: Arc<dyn MessageFabric>,
    backend: Arc<ReplicaBackend>,
    replica: ReplicaId,
    batches: Arc<DashMap<String, CancelToken>>,
    msg: ArchiveMessage,
) {
    let reply = match msg {
        ArchiveMessage::StoreRequest {
            request_id,
            reply_to,
            filename,
            content,
            checksum,
            ..
        } => {
            let outcome = match backend.as_ref() {
                ReplicaBackend::Full(node) => {
                    store_file(node, &filename, &content, &checksum).await
                }
                ReplicaBackend::ChecksumOnly(_) => Err(ArchiveError::Protocol(
                    "checksum-only replica cannot store content".to_string(),
                )),
            };
            let (outcome, error) = match outcome {
                Ok(()) => (StoreOutcome::Completed, None),
                Err(e) => {
                    warn!("Store of {} on {} failed: {}", filename, replica, e);
                    (StoreOutcome::Failed, Some(e.to_string()))
                }
            };
            Some((
                reply_to,
                ArchiveMessage::StoreAck {
                    version: PROTOCOL_VERSION,
                    request_id,
                    filename,
                    replica,
                    outcome,
                    error,
                },
            ))
        }

        ArchiveMessage::RetrieveRequest {
            request_id,
            reply_to,
            filename,
            ..
        } => {
            let result = match backend.as_ref() {
                ReplicaBackend::Full(node) => node
                    .retrieve(&filename)
                    .and_then(|content| {
                        let checksum = node.checksum(&filename)?;
                        Ok((content, checksum))
                    }),
                ReplicaBackend::ChecksumOnly(_) => Err(ArchiveError::Protocol(
                    "checksum-only replica cannot serve content".to_string(),
                )),
            };
            let (content, checksum, error) = match result {
                Ok((content, checksum)) => (Some(content), Some(checksum), None),
                Err(e) => (None, None, Some(e.to_string())),
            };
            Some((
                reply_to,
                ArchiveMessage::RetrieveReply {
                    version: PROTOCOL_VERSION,
                    request_id,
                    filename,
                    replica,
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
            ..
        } => {
            let result = match backend.as_ref() {
                ReplicaBackend::Full(node) => node.remove(&filename, &checksum).await,
                ReplicaBackend::ChecksumOnly(_) => Err(ArchiveError::Protocol(
                    "checksum-only replica holds no content to remove".to_string(),
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
                    replica,
                    removed,
                    size,
                    error,
                },
            ))
        }

        ArchiveMessage::ChecksumRequest {
            request_id,
            reply_to,
            filename,
            ..
        } => {
            let result = match backend.as_ref() {
                ReplicaBackend::Full(node) => node.checksum(&filename),
                ReplicaBackend::ChecksumOnly(archive) => archive.report_checksum(&filename),
            };
            let (checksum, error) = match result {
                Ok(checksum) => (Some(checksum), None),
                Err(e) => (None, Some(e.to_string())),
            };
            Some((
                reply_to,
                ArchiveMessage::ChecksumReply {
                    version: PROTOCOL_VERSION,
                    request_id,
                    filename,
                    replica,
                    checksum,
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
            debug!("Running {} batch {} on {}", spec.operation(), request_id, replica);
            let reply = match backend.as_ref() {
                ReplicaBackend::Full(node) => {
                    let cancel = CancelToken::new();
                    batches.insert(request_id.clone(), cancel.clone());
                    let node = Arc::clone(node);
                    let job_spec = spec.clone();
                    let joined = tokio::task::spawn_blocking(move || {
                        let mut job = job_for_spec(&job_spec);
                        node.run_batch(job.as_mut(), &[], &cancel)
                    })
                    .await;
                    batches.remove(&request_id);
                    match joined {
                        Ok(Ok(status)) => ArchiveMessage::BatchReply {
                            version: PROTOCOL_VERSION,
                            request_id,
                            replica,
                            processed: status.processed,
                            failures: status.failures,
                            output: status.output,
                            cancelled: status.cancelled,
                            error: None,
                        },
                        Ok(Err(e)) => batch_error_reply(request_id, replica, e.to_string()),
                        Err(e) => batch_error_reply(request_id, replica, e.to_string()),
                    }
                }
                // A checksum-only replica answers from its ledger: checksum
                // and listing batches need no content.
                ReplicaBackend::ChecksumOnly(archive) => match archive_batch(archive, &spec) {
                    Ok((processed, output)) => ArchiveMessage::BatchReply {
                        version: PROTOCOL_VERSION,
                        request_id,
                        replica,
                        processed,
                        failures: Vec::new(),
                        output,
                        cancelled: false,
                        error: None,
                    },
                    Err(e) => batch_error_reply(request_id, replica, e.to_string()),
                },
            };
            Some((reply_to, reply))
        }

        ArchiveMessage::ChecksumReport {
            request_id,
            reply_to,
            source,
            report,
            ..
        } => {
            let result = match backend.as_ref() {
                ReplicaBackend::ChecksumOnly(archive) => {
                    String::from_utf8(report)
                        .map_err(|e| ArchiveError::Protocol(format!("report not UTF-8: {e}")))
                        .and_then(|text| archive.ingest_report(&source, &text))
                }
                ReplicaBackend::Full(_) => Err(ArchiveError::Protocol(
                    "full-content replica does not ingest checksum reports".to_string(),
                )),
            };
            let (added, diverged, error) = match result {
                Ok((added, diverged)) => (added, diverged, None),
                Err(e) => (0, 0, Some(e.to_string())),
            };
            Some((
                reply_to,
                ArchiveMessage::ChecksumReportAck {
                    version: PROTOCOL_VERSION,
                    request_id,
                    replica,
                    added,
                    diverged,
                    error,
                },
            ))
        }

        // Replies and broadcasts are not addressed to node queues.
        other => {
            debug!("Ignoring {:?} on node queue", other.request_id());
            None
        }
    };

    if let Some((reply_to, message)) = reply {
        let addr = ChannelAddress::queue(reply_to);
        if let Err(e) = publish_message(fabric.as_ref(), &addr, &message).await {
            error!("Failed to publish reply to {}: {}", addr, e);
        }
    }
}

async fn store_file(
    node: &Arc<StorageNode>,
    filename: &str,
    content: &[u8],
    declared_checksum: &str,
) -> Result<()> {
    let stored = node.store(filename, content).await?;
    // The sender declared what it meant to store; a transport-mangled
    // payload must not be acknowledged.
    if stored.checksum != declared_checksum {
        return Err(ArchiveError::ChecksumMismatch {
            filename: filename.to_string(),
            expected: declared_checksum.to_string(),
            actual: stored.checksum,
        });
    }
    Ok(())
}

fn archive_batch(
    archive: &Arc<ChecksumArchive>,
    spec: &crate::fabric::messages::BatchSpec,
) -> Result<(usize, Vec<u8>)> {
    use crate::fabric::messages::BatchSpec;
    match spec {
        BatchSpec::Checksum { filter } => {
            let mut out = String::new();
            let mut count = 0usize;
            for (filename, checksum) in archive.entries()? {
                if filter.as_deref().map_or(true, |f| filename.contains(f)) {
                    out.push_str(&filename);
                    out.push_str(crate::batch::jobs::CHECKSUM_SEPARATOR);
                    out.push_str(&checksum);
                    out.push('\n');
                    count += 1;
                }
            }
            Ok((count, out.into_bytes()))
        }
        BatchSpec::FileList { filter } => {
            let mut out = String::new();
            let mut count = 0usize;
            for (filename, _) in archive.entries()? {
                if filter.as_deref().map_or(true, |f| filename.contains(f)) {
                    out.push_str(&filename);
                    out.push('\n');
                    count += 1;
                }
            }
            Ok((count, out.into_bytes()))
        }
        BatchSpec::Size { .. } => Err(ArchiveError::Protocol(
            "checksum-only replica records no sizes".to_string(),
        )),
    }
}

fn batch_error_reply(request_id: String, replica: ReplicaId, error: String) -> ArchiveMessage {
    ArchiveMessage::BatchReply {
        version: PROTOCOL_VERSION,
        request_id,
        replica,
        processed: 0,
        failures: Vec::<BatchFailure>::new(),
        output: Vec::new(),
        cancelled: false,
        error: Some(error),
    }
}
