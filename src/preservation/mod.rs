//! Preservation reconciler: cross-replica integrity audit.
//!
//! Gathers every replica's checksum inventory through a distributed batch,
//! feeds the admitted files to the checksum archive, cross-joins per
//! filename and classifies each (filename, replica) pair. Detection never
//! touches content: corrective actions are queued for explicit
//! confirmation, and deletion is deliberately never performed here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::batch::jobs::{ChecksumJob, CHECKSUM_SEPARATOR};
use crate::coordinator::RepositoryCoordinator;
use crate::fabric::messages::BatchSpec;
use crate::logging;
use crate::types::{ReplicaId, ReplicaKind, Result, UploadState};

/// Per (filename, replica) integrity classification. Recomputed on every
/// run, never stored as primary truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreservationState {
    Ok,
    Missing,
    Corrupt,
    /// Present without any admin record; queued for manual review.
    Duplicate,
    /// The replica could not be asked.
    UnknownIfPresent,
}

/// Corrective work queued by a run. Never auto-executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CorrectiveAction {
    /// Re-upload a missing file from a healthy replica.
    Reupload {
        filename: String,
        from: ReplicaId,
        to: ReplicaId,
    },
    /// Quarantine a corrupt copy pending manual inspection.
    Quarantine { filename: String, replica: ReplicaId },
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreservationReport {
    pub generated_at: DateTime<Utc>,
    /// filename -> replica -> state, for every full-content replica.
    pub files: BTreeMap<String, BTreeMap<ReplicaId, PreservationState>>,
    pub actions: Vec<CorrectiveAction>,
}

impl PreservationReport {
    pub fn state_of(&self, filename: &str, replica: &ReplicaId) -> Option<PreservationState> {
        self.files
            .get(filename)
            .and_then(|r| r.get(replica))
            .copied()
    }

    /// Count of (filename, replica) pairs in a given state.
    pub fn count(&self, state: PreservationState) -> usize {
        self.files
            .values()
            .flat_map(|replicas| replicas.values())
            .filter(|s| **s == state)
            .count()
    }
}

/// Drives reconciliation runs through the coordinator.
pub struct PreservationReconciler {
    coordinator: Arc<RepositoryCoordinator>,
}

impl PreservationReconciler {
    pub fn new(coordinator: Arc<RepositoryCoordinator>) -> Self {
        Self { coordinator }
    }

    /// One full audit: inventory every replica, grow the witness, classify.
    pub async fn run(&self) -> Result<PreservationReport> {
        info!("Reconciliation run starting");
        let status = self
            .coordinator
            .run_distributed_batch(BatchSpec::Checksum { filter: None })
            .await?;

        let kinds: HashMap<ReplicaId, ReplicaKind> = self
            .coordinator
            .replicas()
            .iter()
            .map(|r| (r.id.clone(), r.kind))
            .collect();

        // Split replies: full-content inventories vs the checksum archive
        // witness. Full replicas that answered with an engine error or not
        // at all classify as UnknownIfPresent.
        let mut inventories: HashMap<ReplicaId, HashMap<String, String>> = HashMap::new();
        let mut unreachable: HashSet<ReplicaId> = HashSet::new();
        let mut witness: HashMap<String, String> = HashMap::new();
        let mut witness_known: HashSet<String> = HashSet::new();
        let mut archive_replica: Option<ReplicaId> = None;

        for result in &status.per_replica {
            let kind = kinds[&result.replica];
            if result.error.is_some() {
                warn!(
                    "Replica {} unavailable for reconciliation: {}",
                    result.replica,
                    result.error.as_deref().unwrap_or_default()
                );
                if kind == ReplicaKind::FullContent {
                    unreachable.insert(result.replica.clone());
                }
                continue;
            }
            let text = String::from_utf8_lossy(&result.output);
            let entries = ChecksumJob::parse_report(&text)?;
            match kind {
                ReplicaKind::FullContent => {
                    inventories.insert(result.replica.clone(), entries.into_iter().collect());
                }
                ReplicaKind::ChecksumOnly => {
                    archive_replica = Some(result.replica.clone());
                    for (filename, checksum) in entries {
                        witness_known.insert(filename.clone());
                        witness.entry(filename).or_insert(checksum);
                    }
                }
            }
        }

        // Files the archive admits: already witnessed, or stored through
        // the coordinator. Anything else on disk is a duplicate candidate
        // and must not contaminate the witness.
        let mut admitted: HashSet<String> = witness_known.clone();
        for inventory in inventories.values() {
            for filename in inventory.keys() {
                if admitted.contains(filename) {
                    continue;
                }
                let recorded = self.coordinator.upload_record(filename).is_some_and(|record| {
                    record.values().any(|s| *s == UploadState::Completed)
                });
                if recorded {
                    admitted.insert(filename.clone());
                }
            }
        }

        // Feed the witness before classifying: its first-recorded value is
        // the authority for corruption calls. Merging locally with the
        // same first-wins rule mirrors what the archive itself keeps.
        if let Some(archive) = &archive_replica {
            for replica in self.full_replica_order() {
                let Some(inventory) = inventories.get(&replica) else {
                    continue;
                };
                let mut report = String::new();
                for (filename, checksum) in inventory {
                    if !admitted.contains(filename) {
                        continue;
                    }
                    report.push_str(filename);
                    report.push_str(CHECKSUM_SEPARATOR);
                    report.push_str(checksum);
                    report.push('\n');
                }
                if report.is_empty() {
                    continue;
                }
                match self
                    .coordinator
                    .ingest_checksum_report(archive, &replica, report.as_bytes())
                    .await
                {
                    Ok((added, diverged)) => {
                        if added > 0 || diverged > 0 {
                            info!(
                                "Witness ingest from {}: {} new, {} diverging",
                                replica, added, diverged
                            );
                        }
                    }
                    Err(e) => warn!("Witness ingest from {} failed: {}", replica, e),
                }
                for (filename, checksum) in inventory {
                    if admitted.contains(filename) {
                        witness
                            .entry(filename.clone())
                            .or_insert_with(|| checksum.clone());
                    }
                }
            }
        }

        let report = self.classify(&inventories, &unreachable, &witness, &admitted);
        info!(
            "Reconciliation done: {} file(s), {} ok, {} missing, {} corrupt, {} duplicate, {} unknown, {} action(s) queued",
            report.files.len(),
            report.count(PreservationState::Ok),
            report.count(PreservationState::Missing),
            report.count(PreservationState::Corrupt),
            report.count(PreservationState::Duplicate),
            report.count(PreservationState::UnknownIfPresent),
            report.actions.len()
        );
        Ok(report)
    }

    fn full_replica_order(&self) -> Vec<ReplicaId> {
        self.coordinator
            .replicas()
            .iter()
            .filter(|r| r.kind == ReplicaKind::FullContent)
            .map(|r| r.id.clone())
            .collect()
    }

    fn classify(
        &self,
        inventories: &HashMap<ReplicaId, HashMap<String, String>>,
        unreachable: &HashSet<ReplicaId>,
        witness: &HashMap<String, String>,
        admitted: &HashSet<String>,
    ) -> PreservationReport {
        let full_replicas = self.full_replica_order();

        let mut filenames: HashSet<String> = witness.keys().cloned().collect();
        for inventory in inventories.values() {
            filenames.extend(inventory.keys().cloned());
        }

        let mut files: BTreeMap<String, BTreeMap<ReplicaId, PreservationState>> = BTreeMap::new();
        let mut actions = Vec::new();

        for filename in filenames {
            let mut states: BTreeMap<ReplicaId, PreservationState> = BTreeMap::new();
            let authoritative = witness.get(&filename);
            let has_admin_record = admitted.contains(&filename);

            let present: Vec<&String> = full_replicas
                .iter()
                .filter_map(|id| inventories.get(id).and_then(|inv| inv.get(&filename)))
                .collect();
            let checksums_agree = present.windows(2).all(|pair| pair[0] == pair[1]);

            for replica in &full_replicas {
                let state = if unreachable.contains(replica) {
                    PreservationState::UnknownIfPresent
                } else {
                    match inventories.get(replica).and_then(|inv| inv.get(&filename)) {
                        None if has_admin_record => PreservationState::Missing,
                        // Neither held nor expected here: nothing to say.
                        None => continue,
                        Some(_) if !has_admin_record => PreservationState::Duplicate,
                        Some(checksum) => match authoritative {
                            Some(expected) if checksum == expected => PreservationState::Ok,
                            Some(_) => PreservationState::Corrupt,
                            // No witness value: agreement is the only
                            // signal; any divergence flags all copies.
                            None if checksums_agree => PreservationState::Ok,
                            None => PreservationState::Corrupt,
                        },
                    }
                };
                states.insert(replica.clone(), state);
            }

            let healthy: Option<ReplicaId> = states
                .iter()
                .find(|(_, s)| **s == PreservationState::Ok)
                .map(|(id, _)| id.clone());
            for (replica, state) in &states {
                match state {
                    PreservationState::Missing => {
                        if let Some(source) = &healthy {
                            logging::audit_corrective_action(
                                &filename,
                                replica.as_str(),
                                "reupload",
                            );
                            actions.push(CorrectiveAction::Reupload {
                                filename: filename.clone(),
                                from: source.clone(),
                                to: replica.clone(),
                            });
                        }
                    }
                    PreservationState::Corrupt => {
                        logging::audit_corrective_action(
                            &filename,
                            replica.as_str(),
                            "quarantine",
                        );
                        actions.push(CorrectiveAction::Quarantine {
                            filename: filename.clone(),
                            replica: replica.clone(),
                        });
                    }
                    _ => {}
                }
            }

            files.insert(filename, states);
        }

        PreservationReport {
            generated_at: Utc::now(),
            files,
            actions,
        }
    }
}
