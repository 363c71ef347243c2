//! Checksum archive: a replica that stores only {filename, checksum}
//! pairs, never content. A cheap integrity witness for the reconciler.
//!
//! Entries enter only through checksum-batch reports produced by
//! full-content replicas; the archive never trusts a bare claim, and the
//! first-recorded checksum for a filename is never overwritten by a later
//! diverging report.

use std::path::Path;
use tracing::{info, warn};

use crate::batch::jobs::{ChecksumJob, CHECKSUM_SEPARATOR};
use crate::types::{ArchiveError, ReplicaId, Result};

/// Sled-backed filename -> checksum witness store.
pub struct ChecksumArchive {
    db: sled::Db,
}

impl ChecksumArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// The recorded checksum for a filename.
    pub fn report_checksum(&self, filename: &str) -> Result<String> {
        match self.db.get(filename.as_bytes())? {
            Some(raw) => Ok(String::from_utf8_lossy(&raw).into_owned()),
            None => Err(ArchiveError::UnknownFile(filename.to_string())),
        }
    }

    /// Whether the given checksum matches the recorded one. Used instead
    /// of content comparison - content is not locally available here.
    pub fn verify(&self, filename: &str, checksum: &str) -> Result<bool> {
        match self.db.get(filename.as_bytes())? {
            Some(raw) => Ok(raw.as_ref() == checksum.as_bytes()),
            None => Ok(false),
        }
    }

    /// Ingest a checksum-batch report from a full-content replica.
    ///
    /// New filenames are recorded; matching re-reports are no-ops; a
    /// diverging re-report keeps the first-recorded value and is counted,
    /// feeding the reconciler's corruption classification. Returns
    /// (new entries, divergences seen).
    pub fn ingest_report(&self, source: &ReplicaId, report: &str) -> Result<(usize, usize)> {
        let entries = ChecksumJob::parse_report(report)?;
        let mut added = 0usize;
        let mut diverged = 0usize;
        for (filename, checksum) in entries {
            match self.db.get(filename.as_bytes())? {
                None => {
                    self.db.insert(filename.as_bytes(), checksum.as_bytes())?;
                    added += 1;
                }
                Some(existing) if existing.as_ref() == checksum.as_bytes() => {}
                Some(existing) => {
                    diverged += 1;
                    warn!(
                        "Replica {} reports {} as {} but first-recorded checksum is {}",
                        source,
                        filename,
                        checksum,
                        String::from_utf8_lossy(&existing)
                    );
                }
            }
        }
        self.db.flush()?;
        info!(
            "Ingested checksum report from {}: {} new, {} diverging",
            source, added, diverged
        );
        Ok((added, diverged))
    }

    /// All recorded entries, in filename order.
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let mut entries = Vec::new();
        for item in self.db.iter() {
            let (key, value) = item?;
            entries.push((
                String::from_utf8_lossy(&key).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }
        Ok(entries)
    }

    /// Render the whole archive as a checksum report, the same format the
    /// checksum batch job emits. This is how a checksum-only replica
    /// answers a distributed checksum batch without holding any content.
    pub fn render_report(&self) -> Result<String> {
        let mut out = String::new();
        for (filename, checksum) in self.entries()? {
            out.push_str(&filename);
            out.push_str(CHECKSUM_SEPARATOR);
            out.push_str(&checksum);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}
