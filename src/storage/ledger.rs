//! Admin ledger of one replica instance.
//!
//! One record per stored filename: checksum, size, owning root and upload
//! state. Backed by sled; supports point lookup and full enumeration. The
//! on-disk schema is internal to the storage component and not part of any
//! external contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{Result, UploadState};

/// One ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub filename: String,
    pub checksum: String,
    pub size: u64,
    /// Root directory holding the file.
    pub root: PathBuf,
    pub state: UploadState,
    pub updated_at: DateTime<Utc>,
}

/// Sled-backed filename -> record store.
pub struct Ledger {
    db: sled::Db,
}

impl Ledger {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn get(&self, filename: &str) -> Result<Option<LedgerEntry>> {
        match self.db.get(filename.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, entry: &LedgerEntry) -> Result<()> {
        let raw = serde_json::to_vec(entry)?;
        self.db.insert(entry.filename.as_bytes(), raw)?;
        self.db.flush()?;
        Ok(())
    }

    /// Remove a record. Part of the audited removal path only.
    pub fn remove(&self, filename: &str) -> Result<Option<LedgerEntry>> {
        let previous = match self.db.remove(filename.as_bytes())? {
            Some(raw) => Some(serde_json::from_slice(&raw)?),
            None => None,
        };
        self.db.flush()?;
        Ok(previous)
    }

    /// All records, in filename order.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();
        for item in self.db.iter() {
            let (_, raw) = item?;
            entries.push(serde_json::from_slice(&raw)?);
        }
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(filename: &str, state: UploadState) -> LedgerEntry {
        LedgerEntry {
            filename: filename.to_string(),
            checksum: "abc123".to_string(),
            size: 42,
            root: PathBuf::from("/archive/dir1"),
            state,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_point_lookup_and_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&dir.path().join("ledger")).unwrap();

        ledger.put(&entry("b.warc", UploadState::Completed)).unwrap();
        ledger.put(&entry("a.warc", UploadState::Started)).unwrap();

        let found = ledger.get("a.warc").unwrap().unwrap();
        assert_eq!(found.state, UploadState::Started);
        assert!(ledger.get("c.warc").unwrap().is_none());

        let all = ledger.entries().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].filename, "a.warc");
        assert_eq!(all[1].filename, "b.warc");
    }

    #[test]
    fn test_state_update_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&dir.path().join("ledger")).unwrap();

        ledger.put(&entry("f.warc", UploadState::Started)).unwrap();
        ledger.put(&entry("f.warc", UploadState::Completed)).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.get("f.warc").unwrap().unwrap().state,
            UploadState::Completed
        );
    }

    #[test]
    fn test_remove_returns_previous() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&dir.path().join("ledger")).unwrap();

        ledger.put(&entry("f.warc", UploadState::Completed)).unwrap();
        let removed = ledger.remove("f.warc").unwrap().unwrap();
        assert_eq!(removed.filename, "f.warc");
        assert!(ledger.is_empty());
        assert!(ledger.remove("f.warc").unwrap().is_none());
    }
}
