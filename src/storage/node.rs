//! Storage node: durable, replica-local storage of immutable files with
//! spillover placement across multiple roots.
//!
//! Layout per root: `filedir/` holds the archive files, `tempdir/` holds
//! in-flight uploads, `atticdir/` holds quarantined removals. A file is
//! written to a temp name, fsynced and atomically renamed into `filedir/`,
//! so no half-written file is ever visible under its final name.

use chrono::Utc;
use dashmap::DashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ledger::{Ledger, LedgerEntry};
use crate::batch::jobs::{checksum_bytes, checksum_file};
use crate::batch::{BatchJob, BatchRunner, BatchStatus, CancelToken};
use crate::freespace::SharedFreeSpaceProvider;
use crate::logging;
use crate::types::{ArchiveError, Result, UploadState};

const FILE_DIR: &str = "filedir";
const TEMP_DIR: &str = "tempdir";
const ATTIC_DIR: &str = "atticdir";

/// Transient I/O errors during a single file write are retried this many
/// times before being surfaced. A full root is never retried.
const WRITE_ATTEMPTS: u32 = 3;

/// Storage node settings, threaded in from validated configuration.
#[derive(Debug, Clone)]
pub struct StorageNodeConfig {
    /// Roots in placement priority order.
    pub roots: Vec<PathBuf>,
    /// Headroom a root must keep after placement.
    pub min_space_left: u64,
    pub ledger_path: PathBuf,
}

/// A successfully stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub filename: String,
    pub size: u64,
    pub checksum: String,
    pub root: PathBuf,
}

/// One replica instance's file store.
pub struct StorageNode {
    roots: Vec<PathBuf>,
    min_space_left: u64,
    free_space: SharedFreeSpaceProvider,
    ledger: Ledger,
    /// Per-filename advisory locks, held for the duration of
    /// temp-write-then-rename only.
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StorageNode {
    /// Open the node, creating the per-root directory layout and sweeping
    /// stale temp files left by an earlier crash.
    pub fn open(config: StorageNodeConfig, free_space: SharedFreeSpaceProvider) -> Result<Self> {
        if config.roots.is_empty() {
            return Err(ArchiveError::Configuration(
                "storage node needs at least one root directory".to_string(),
            ));
        }
        for root in &config.roots {
            fs::create_dir_all(root.join(FILE_DIR))?;
            fs::create_dir_all(root.join(TEMP_DIR))?;
            fs::create_dir_all(root.join(ATTIC_DIR))?;
            sweep_tempdir(&root.join(TEMP_DIR));
        }
        let ledger = Ledger::open(&config.ledger_path)?;
        info!(
            "Storage node open: {} root(s), {} ledger record(s)",
            config.roots.len(),
            ledger.len()
        );
        Ok(Self {
            roots: config.roots,
            min_space_left: config.min_space_left,
            free_space,
            ledger,
            write_locks: DashMap::new(),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// The `filedir` directories batch jobs run over.
    pub fn filedirs(&self) -> Vec<PathBuf> {
        self.roots.iter().map(|r| r.join(FILE_DIR)).collect()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Store a file. Roots are tried in priority order; the first with
    /// `bytes_free >= length + min_space_left` takes the file. Re-storing
    /// identical content is idempotent success; differing content for an
    /// existing filename is a checksum mismatch, never an overwrite.
    pub async fn store(&self, filename: &str, content: &[u8]) -> Result<ArchiveFile> {
        validate_filename(filename)?;
        let checksum = checksum_bytes(content);
        let length = content.len() as u64;

        let lock = self
            .write_locks
            .entry(filename.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(existing) = self.find(filename) {
            let on_disk = checksum_file(&existing)?;
            if on_disk == checksum {
                debug!("Duplicate store of {} with matching checksum", filename);
                let root = root_of(&existing);
                self.record(filename, &checksum, length, &root, UploadState::Completed)?;
                return Ok(ArchiveFile {
                    filename: filename.to_string(),
                    size: length,
                    checksum,
                    root,
                });
            }
            warn!("Store of {} with diverging content refused", filename);
            return Err(ArchiveError::ChecksumMismatch {
                filename: filename.to_string(),
                expected: on_disk,
                actual: checksum,
            });
        }

        for root in &self.roots {
            let free = self.free_space.bytes_free(root);
            if free < length.saturating_add(self.min_space_left) {
                debug!(
                    "Root {} has {} bytes free, needs {}; spilling over",
                    root.display(),
                    free,
                    length + self.min_space_left
                );
                continue;
            }
            self.record(filename, &checksum, length, root, UploadState::Started)?;
            return match write_with_retries(root, filename, content) {
                Ok(()) => {
                    self.record(filename, &checksum, length, root, UploadState::Completed)?;
                    info!(
                        "Stored {} ({} bytes) in {}",
                        filename,
                        length,
                        root.display()
                    );
                    Ok(ArchiveFile {
                        filename: filename.to_string(),
                        size: length,
                        checksum,
                        root: root.clone(),
                    })
                }
                Err(e) => {
                    self.record(filename, &checksum, length, root, UploadState::Failed)?;
                    Err(e)
                }
            };
        }

        warn!(
            "No root can hold {} ({} bytes plus {} headroom)",
            filename, length, self.min_space_left
        );
        Err(ArchiveError::NoSpaceLeft {
            filename: filename.to_string(),
            length,
        })
    }

    pub fn retrieve(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self
            .find(filename)
            .ok_or_else(|| ArchiveError::UnknownFile(filename.to_string()))?;
        Ok(fs::read(path)?)
    }

    pub fn checksum(&self, filename: &str) -> Result<String> {
        let path = self
            .find(filename)
            .ok_or_else(|| ArchiveError::UnknownFile(filename.to_string()))?;
        checksum_file(&path)
    }

    /// Audited administrative removal. The declared checksum must match the
    /// on-disk content; the file is then quarantined under `atticdir/`,
    /// never unlinked. Returns the removed size.
    pub async fn remove(&self, filename: &str, expected_checksum: &str) -> Result<u64> {
        let lock = self
            .write_locks
            .entry(filename.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let path = self
            .find(filename)
            .ok_or_else(|| ArchiveError::UnknownFile(filename.to_string()))?;
        let actual = checksum_file(&path)?;
        if actual != expected_checksum {
            warn!("Refusing to remove {}: checksum differs", filename);
            return Err(ArchiveError::ChecksumMismatch {
                filename: filename.to_string(),
                expected: expected_checksum.to_string(),
                actual,
            });
        }
        let size = fs::metadata(&path)?.len();
        let attic = root_of(&path).join(ATTIC_DIR).join(filename);
        fs::rename(&path, &attic)?;
        self.ledger.remove(filename)?;
        logging::audit_removal(filename, expected_checksum, size, &attic);
        Ok(size)
    }

    /// Run a batch job over this node's roots, scoped by `root_filter`
    /// (indices into the configured root list; empty = all roots).
    pub fn run_batch(
        &self,
        job: &mut dyn BatchJob,
        root_filter: &[usize],
        cancel: &CancelToken,
    ) -> Result<BatchStatus> {
        let filedirs: Vec<PathBuf> = if root_filter.is_empty() {
            self.filedirs()
        } else {
            self.filedirs()
                .into_iter()
                .enumerate()
                .filter(|(i, _)| root_filter.contains(i))
                .map(|(_, dir)| dir)
                .collect()
        };
        BatchRunner::execute(job, &filedirs, cancel)
    }

    fn record(
        &self,
        filename: &str,
        checksum: &str,
        size: u64,
        root: &Path,
        state: UploadState,
    ) -> Result<()> {
        self.ledger.put(&LedgerEntry {
            filename: filename.to_string(),
            checksum: checksum.to_string(),
            size,
            root: root.to_path_buf(),
            state,
            updated_at: Utc::now(),
        })
    }

    /// Locate a file across roots. The ledger knows the usual place; a
    /// scan covers files present without a record (duplicate candidates).
    fn find(&self, filename: &str) -> Option<PathBuf> {
        if let Ok(Some(entry)) = self.ledger.get(filename) {
            if entry.state == UploadState::Completed {
                let path = entry.root.join(FILE_DIR).join(filename);
                if path.is_file() {
                    return Some(path);
                }
            }
        }
        self.roots
            .iter()
            .map(|root| root.join(FILE_DIR).join(filename))
            .find(|path| path.is_file())
    }
}

/// Filenames are globally unique flat names; anything path-like would
/// escape the filedir.
fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename == "."
        || filename == ".."
    {
        return Err(ArchiveError::Protocol(format!(
            "invalid archive filename '{filename}'"
        )));
    }
    Ok(())
}

fn root_of(file_path: &Path) -> PathBuf {
    // <root>/filedir/<name> -> <root>
    file_path
        .parent()
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_default()
}

fn write_with_retries(root: &Path, filename: &str, content: &[u8]) -> Result<()> {
    let final_path = root.join(FILE_DIR).join(filename);
    let mut last_error: Option<std::io::Error> = None;
    for attempt in 1..=WRITE_ATTEMPTS {
        let temp = root
            .join(TEMP_DIR)
            .join(format!("{filename}.{}", uuid::Uuid::new_v4().simple()));
        match write_once(&temp, &final_path, content) {
            Ok(()) => return Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&temp);
                warn!(
                    "Write attempt {}/{} for {} failed: {}",
                    attempt, WRITE_ATTEMPTS, filename, e
                );
                last_error = Some(e);
            }
        }
    }
    Err(ArchiveError::Io(last_error.expect("at least one attempt")))
}

fn write_once(temp: &Path, final_path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp, final_path)
}

fn sweep_tempdir(tempdir: &Path) {
    let Ok(entries) = fs::read_dir(tempdir) else {
        return;
    };
    for entry in entries.flatten() {
        warn!("Sweeping stale temp file {}", entry.path().display());
        let _ = fs::remove_file(entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freespace::{FreeSpaceProvider, MockFreeSpaceProvider};
    use std::collections::HashMap;

    /// Per-root free-space map for deterministic placement tests.
    struct MapFreeSpaceProvider {
        map: HashMap<PathBuf, u64>,
    }

    impl FreeSpaceProvider for MapFreeSpaceProvider {
        fn bytes_free(&self, path: &Path) -> u64 {
            self.map.get(path).copied().unwrap_or(0)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        roots: Vec<PathBuf>,
        ledger_path: PathBuf,
    }

    fn fixture(root_count: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let roots: Vec<PathBuf> = (0..root_count)
            .map(|i| dir.path().join(format!("root{i}")))
            .collect();
        let ledger_path = dir.path().join("ledger");
        Fixture {
            _dir: dir,
            roots,
            ledger_path,
        }
    }

    fn node_with_provider(
        fx: &Fixture,
        min_space_left: u64,
        provider: SharedFreeSpaceProvider,
    ) -> StorageNode {
        StorageNode::open(
            StorageNodeConfig {
                roots: fx.roots.clone(),
                min_space_left,
                ledger_path: fx.ledger_path.clone(),
            },
            provider,
        )
        .unwrap()
    }

    fn plain_node(fx: &Fixture) -> StorageNode {
        node_with_provider(fx, 0, Arc::new(MockFreeSpaceProvider::default()))
    }

    #[tokio::test]
    async fn test_store_retrieve_roundtrip() {
        let fx = fixture(1);
        let node = plain_node(&fx);

        let stored = node.store("f.warc", b"content bytes").await.unwrap();
        assert_eq!(stored.checksum, checksum_bytes(b"content bytes"));
        assert_eq!(stored.size, 13);

        assert_eq!(node.retrieve("f.warc").unwrap(), b"content bytes");
        assert_eq!(node.checksum("f.warc").unwrap(), stored.checksum);
        assert_eq!(
            node.ledger().get("f.warc").unwrap().unwrap().state,
            UploadState::Completed
        );
    }

    #[tokio::test]
    async fn test_duplicate_store_is_idempotent() {
        let fx = fixture(1);
        let node = plain_node(&fx);

        let first = node.store("f.warc", b"same").await.unwrap();
        let second = node.store("f.warc", b"same").await.unwrap();
        assert_eq!(first, second);

        // Same name, different content: refused, original untouched.
        let err = node.store("f.warc", b"DIFFERENT").await.unwrap_err();
        assert!(matches!(err, ArchiveError::ChecksumMismatch { .. }));
        assert_eq!(node.retrieve("f.warc").unwrap(), b"same");
    }

    #[tokio::test]
    async fn test_spillover_placement() {
        let fx = fixture(2);
        let provider = MapFreeSpaceProvider {
            map: HashMap::from([(fx.roots[0].clone(), 100), (fx.roots[1].clone(), 1000)]),
        };
        let node = node_with_provider(&fx, 50, Arc::new(provider));

        // 60 bytes do not fit root0's headroom (100 - 60 < 50): spill to root1.
        let big = node.store("big.warc", &[0u8; 60]).await.unwrap();
        assert_eq!(big.root, fx.roots[1]);

        // 10 bytes fit root0 (100 - 10 >= 50): first root wins.
        let small = node.store("small.warc", &[0u8; 10]).await.unwrap();
        assert_eq!(small.root, fx.roots[0]);
    }

    #[tokio::test]
    async fn test_no_space_left_without_partial_writes() {
        let fx = fixture(2);
        let node = node_with_provider(&fx, 50, Arc::new(MockFreeSpaceProvider::new(40)));

        let err = node.store("f.warc", &[0u8; 10]).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NoSpaceLeft { .. }));

        for root in &fx.roots {
            assert_eq!(fs::read_dir(root.join(FILE_DIR)).unwrap().count(), 0);
            assert_eq!(fs::read_dir(root.join(TEMP_DIR)).unwrap().count(), 0);
        }
    }

    #[tokio::test]
    async fn test_retrieve_unknown_file() {
        let fx = fixture(1);
        let node = plain_node(&fx);
        assert!(matches!(
            node.retrieve("nope.warc").unwrap_err(),
            ArchiveError::UnknownFile(_)
        ));
    }

    #[tokio::test]
    async fn test_remove_requires_matching_checksum() {
        let fx = fixture(1);
        let node = plain_node(&fx);
        let stored = node.store("f.warc", b"guarded").await.unwrap();

        let err = node.remove("f.warc", "wrong-checksum").await.unwrap_err();
        assert!(matches!(err, ArchiveError::ChecksumMismatch { .. }));
        assert!(node.retrieve("f.warc").is_ok());

        let size = node.remove("f.warc", &stored.checksum).await.unwrap();
        assert_eq!(size, 7);
        assert!(matches!(
            node.retrieve("f.warc").unwrap_err(),
            ArchiveError::UnknownFile(_)
        ));
        // Quarantined, not unlinked.
        assert!(fx.roots[0].join(ATTIC_DIR).join("f.warc").is_file());
    }

    #[tokio::test]
    async fn test_rejects_path_like_filenames() {
        let fx = fixture(1);
        let node = plain_node(&fx);
        for bad in ["../escape", "a/b", "", ".."] {
            assert!(node.store(bad, b"x").await.is_err(), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_concurrent_same_filename_stores_serialize() {
        let fx = fixture(1);
        let node = Arc::new(plain_node(&fx));

        let a = {
            let node = Arc::clone(&node);
            tokio::spawn(async move { node.store("f.warc", b"identical").await })
        };
        let b = {
            let node = Arc::clone(&node);
            tokio::spawn(async move { node.store("f.warc", b"identical").await })
        };

        // Both succeed: one renames first, the other observes the existing
        // file with a matching checksum.
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(node.retrieve("f.warc").unwrap(), b"identical");
    }

    #[tokio::test]
    async fn test_batch_over_filedirs() {
        let fx = fixture(2);
        let node = plain_node(&fx);
        node.store("a.warc", b"aa").await.unwrap();
        node.store("b.warc", b"bb").await.unwrap();

        let mut job = crate::batch::jobs::FileListJob::new(None);
        let status = node.run_batch(&mut job, &[], &CancelToken::new()).unwrap();
        assert_eq!(status.processed, 2);
    }
}
