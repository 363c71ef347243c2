//! Batch job engine: apply one operation to every qualifying file under a
//! set of storage roots and produce one combined result.
//!
//! The engine is job-agnostic; checksum computation, listing and indexing
//! are supplied as [`BatchJob`] implementations by callers. A single
//! file's failure never aborts the batch; only failing to enumerate a
//! root at all is an engine-level fault.

pub mod jobs;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fabric::messages::BatchFailure;
use crate::types::Result;

/// One per-file operation, applied uniformly across roots.
pub trait BatchJob: Send {
    /// Operation identifier, carried into the resulting status.
    fn id(&self) -> &str;

    /// Filename filter; unfiltered jobs accept everything.
    fn matches(&self, _filename: &str) -> bool {
        true
    }

    /// Process one file, appending job-specific output to the aggregated
    /// result. Errors are recorded per file and do not stop the run.
    fn process(&mut self, path: &Path, output: &mut Vec<u8>) -> Result<()>;
}

/// Aggregated outcome of one batch invocation. Immutable once returned.
#[derive(Debug)]
pub struct BatchStatus {
    pub job_id: String,
    /// Files the engine attempted, including the failed ones.
    pub processed: usize,
    pub failures: Vec<BatchFailure>,
    /// Concatenated per-file output in processing order.
    pub output: Vec<u8>,
    /// True when the run stopped at a cancellation point; counts and
    /// output then reflect only the files completed so far.
    pub cancelled: bool,
}

/// Cooperative cancellation token, checked between files, never mid-file.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Runs batch jobs over storage roots.
pub struct BatchRunner;

impl BatchRunner {
    /// Execute `job` against every matching file under `roots`.
    ///
    /// Files are visited in directory order, which is not guaranteed
    /// stable across filesystems; callers must not depend on it.
    pub fn execute(
        job: &mut dyn BatchJob,
        roots: &[PathBuf],
        cancel: &CancelToken,
    ) -> Result<BatchStatus> {
        let mut status = BatchStatus {
            job_id: job.id().to_string(),
            processed: 0,
            failures: Vec::new(),
            output: Vec::new(),
            cancelled: false,
        };

        // Explicit work stack instead of recursion: adversarial nesting
        // depth must not translate into call-stack depth.
        let mut pending: Vec<PathBuf> = Vec::new();
        for root in roots {
            // A root we cannot enumerate at all is an engine-level fault.
            let entries = fs::read_dir(root)?;
            Self::push_entries(entries, &mut pending);

            while let Some(path) = pending.pop() {
                if cancel.is_cancelled() {
                    info!(
                        "Batch {} cancelled after {} files",
                        status.job_id, status.processed
                    );
                    status.cancelled = true;
                    return Ok(status);
                }
                if path.is_dir() {
                    match fs::read_dir(&path) {
                        Ok(entries) => Self::push_entries(entries, &mut pending),
                        Err(e) => {
                            warn!("Skipping unreadable directory {}: {}", path.display(), e);
                        }
                    }
                    continue;
                }
                let filename = match path.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                if !job.matches(&filename) {
                    continue;
                }
                status.processed += 1;
                if let Err(e) = job.process(&path, &mut status.output) {
                    debug!("Batch {} failed on {}: {}", status.job_id, filename, e);
                    status.failures.push(BatchFailure {
                        filename,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Batch {} done: {} files, {} failures",
            status.job_id,
            status.processed,
            status.failures.len()
        );
        Ok(status)
    }

    fn push_entries(entries: fs::ReadDir, pending: &mut Vec<PathBuf>) {
        for entry in entries.flatten() {
            pending.push(entry.path());
        }
    }
}
