//! Built-in batch jobs and the wire-spec to job mapping.
//!
//! These cover the operations the protocol exposes; the engine itself
//! accepts any [`BatchJob`] implementation.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::BatchJob;
use crate::fabric::messages::BatchSpec;
use crate::types::{ArchiveError, Result};

/// Separator between filename and checksum in checksum reports.
pub const CHECKSUM_SEPARATOR: &str = "##";

/// Hex-encoded SHA-256 of a byte slice. The crate-wide checksum function.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of a file, streamed.
pub fn checksum_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Emits one `filename##checksum` line per file; the checksum report
/// format consumed by the checksum archive and the reconciler.
pub struct ChecksumJob {
    filter: Option<String>,
}

impl ChecksumJob {
    pub fn new(filter: Option<String>) -> Self {
        Self { filter }
    }

    /// Parse report output back into (filename, checksum) pairs.
    pub fn parse_report(output: &str) -> Result<Vec<(String, String)>> {
        let mut entries = Vec::new();
        for line in output.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let Some((filename, checksum)) = line.split_once(CHECKSUM_SEPARATOR) else {
                return Err(ArchiveError::Protocol(format!(
                    "malformed checksum report line: {line}"
                )));
            };
            entries.push((filename.to_string(), checksum.to_string()));
        }
        Ok(entries)
    }
}

impl BatchJob for ChecksumJob {
    fn id(&self) -> &str {
        "checksum"
    }

    fn matches(&self, filename: &str) -> bool {
        matches_filter(filename, self.filter.as_deref())
    }

    fn process(&mut self, path: &Path, output: &mut Vec<u8>) -> Result<()> {
        let checksum = checksum_file(path)?;
        let name = filename_of(path)?;
        writeln!(output, "{name}{CHECKSUM_SEPARATOR}{checksum}")?;
        Ok(())
    }
}

/// Emits one filename per line.
pub struct FileListJob {
    filter: Option<String>,
}

impl FileListJob {
    pub fn new(filter: Option<String>) -> Self {
        Self { filter }
    }
}

impl BatchJob for FileListJob {
    fn id(&self) -> &str {
        "file_list"
    }

    fn matches(&self, filename: &str) -> bool {
        matches_filter(filename, self.filter.as_deref())
    }

    fn process(&mut self, path: &Path, output: &mut Vec<u8>) -> Result<()> {
        writeln!(output, "{}", filename_of(path)?)?;
        Ok(())
    }
}

/// Emits `filename<SP>bytes` lines for capacity reports.
pub struct SizeJob {
    filter: Option<String>,
}

impl SizeJob {
    pub fn new(filter: Option<String>) -> Self {
        Self { filter }
    }
}

impl BatchJob for SizeJob {
    fn id(&self) -> &str {
        "size"
    }

    fn matches(&self, filename: &str) -> bool {
        matches_filter(filename, self.filter.as_deref())
    }

    fn process(&mut self, path: &Path, output: &mut Vec<u8>) -> Result<()> {
        let len = fs::metadata(path)?.len();
        writeln!(output, "{} {len}", filename_of(path)?)?;
        Ok(())
    }
}

/// Instantiate the job a wire-level batch spec names.
pub fn job_for_spec(spec: &BatchSpec) -> Box<dyn BatchJob> {
    match spec {
        BatchSpec::Checksum { filter } => Box::new(ChecksumJob::new(filter.clone())),
        BatchSpec::FileList { filter } => Box::new(FileListJob::new(filter.clone())),
        BatchSpec::Size { filter } => Box::new(SizeJob::new(filter.clone())),
    }
}

/// List the reversed-domain names encoded by a nested label directory
/// tree: `<root>/dk/netarkivet` yields `netarkivet.dk`.
///
/// Iterative traversal with an explicit work stack and accumulator; the
/// deepest directories of a branch, not the intermediate labels, name the
/// domains.
pub fn reversed_domain_listing(root: &Path) -> Result<Vec<String>> {
    let mut domains = Vec::new();
    // Stack of (directory, labels from root to it, innermost-first).
    let mut pending: Vec<(PathBuf, Vec<String>)> = vec![(root.to_path_buf(), Vec::new())];

    while let Some((dir, labels)) = pending.pop() {
        let mut saw_subdir = false;
        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(label) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            saw_subdir = true;
            let mut child_labels = Vec::with_capacity(labels.len() + 1);
            child_labels.push(label.to_string());
            child_labels.extend(labels.iter().cloned());
            pending.push((path, child_labels));
        }
        if !saw_subdir && !labels.is_empty() {
            domains.push(labels.join("."));
        }
    }

    domains.sort();
    Ok(domains)
}

fn matches_filter(filename: &str, filter: Option<&str>) -> bool {
    filter.map(|f| filename.contains(f)).unwrap_or(true)
}

fn filename_of(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArchiveError::Internal(format!("unnameable path {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchRunner, CancelToken};

    #[test]
    fn test_checksum_job_report_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.warc"), b"alpha").unwrap();
        std::fs::write(dir.path().join("b.warc"), b"beta").unwrap();

        let mut job = ChecksumJob::new(None);
        let status =
            BatchRunner::execute(&mut job, &[dir.path().to_path_buf()], &CancelToken::new())
                .unwrap();

        assert_eq!(status.processed, 2);
        let report = String::from_utf8(status.output).unwrap();
        let mut entries = ChecksumJob::parse_report(&report).unwrap();
        entries.sort();
        assert_eq!(entries[0].0, "a.warc");
        assert_eq!(entries[0].1, checksum_bytes(b"alpha"));
        assert_eq!(entries[1].1, checksum_bytes(b"beta"));
    }

    #[test]
    fn test_parse_report_rejects_garbage() {
        assert!(ChecksumJob::parse_report("no separator here").is_err());
        assert!(ChecksumJob::parse_report("").unwrap().is_empty());
    }

    #[test]
    fn test_file_list_job_with_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.warc"), b"x").unwrap();
        std::fs::write(dir.path().join("skip.log"), b"y").unwrap();

        let mut job = FileListJob::new(Some(".warc".to_string()));
        let status =
            BatchRunner::execute(&mut job, &[dir.path().to_path_buf()], &CancelToken::new())
                .unwrap();

        assert_eq!(status.processed, 1);
        assert_eq!(String::from_utf8(status.output).unwrap().trim(), "keep.warc");
    }

    #[test]
    fn test_size_job_reports_lengths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("five"), b"12345").unwrap();

        let mut job = SizeJob::new(None);
        let status =
            BatchRunner::execute(&mut job, &[dir.path().to_path_buf()], &CancelToken::new())
                .unwrap();
        assert_eq!(String::from_utf8(status.output).unwrap().trim(), "five 5");
    }

    #[test]
    fn test_reversed_domain_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dk/netarkivet")).unwrap();
        std::fs::create_dir_all(dir.path().join("dk/kb")).unwrap();
        std::fs::create_dir_all(dir.path().join("org/example/www")).unwrap();
        // Plain files must not contribute labels.
        std::fs::write(dir.path().join("dk/netarkivet/crawl.log"), b"x").unwrap();

        let domains = reversed_domain_listing(dir.path()).unwrap();
        assert_eq!(
            domains,
            vec!["kb.dk", "netarkivet.dk", "www.example.org"]
        );
    }
}
