//! Free-space providers for storage placement decisions.
//!
//! All providers answer "how many bytes are free under this path" and
//! return 0 rather than failing when the path is missing or the backing
//! mechanism breaks: 0 means "cannot place here", never a hard error.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use sysinfo::Disks;
use tracing::warn;

/// Bytes-free capability, pluggable per deployment.
pub trait FreeSpaceProvider: Send + Sync {
    fn bytes_free(&self, path: &Path) -> u64;
}

/// Real filesystem query via disk metrics: the mounted disk with the
/// longest mount-point prefix of the path answers for it.
#[derive(Default)]
pub struct DiskFreeSpaceProvider;

impl DiskFreeSpaceProvider {
    pub fn new() -> Self {
        Self
    }
}

impl FreeSpaceProvider for DiskFreeSpaceProvider {
    fn bytes_free(&self, path: &Path) -> u64 {
        let Ok(canonical) = path.canonicalize() else {
            return 0;
        };
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| canonical.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .unwrap_or(0)
    }
}

/// Fixed-constant provider for tests and capacity simulations.
pub struct MockFreeSpaceProvider {
    bytes: u64,
}

impl MockFreeSpaceProvider {
    /// Default mock capacity: one TiB.
    pub const ONE_TIB: u64 = 1 << 40;

    pub fn new(bytes: u64) -> Self {
        Self { bytes }
    }
}

impl Default for MockFreeSpaceProvider {
    fn default() -> Self {
        Self::new(Self::ONE_TIB)
    }
}

impl FreeSpaceProvider for MockFreeSpaceProvider {
    fn bytes_free(&self, _path: &Path) -> u64 {
        self.bytes
    }
}

/// Sidecar-file provider for storage where the real query is too slow or
/// unavailable (networked mounts). A file named after the root's final
/// path component, inside `dir`, holds the cached byte count; it is
/// refreshed out of band.
pub struct FilebasedFreeSpaceProvider {
    dir: std::path::PathBuf,
}

impl FilebasedFreeSpaceProvider {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FreeSpaceProvider for FilebasedFreeSpaceProvider {
    fn bytes_free(&self, path: &Path) -> u64 {
        let Some(name) = path.file_name() else {
            return 0;
        };
        let sidecar = self.dir.join(name);
        match fs::read_to_string(&sidecar) {
            Ok(contents) => match contents.trim().parse::<u64>() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "Free-space sidecar {} holds no number ({}), treating as full",
                        sidecar.display(),
                        e
                    );
                    0
                }
            },
            Err(_) => 0,
        }
    }
}

/// Convenience alias used when threading providers through constructors.
pub type SharedFreeSpaceProvider = Arc<dyn FreeSpaceProvider>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_mock_provider_is_constant() {
        let provider = MockFreeSpaceProvider::new(4096);
        assert_eq!(provider.bytes_free(Path::new("/anywhere")), 4096);
        assert_eq!(
            MockFreeSpaceProvider::default().bytes_free(Path::new("/")),
            MockFreeSpaceProvider::ONE_TIB
        );
    }

    #[test]
    fn test_disk_provider_missing_path_is_zero() {
        let provider = DiskFreeSpaceProvider::new();
        assert_eq!(
            provider.bytes_free(Path::new("/not/existing/dir")),
            0,
            "missing path must read as no space, not as an error"
        );
    }

    #[test]
    fn test_disk_provider_real_path_reports_space() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DiskFreeSpaceProvider::new();
        // Any writable temp dir sits on a mounted disk with some space.
        assert!(provider.bytes_free(dir.path()) > 0);
    }

    #[test]
    fn test_filebased_provider_reads_sidecar() {
        let sidecars = tempfile::tempdir().unwrap();
        let root = PathBuf::from("/archive/dir1");
        std::fs::write(sidecars.path().join("dir1"), "1000\n").unwrap();

        let provider = FilebasedFreeSpaceProvider::new(sidecars.path());
        assert_eq!(provider.bytes_free(&root), 1000);
    }

    #[test]
    fn test_filebased_provider_missing_or_garbage_is_zero() {
        let sidecars = tempfile::tempdir().unwrap();
        std::fs::write(sidecars.path().join("dir2"), "not-a-number").unwrap();

        let provider = FilebasedFreeSpaceProvider::new(sidecars.path());
        assert_eq!(provider.bytes_free(Path::new("/archive/dir1")), 0);
        assert_eq!(provider.bytes_free(Path::new("/archive/dir2")), 0);
    }

    #[test]
    fn test_filebased_provider_missing_dir_is_zero() {
        let provider = FilebasedFreeSpaceProvider::new("/not/existing/dir");
        assert_eq!(provider.bytes_free(Path::new("/archive/dir1")), 0);
    }
}
