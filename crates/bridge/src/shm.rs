use crate::errors::BridgeError;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// A file-backed shared mapping under `/dev/shm`.
///
/// The creating side owns the name and unlinks it on drop. Attachers only
/// unmap their view; the file outlives them.
pub struct SharedSegment {
    mmap: MmapMut,
    base: *mut u8,
    path: PathBuf,
    owner: bool,
}

// The mapping is process-shared memory. All mutation goes through `base`
// under the protocols of the types built on top (seqlock ring, atomic byte).
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a fresh zeroed segment of `size` bytes, replacing any stale
    /// file left behind by a crashed run.
    pub fn create(path: impl AsRef<Path>, size: usize) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale shared segment"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)?;
        file.set_len(size as u64)?;

        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        Ok(Self {
            mmap,
            base,
            path: path.to_path_buf(),
            owner: true,
        })
    }

    /// Map an existing segment created by another process.
    pub fn attach(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        Ok(Self {
            mmap,
            base,
            path: path.to_path_buf(),
            owner: false,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to unlink shared segment");
                }
            }
        }
    }
}
