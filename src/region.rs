//! Destination regions: pre-sized byte stores written at absolute offsets
//!
//! A region is created at its final length before any range worker starts.
//! Workers then write disjoint sub-ranges concurrently. [`FileRegion`] uses
//! positional writes (`pwrite` / `seek_write`) so the data path needs no lock;
//! [`MemoryRegion`] keeps the bytes in RAM.

use crate::error::AllocationError;
use crate::utils::get_available_space;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A fixed-length byte store addressable by absolute offset
#[async_trait]
pub trait DestinationRegion: Send + Sync {
    /// Total length of the region in bytes
    fn len(&self) -> u64;

    /// True if the region holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `data` starting at `offset`
    ///
    /// Fails with `InvalidInput` if the write would leave `[0, len)`.
    async fn write_at(&self, offset: u64, data: Vec<u8>) -> io::Result<()>;

    /// Persist written bytes, called once after all workers have joined
    async fn flush(&self) -> io::Result<()>;
}

fn check_bounds(region_len: u64, offset: u64, data_len: usize) -> io::Result<()> {
    let end = offset.checked_add(data_len as u64);
    match end {
        Some(end) if end <= region_len => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "write of {} bytes at offset {} exceeds region length {}",
                data_len, offset, region_len
            ),
        )),
    }
}

/// Cross-platform positional file write.
///
/// Writes `buf` to `file` at the given byte `offset`, equivalent to Unix `pwrite`.
#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

/// Cross-platform positional file write.
///
/// Writes `buf` to `file` at the given byte `offset`, equivalent to Unix `pwrite`.
#[cfg(windows)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < buf.len() {
        let n = file.seek_write(&buf[written..], offset + written as u64)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to write whole buffer",
            ));
        }
        written += n;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn write_all_at(_file: &File, _buf: &[u8], _offset: u64) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "positional writes not supported on this platform",
    ))
}

/// Grow `file` to `len` bytes, reserving the blocks where the platform allows it
#[cfg(target_os = "linux")]
fn allocate(file: &File, len: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    if len == 0 {
        return file.set_len(0);
    }
    let len = libc::off_t::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds off_t"))?;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let ret = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len) };
    match ret {
        0 => Ok(()),
        // Filesystems without fallocate support still get a sized (sparse) file
        libc::EOPNOTSUPP | libc::EINVAL => file.set_len(len as u64),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}

#[cfg(not(target_os = "linux"))]
fn allocate(file: &File, len: u64) -> io::Result<()> {
    file.set_len(len)
}

/// A destination backed by a file on disk
#[derive(Debug, Clone)]
pub struct FileRegion {
    file: Arc<File>,
    path: PathBuf,
    len: u64,
}

impl FileRegion {
    /// Size an already opened file to `len` bytes and wrap it as a region
    ///
    /// The handle must be open for writing.
    pub fn from_file(file: File, path: impl Into<PathBuf>, len: u64) -> Result<Self, AllocationError> {
        let path = path.into();
        allocate(&file, len).map_err(|source| AllocationError::Allocate {
            path: path.clone(),
            len,
            source,
        })?;
        Ok(Self {
            file: Arc::new(file),
            path,
            len,
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DestinationRegion for FileRegion {
    fn len(&self) -> u64 {
        self.len
    }

    async fn write_at(&self, offset: u64, data: Vec<u8>) -> io::Result<()> {
        check_bounds(self.len, offset, data.len())?;
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(|e| io::Error::other(format!("write task panicked: {}", e)))?
    }

    async fn flush(&self) -> io::Result<()> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| io::Error::other(format!("sync task panicked: {}", e)))?
    }
}

/// A destination held in memory
#[derive(Debug)]
pub struct MemoryRegion {
    bytes: Mutex<Vec<u8>>,
    len: u64,
}

impl MemoryRegion {
    /// Allocate a zero-filled region of `len` bytes
    pub fn new(len: u64) -> Result<Self, AllocationError> {
        let size = usize::try_from(len).map_err(|_| AllocationError::TooLarge { len })?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| AllocationError::TooLarge { len })?;
        bytes.resize(size, 0);
        Ok(Self {
            bytes: Mutex::new(bytes),
            len,
        })
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Consume the region and return its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DestinationRegion for MemoryRegion {
    fn len(&self) -> u64 {
        self.len
    }

    async fn write_at(&self, offset: u64, data: Vec<u8>) -> io::Result<()> {
        check_bounds(self.len, offset, data.len())?;
        let start = offset as usize;
        let mut bytes = self
            .bytes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bytes[start..start + data.len()].copy_from_slice(&data);
        Ok(())
    }

    async fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Create (or truncate) the file at `path` and pre-size it to `len` bytes
///
/// If pre-sizing fails the file is removed, so an existing file at `path`
/// does not survive a failed call.
///
/// When `check_disk_space` is set, the free space of the containing
/// filesystem is compared against `len` first. A failed space query is
/// logged and does not block the allocation itself.
pub fn prepare_file(
    path: &Path,
    len: u64,
    check_disk_space: bool,
) -> Result<FileRegion, AllocationError> {
    if check_disk_space && len > 0 {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        match get_available_space(dir) {
            Ok(available) if available < len => {
                return Err(AllocationError::InsufficientSpace {
                    required: len,
                    available,
                });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "could not check free disk space, allocating anyway"
                );
            }
        }
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| AllocationError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let region = match FileRegion::from_file(file, path, len) {
        Ok(region) => region,
        Err(e) => {
            // The open above already truncated it; do not leave an empty file behind.
            if let Err(remove) = std::fs::remove_file(path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %remove,
                    "could not remove destination after failed allocation"
                );
            }
            return Err(e);
        }
    };
    tracing::debug!(path = %path.display(), len, "destination pre-allocated");
    Ok(region)
}
