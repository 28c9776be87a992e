//! Platform-specific raw file I/O
//!
//! Provides file creation bypassing the OS page cache:
//! - Linux: O_DIRECT flag
//! - macOS: F_NOCACHE fcntl
//!
//! and the page-aligned memory that unbuffered writes transfer from.

use s3direct_common::{Error, Result};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::ptr::NonNull;
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

/// Fallback when the page size cannot be queried
const DEFAULT_PAGE_SIZE: usize = 4096;

/// OS memory page size
///
/// Direct I/O buffers, transfer sizes and file offsets are all kept
/// multiples of this value.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    DEFAULT_PAGE_SIZE
}

/// Round `value` up to the next multiple of `alignment` (a power of two)
pub const fn round_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Create (or truncate) a file for writing
///
/// With `direct_io` the file is opened bypassing the page cache. A
/// filesystem that refuses unbuffered access (EINVAL, e.g. some tmpfs or
/// FUSE mounts) gets a regular buffered handle instead; the returned flag
/// reports which one the caller ended up with.
pub fn create_file(path: impl AsRef<Path>, direct_io: bool) -> Result<(File, bool)> {
    let path = path.as_ref();

    if direct_io {
        match open_direct(path) {
            Ok(file) => {
                debug!(path = %path.display(), "opened file for direct I/O");
                return Ok((file, true));
            }
            Err(e) if direct_io_unsupported(&e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "direct I/O not supported here, falling back to buffered writes"
                );
            }
            Err(e) => return Err(Error::file_io(path, e)),
        }
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::file_io(path, e))?;

    Ok((file, false))
}

fn direct_io_unsupported(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINVAL) || e.kind() == io::ErrorKind::Unsupported
}

#[cfg(target_os = "linux")]
fn open_direct(path: &Path) -> io::Result<File> {
    // O_DIRECT bypasses page cache on Linux
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
}

#[cfg(target_os = "macos")]
fn open_direct(path: &Path) -> io::Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    // On macOS, use F_NOCACHE after opening
    // SAFETY: the descriptor is owned by `file` and open for the call.
    if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(file)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn open_direct(_path: &Path) -> io::Result<File> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Aligned buffer for direct I/O operations
///
/// With O_DIRECT the memory a write transfers from must be aligned to the
/// filesystem's block size. Page alignment satisfies every block size up to
/// the page size, so buffers are page-aligned by default. The allocation is
/// zeroed and its length is always a multiple of the alignment.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
}

// SAFETY: the buffer exclusively owns its allocation.
unsafe impl Send for AlignedBuffer {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Create a new page-aligned buffer of at least `size` bytes
    pub fn new(size: usize) -> Result<Self> {
        Self::with_alignment(size, page_size())
    }

    /// Create a new buffer with custom alignment
    ///
    /// `size` is rounded up to a multiple of `alignment`.
    pub fn with_alignment(size: usize, alignment: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::storage("aligned buffer size must be positive"));
        }
        if !alignment.is_power_of_two() {
            return Err(Error::storage(format!(
                "alignment {alignment} is not a power of two"
            )));
        }

        let aligned_size = round_up(size, alignment);
        let layout = Layout::from_size_align(aligned_size, alignment)
            .map_err(|e| Error::storage(format!("invalid layout for aligned buffer: {e}")))?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::storage(format!("failed to allocate {aligned_size} byte aligned buffer"))
        })?;

        Ok(Self {
            ptr,
            len: aligned_size,
            alignment,
        })
    }

    /// Get the buffer as a slice
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialized (zeroed) bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Get the buffer as a mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Get the buffer size
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-sized buffers are rejected at construction
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment of the start address and the length
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Copy data into the buffer (pads with zeros if source is smaller)
    pub fn copy_from(&mut self, src: &[u8]) {
        let data = self.as_mut_slice();
        let copy_len = src.len().min(data.len());
        data[..copy_len].copy_from_slice(&src[..copy_len]);
        data[copy_len..].fill(0);
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: same size and alignment the allocation was made with.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, self.alignment);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish_non_exhaustive()
    }
}

impl AsRef<[u8]> for AlignedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for AlignedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let page = page_size();
        assert!(page >= 512);
        assert!(page.is_power_of_two());
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4096), 0);
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
    }

    #[test]
    fn test_aligned_buffer() {
        let mut buf = AlignedBuffer::new(100).unwrap();
        assert_eq!(buf.len(), page_size());
        assert_eq!(buf.as_slice().as_ptr() as usize % page_size(), 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));

        buf.copy_from(b"hello");
        assert_eq!(&buf.as_slice()[..5], b"hello");
        assert_eq!(buf.as_slice()[5], 0);
    }

    #[test]
    fn test_aligned_buffer_rejects_bad_input() {
        assert!(AlignedBuffer::new(0).is_err());
        assert!(AlignedBuffer::with_alignment(4096, 3000).is_err());
    }

    #[test]
    fn test_create_file_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.bin");
        std::fs::write(&path, b"stale contents").unwrap();

        let (_file, _direct) = create_file(&path, true).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        let (_file, direct) = create_file(&path, false).unwrap();
        assert!(!direct);
    }

    #[test]
    fn test_create_file_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("object.bin");
        let err = create_file(&path, false).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}
