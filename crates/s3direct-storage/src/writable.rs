//! Direct I/O writable file
//!
//! Accumulates arbitrary-length writes in a page-aligned buffer and hands
//! the disk only whole, aligned buffers. The unaligned tail is zero-padded
//! to the next page boundary, written with the same aligned path, and the
//! file is then truncated back to the number of bytes the caller wrote.
//!
//! ```text
//! write(5000) with a 4096 byte buffer:
//!
//!   buffer  [##########] -> write 4096 @ 0       offset = 0
//!   buffer  [###.......]                         offset = 904
//! close():
//!   buffer  [###0000000] -> write 4096 @ 4096
//!   ftruncate(5000)
//! ```

use crate::raw_io::{self, AlignedBuffer};
use s3direct_common::{Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// A writable file which uses direct I/O under the hood
///
/// Single writer: `write` takes `&mut self`. Share it through
/// [`DirectIoFileSink`](crate::DirectIoFileSink) when several handles are
/// needed.
///
/// Dropping the file runs [`close`](Self::close) if the caller has not, so
/// the tail is flushed and the length fixed up on every exit path. Errors
/// at that point can only be logged; call `close` to observe them.
#[derive(Debug)]
pub struct DirectIoWritableFile {
    file: File,
    path: PathBuf,
    /// Whether the handle really bypasses the page cache
    direct: bool,
    /// Bytes accepted from callers
    logical_size: u64,
    /// Page size aligned buffer
    buffer: AlignedBuffer,
    /// Buffered bytes not yet on disk
    offset: usize,
    /// Aligned writes issued so far
    physical_writes: u64,
    /// Set once a buffer failed to reach the disk
    failed: bool,
    closed: bool,
}

impl DirectIoWritableFile {
    /// Create (or truncate) `path` for direct I/O writing
    ///
    /// The buffer holds `buffer_pages` OS pages.
    pub fn create(path: impl AsRef<Path>, buffer_pages: usize) -> Result<Self> {
        Self::open(path, buffer_pages, true)
    }

    /// Create (or truncate) `path`, choosing whether to request direct I/O
    ///
    /// The buffering and padding behavior is the same either way.
    pub fn open(path: impl AsRef<Path>, buffer_pages: usize, direct_io: bool) -> Result<Self> {
        let path = path.as_ref();
        if buffer_pages == 0 {
            return Err(Error::configuration(
                "direct I/O buffer must hold at least one page",
            ));
        }

        let page = raw_io::page_size();
        let capacity = buffer_pages.checked_mul(page).ok_or_else(|| {
            Error::configuration(format!("direct I/O buffer of {buffer_pages} pages overflows"))
        })?;
        let buffer = AlignedBuffer::with_alignment(capacity, page)?;
        let (file, direct) = raw_io::create_file(path, direct_io)?;

        debug!(
            path = %path.display(),
            capacity,
            direct,
            "created writable file"
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            direct,
            logical_size: 0,
            buffer,
            offset: 0,
            physical_writes: 0,
            failed: false,
            closed: false,
        })
    }

    /// Append `data`
    ///
    /// Always accepts the whole slice; the only failures are hard I/O errors
    /// from flushing a full buffer, which carry the OS error code.
    ///
    /// A failed flush discards the buffer and leaves the file failed: every
    /// later `write` and `close` returns an error without touching the disk.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::storage(format!(
                "write to closed file {}",
                self.path.display()
            )));
        }
        if self.failed {
            return Err(self.failed_error());
        }

        let capacity = self.buffer.len();
        let mut remaining = data;
        while !remaining.is_empty() {
            let n = remaining.len().min(capacity - self.offset);
            self.buffer.as_mut_slice()[self.offset..self.offset + n]
                .copy_from_slice(&remaining[..n]);
            self.offset += n;
            self.logical_size += n as u64;
            remaining = &remaining[n..];

            if self.offset == capacity {
                let flushed = self.write_buffer(capacity);
                self.offset = 0;
                if let Err(e) = flushed {
                    self.failed = true;
                    return Err(e);
                }
            }
        }

        Ok(data.len())
    }

    /// Flush the tail and truncate the file to its logical size
    ///
    /// Idempotent. Returns the logical size.
    pub fn close(&mut self) -> Result<u64> {
        if self.closed {
            return Ok(self.logical_size);
        }
        // A failed close is not retried from Drop.
        self.closed = true;
        if self.failed {
            return Err(self.failed_error());
        }

        if self.offset > 0 {
            let padded = raw_io::round_up(self.offset, self.buffer.alignment());
            self.buffer.as_mut_slice()[self.offset..padded].fill(0);
            self.write_buffer(padded)?;
            self.offset = 0;
        }

        // Must follow the tail write: it reclaims the padding.
        self.file
            .set_len(self.logical_size)
            .map_err(|e| Error::file_io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            size = self.logical_size,
            physical_writes = self.physical_writes,
            "closed writable file"
        );
        Ok(self.logical_size)
    }

    fn failed_error(&self) -> Error {
        Error::storage(format!(
            "{} is unusable after a failed write",
            self.path.display()
        ))
    }

    fn write_buffer(&mut self, len: usize) -> Result<()> {
        self.file
            .write_all(&self.buffer.as_slice()[..len])
            .map_err(|e| Error::file_io(&self.path, e))?;
        self.physical_writes += 1;
        Ok(())
    }

    /// Total bytes accepted by `write`
    pub const fn logical_size(&self) -> u64 {
        self.logical_size
    }

    /// Bytes held in the buffer, not yet written to disk
    pub const fn buffered_len(&self) -> usize {
        self.offset
    }

    /// Buffer capacity in bytes
    pub const fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of aligned writes issued to the file
    pub const fn physical_writes(&self) -> u64 {
        self.physical_writes
    }

    /// Whether the page cache is actually bypassed
    pub const fn is_direct(&self) -> bool {
        self.direct
    }

    /// Whether a buffer failed to reach the disk
    pub const fn is_failed(&self) -> bool {
        self.failed
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirectIoWritableFile {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                error!(path = %self.path.display(), error = %e, "failed to finalize file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tempfile::TempDir;

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).unwrap().len()
    }

    fn scratch() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.bin");
        (dir, path)
    }

    #[test]
    fn test_random_write_sequences_keep_logical_size() {
        let mut rng = rand::thread_rng();
        let page = raw_io::page_size();

        for pages in [1, 2, 3, 8] {
            let (_dir, path) = scratch();
            let mut expected = Vec::new();
            {
                let mut file = DirectIoWritableFile::create(&path, pages).unwrap();
                assert_eq!(file.capacity(), pages * page);

                for _ in 0..rng.gen_range(1..40) {
                    let len = match rng.gen_range(0..4) {
                        0 => 0,
                        1 => rng.gen_range(1..64),
                        2 => rng.gen_range(1..page * 2),
                        _ => rng.gen_range(page..page * 12),
                    };
                    let mut chunk = vec![0u8; len];
                    rng.fill(&mut chunk[..]);

                    assert_eq!(file.write(&chunk).unwrap(), len);
                    expected.extend_from_slice(&chunk);
                    assert_eq!(file.logical_size(), expected.len() as u64);
                    assert!(file.buffered_len() < file.capacity());
                }
                assert_eq!(file.close().unwrap(), expected.len() as u64);
            }

            assert_eq!(file_len(&path), expected.len() as u64);
            assert_eq!(std::fs::read(&path).unwrap(), expected);
        }
    }

    #[test]
    fn test_zero_length_write_is_noop() {
        let (_dir, path) = scratch();
        let mut file = DirectIoWritableFile::create(&path, 1).unwrap();

        assert_eq!(file.write(&[]).unwrap(), 0);
        assert_eq!(file.logical_size(), 0);
        assert_eq!(file.buffered_len(), 0);
        assert_eq!(file.physical_writes(), 0);

        file.close().unwrap();
        assert_eq!(file.physical_writes(), 0);
        assert_eq!(file_len(&path), 0);
    }

    #[test]
    fn test_exact_capacity_write_leaves_no_residual() {
        let (_dir, path) = scratch();
        let mut file = DirectIoWritableFile::create(&path, 2).unwrap();
        let capacity = file.capacity();

        file.write(&vec![7u8; capacity]).unwrap();
        assert_eq!(file.physical_writes(), 1);
        assert_eq!(file.buffered_len(), 0);

        file.write(&vec![9u8; capacity * 3]).unwrap();
        assert_eq!(file.physical_writes(), 4);
        assert_eq!(file.buffered_len(), 0);

        file.close().unwrap();
        // nothing left to pad
        assert_eq!(file.physical_writes(), 4);
        assert_eq!(file_len(&path), (capacity * 4) as u64);
    }

    #[test]
    fn test_only_full_buffers_reach_disk_before_close() {
        let (_dir, path) = scratch();
        let mut file = DirectIoWritableFile::create(&path, 1).unwrap();
        let capacity = file.capacity();

        file.write(&vec![1u8; capacity + 10]).unwrap();
        assert_eq!(file.buffered_len(), 10);
        assert_eq!(file_len(&path), capacity as u64);

        file.close().unwrap();
        assert_eq!(file_len(&path), capacity as u64 + 10);
    }

    #[test]
    fn test_close_reclaims_padding() {
        let (_dir, path) = scratch();
        let mut file = DirectIoWritableFile::create(&path, 4).unwrap();

        file.write(b"tail that is not block aligned").unwrap();
        assert_eq!(file.close().unwrap(), 30);
        assert_eq!(file_len(&path), 30);
        assert_eq!(std::fs::read(&path).unwrap(), b"tail that is not block aligned");

        // idempotent
        assert_eq!(file.close().unwrap(), 30);
        assert_eq!(file.physical_writes(), 1);
    }

    #[test]
    fn test_drop_flushes_and_truncates() {
        let (_dir, path) = scratch();
        {
            let mut file = DirectIoWritableFile::create(&path, 1).unwrap();
            file.write(b"hello ").unwrap();
            file.write(b"world").unwrap();
            assert_eq!(file_len(&path), 0);
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_buffered_open_behaves_the_same() {
        let (_dir, path) = scratch();
        let mut file = DirectIoWritableFile::open(&path, 1, false).unwrap();
        assert!(!file.is_direct());

        file.write(&vec![3u8; 5000]).unwrap();
        file.close().unwrap();
        assert_eq!(file_len(&path), 5000);
    }

    #[test]
    fn test_write_after_close_fails() {
        let (_dir, path) = scratch();
        let mut file = DirectIoWritableFile::create(&path, 1).unwrap();
        file.close().unwrap();

        assert!(file.is_closed());
        assert!(matches!(file.write(b"late"), Err(Error::Storage(_))));
        assert_eq!(file.logical_size(), 0);
    }

    #[test]
    fn test_zero_pages_rejected() {
        let (_dir, path) = scratch();
        let err = DirectIoWritableFile::create(&path, 0).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let (_dir, path) = scratch();
        std::fs::write(&path, vec![0xAAu8; 20_000]).unwrap();

        let mut file = DirectIoWritableFile::create(&path, 1).unwrap();
        file.write(b"new").unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_full_device_reports_os_error_and_fails_file() {
        let mut file = DirectIoWritableFile::open("/dev/full", 1, false).unwrap();
        let capacity = file.capacity();

        let err = file.write(&vec![1u8; capacity + 5]).unwrap_err();
        assert!(matches!(err, Error::FileIo { .. }), "{err}");
        assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));
        assert!(err.to_string().contains("/dev/full"));

        assert!(file.is_failed());
        assert_eq!(file.buffered_len(), 0);
        assert_eq!(file.physical_writes(), 0);

        // no retry of the lost buffer
        let again = file.write(b"more").unwrap_err();
        assert!(matches!(again, Error::Storage(_)), "{again}");
        assert!(file.close().is_err());
        assert!(file.is_closed());
        assert_eq!(file.physical_writes(), 0);
    }
}
