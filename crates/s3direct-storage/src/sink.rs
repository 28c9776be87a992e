//! Byte sinks for downloaded object bodies
//!
//! [`DirectIoFileSink`] plugs a [`DirectIoWritableFile`] into anything that
//! writes through `std::io::Write`. [`LocalFileSink`] picks between it and a
//! plain buffered file.

use crate::writable::DirectIoWritableFile;
use parking_lot::Mutex;
use s3direct_common::{Error, Result};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Write-only stream device over a shared [`DirectIoWritableFile`]
///
/// Handles are cheap to clone and all feed the same file; the mutex keeps
/// it to one writer at a time. The file is finalized by [`close`](Self::close)
/// or when the last handle goes away.
#[derive(Clone, Debug)]
pub struct DirectIoFileSink {
    writable_file: Arc<Mutex<DirectIoWritableFile>>,
}

impl DirectIoFileSink {
    /// Create (or truncate) `path` behind a new sink
    pub fn create(path: impl AsRef<Path>, buffer_pages: usize) -> Result<Self> {
        Ok(Self::from_file(DirectIoWritableFile::create(
            path,
            buffer_pages,
        )?))
    }

    pub fn from_file(file: DirectIoWritableFile) -> Self {
        Self {
            writable_file: Arc::new(Mutex::new(file)),
        }
    }

    /// Flush the tail and fix up the length; later writes on any handle fail
    pub fn close(&self) -> Result<u64> {
        self.writable_file.lock().close()
    }

    pub fn logical_size(&self) -> u64 {
        self.writable_file.lock().logical_size()
    }

    pub fn is_direct(&self) -> bool {
        self.writable_file.lock().is_direct()
    }
}

impl Write for DirectIoFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writable_file.lock().write(buf).map_err(io::Error::from)
    }

    /// Buffered bytes stay put: only whole pages can be written before close.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for DirectIoFileSink {
    /// Never readable; the sink only ever receives object bodies.
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "direct I/O sink is not readable",
        ))
    }
}

/// Local destination for an object body
#[derive(Debug)]
pub enum LocalFileSink {
    /// Regular page-cache backed file
    Buffered(BufWriter<File>),
    /// Page-cache bypassing file
    Direct(DirectIoFileSink),
}

impl LocalFileSink {
    /// Create (or truncate) `path`, creating missing parent directories
    pub fn create(path: impl AsRef<Path>, direct_io: bool, buffer_pages: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::file_io(parent, e))?;
        }

        if direct_io {
            return Ok(Self::Direct(DirectIoFileSink::create(path, buffer_pages)?));
        }

        let file = File::create(path).map_err(|e| Error::file_io(path, e))?;
        Ok(Self::Buffered(BufWriter::new(file)))
    }

    /// Push everything to the file and return the bytes written
    pub fn finish(self) -> Result<u64> {
        match self {
            Self::Buffered(writer) => {
                let file = writer
                    .into_inner()
                    .map_err(|e| Error::DiskIo(e.into_error()))?;
                Ok(file.metadata()?.len())
            }
            Self::Direct(sink) => sink.close(),
        }
    }
}

impl Write for LocalFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Buffered(w) => w.write(buf),
            Self::Direct(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Buffered(w) => w.flush(),
            Self::Direct(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sink_delegates_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut sink = DirectIoFileSink::create(&path, 1).unwrap();
        assert_eq!(sink.write(b"abc").unwrap(), 3);
        sink.write_all(&vec![b'x'; 10_000]).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.logical_size(), 10_003);

        assert_eq!(sink.close().unwrap(), 10_003);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 10_003);
    }

    #[test]
    fn test_sink_is_not_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectIoFileSink::create(dir.path().join("out.bin"), 1).unwrap();

        let mut buf = [0u8; 8];
        let err = sink.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_clones_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = DirectIoFileSink::create(&path, 1).unwrap();

        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let mut handle = sink.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        handle.write_all(&[i; 37]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(sink.close().unwrap(), 4 * 100 * 37);
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 4 * 100 * 37);
        // each 37 byte write landed whole
        assert!(data.chunks(37).all(|c| c.iter().all(|&b| b == c[0])));
    }

    #[test]
    fn test_write_after_close_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectIoFileSink::create(dir.path().join("out.bin"), 1).unwrap();
        sink.close().unwrap();

        let err = sink.write(b"late").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_last_handle_drop_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        {
            let mut a = DirectIoFileSink::create(&path, 2).unwrap();
            let mut b = a.clone();
            a.write_all(b"first ").unwrap();
            drop(a);
            b.write_all(b"second").unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"first second");
    }

    #[test]
    fn test_local_sink_variants() {
        let dir = tempfile::tempdir().unwrap();

        for direct in [false, true] {
            let path = dir.path().join(format!("nested/{direct}/out.bin"));
            let mut sink = LocalFileSink::create(&path, direct, 1).unwrap();
            assert_eq!(matches!(sink, LocalFileSink::Direct(_)), direct);

            sink.write_all(&vec![5u8; 6000]).unwrap();
            assert_eq!(sink.finish().unwrap(), 6000);
            assert_eq!(std::fs::read(&path).unwrap(), vec![5u8; 6000]);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_full_device_surfaces_os_error() {
        let file = DirectIoWritableFile::open("/dev/full", 1, false).unwrap();
        let capacity = file.capacity();
        let mut sink = DirectIoFileSink::from_file(file);

        let err = sink.write_all(&vec![0u8; capacity + 5]).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOSPC));

        let err = sink.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(sink.close().is_err());
    }
}
