//! s3direct Storage - Local file writing
//!
//! This crate implements the local side of an object download:
//! - Raw file creation bypassing the page cache (O_DIRECT / F_NOCACHE)
//! - Page-aligned transfer buffers
//! - A buffered writer that only issues aligned writes and fixes up the
//!   file length on close
//! - `std::io` sinks over that writer and over plain buffered files

pub mod raw_io;
pub mod sink;
pub mod writable;

// Re-exports
pub use raw_io::{AlignedBuffer, page_size};
pub use sink::{DirectIoFileSink, LocalFileSink};
pub use writable::DirectIoWritableFile;
