//! # OxiZip Archive
//!
//! Concurrent ZIP engine for OxiZip.
//!
//! - **Writer**: parallel DEFLATE compression into pooled staging storage,
//!   written in add order (or completion order) by a single drain
//! - **Reader**: central directory parsing with Zip64 support and bounded
//!   parallel extraction
//! - **Encryption**: traditional PKWARE and WinZip AES-128/192/256, the
//!   latter with a pipelined background keystream
//!
//! ## Example
//!
//! ```rust
//! use oxizip_archive::{ReaderOptions, WriterOptions, ZipArchiveReader, ZipArchiveWriter};
//!
//! let writer = ZipArchiveWriter::new(Vec::new(), WriterOptions::default()).unwrap();
//! writer.add_bytes("notes/today.txt", b"ship it").unwrap();
//! let archive = writer.into_inner().unwrap();
//!
//! let reader = ZipArchiveReader::from_bytes(archive, ReaderOptions::default()).unwrap();
//! for entry in reader.entries() {
//!     println!("{}", entry);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod zip;

// Re-exports
pub use zip::{
    Compression, DeflateLevel, Encryption, EntryTimes, ReaderOptions, TimestampMode, WriterOptions,
    ZipArchiveReader, ZipArchiveWriter, ZipEntry,
};
