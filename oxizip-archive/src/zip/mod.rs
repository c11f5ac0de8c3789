//! ZIP archive support.
//!
//! Reading and writing of ZIP archives as specified in the PKWARE APPNOTE,
//! with Zip64, traditional PKWARE encryption and WinZip AES.
//!
//! - [`ZipArchiveWriter`] compresses entries concurrently and writes them
//!   through an ordered queue.
//! - [`ZipArchiveReader`] parses the central directory and extracts
//!   entries concurrently through pooled read handles.

pub mod aes;
pub mod crypto;
pub mod entry;
pub mod extra;
pub mod header;
pub mod mask;
pub mod name;
pub mod options;
pub mod queue;
pub mod reader;
pub mod source;
pub mod temp;
pub mod time;
pub mod writer;

pub use entry::ZipEntry;
pub use extra::AesStrength;
pub use header::CompressionMethod;
pub use name::{encoding_for_label, sanitize_entry_name};
pub use options::{Compression, DeflateLevel, Encryption, ReaderOptions, TimestampMode, WriterOptions};
pub use reader::ZipArchiveReader;
pub use source::ArchiveSource;
pub use writer::{EntryTimes, ZipArchiveWriter};
