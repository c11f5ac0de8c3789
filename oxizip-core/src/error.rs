//! Error types for OxiZip operations.
//!
//! Errors fall into four groups that callers usually treat differently:
//!
//! - **format** errors: the bytes on disk are not a valid archive
//! - **integrity** errors: the archive parses but an entry fails a check
//!   (CRC-32, declared size, password verifier, AES authentication tag)
//! - **usage** errors: the API was driven in an invalid order or with an
//!   invalid entry name
//! - **concurrency** outcomes: a sibling task failed ([`OxiZipError::Aborted`])
//!   or the caller cancelled ([`OxiZipError::Cancelled`])
//!
//! Use [`OxiZipError::is_format_error`] and friends to classify an error
//! without matching on every variant.

use std::io;
use thiserror::Error;

/// The main error type for OxiZip operations.
#[derive(Debug, Error)]
pub enum OxiZipError {
    /// I/O error from underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// A record did not start with the expected 4-byte signature.
    #[error("Invalid {record} signature: expected {expected:#010x}, found {found:#010x}")]
    InvalidSignature {
        /// Record being parsed.
        record: &'static str,
        /// Expected signature.
        expected: u32,
        /// Signature actually read.
        found: u32,
    },

    /// The archive ended in the middle of a record.
    #[error("Unexpected end of data while reading {what}")]
    UnexpectedEof {
        /// What was being read.
        what: &'static str,
    },

    /// Invalid header contents.
    #[error("Invalid header: {message}")]
    InvalidHeader {
        /// Description of the header error.
        message: String,
    },

    /// No end-of-central-directory record in the trailing search window.
    #[error("End of central directory record not found")]
    EndOfCentralDirectoryNotFound,

    /// Unsupported compression method.
    #[error("Unsupported compression method: {method}")]
    UnsupportedMethod {
        /// The compression method identifier.
        method: u16,
    },

    /// CRC checksum mismatch.
    #[error("CRC mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// Expected CRC value from archive.
        expected: u32,
        /// Computed CRC value from data.
        computed: u32,
    },

    /// Declared and actual uncompressed sizes differ.
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Size declared in the central directory.
        expected: u64,
        /// Number of bytes actually produced.
        actual: u64,
    },

    /// AES authentication code did not match the data.
    #[error("AES authentication code mismatch, the entry data is corrupted")]
    AuthenticationFailed,

    /// Password verification failed.
    #[error("Incorrect password")]
    IncorrectPassword,

    /// The entry is encrypted and no password was supplied.
    #[error("Entry is encrypted and no password was supplied: {name}")]
    PasswordRequired {
        /// Entry name.
        name: String,
    },

    /// `finish` was called a second time.
    #[error("Archive has already been finished")]
    AlreadyFinished,

    /// An entry was added after `finish` started.
    #[error("Cannot add entries after the archive has been finished")]
    WriterFinished,

    /// `finish` was called while entries were still being compressed.
    #[error("Cannot finish while {count} entries are still being processed")]
    TasksInFlight {
        /// Number of in-flight entries.
        count: usize,
    },

    /// Directory entries have no content to extract.
    #[error("Entry is a directory: {name}")]
    DirectoryExtraction {
        /// Entry name.
        name: String,
    },

    /// Entry name is empty or contains characters that cannot be stored.
    #[error("Invalid entry name {name:?}: {reason}")]
    InvalidEntryName {
        /// Name as given by the caller.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Path traversal detected (e.g., "../" in filename).
    #[error("Path traversal detected in entry: {path}")]
    PathTraversal {
        /// The suspicious path.
        path: String,
    },

    /// Entry not found in archive.
    #[error("Entry not found: {name}")]
    EntryNotFound {
        /// Name of the missing entry.
        name: String,
    },

    /// Invalid option value.
    #[error("Invalid option: {message}")]
    InvalidOption {
        /// Description of the problem.
        message: String,
    },

    /// Another task in the same batch failed.
    #[error("Aborted because another task failed: {cause}")]
    Aborted {
        /// Message of the original failure.
        cause: String,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// A failure while processing one entry, with entry diagnostics.
    #[error("{name} (central directory offset {position}): {source}")]
    Entry {
        /// Entry name.
        name: String,
        /// Offset of the entry's central directory record, or its add sequence number on write.
        position: u64,
        /// The underlying failure.
        #[source]
        source: Box<OxiZipError>,
    },
}

/// Result type alias for OxiZip operations.
pub type Result<T> = std::result::Result<T, OxiZipError>;

impl OxiZipError {
    /// Create an invalid signature error.
    pub fn invalid_signature(record: &'static str, expected: u32, found: u32) -> Self {
        Self::InvalidSignature {
            record,
            expected,
            found,
        }
    }

    /// Create an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(expected: u32, computed: u32) -> Self {
        Self::CrcMismatch { expected, computed }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(expected: u64, actual: u64) -> Self {
        Self::SizeMismatch { expected, actual }
    }

    /// Create an invalid entry name error.
    pub fn invalid_name(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidEntryName {
            name: name.into(),
            reason,
        }
    }

    /// Create a path traversal error.
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Create an entry not found error.
    pub fn entry_not_found(name: impl Into<String>) -> Self {
        Self::EntryNotFound { name: name.into() }
    }

    /// Create an invalid option error.
    pub fn invalid_option(message: impl Into<String>) -> Self {
        Self::InvalidOption {
            message: message.into(),
        }
    }

    /// Attach entry diagnostics to an error.
    ///
    /// Cancellation and sibling aborts are passed through unchanged so that
    /// callers can still match on them directly.
    pub fn with_entry(self, name: impl Into<String>, position: u64) -> Self {
        match self {
            Self::Cancelled | Self::Aborted { .. } | Self::Entry { .. } => self,
            other => Self::Entry {
                name: name.into(),
                position,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through [`OxiZipError::Entry`] wrappers.
    pub fn root(&self) -> &OxiZipError {
        match self {
            Self::Entry { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for malformed or truncated archive data.
    pub fn is_format_error(&self) -> bool {
        match self.root() {
            Self::Io(err) => err.kind() == io::ErrorKind::UnexpectedEof,
            Self::InvalidSignature { .. }
            | Self::UnexpectedEof { .. }
            | Self::InvalidHeader { .. }
            | Self::EndOfCentralDirectoryNotFound
            | Self::UnsupportedMethod { .. } => true,
            _ => false,
        }
    }

    /// True for checksum, size, password and authentication failures.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self.root(),
            Self::CrcMismatch { .. }
                | Self::SizeMismatch { .. }
                | Self::AuthenticationFailed
                | Self::IncorrectPassword
        )
    }

    /// True if the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

impl From<io::Error> for OxiZipError {
    fn from(err: io::Error) -> Self {
        // Cipher and bounded readers tunnel their own errors through io::Error.
        if err.get_ref().is_some_and(|inner| inner.is::<OxiZipError>()) {
            if let Some(Ok(inner)) = err.into_inner().map(|e| e.downcast::<OxiZipError>()) {
                return *inner;
            }
            return Self::invalid_header("lost tunneled error");
        }
        Self::Io(err)
    }
}

impl From<OxiZipError> for io::Error {
    fn from(err: OxiZipError) -> Self {
        match err {
            OxiZipError::Io(inner) => inner,
            other => {
                let kind = if other.is_format_error() {
                    io::ErrorKind::InvalidData
                } else {
                    io::ErrorKind::Other
                };
                io::Error::new(kind, other)
            }
        }
    }
}
