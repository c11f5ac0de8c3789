//! # OxiZip Core
//!
//! Core components for the OxiZip archive engine.
//!
//! - [`crc`]: CRC-32 checksum
//! - [`io`]: bounded, CRC-counting and position-counting stream adaptors
//! - [`limiter`]: counting limiter for concurrent entry processing
//! - [`abort`]: cooperative abort and cancellation flags
//! - [`error`]: error types
//!
//! ## Example
//!
//! ```rust
//! use oxizip_core::crc::Crc32;
//! use oxizip_core::io::BoundedReader;
//! use std::io::{Cursor, Read};
//!
//! let mut window = BoundedReader::new(Cursor::new(b"Hello, World! trailing".to_vec()), 13);
//! let mut data = Vec::new();
//! window.read_to_end(&mut data).unwrap();
//! assert_eq!(Crc32::compute(&data), 0xEC4AC3D0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod abort;
pub mod crc;
pub mod error;
pub mod io;
pub mod limiter;

// Re-exports for convenience
pub use abort::{CancelToken, FirstError, TaskAbort, check_point};
pub use crc::Crc32;
pub use error::{OxiZipError, Result};
pub use io::{BoundedReader, CheckpointReader, CountingWriter, CrcReader, CrcWriter};
pub use limiter::{Limiter, Permit};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::abort::{CancelToken, TaskAbort};
    pub use crate::crc::Crc32;
    pub use crate::error::{OxiZipError, Result};
    pub use crate::limiter::Limiter;
}
