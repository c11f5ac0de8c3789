//! Command implementations for OxiZip CLI.

pub mod create;
pub mod extract;
pub mod info;
pub mod list;

pub use create::{CompressionLevel, CreateOptions, EncryptionKind, cmd_create};
pub use extract::{ExtractOptions, cmd_extract};
pub use info::cmd_info;
pub use list::{ListOptions, cmd_list};
pub use test::cmd_test;

use oxizip_archive::zip::{ReaderOptions, encoding_for_label};

/// Reader options shared by the read-side commands.
pub(crate) fn reader_options(
    password: Option<String>,
    encoding: Option<&str>,
    jobs: Option<usize>,
) -> Result<ReaderOptions, Box<dyn std::error::Error>> {
    let mut options = ReaderOptions::default();
    if let Some(password) = password {
        options = options.with_password(password);
    }
    if let Some(label) = encoding {
        options = options.with_encoding(encoding_for_label(label)?);
    }
    if let Some(jobs) = jobs {
        options = options.with_parallelism(jobs);
    }
    Ok(options)
}
