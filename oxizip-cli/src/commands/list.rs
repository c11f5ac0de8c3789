//! List command implementation.

use super::reader_options;
use crate::utils::{filter_entries, method_label, print_entries, savings, unix_seconds};
use oxizip_archive::{ZipArchiveReader, ZipEntry};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// JSON serializable entry data for archive listings.
#[derive(Debug, Serialize, Deserialize)]
struct EntryJson {
    name: String,
    size: u64,
    compressed_size: u64,
    ratio: f64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    crc: Option<u32>,
    mtime: u64,
    is_dir: bool,
    encrypted: bool,
    zip64: bool,
}

impl EntryJson {
    fn from_entry(entry: &ZipEntry) -> Self {
        Self {
            name: entry.name().to_string(),
            size: entry.uncompressed_size(),
            compressed_size: entry.compressed_size(),
            ratio: savings(entry.uncompressed_size(), entry.compressed_size()),
            method: method_label(entry),
            crc: entry.checks_crc().then(|| entry.crc32()),
            mtime: unix_seconds(entry.modified()),
            is_dir: entry.is_directory(),
            encrypted: entry.is_encrypted(),
            zip64: entry.is_zip64(),
        }
    }
}

/// JSON output for archive listing.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveListJson {
    archive: String,
    zip64: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    comment: String,
    entries: Vec<EntryJson>,
}

/// Options for listing archive contents.
pub struct ListOptions<'a> {
    pub verbose: bool,
    pub json: bool,
    pub include: &'a [String],
    pub exclude: &'a [String],
    pub encoding: Option<&'a str>,
}

pub fn cmd_list(archive: &Path, options: &ListOptions) -> Result<(), Box<dyn std::error::Error>> {
    let reader = ZipArchiveReader::open(archive, reader_options(None, options.encoding, None)?)?;
    let filtered = filter_entries(reader.entries(), options.include, options.exclude);

    if options.json {
        let output = ArchiveListJson {
            archive: archive.display().to_string(),
            zip64: reader.is_zip64(),
            comment: reader.comment().to_string(),
            entries: filtered.iter().map(|e| EntryJson::from_entry(e)).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Archive: {}", archive.display());
    if !reader.comment().is_empty() {
        println!("Comment: {}", reader.comment());
    }
    println!();
    print_entries(&filtered, options.verbose);
    Ok(())
}
