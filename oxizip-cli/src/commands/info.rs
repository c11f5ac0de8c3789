//! Info command implementation.

use super::reader_options;
use crate::utils::savings;
use oxizip_archive::ZipArchiveReader;
use std::collections::BTreeMap;
use std::path::Path;

pub fn cmd_info(archive: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let metadata = std::fs::metadata(archive)?;
    let reader = ZipArchiveReader::open(archive, reader_options(None, None, None)?)?;
    let entries = reader.entries();

    println!("Archive Information");
    println!("===================");
    println!("File: {}", archive.display());
    println!("Size: {} bytes", metadata.len());
    println!("Zip64: {}", if reader.is_zip64() { "yes" } else { "no" });
    if !reader.comment().is_empty() {
        println!("Comment: {}", reader.comment());
    }

    let total_size: u64 = entries.iter().map(|e| e.uncompressed_size()).sum();
    let total_compressed: u64 = entries.iter().map(|e| e.compressed_size()).sum();

    println!();
    println!("Contents:");
    println!(
        "  Files: {}",
        entries.iter().filter(|e| !e.is_directory()).count()
    );
    println!(
        "  Directories: {}",
        entries.iter().filter(|e| e.is_directory()).count()
    );
    println!(
        "  Encrypted: {}",
        entries.iter().filter(|e| e.is_encrypted()).count()
    );
    println!("  Total size: {} bytes", total_size);
    println!("  Compressed size: {} bytes", total_compressed);
    if total_size > 0 {
        println!(
            "  Compression ratio: {:.1}%",
            savings(total_size, total_compressed)
        );
    }

    let mut methods: BTreeMap<String, usize> = BTreeMap::new();
    for entry in entries.iter().filter(|e| !e.is_directory()) {
        *methods.entry(crate::utils::method_label(entry)).or_default() += 1;
    }
    if !methods.is_empty() {
        println!();
        println!("Methods:");
        for (method, count) in methods {
            println!("  {}: {}", method, count);
        }
    }
    Ok(())
}
