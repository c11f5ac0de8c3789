//! Extract command implementation.

use super::reader_options;
use crate::utils::{create_progress_bar, filter_entries, resolve_password};
use oxizip_archive::ZipArchiveReader;
use oxizip_archive::zip::name::safe_extract_path;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Options for extracting an archive.
pub struct ExtractOptions<'a> {
    pub password: Option<String>,
    pub jobs: Option<usize>,
    pub include: &'a [String],
    pub exclude: &'a [String],
    pub verify_first: bool,
    pub encoding: Option<&'a str>,
    pub verbose: bool,
    pub progress: bool,
}

pub fn cmd_extract(
    archive: &Path,
    output: &Path,
    options: ExtractOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = reader_options(options.password.clone(), options.encoding, options.jobs)?
        .with_verify_before_output(options.verify_first);
    let mut reader = ZipArchiveReader::open(archive, base.clone())?;
    if options.password.is_none() && reader.entries().iter().any(|e| e.is_encrypted()) {
        let password = resolve_password(None, false)?;
        reader = ZipArchiveReader::open(archive, base.with_password(password))?;
    }

    println!("Extracting {} to {}", archive.display(), output.display());

    if options.include.is_empty() && options.exclude.is_empty() {
        let pb = create_progress_bar(0, options.progress && !options.verbose);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("{} entries", reader.len()));
        let result = reader.extract_all(output);
        pb.finish_and_clear();
        let count = result?;
        if options.verbose {
            for entry in reader.entries() {
                println!("  {}", entry.name());
            }
        }
        println!("Extracted {} files", count);
        return Ok(());
    }

    let selected = filter_entries(reader.entries(), options.include, options.exclude);
    let mut targets = Vec::with_capacity(selected.len());
    for entry in &selected {
        targets.push((*entry, safe_extract_path(output, entry.name())?));
    }

    let files = targets.iter().filter(|(e, _)| !e.is_directory()).count();
    let pb = create_progress_bar(files as u64, options.progress && !options.verbose);
    for (entry, target) in &targets {
        if entry.is_directory() {
            fs::create_dir_all(target)?;
            continue;
        }
        pb.set_message(entry.name().to_string());
        let written = reader.extract_to_file(entry, target)?;
        if options.verbose {
            println!("  {} ({} bytes)", entry.name(), written);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!("Extracted {} files", files);
    Ok(())
}
