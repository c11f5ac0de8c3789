//! Create command implementation.

use crate::utils::{create_progress_bar, resolve_password};
use clap::ValueEnum;
use oxizip_archive::zip::{
    Compression, DeflateLevel, Encryption, WriterOptions, ZipArchiveWriter,
};
use regex::Regex;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum CompressionLevel {
    /// Deflate framing without compression
    None,
    /// Fast compression
    Fast,
    /// Normal compression (default)
    #[default]
    Normal,
    /// Best compression
    Best,
}

impl CompressionLevel {
    fn to_deflate_level(self) -> DeflateLevel {
        match self {
            Self::None => DeflateLevel::NoCompression,
            Self::Fast => DeflateLevel::Fastest,
            Self::Normal => DeflateLevel::Optimal,
            Self::Best => DeflateLevel::SmallestSize,
        }
    }
}

/// Encryption scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncryptionKind {
    /// Traditional PKWARE encryption (weak, widely supported)
    Traditional,
    /// WinZip AES-128
    Aes128,
    /// WinZip AES-192
    Aes192,
    /// WinZip AES-256
    Aes256,
}

impl EncryptionKind {
    fn to_encryption(self) -> Encryption {
        match self {
            Self::Traditional => Encryption::Traditional,
            Self::Aes128 => Encryption::Aes128,
            Self::Aes192 => Encryption::Aes192,
            Self::Aes256 => Encryption::Aes256,
        }
    }
}

/// Options for creating an archive.
pub struct CreateOptions {
    pub store: bool,
    pub level: CompressionLevel,
    pub encryption: Option<EncryptionKind>,
    pub password: Option<String>,
    pub no_order: bool,
    pub exclude: Vec<String>,
    pub no_compress: Vec<String>,
    pub comment: Option<String>,
    pub jobs: Option<usize>,
    pub verbose: bool,
}

fn writer_options(
    options: CreateOptions,
) -> Result<(WriterOptions, Vec<Regex>), Box<dyn std::error::Error>> {
    let mut writer_options = WriterOptions::default()
        .with_compression(if options.store {
            Compression::Stored
        } else {
            Compression::Deflate
        })
        .with_level(options.level.to_deflate_level())
        .with_store_in_order_added(!options.no_order);

    if let Some(kind) = options.encryption {
        let password = resolve_password(options.password, true)?;
        writer_options = writer_options
            .with_encryption(kind.to_encryption())
            .with_password(password);
    }
    for pattern in &options.no_compress {
        writer_options = writer_options.with_no_compress_pattern(pattern)?;
    }
    if let Some(comment) = options.comment {
        writer_options = writer_options.with_comment(comment);
    }
    if let Some(jobs) = options.jobs {
        writer_options = writer_options.with_parallelism(jobs);
    }

    let excludes = options
        .exclude
        .iter()
        .map(|pattern| Regex::new(pattern))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((writer_options, excludes))
}

/// Entry name for a top-level path: its final component.
fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

pub fn cmd_create(
    archive: &Path,
    paths: &[PathBuf],
    options: CreateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let verbose = options.verbose;
    let (writer_options, excludes) = writer_options(options)?;

    let file = File::create(archive)?;
    let writer = ZipArchiveWriter::new(BufWriter::new(file), writer_options)?;

    println!("Creating {}", archive.display());
    let pb = create_progress_bar(0, !verbose);

    let added = thread::scope(|scope| -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let worker = scope.spawn(|| -> oxizip_core::Result<usize> {
            let mut added = 0usize;
            for path in paths {
                let name = base_name(path);
                if path.is_dir() {
                    added += writer.add_directory(path, &name, &excludes)?;
                } else {
                    writer.add_file(&name, path)?;
                    added += 1;
                }
                if verbose {
                    println!("  added: {}", path.display());
                }
            }
            Ok(added)
        });

        while !worker.is_finished() {
            pb.set_length(writer.total_file_count() as u64);
            pb.set_position(writer.zip_file_count() as u64);
            if let Some(name) = writer.in_process_filenames().first() {
                pb.set_message(name.clone());
            }
            thread::sleep(Duration::from_millis(100));
        }
        match worker.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err("compression thread panicked".into()),
        }
    });
    pb.finish_and_clear();
    let added = match added {
        Ok(added) => added,
        Err(e) => {
            drop(writer);
            if let Err(remove) = fs::remove_file(archive) {
                eprintln!("could not remove {}: {}", archive.display(), remove);
            }
            return Err(e.to_string().into());
        }
    };

    writer.finish()?;
    let entries = writer.zip_file_count();
    let size = writer.zip_file_size();
    writer.into_inner()?;

    println!(
        "Added {} files ({} entries), archive size {} bytes",
        added, entries, size
    );
    Ok(())
}
