//! ZIP archive reader.
//!
//! Opening reads the end-of-central-directory record (and its Zip64
//! counterpart, if a locator precedes it) from the tail of the source, then
//! parses the whole central directory. Local headers are only read when an
//! entry is extracted.
//!
//! Extraction is safe to run from many threads: every call takes its own
//! handle from the [`SourcePool`] and a permit from the reader's
//! [`Limiter`].
//!
//! # Example
//!
//! ```rust
//! use oxizip_archive::zip::{ReaderOptions, WriterOptions, ZipArchiveReader, ZipArchiveWriter};
//!
//! let writer = ZipArchiveWriter::new(Vec::new(), WriterOptions::default()).unwrap();
//! writer.add_bytes("hello.txt", b"Hello, World!").unwrap();
//! let bytes = writer.into_inner().unwrap();
//!
//! let reader = ZipArchiveReader::from_bytes(bytes, ReaderOptions::default()).unwrap();
//! let entry = reader.entry_by_name("hello.txt").unwrap();
//! assert_eq!(reader.read_entry(entry).unwrap(), b"Hello, World!");
//! ```

use super::aes::AesDecryptReader;
use super::crypto::{ZipCryptoReader, check_byte};
use super::entry::ZipEntry;
use super::header::{
    CENTRAL_DIR_HEADER_LEN, CentralDirectoryHeader, CompressionMethod, END_OF_CENTRAL_DIR_LEN,
    END_OF_CENTRAL_DIR_SIG, EndOfCentralDirectory, ZIP64_END_OF_CENTRAL_DIR_LEN,
    ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG, ZIP64_END_OF_CENTRAL_DIR_SIG, ZIP64_LOCATOR_LEN, Zip64EndOfCentralDirectory, Zip64EndOfCentralDirectoryLocator, le_u32,
};
use super::mask::MaskPool;
use super::name::{decode_name, safe_extract_path};
use super::options::ReaderOptions;
use super::source::{ArchiveSource, SourcePool};
use super::temp::TempPool;
use flate2::read::DeflateDecoder;
use oxizip_core::io::read_full;
use oxizip_core::{
    BoundedReader, CheckpointReader, CrcWriter, FirstError, Limiter, OxiZipError, Result,
    TaskAbort, check_point,
};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// Size of the trailing window searched for the end record.
const EOCD_SEARCH_WINDOW: u64 =
    (EndOfCentralDirectory::MAX_COMMENT_LEN + END_OF_CENTRAL_DIR_LEN + ZIP64_LOCATOR_LEN) as u64;

/// Opened ZIP archive.
#[derive(Debug)]
pub struct ZipArchiveReader {
    options: ReaderOptions,
    pool: SourcePool,
    entries: Vec<ZipEntry>,
    by_name: HashMap<String, usize>,
    comment: String,
    zip64: bool,
    limiter: Limiter,
    temp: Arc<TempPool>,
    masks: Arc<MaskPool>,
}

impl ZipArchiveReader {
    /// Open an archive file.
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        Self::from_source(ArchiveSource::File(path.as_ref().to_path_buf()), options)
    }

    /// Open an in-memory archive.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, options: ReaderOptions) -> Result<Self> {
        Self::from_source(ArchiveSource::Bytes(bytes.into()), options)
    }

    /// Copy a non-seekable stream into a temp file and open that. The file
    /// is deleted when the reader is dropped.
    pub fn from_reader<R: Read>(reader: R, options: ReaderOptions) -> Result<Self> {
        let source = ArchiveSource::from_reader(reader, &options.temp_dir)?;
        Self::from_source(source, options)
    }

    /// Open an archive file through a memory map.
    #[cfg(feature = "mmap")]
    pub fn open_mmap(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        Self::from_source(ArchiveSource::map_file(path.as_ref())?, options)
    }

    /// Open an archive from any source.
    pub fn from_source(source: ArchiveSource, options: ReaderOptions) -> Result<Self> {
        let pool = SourcePool::new(source);
        let directory = read_directory(&pool, &options)?;

        let mut by_name = HashMap::with_capacity(directory.entries.len());
        for entry in &directory.entries {
            by_name.entry(entry.name().to_string()).or_insert(entry.index());
        }
        log::debug!(
            "opened archive: {} entries, zip64={}",
            directory.entries.len(),
            directory.zip64
        );

        Ok(Self {
            limiter: Limiter::new(options.parallelism),
            temp: Arc::new(TempPool::new(&options.temp_dir)),
            masks: MaskPool::global(),
            entries: directory.entries,
            comment: directory.comment,
            zip64: directory.zip64,
            by_name,
            pool,
            options,
        })
    }

    /// The reader's options.
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// All entries in central directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Entry by index.
    pub fn entry(&self, index: usize) -> Option<&ZipEntry> {
        self.entries.get(index)
    }

    /// First entry with this exact name.
    pub fn entry_by_name(&self, name: &str) -> Option<&ZipEntry> {
        self.by_name.get(name).map(|&index| &self.entries[index])
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Archive comment, cut at the first NUL.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// True if the directory was located through Zip64 records.
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// Read handles opened so far.
    pub fn open_handles(&self) -> usize {
        self.pool.open_handles()
    }

    /// Decode `entry` into `out`. Returns the number of bytes written.
    pub fn extract_to<W: Write>(&self, entry: &ZipEntry, mut out: W) -> Result<u64> {
        let abort = TaskAbort::new();
        self.extract_with(entry, &mut out, &abort)
            .map_err(|err| err.with_entry(entry.name(), entry.central_offset()))
    }

    /// Decode `entry` into memory.
    pub fn read_entry(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let capacity = entry.uncompressed_size().min(16 * 1024 * 1024) as usize;
        let mut data = Vec::with_capacity(capacity);
        self.extract_to(entry, &mut data)?;
        Ok(data)
    }

    /// Decode `entry` and check it, discarding the data.
    pub fn test_entry(&self, entry: &ZipEntry) -> Result<()> {
        if entry.is_directory() {
            return Ok(());
        }
        self.extract_to(entry, io::sink()).map(|_| ())
    }

    /// Decode `entry` into a file at `path`, restoring its timestamps.
    ///
    /// A partially written file is removed on failure.
    pub fn extract_to_file(&self, entry: &ZipEntry, path: &Path) -> Result<u64> {
        let abort = TaskAbort::new();
        self.extract_file_with(entry, path, &abort)
            .map_err(|err| err.with_entry(entry.name(), entry.central_offset()))
    }

    /// Extract every entry below `dir`.
    ///
    /// Directories are created first. Every target path is checked to stay
    /// below `dir` before anything is written. Files are then extracted in
    /// parallel; the first failure stops the rest and is returned. Returns
    /// the number of files extracted.
    pub fn extract_all(&self, dir: &Path) -> Result<usize> {
        let cancel = self.options.cancel.as_ref();
        let abort = TaskAbort::new();

        let mut files = Vec::new();
        let mut directories = Vec::new();
        for entry in &self.entries {
            let target = safe_extract_path(dir, entry.name())
                .map_err(|err| err.with_entry(entry.name(), entry.central_offset()))?;
            if entry.is_directory() {
                directories.push(target);
            } else {
                files.push((entry, target));
            }
        }

        fs::create_dir_all(dir)?;
        for directory in &directories {
            check_point(cancel, &abort)?;
            fs::create_dir_all(directory)?;
        }
        log::debug!(
            "extracting {} files into {}",
            files.len(),
            dir.display()
        );

        let errors = FirstError::new();
        files.par_iter().for_each(|(entry, target)| {
            let result = self
                .extract_file_with(entry, target, &abort)
                .map_err(|err| err.with_entry(entry.name(), entry.central_offset()));
            if let Err(err) = result {
                abort.abort(&err);
                errors.record(err);
            }
        });
        errors.into_result()?;
        Ok(files.len())
    }

    fn extract_file_with(&self, entry: &ZipEntry, path: &Path, abort: &TaskAbort) -> Result<u64> {
        if entry.is_directory() {
            return Err(OxiZipError::DirectoryExtraction {
                name: entry.name().to_string(),
            });
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let written = File::create(path).map_err(OxiZipError::from).and_then(|file| {
            let mut out = BufWriter::new(file);
            let written = self.extract_with(entry, &mut out, abort)?;
            out.flush()?;
            Ok(written)
        });
        let written = match written {
            Ok(written) => written,
            Err(err) => {
                if let Err(remove) = fs::remove_file(path) {
                    log::warn!("could not remove partial file {}: {}", path.display(), remove);
                }
                return Err(err);
            }
        };

        let accessed = filetime::FileTime::from_system_time(entry.accessed());
        let modified = filetime::FileTime::from_system_time(entry.modified());
        if let Err(err) = filetime::set_file_times(path, accessed, modified) {
            log::warn!("could not set times on {}: {}", path.display(), err);
        }
        Ok(written)
    }

    fn extract_with(&self, entry: &ZipEntry, out: &mut dyn Write, abort: &TaskAbort) -> Result<u64> {
        if entry.is_directory() {
            return Err(OxiZipError::DirectoryExtraction {
                name: entry.name().to_string(),
            });
        }
        let _permit = self.limiter.acquire();
        check_point(self.options.cancel.as_ref(), abort)?;

        let buffer = self.options.verify_before_output && entry.aes()?.is_some();
        if !buffer {
            return self.decode(entry, out, abort);
        }

        let mut staged = self.temp.staging(Some(entry.uncompressed_size()))?;
        let written = self.decode(entry, &mut staged, abort)?;
        staged.rewind()?;
        io::copy(&mut staged, out)?;
        Ok(written)
    }

    /// Decrypt, decompress and verify one entry.
    fn decode(&self, entry: &ZipEntry, out: &mut dyn Write, abort: &TaskAbort) -> Result<u64> {
        let cancel = self.options.cancel.as_ref();
        let mut handle = self.pool.acquire()?;
        let data_offset = entry.local(&mut handle)?.data_offset;
        handle.seek(SeekFrom::Start(data_offset))?;

        let body = BoundedReader::new(
            CheckpointReader::new(handle, cancel, abort),
            entry.compressed_size(),
        );
        let data_method = entry.data_method()?;
        let plain = self.decrypt(entry, body)?;

        let mut sink = CrcWriter::new(out);
        let plain = match data_method {
            CompressionMethod::Stored => {
                let mut plain = plain;
                io::copy(&mut plain, &mut sink)?;
                plain
            }
            CompressionMethod::Deflate => {
                let mut decoder = DeflateDecoder::new(plain);
                io::copy(&mut decoder, &mut sink)?;
                decoder.into_inner()
            }
            other => {
                return Err(OxiZipError::UnsupportedMethod {
                    method: other.to_u16(),
                });
            }
        };
        plain.finish()?;

        let expected = entry.uncompressed_size();
        if sink.count() != expected {
            return Err(OxiZipError::size_mismatch(expected, sink.count()));
        }
        if entry.checks_crc() && sink.crc32() != entry.crc32() {
            return Err(OxiZipError::crc_mismatch(entry.crc32(), sink.crc32()));
        }
        Ok(sink.count())
    }

    fn decrypt<R: Read>(&self, entry: &ZipEntry, body: BoundedReader<R>) -> Result<Plaintext<BoundedReader<R>>> {
        if !entry.is_encrypted() {
            return Ok(Plaintext::Plain(body));
        }
        let password = self
            .options
            .password
            .as_deref()
            .ok_or_else(|| OxiZipError::PasswordRequired {
                name: entry.name().to_string(),
            })?
            .as_bytes();

        match entry.aes()? {
            Some(aes) => {
                let length = body.len();
                let reader =
                    AesDecryptReader::with_pool(body, length, password, aes.strength, &self.masks)?;
                Ok(Plaintext::Aes(reader))
            }
            None => {
                let check = check_byte(
                    entry.crc32(),
                    entry.header().mtime,
                    entry.has_data_descriptor(),
                );
                Ok(Plaintext::Traditional(ZipCryptoReader::new(body, password, check)?))
            }
        }
    }
}

/// The entry body after the decryption layer.
enum Plaintext<R: Read> {
    Plain(R),
    Traditional(ZipCryptoReader<R>),
    Aes(AesDecryptReader<R>),
}

impl<R: Read> Plaintext<R> {
    /// Check the AES authentication code once the data has been consumed.
    fn finish(self) -> Result<()> {
        match self {
            Self::Aes(reader) => reader.finish().map(|_| ()),
            Self::Plain(_) | Self::Traditional(_) => Ok(()),
        }
    }
}

impl<R: Read> Read for Plaintext<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(reader) => reader.read(buf),
            Self::Traditional(reader) => reader.read(buf),
            Self::Aes(reader) => reader.read(buf),
        }
    }
}

struct Directory {
    entries: Vec<ZipEntry>,
    comment: String,
    zip64: bool,
}

/// Locate and parse the central directory.
fn read_directory(pool: &SourcePool, options: &ReaderOptions) -> Result<Directory> {
    let len = pool.source().len()?;
    let mut handle = pool.acquire()?;

    let window = len.min(EOCD_SEARCH_WINDOW);
    let tail_start = len - window;
    handle.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0u8; window as usize];
    read_full(&mut handle, &mut tail, "archive tail")?;

    let eocd_at = find_eocd(&tail).ok_or(OxiZipError::EndOfCentralDirectoryNotFound)?;
    let eocd = EndOfCentralDirectory::parse(&tail[eocd_at..])?;
    let eocd_offset = tail_start + eocd_at as u64;
    if eocd.disk_number != 0 || eocd.cd_start_disk != 0 {
        return Err(OxiZipError::invalid_header("spanned archives are not supported"));
    }

    let locator_at = eocd_at.checked_sub(ZIP64_LOCATOR_LEN);
    let locator = locator_at
        .filter(|&at| le_u32(&tail, at) == ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG)
        .map(|at| Zip64EndOfCentralDirectoryLocator::parse(&tail[at..]))
        .transpose()?;

    let (total_entries, cd_size, cd_offset, directory_end) = match &locator {
        Some(locator) => {
            let locator_offset = eocd_offset - ZIP64_LOCATOR_LEN as u64;
            let (record_offset, record) =
                read_zip64_record(&mut handle, locator.zip64_eocd_offset, locator_offset)?;
            (
                record.total_entries,
                record.cd_size,
                record.cd_offset,
                record_offset,
            )
        }
        None => (
            eocd.total_entries as u64,
            eocd.cd_size as u64,
            eocd.cd_offset as u64,
            eocd_offset,
        ),
    };

    let cd_end = cd_offset.checked_add(cd_size);
    let Some(cd_end) = cd_end.filter(|&end| end <= directory_end) else {
        return Err(OxiZipError::invalid_header(format!(
            "central directory at {} ({} bytes) runs past its end record at {}",
            cd_offset, cd_size, directory_end
        )));
    };
    // Stored offsets are relative to the start of the archive proper. Any
    // gap between the directory and its end record is data in front of it.
    let base_offset = directory_end - cd_end;
    if base_offset > 0 {
        log::debug!("archive starts {} bytes into its source", base_offset);
    }
    let min_record = CENTRAL_DIR_HEADER_LEN as u64;
    if total_entries.saturating_mul(min_record) > cd_size {
        return Err(OxiZipError::invalid_header(format!(
            "{} entries cannot fit in a {} byte central directory",
            total_entries, cd_size
        )));
    }

    let cd_start = cd_offset + base_offset;
    handle.seek(SeekFrom::Start(cd_start))?;
    let mut directory = BoundedReader::new(&mut handle, cd_size);
    let mut entries = Vec::with_capacity(total_entries as usize);
    for index in 0..total_entries as usize {
        let central_offset = cd_start + directory.position();
        let header = CentralDirectoryHeader::read(&mut directory)?;
        entries.push(
            ZipEntry::new(index, central_offset, header, options.encoding)
                .with_base_offset(base_offset),
        );
    }

    let raw_comment = eocd.comment.split(|&b| b == 0).next().unwrap_or_default();
    let comment = decode_name(raw_comment, options.encoding).into_owned();

    Ok(Directory {
        entries,
        comment,
        zip64: locator.is_some(),
    })
}

/// Find the Zip64 end record the locator points to.
///
/// An archive behind a prefix its offsets do not count still has the record
/// directly in front of the locator, so that position is tried second.
fn read_zip64_record<R: Read + Seek>(
    handle: &mut R,
    stored_offset: u64,
    locator_offset: u64,
) -> Result<(u64, Zip64EndOfCentralDirectory)> {
    let adjacent = locator_offset.checked_sub(ZIP64_END_OF_CENTRAL_DIR_LEN as u64);
    let candidates = std::iter::once(stored_offset)
        .chain(adjacent.filter(|&at| at != stored_offset))
        .filter(|&at| at < locator_offset);
    for offset in candidates {
        handle.seek(SeekFrom::Start(offset))?;
        let mut signature = [0u8; 4];
        if read_full(handle, &mut signature, "Zip64 end record").is_ok()
            && u32::from_le_bytes(signature) == ZIP64_END_OF_CENTRAL_DIR_SIG
        {
            handle.seek(SeekFrom::Start(offset))?;
            return Ok((offset, Zip64EndOfCentralDirectory::read(handle)?));
        }
    }
    Err(OxiZipError::invalid_header(format!(
        "no Zip64 end record at {} as its locator says",
        stored_offset
    )))
}

/// Offset of the last end record signature in `tail`.
fn find_eocd(tail: &[u8]) -> Option<usize> {
    if tail.len() < END_OF_CENTRAL_DIR_LEN {
        return None;
    }
    (0..=tail.len() - END_OF_CENTRAL_DIR_LEN)
        .rev()
        .find(|&at| le_u32(tail, at) == END_OF_CENTRAL_DIR_SIG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::{Encryption, WriterOptions, ZipArchiveWriter};

    fn build(options: WriterOptions, files: &[(&str, &[u8])]) -> Vec<u8> {
        let writer = ZipArchiveWriter::new(Vec::new(), options).unwrap();
        for (name, data) in files {
            writer.add_bytes(name, data).unwrap();
        }
        writer.into_inner().unwrap()
    }

    #[test]
    fn test_find_eocd() {
        let mut tail = vec![0u8; 40];
        tail[10..14].copy_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        assert_eq!(find_eocd(&tail), Some(10));
        assert_eq!(find_eocd(&tail[..20]), None);
        assert_eq!(find_eocd(&[]), None);
    }

    #[test]
    fn test_empty_archive() {
        let bytes = build(WriterOptions::default(), &[]);
        assert_eq!(bytes.len(), END_OF_CENTRAL_DIR_LEN);
        let reader = ZipArchiveReader::from_bytes(bytes, ReaderOptions::default()).unwrap();
        assert!(reader.is_empty());
        assert!(!reader.is_zip64());
    }

    #[test]
    fn test_comment_cut_at_nul() {
        let options = WriterOptions::default().with_comment("release\0junk");
        let bytes = build(options, &[("a.txt", b"a")]);
        let reader = ZipArchiveReader::from_bytes(bytes, ReaderOptions::default()).unwrap();
        assert_eq!(reader.comment(), "release");
    }

    #[test]
    fn test_directory_extraction_rejected() {
        let bytes = build(WriterOptions::default(), &[("dir/file.txt", b"x")]);
        let reader = ZipArchiveReader::from_bytes(bytes, ReaderOptions::default()).unwrap();
        let dir = reader.entry_by_name("dir/").unwrap();
        assert!(dir.is_directory());
        let err = reader.read_entry(dir).unwrap_err();
        assert!(matches!(err.root(), OxiZipError::DirectoryExtraction { .. }));
        assert!(reader.test_entry(dir).is_ok());
    }

    #[test]
    fn test_password_required() {
        let options = WriterOptions::default()
            .with_encryption(Encryption::Traditional)
            .with_password("pw");
        let bytes = build(options, &[("s.txt", b"secret data")]);
        let reader = ZipArchiveReader::from_bytes(bytes, ReaderOptions::default()).unwrap();
        let err = reader.read_entry(&reader.entries()[0]).unwrap_err();
        assert!(matches!(err.root(), OxiZipError::PasswordRequired { .. }));
    }

    #[test]
    fn test_from_reader_stream() {
        let bytes = build(WriterOptions::default(), &[("s.txt", b"streamed")]);
        let reader =
            ZipArchiveReader::from_reader(io::Cursor::new(bytes), ReaderOptions::default()).unwrap();
        assert_eq!(reader.read_entry(&reader.entries()[0]).unwrap(), b"streamed");
    }

    #[test]
    fn test_verify_before_output_detects_tamper() {
        let options = WriterOptions::default()
            .with_store_directories(false)
            .with_compression(crate::zip::Compression::Stored)
            .with_encryption(Encryption::Aes128)
            .with_password("pw");
        let mut bytes = build(options, &[("a.bin", &[0x42u8; 1000])]);
        // Flip one ciphertext byte in the middle of the entry body.
        bytes[400] ^= 0x01;

        let reader = ZipArchiveReader::from_bytes(
            bytes,
            ReaderOptions::default()
                .with_password("pw")
                .with_verify_before_output(true),
        )
        .unwrap();
        let mut out = Vec::new();
        let err = reader.extract_to(&reader.entries()[0], &mut out).unwrap_err();
        assert!(matches!(err.root(), OxiZipError::AuthenticationFailed));
        assert!(out.is_empty());
    }
}
