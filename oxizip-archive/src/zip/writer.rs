//! Concurrent ZIP archive writer.
//!
//! Each `add_*` call compresses (and optionally encrypts) its entry into a
//! pooled [`StagingBuffer`] on the calling thread, bounded by a
//! [`Limiter`]. Finished entries go through an [`OrderedQueue`]; whichever
//! thread finds no drain running writes the ready entries to the output.
//! Header offsets and the Zip64 decision are made at that point, when the
//! entry's position in the output is known.
//!
//! # Example
//!
//! ```rust
//! use oxizip_archive::zip::{ZipArchiveWriter, WriterOptions};
//!
//! let writer = ZipArchiveWriter::new(Vec::new(), WriterOptions::default()).unwrap();
//! writer.add_bytes("docs/readme.txt", b"hello").unwrap();
//! writer.finish().unwrap();
//! let archive = writer.into_inner().unwrap();
//! assert!(archive.len() > 5);
//! ```

use super::aes::{AesEncryptWriter, overhead};
use super::crypto::{ENCRYPTION_HEADER_SIZE, ZipCryptoWriter, check_byte};
use super::extra::{
    AesExtraField, AesStrength, ExtendedTimestamp, NtfsExtraField, UnicodePathExtraField,
    Zip64ExtraField,
};
use super::header::{
    ATTR_ARCHIVE, ATTR_DIRECTORY, CentralDirectoryHeader, CompressionMethod, EndOfCentralDirectory,
    FLAG_ENCRYPTED, FLAG_UTF8, LocalFileHeader, VERSION_MADE_BY, ZIP64_MARKER_16, ZIP64_MARKER_32,
    Zip64EndOfCentralDirectory, Zip64EndOfCentralDirectoryLocator, exceeds_u32, needs_zip64,
    saturate_u32, version_needed,
};
use super::mask::MaskPool;
use super::name::{encode_name, is_utf8, parent_directories, sanitize_entry_name};
use super::options::{Compression, Encryption, WriterOptions};
use super::queue::{OrderedQueue, Ticket};
use super::temp::{StagingBuffer, TempPool};
use super::time;
use flate2::write::DeflateEncoder;
use oxizip_core::{
    CheckpointReader, CountingWriter, CrcReader, FirstError, Limiter, OxiZipError, Result,
    TaskAbort, check_point,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

/// Files staged per `add_directory` batch, per unit of parallelism.
const DIRECTORY_BATCH_FACTOR: usize = 4;

/// Timestamps recorded for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryTimes {
    /// Last modification.
    pub modified: SystemTime,
    /// Last access.
    pub accessed: SystemTime,
    /// Creation.
    pub created: SystemTime,
}

impl EntryTimes {
    /// All three set to now.
    pub fn now() -> Self {
        Self::uniform(SystemTime::now())
    }

    /// All three set to `time`.
    pub fn uniform(time: SystemTime) -> Self {
        Self {
            modified: time,
            accessed: time,
            created: time,
        }
    }

    /// Times from file metadata; missing values fall back to the
    /// modification time, then to now.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        Self {
            modified,
            accessed: metadata.accessed().unwrap_or(modified),
            created: metadata.created().unwrap_or(modified),
        }
    }
}

/// An entry that has been compressed and encrypted and awaits output.
#[derive(Debug)]
struct StagedEntry {
    id: u64,
    name: String,
    raw_name: Vec<u8>,
    is_directory: bool,
    /// Compression applied to the data, before encryption.
    data_method: CompressionMethod,
    encryption: Encryption,
    crc32: u32,
    uncompressed_size: u64,
    compressed_size: u64,
    times: EntryTimes,
    data: Option<StagingBuffer>,
}

struct Output<W: Write> {
    writer: Option<CountingWriter<W>>,
    failed: Option<String>,
}

/// Decrements the in-flight count on drop.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// ZIP archive writer.
///
/// All `add_*` methods take `&self` and may be called from many threads at
/// once. The output itself is only ever written by one thread at a time.
pub struct ZipArchiveWriter<W: Write + Send> {
    options: WriterOptions,
    output: Mutex<Output<W>>,
    queue: OrderedQueue<StagedEntry>,
    central: Mutex<Vec<Vec<u8>>>,
    limiter: Limiter,
    temp: Arc<TempPool>,
    masks: Arc<MaskPool>,
    directories: Mutex<HashSet<String>>,
    in_process: Mutex<HashMap<u64, String>>,
    in_flight: AtomicUsize,
    accepted: AtomicUsize,
    written: AtomicUsize,
    bytes_written: AtomicU64,
    finishing: AtomicBool,
    finished: AtomicBool,
}

impl<W: Write + Send> ZipArchiveWriter<W> {
    /// Create a writer over `writer`, which is assumed to be at offset 0.
    pub fn new(writer: W, options: WriterOptions) -> Result<Self> {
        Self::with_offset(writer, 0, options)
    }

    /// Create a writer whose output already holds `start` bytes (for
    /// example a self-extractor stub).
    pub fn with_offset(writer: W, start: u64, options: WriterOptions) -> Result<Self> {
        options.validate()?;
        if !options.temp_dir.is_dir() {
            return Err(OxiZipError::invalid_option(format!(
                "temp directory {} does not exist",
                options.temp_dir.display()
            )));
        }
        Ok(Self {
            queue: OrderedQueue::new(options.store_in_order_added),
            limiter: Limiter::new(options.parallelism),
            temp: Arc::new(TempPool::new(&options.temp_dir)),
            masks: MaskPool::global(),
            output: Mutex::new(Output {
                writer: Some(CountingWriter::new(writer, start)),
                failed: None,
            }),
            central: Mutex::new(Vec::new()),
            directories: Mutex::new(HashSet::new()),
            in_process: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            written: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(start),
            finishing: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            options,
        })
    }

    /// The writer's options.
    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Add an in-memory buffer, timestamped now.
    pub fn add_bytes(&self, name: &str, data: &[u8]) -> Result<()> {
        self.add_entry(name, data, Some(data.len() as u64), EntryTimes::now())
    }

    /// Add everything `reader` yields, timestamped now.
    pub fn add_reader<R: Read>(&self, name: &str, reader: R, size_hint: Option<u64>) -> Result<()> {
        self.add_entry(name, reader, size_hint, EntryTimes::now())
    }

    /// Add a file from disk with its own timestamps.
    pub fn add_file(&self, name: &str, path: &Path) -> Result<()> {
        let metadata = fs::metadata(path)?;
        if metadata.is_dir() {
            return Err(OxiZipError::invalid_option(format!(
                "{} is a directory; use add_directory",
                path.display()
            )));
        }
        let file = File::open(path)?;
        self.add_entry(
            name,
            file,
            Some(metadata.len()),
            EntryTimes::from_metadata(&metadata),
        )
    }

    /// Add an entry from any reader with explicit timestamps.
    pub fn add_entry<R: Read>(
        &self,
        name: &str,
        reader: R,
        size_hint: Option<u64>,
        times: EntryTimes,
    ) -> Result<()> {
        let _in_flight = self.begin()?;
        let abort = TaskAbort::new();
        let name = self.prepare_name(name)?;
        let ticket = self.queue.reserve();
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.process(ticket, name, reader, size_hint, times, &abort)
    }

    /// Add an empty directory entry (stored as `name/`).
    pub fn add_empty_directory(&self, name: &str) -> Result<()> {
        let _in_flight = self.begin()?;
        let name = self.prepare_name(name)?;
        self.add_directory_entry(&format!("{}/", name), EntryTimes::now())
    }

    /// Add every file below `dir`, naming entries `prefix` + relative path.
    ///
    /// Files in a directory come before its subdirectories, each group
    /// sorted by name. Paths whose entry name matches one of `excludes` are
    /// skipped. Empty directories become directory entries. Files are
    /// compressed in parallel, a few times `parallelism` at a time, so the
    /// staging storage held by finished but unwritten entries stays bounded.
    /// The first failure stops the rest and is returned. Returns the number
    /// of files added.
    pub fn add_directory(&self, dir: &Path, prefix: &str, excludes: &[Regex]) -> Result<usize> {
        let _in_flight = self.begin()?;
        let prefix = prefix.trim_matches(['/', '\\']);

        let mut items = Vec::new();
        walk(dir, prefix, excludes, &mut items)?;
        log::debug!("adding {} items from {}", items.len(), dir.display());

        let abort = TaskAbort::new();
        let errors = FirstError::new();
        let batch_size = self.limiter.capacity() * DIRECTORY_BATCH_FACTOR;
        let mut batch = Vec::with_capacity(batch_size);
        let mut count = 0;
        for item in items {
            check_point(self.options.cancel.as_ref(), &abort)?;
            match item {
                WalkItem::EmptyDir { name, times } => {
                    let name = self.prepare_name(&name)?;
                    self.add_directory_entry(&format!("{}/", name), times)?;
                }
                WalkItem::File { path, name } => {
                    let name = self.prepare_name(&name)?;
                    batch.push((self.queue.reserve(), path, name));
                }
            }
            if batch.len() == batch_size {
                count += self.add_file_batch(std::mem::take(&mut batch), &abort, &errors);
                if abort.is_requested() {
                    break;
                }
            }
        }
        if !abort.is_requested() {
            count += self.add_file_batch(batch, &abort, &errors);
        }

        if let Err(err) = errors.into_result() {
            let _ = self.drain();
            return Err(err);
        }
        self.drain()?;
        Ok(count)
    }

    /// Compress one batch of files in parallel. Once this returns, every
    /// entry of the batch has been handed to the output drain or skipped.
    fn add_file_batch(
        &self,
        batch: Vec<(Ticket<'_, StagedEntry>, PathBuf, String)>,
        abort: &TaskAbort,
        errors: &FirstError,
    ) -> usize {
        let count = batch.len();
        self.accepted.fetch_add(count, Ordering::Relaxed);
        batch.into_par_iter().for_each(|(ticket, path, name)| {
            let opened = fs::metadata(&path).and_then(|metadata| {
                File::open(&path).map(|file| (file, metadata))
            });
            let result = match opened {
                Ok((file, metadata)) => self.process(
                    ticket,
                    name,
                    file,
                    Some(metadata.len()),
                    EntryTimes::from_metadata(&metadata),
                    abort,
                ),
                Err(err) => {
                    let id = ticket.id();
                    drop(ticket);
                    let _ = self.drain();
                    Err(OxiZipError::from(err).with_entry(name, id))
                }
            };
            if let Err(err) = result {
                abort.abort(&err);
                errors.record(err);
            }
        });
        count
    }

    /// Write the central directory and end records.
    ///
    /// Fails with [`OxiZipError::AlreadyFinished`] on a second call and with
    /// [`OxiZipError::TasksInFlight`] while any `add_*` call is running.
    pub fn finish(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) || self.finishing.swap(true, Ordering::SeqCst) {
            return Err(OxiZipError::AlreadyFinished);
        }
        let count = self.in_flight.load(Ordering::SeqCst);
        if count > 0 {
            self.finishing.store(false, Ordering::SeqCst);
            return Err(OxiZipError::TasksInFlight { count });
        }

        self.queue.wait_idle();
        self.drain()?;

        let mut output = self.output.lock();
        if let Some(cause) = &output.failed {
            return Err(OxiZipError::Aborted {
                cause: cause.clone(),
            });
        }
        let out = output.writer.as_mut().ok_or(OxiZipError::WriterFinished)?;

        let central = std::mem::take(&mut *self.central.lock());
        let cd_offset = out.position();
        for record in &central {
            out.write_all(record)?;
        }
        let cd_size = out.position() - cd_offset;
        let entries = central.len() as u64;

        let zip64 =
            entries >= ZIP64_MARKER_16 as u64 || exceeds_u32(cd_size) || exceeds_u32(cd_offset);
        if zip64 {
            let zip64_offset = out.position();
            out.write_all(&Zip64EndOfCentralDirectory::new(entries, cd_size, cd_offset).to_bytes())?;
            out.write_all(&Zip64EndOfCentralDirectoryLocator::new(zip64_offset).to_bytes())?;
        }

        let comment = encode_name(&self.options.comment, self.options.encoding);
        out.write_all(&EndOfCentralDirectory::new(entries, cd_size, cd_offset, &comment).to_bytes())?;
        out.flush()?;

        self.bytes_written.store(out.position(), Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
        log::debug!(
            "archive finished: {} entries, {} bytes, zip64={}",
            entries,
            out.position(),
            zip64
        );
        Ok(())
    }

    /// True once [`finish`](Self::finish) has completed.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Finish the archive if needed and return the output.
    pub fn into_inner(self) -> Result<W> {
        if !self.is_finished() {
            self.finish()?;
        }
        let output = self.output.into_inner();
        output
            .writer
            .map(CountingWriter::into_inner)
            .ok_or(OxiZipError::WriterFinished)
    }

    /// Entries written to the output so far.
    pub fn zip_file_count(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    /// Entries compressed but not yet written.
    pub fn write_queue_count(&self) -> usize {
        self.queue.len()
    }

    /// Entries currently being compressed or encrypted.
    pub fn compression_in_flight(&self) -> usize {
        self.in_process.lock().len()
    }

    /// Names of the entries currently being compressed, in add order.
    pub fn in_process_filenames(&self) -> Vec<String> {
        let in_process = self.in_process.lock();
        let mut named: Vec<(&u64, &String)> = in_process.iter().collect();
        named.sort_by_key(|(id, _)| **id);
        named.into_iter().map(|(_, name)| name.clone()).collect()
    }

    /// File entries accepted by `add_*` calls.
    pub fn total_file_count(&self) -> usize {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Temp files created for staging so far. Files are reused, so this is
    /// the peak number of spilled entries held at once, not a per-entry count.
    pub fn temp_file_count(&self) -> usize {
        self.temp.created_files()
    }

    /// Bytes written to the output, including anything before the archive.
    pub fn zip_file_size(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<InFlight<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if self.finishing.load(Ordering::SeqCst) || self.finished.load(Ordering::SeqCst) {
            return Err(OxiZipError::WriterFinished);
        }
        Ok(guard)
    }

    /// Sanitize, check the encoded length and emit parent directories.
    fn prepare_name(&self, name: &str) -> Result<String> {
        let name = sanitize_entry_name(name)?;
        if encode_name(&name, self.options.encoding).len() >= u16::MAX as usize {
            return Err(OxiZipError::invalid_name(name, "name is longer than 65534 bytes"));
        }
        if self.options.store_directories {
            for directory in parent_directories(&name) {
                self.add_directory_entry(&directory, EntryTimes::now())?;
            }
        }
        Ok(name)
    }

    /// Queue a directory entry unless one with this name was queued before.
    fn add_directory_entry(&self, name: &str, times: EntryTimes) -> Result<()> {
        let ticket = {
            // Reserving under the set lock keeps a directory ahead of every
            // entry that saw it in the set.
            let mut directories = self.directories.lock();
            if !directories.insert(name.to_string()) {
                return Ok(());
            }
            self.queue.reserve()
        };
        ticket.complete(StagedEntry {
            id: 0,
            raw_name: encode_name(name, self.options.encoding).into_owned(),
            name: name.to_string(),
            is_directory: true,
            data_method: CompressionMethod::Stored,
            encryption: Encryption::None,
            crc32: 0,
            uncompressed_size: 0,
            compressed_size: 0,
            times,
            data: None,
        });
        self.drain()
    }

    fn process<R: Read>(
        &self,
        ticket: Ticket<'_, StagedEntry>,
        name: String,
        reader: R,
        size_hint: Option<u64>,
        times: EntryTimes,
        abort: &TaskAbort,
    ) -> Result<()> {
        let id = ticket.id();
        self.in_process.lock().insert(id, name.clone());
        let staged = self.stage(id, &name, reader, size_hint, times, abort);
        self.in_process.lock().remove(&id);

        match staged {
            Ok(entry) => {
                ticket.complete(entry);
                self.drain().map_err(|err| err.with_entry(name, id))
            }
            Err(err) => {
                drop(ticket);
                abort.abort(&err);
                log::debug!("entry {} failed: {}", name, err);
                // Entries queued behind the skipped position can go out now.
                let _ = self.drain();
                Err(err.with_entry(name, id))
            }
        }
    }

    /// Compress, then encrypt, into pooled staging storage.
    fn stage<R: Read>(
        &self,
        id: u64,
        name: &str,
        reader: R,
        size_hint: Option<u64>,
        times: EntryTimes,
        abort: &TaskAbort,
    ) -> Result<StagedEntry> {
        let cancel = self.options.cancel.as_ref();
        let _permit = self.limiter.acquire();
        check_point(cancel, abort)?;

        let mut source = CrcReader::new(CheckpointReader::new(reader, cancel, abort));
        let compress = self.options.compression == Compression::Deflate
            && !self.options.skips_compression(name);

        let mut staged = self.temp.staging(size_hint)?;
        let data_method = if compress {
            let mut encoder = DeflateEncoder::new(staged, self.options.level.to_flate2());
            io::copy(&mut source, &mut encoder)?;
            staged = encoder.finish()?;
            CompressionMethod::Deflate
        } else {
            io::copy(&mut source, &mut staged)?;
            CompressionMethod::Stored
        };
        let crc32 = source.crc32();
        let uncompressed_size = source.count();

        let mut entry = StagedEntry {
            id,
            raw_name: encode_name(name, self.options.encoding).into_owned(),
            name: name.to_string(),
            is_directory: false,
            data_method,
            encryption: self.options.encryption,
            crc32,
            uncompressed_size,
            compressed_size: 0,
            times,
            data: None,
        };

        if uncompressed_size == 0 {
            entry.data_method = CompressionMethod::Stored;
            entry.encryption = Encryption::None;
            return Ok(entry);
        }

        let password = self.options.password.as_deref().unwrap_or_default().as_bytes();
        let data = match self.options.encryption {
            Encryption::None => staged,
            Encryption::Traditional => {
                let plain_len = staged.len()?;
                staged.rewind()?;
                let (dos_time, _) = time::to_dos(times.modified);
                let target = self
                    .temp
                    .staging(Some(plain_len + ENCRYPTION_HEADER_SIZE as u64))?;
                let mut cipher = ZipCryptoWriter::new(target, password, check_byte(crc32, dos_time, false))?;
                io::copy(&mut CheckpointReader::new(&mut staged, cancel, abort), &mut cipher)?;
                cipher.into_inner()
            }
            Encryption::Aes128 | Encryption::Aes192 | Encryption::Aes256 => {
                let strength = aes_strength(self.options.encryption)?;
                let plain_len = staged.len()?;
                staged.rewind()?;
                let target = self.temp.staging(Some(plain_len + overhead(strength)))?;
                let mut cipher = AesEncryptWriter::with_pool(target, password, strength, &self.masks)?;
                io::copy(&mut CheckpointReader::new(&mut staged, cancel, abort), &mut cipher)?;
                cipher.finish()?
            }
        };
        entry.compressed_size = data.len()?;
        entry.data = Some(data);
        Ok(entry)
    }

    fn drain(&self) -> Result<()> {
        self.queue.drain(|entry| self.write_entry(entry)).map(|_| ())
    }

    fn write_entry(&self, entry: StagedEntry) -> Result<()> {
        let mut output = self.output.lock();
        if let Some(cause) = &output.failed {
            return Err(OxiZipError::Aborted {
                cause: cause.clone(),
            });
        }
        let out = output.writer.as_mut().ok_or(OxiZipError::WriterFinished)?;
        let name = entry.name.clone();
        match self.write_record(out, entry) {
            Ok(()) => {
                self.bytes_written
                    .store(output.writer.as_ref().map_or(0, CountingWriter::position), Ordering::SeqCst);
                self.written.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                log::warn!("writing {} failed, output is unusable: {}", name, err);
                output.failed = Some(format!("writing {} failed: {}", name, err));
                Err(err)
            }
        }
    }

    fn write_record(&self, out: &mut CountingWriter<W>, mut entry: StagedEntry) -> Result<()> {
        let offset = out.position();
        let u = entry.uncompressed_size;
        let c = entry.compressed_size;
        let encoding = self.options.encoding;

        let aes = entry.encryption.aes_strength();
        let header_method = if aes.is_some() {
            CompressionMethod::Aes
        } else {
            entry.data_method
        };
        // AE-2 entries carry no CRC; the authentication code covers the data.
        let crc32 = if aes.is_some() { 0 } else { entry.crc32 };

        let mut flags = 0u16;
        if is_utf8(encoding) {
            flags |= FLAG_UTF8;
        }
        if entry.data_method == CompressionMethod::Deflate {
            flags |= self.options.level.flag_bits();
        }
        if entry.encryption.is_encrypted() {
            flags |= FLAG_ENCRYPTED;
        }

        let mut version = version_needed::STORED;
        if entry.is_directory {
            version = version.max(version_needed::DIRECTORY);
        }
        if entry.data_method == CompressionMethod::Deflate {
            version = version.max(version_needed::DEFLATE);
        }
        match entry.encryption {
            Encryption::None => {}
            Encryption::Traditional => version = version.max(version_needed::ZIPCRYPTO),
            _ => version = version.max(version_needed::AES),
        }

        // Either header carrying Zip64 data raises both to the Zip64 version.
        if needs_zip64(u, c, offset) {
            version = version.max(version_needed::ZIP64);
        }
        let zip64_local = Zip64ExtraField::for_local(u, c);
        let zip64_central = Zip64ExtraField::for_central(u, c, offset);

        let mut shared = Vec::new();
        if !is_utf8(encoding)
            && self.options.store_utf8_extra
            && entry.raw_name != entry.name.as_bytes()
        {
            UnicodePathExtraField::new(&entry.raw_name, &entry.name).write_to(&mut shared);
        }
        if let Some(strength) = aes {
            AesExtraField::new(strength, entry.data_method).write_to(&mut shared);
        }
        let mode = self.options.timestamp_mode;
        if mode.writes_ntfs() {
            NtfsExtraField {
                mtime: time::to_filetime(entry.times.modified),
                atime: time::to_filetime(entry.times.accessed),
                ctime: time::to_filetime(entry.times.created),
            }
            .write_to(&mut shared);
        }
        let extended = mode.writes_extended().then(|| {
            ExtendedTimestamp::new(
                time::to_unix32(entry.times.modified),
                time::to_unix32(entry.times.accessed),
                time::to_unix32(entry.times.created),
            )
        });

        let mut local_extra = Vec::new();
        zip64_local.write_to(&mut local_extra);
        local_extra.extend_from_slice(&shared);
        if let Some(extended) = &extended {
            extended.write_local(&mut local_extra);
        }

        let mut central_extra = Vec::new();
        zip64_central.write_to(&mut central_extra);
        central_extra.extend_from_slice(&shared);
        if let Some(extended) = &extended {
            extended.write_central(&mut central_extra);
        }

        let (mtime, mdate) = time::to_dos(entry.times.modified);
        let (local_compressed, local_uncompressed) = if zip64_local.is_empty() {
            (c as u32, u as u32)
        } else {
            (ZIP64_MARKER_32, ZIP64_MARKER_32)
        };

        let local = LocalFileHeader {
            version_needed: version,
            flags,
            method: header_method,
            mtime,
            mdate,
            crc32,
            compressed_size: local_compressed,
            uncompressed_size: local_uncompressed,
            file_name: entry.raw_name.clone(),
            extra: local_extra,
        };
        out.write_all(&local.to_bytes()?)?;
        if let Some(data) = entry.data.as_mut() {
            data.rewind()?;
            let copied = io::copy(data, out)?;
            if copied != c {
                return Err(OxiZipError::size_mismatch(c, copied));
            }
        }

        let central = CentralDirectoryHeader {
            version_made_by: VERSION_MADE_BY,
            version_needed: version,
            flags,
            method: header_method,
            mtime,
            mdate,
            crc32,
            compressed_size: saturate_u32(c),
            uncompressed_size: saturate_u32(u),
            disk_number_start: 0,
            internal_attr: 0,
            external_attr: if entry.is_directory {
                ATTR_DIRECTORY
            } else {
                ATTR_ARCHIVE
            },
            local_header_offset: saturate_u32(offset),
            file_name: entry.raw_name,
            extra: central_extra,
            comment: Vec::new(),
        };
        self.central.lock().push(central.to_bytes()?);
        log::trace!(
            "wrote entry #{} {} at {} ({} -> {} bytes)",
            entry.id,
            entry.name,
            offset,
            u,
            c
        );
        Ok(())
    }
}

impl<W: Write + Send> std::fmt::Debug for ZipArchiveWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchiveWriter")
            .field("written", &self.zip_file_count())
            .field("queued", &self.write_queue_count())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn aes_strength(encryption: Encryption) -> Result<AesStrength> {
    encryption
        .aes_strength()
        .ok_or_else(|| OxiZipError::invalid_option("not an AES encryption mode"))
}

enum WalkItem {
    File { path: PathBuf, name: String },
    EmptyDir { name: String, times: EntryTimes },
}

fn walk(dir: &Path, prefix: &str, excludes: &[Regex], items: &mut Vec<WalkItem>) -> Result<()> {
    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let file_name = dirent.file_name().to_string_lossy().into_owned();
        let name = if prefix.is_empty() {
            file_name
        } else {
            format!("{}/{}", prefix, file_name)
        };
        if excludes.iter().any(|re| re.is_match(&name)) {
            log::trace!("excluded {}", name);
            continue;
        }
        if dirent.file_type()?.is_dir() {
            subdirs.push((name, dirent.path()));
        } else {
            files.push((name, dirent.path()));
        }
    }
    files.sort();
    subdirs.sort();

    for (name, path) in files {
        items.push(WalkItem::File { path, name });
    }
    for (name, path) in subdirs {
        let before = items.len();
        walk(&path, &name, excludes, items)?;
        if items.len() == before {
            let times = fs::metadata(&path)
                .map(|metadata| EntryTimes::from_metadata(&metadata))
                .unwrap_or_else(|_| EntryTimes::now());
            items.push(WalkItem::EmptyDir { name, times });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::header::{LOCAL_FILE_HEADER_SIG, le_u16, le_u32};
    use oxizip_core::CancelToken;

    fn writer(options: WriterOptions) -> ZipArchiveWriter<Vec<u8>> {
        ZipArchiveWriter::new(Vec::new(), options).unwrap()
    }

    fn local_names(archive: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        let mut pos = 0;
        while pos + 30 <= archive.len() && le_u32(archive, pos) == LOCAL_FILE_HEADER_SIG {
            let compressed = le_u32(archive, pos + 18) as usize;
            let name_len = le_u16(archive, pos + 26) as usize;
            let extra_len = le_u16(archive, pos + 28) as usize;
            let name = &archive[pos + 30..pos + 30 + name_len];
            names.push(String::from_utf8_lossy(name).into_owned());
            pos += 30 + name_len + extra_len + compressed;
        }
        names
    }

    #[test]
    fn test_parents_emitted_once() {
        let w = writer(WriterOptions::default());
        w.add_bytes("a/b/one.txt", b"1").unwrap();
        w.add_bytes("a/b/two.txt", b"2").unwrap();
        w.add_bytes("a/three.txt", b"3").unwrap();
        let archive = w.into_inner().unwrap();
        assert_eq!(
            local_names(&archive),
            vec!["a/", "a/b/", "a/b/one.txt", "a/b/two.txt", "a/three.txt"]
        );
    }

    #[test]
    fn test_no_parent_entries_when_disabled() {
        let w = writer(WriterOptions::default().with_store_directories(false));
        w.add_bytes("a/b/one.txt", b"1").unwrap();
        w.add_empty_directory("empty").unwrap();
        let archive = w.into_inner().unwrap();
        assert_eq!(local_names(&archive), vec!["a/b/one.txt", "empty/"]);
    }

    #[test]
    fn test_finish_twice_and_add_after_finish() {
        let w = writer(WriterOptions::default());
        w.add_bytes("x", b"x").unwrap();
        w.finish().unwrap();
        assert!(matches!(w.finish(), Err(OxiZipError::AlreadyFinished)));
        assert!(matches!(w.add_bytes("y", b"y"), Err(OxiZipError::WriterFinished)));
        assert_eq!(w.zip_file_count(), 1);
    }

    #[test]
    fn test_finish_with_task_in_flight() {
        let w = writer(WriterOptions::default());
        let guard = w.begin().unwrap();
        assert!(matches!(w.finish(), Err(OxiZipError::TasksInFlight { count: 1 })));
        drop(guard);
        w.finish().unwrap();
    }

    #[test]
    fn test_invalid_name_rejected() {
        let w = writer(WriterOptions::default());
        let err = w.add_bytes("../escape.txt", b"x").unwrap_err();
        assert!(matches!(err, OxiZipError::PathTraversal { .. }));
        assert_eq!(w.total_file_count(), 0);
    }

    #[test]
    fn test_zero_byte_entry_is_stored_plain() {
        let options = WriterOptions::default()
            .with_encryption(Encryption::Aes256)
            .with_password("pw");
        let w = writer(options);
        w.add_bytes("empty.bin", b"").unwrap();
        let archive = w.into_inner().unwrap();
        // flags, method, crc, sizes
        assert_eq!(le_u16(&archive, 6) & FLAG_ENCRYPTED, 0);
        assert_eq!(le_u16(&archive, 8), 0);
        assert_eq!(le_u32(&archive, 14), 0);
        assert_eq!(le_u32(&archive, 18), 0);
        assert_eq!(le_u32(&archive, 22), 0);
    }

    #[test]
    fn test_no_compress_pattern_stores() {
        let options = WriterOptions::default()
            .with_no_compress_pattern(r"\.jpg$")
            .unwrap();
        let w = writer(options);
        w.add_bytes("photo.jpg", &[7u8; 4096]).unwrap();
        let archive = w.into_inner().unwrap();
        assert_eq!(le_u16(&archive, 8), 0);
        assert_eq!(le_u32(&archive, 18), 4096);
    }

    #[test]
    fn test_cancelled_add() {
        let token = CancelToken::new();
        token.cancel();
        let w = writer(WriterOptions::default().with_cancel(token));
        let err = w.add_bytes("x.txt", b"data").unwrap_err();
        assert!(err.is_cancelled());
        w.finish().unwrap();
        assert_eq!(w.zip_file_count(), 0);
    }

    #[test]
    fn test_queries_after_finish() {
        let w = writer(WriterOptions::default().with_store_directories(false));
        w.add_bytes("a.txt", b"aaaa").unwrap();
        w.add_bytes("b.txt", b"bbbb").unwrap();
        assert_eq!(w.total_file_count(), 2);
        assert_eq!(w.compression_in_flight(), 0);
        assert!(w.in_process_filenames().is_empty());
        w.finish().unwrap();
        let size = w.zip_file_size();
        let archive = w.into_inner().unwrap();
        assert_eq!(size, archive.len() as u64);
    }

    #[test]
    fn test_add_directory_order_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        fs::create_dir_all(dir.path().join("void")).unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("sub/c.log"), b"c").unwrap();
        fs::write(dir.path().join("sub/deeper/d.txt"), b"d").unwrap();

        let w = writer(WriterOptions::default());
        let excludes = vec![Regex::new(r"\.log$").unwrap()];
        let added = w.add_directory(dir.path(), "root", &excludes).unwrap();
        assert_eq!(added, 3);
        let archive = w.into_inner().unwrap();
        assert_eq!(
            local_names(&archive),
            vec![
                "root/",
                "root/a.txt",
                "root/b.txt",
                "root/sub/",
                "root/sub/deeper/",
                "root/sub/deeper/d.txt",
                "root/void/",
            ]
        );
    }
}
