//! Central directory entries as seen by the reader.

use super::extra::{
    AesExtraField, EXTRA_AES, EXTRA_EXTENDED_TIMESTAMP, EXTRA_NTFS, EXTRA_UNICODE_PATH, EXTRA_ZIP64,
    ExtendedTimestamp, ExtraFieldMap, NtfsExtraField, UnicodePathExtraField, Zip64ExtraField,
};
use super::header::{
    CentralDirectoryHeader, CompressionMethod, FLAG_DATA_DESCRIPTOR, LocalFileHeader,
    ZIP64_MARKER_16, ZIP64_MARKER_32,
};
use super::name::decode_name;
use super::time;
use super::writer::EntryTimes;
use encoding_rs::Encoding;
use oxizip_core::{OxiZipError, Result};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::OnceLock;
use std::time::SystemTime;

/// A local header read back from the archive.
#[derive(Debug)]
pub struct LocalRecord {
    /// The parsed header.
    pub header: LocalFileHeader,
    /// Its extra fields.
    pub extra: ExtraFieldMap,
    /// Absolute offset of the entry data.
    pub data_offset: u64,
}

/// One entry of an opened archive.
#[derive(Debug)]
pub struct ZipEntry {
    index: usize,
    central_offset: u64,
    base_offset: u64,
    header: CentralDirectoryHeader,
    extra: ExtraFieldMap,
    zip64: Zip64ExtraField,
    name: String,
    comment: String,
    local: OnceLock<LocalRecord>,
}

impl ZipEntry {
    /// Wrap a parsed central directory record found at `central_offset`.
    pub fn new(
        index: usize,
        central_offset: u64,
        header: CentralDirectoryHeader,
        encoding: &'static Encoding,
    ) -> Self {
        let extra = ExtraFieldMap::parse(&header.extra);
        if extra.is_truncated() {
            log::debug!("entry #{} has a truncated extra field blob", index);
        }
        let zip64 = extra
            .get(EXTRA_ZIP64)
            .map(|payload| {
                Zip64ExtraField::parse(
                    payload,
                    header.uncompressed_size == ZIP64_MARKER_32,
                    header.compressed_size == ZIP64_MARKER_32,
                    header.local_header_offset == ZIP64_MARKER_32,
                    header.disk_number_start == ZIP64_MARKER_16,
                )
            })
            .unwrap_or_default();
        let name = resolve_name(&header, &extra, encoding);
        let comment = if header.is_utf8() {
            String::from_utf8_lossy(&header.comment).into_owned()
        } else {
            decode_name(&header.comment, encoding).into_owned()
        };
        Self {
            index,
            central_offset,
            base_offset: 0,
            header,
            extra,
            zip64,
            name,
            comment,
            local: OnceLock::new(),
        }
    }

    /// Shift stored offsets by the size of data in front of the archive,
    /// such as a self-extractor stub the offsets do not account for.
    pub fn with_base_offset(mut self, base: u64) -> Self {
        self.base_offset = base;
        self
    }

    /// Position in the central directory.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Absolute offset of the central directory record.
    pub fn central_offset(&self) -> u64 {
        self.central_offset
    }

    /// Entry name. Comes from the unicode path field when its CRC matches
    /// the header name, else from the header name in the archive's codepage.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw header name bytes.
    pub fn raw_name(&self) -> &[u8] {
        &self.header.file_name
    }

    /// Entry comment.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// The raw central directory record.
    pub fn header(&self) -> &CentralDirectoryHeader {
        &self.header
    }

    /// Central directory extra fields.
    pub fn extra_fields(&self) -> &ExtraFieldMap {
        &self.extra
    }

    /// True for directory entries.
    pub fn is_directory(&self) -> bool {
        self.header.is_directory()
    }

    /// True if the data is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.header.is_encrypted()
    }

    /// True if the entry is followed by a data descriptor.
    pub fn has_data_descriptor(&self) -> bool {
        self.header.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// True if any value came from the Zip64 extra field.
    pub fn is_zip64(&self) -> bool {
        !self.zip64.is_empty()
    }

    /// Method recorded in the header (99 for AES entries).
    pub fn method(&self) -> CompressionMethod {
        self.header.method
    }

    /// WinZip AES parameters, if present.
    pub fn aes(&self) -> Result<Option<AesExtraField>> {
        match self.extra.get(EXTRA_AES) {
            Some(payload) => AesExtraField::parse(payload),
            None => Ok(None),
        }
    }

    /// Compression applied to the data, looking through AES.
    pub fn data_method(&self) -> Result<CompressionMethod> {
        if self.header.method != CompressionMethod::Aes {
            return Ok(self.header.method);
        }
        self.aes()?
            .map(|aes| aes.method)
            .ok_or_else(|| OxiZipError::invalid_header("AES entry without AES extra field"))
    }

    /// Stored CRC-32.
    pub fn crc32(&self) -> u32 {
        self.header.crc32
    }

    /// True unless the entry is AE-2 and carries no CRC.
    pub fn checks_crc(&self) -> bool {
        match self.aes() {
            Ok(Some(aes)) => aes.checks_crc(),
            _ => true,
        }
    }

    /// Uncompressed size.
    pub fn uncompressed_size(&self) -> u64 {
        self.zip64
            .uncompressed_size
            .unwrap_or(self.header.uncompressed_size as u64)
    }

    /// Compressed size, including any encryption framing.
    pub fn compressed_size(&self) -> u64 {
        self.zip64
            .compressed_size
            .unwrap_or(self.header.compressed_size as u64)
    }

    /// Offset of the local header in the source, prefix included.
    pub fn local_header_offset(&self) -> u64 {
        let stored = self
            .zip64
            .local_header_offset
            .unwrap_or(self.header.local_header_offset as u64);
        stored.saturating_add(self.base_offset)
    }

    /// Last modification time: NTFS field, then extended timestamp, then DOS.
    pub fn modified(&self) -> SystemTime {
        if let Some(ntfs) = self.ntfs() {
            return time::from_filetime(ntfs.mtime);
        }
        if let Some(mtime) = self.extended().and_then(|ext| ext.mtime) {
            return time::from_unix32(mtime);
        }
        time::from_dos(self.header.mtime, self.header.mdate)
    }

    /// Last access time, falling back to the modification time.
    pub fn accessed(&self) -> SystemTime {
        if let Some(ntfs) = self.ntfs() {
            return time::from_filetime(ntfs.atime);
        }
        match self.extended().and_then(|ext| ext.atime) {
            Some(atime) => time::from_unix32(atime),
            None => self.modified(),
        }
    }

    /// Creation time, falling back to the modification time.
    pub fn created(&self) -> SystemTime {
        if let Some(ntfs) = self.ntfs() {
            return time::from_filetime(ntfs.ctime);
        }
        match self.extended().and_then(|ext| ext.ctime) {
            Some(ctime) => time::from_unix32(ctime),
            None => self.modified(),
        }
    }

    /// All three timestamps.
    pub fn times(&self) -> EntryTimes {
        EntryTimes {
            modified: self.modified(),
            accessed: self.accessed(),
            created: self.created(),
        }
    }

    fn ntfs(&self) -> Option<NtfsExtraField> {
        self.extra.get(EXTRA_NTFS).and_then(NtfsExtraField::parse)
    }

    fn extended(&self) -> Option<ExtendedTimestamp> {
        self.extra
            .get(EXTRA_EXTENDED_TIMESTAMP)
            .and_then(ExtendedTimestamp::parse)
    }

    /// The local header, read through `reader` on first use.
    pub fn local<R: Read + Seek>(&self, reader: &mut R) -> Result<&LocalRecord> {
        if let Some(local) = self.local.get() {
            return Ok(local);
        }
        let offset = self.local_header_offset();
        reader.seek(SeekFrom::Start(offset))?;
        let header = LocalFileHeader::read(reader)?;
        if header.file_name.len() != self.header.file_name.len() {
            return Err(OxiZipError::invalid_header(format!(
                "local header name of {} bytes does not match central record of {} bytes",
                header.file_name.len(),
                self.header.file_name.len()
            )));
        }
        let record = LocalRecord {
            extra: ExtraFieldMap::parse(&header.extra),
            data_offset: offset + header.written_size() as u64,
            header,
        };
        Ok(self.local.get_or_init(|| record))
    }
}

impl fmt::Display for ZipEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} -> {} bytes, crc {:08x}",
            self.name,
            self.header.method,
            self.uncompressed_size(),
            self.compressed_size(),
            self.header.crc32
        )?;
        if self.is_encrypted() {
            f.write_str(", encrypted")?;
        }
        if self.is_zip64() {
            f.write_str(", zip64")?;
        }
        f.write_str(")")
    }
}

fn resolve_name(
    header: &CentralDirectoryHeader,
    extra: &ExtraFieldMap,
    encoding: &'static Encoding,
) -> String {
    if let Some(field) = extra
        .get(EXTRA_UNICODE_PATH)
        .and_then(UnicodePathExtraField::parse)
    {
        if field.matches(&header.file_name) {
            return field.name;
        }
        log::debug!("ignoring stale unicode path field for {:?}", field.name);
    }
    if header.is_utf8() {
        String::from_utf8_lossy(&header.file_name).into_owned()
    } else {
        decode_name(&header.file_name, encoding).into_owned()
    }
}
