//! ZIP record layouts.
//!
//! Local file header, central directory record, end-of-central-directory
//! (classic and Zip64), Zip64 locator and data descriptor. Every record
//! parses from a `Read`, validating its 4-byte signature, and serializes to
//! bytes with the fixed fields first and the variable-length sections after
//! them. Names, extra blobs and comments stay raw bytes here; decoding them
//! is the job of [`super::extra`] and [`super::entry`].

use oxizip_core::io::read_full;
use oxizip_core::{OxiZipError, Result};
use std::io::Read;

/// Local file header signature.
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x04034B50;
/// Central directory file header signature.
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x02014B50;
/// End of central directory signature.
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054B50;
/// Zip64 end of central directory record signature.
pub const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x06064B50;
/// Zip64 end of central directory locator signature.
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG: u32 = 0x07064B50;
/// Data descriptor signature (optional on disk).
pub const DATA_DESCRIPTOR_SIG: u32 = 0x08074B50;

/// Zip64 sentinel for 32-bit fields.
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;
/// Zip64 sentinel for 16-bit fields.
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// General purpose flag: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: sizes and CRC follow the data in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// Version made by: MS-DOS host, specification 6.3.
pub const VERSION_MADE_BY: u16 = 0x003F;

/// DOS directory attribute.
pub const ATTR_DIRECTORY: u32 = 0x10;
/// DOS archive attribute.
pub const ATTR_ARCHIVE: u32 = 0x20;

/// Fixed part of a local file header.
pub const LOCAL_FILE_HEADER_LEN: usize = 30;
/// Fixed part of a central directory record.
pub const CENTRAL_DIR_HEADER_LEN: usize = 46;
/// Fixed part of the end-of-central-directory record.
pub const END_OF_CENTRAL_DIR_LEN: usize = 22;
/// Fixed part of the Zip64 end-of-central-directory record.
pub const ZIP64_END_OF_CENTRAL_DIR_LEN: usize = 56;
/// Zip64 locator length.
pub const ZIP64_LOCATOR_LEN: usize = 20;

/// "Version needed to extract" floors. The value written is the maximum of
/// every floor that applies to the entry.
pub mod version_needed {
    /// Stored data, no features.
    pub const STORED: u16 = 10;
    /// Directory entry or name with a directory part.
    pub const DIRECTORY: u16 = 20;
    /// Deflate compression.
    pub const DEFLATE: u16 = 20;
    /// Traditional PKWARE encryption.
    pub const ZIPCRYPTO: u16 = 20;
    /// Zip64 extensions.
    pub const ZIP64: u16 = 45;
    /// WinZip AES encryption.
    pub const AES: u16 = 51;
}

#[inline]
pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

#[inline]
pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// True if `value` cannot be stored in a 32-bit header field. The sentinel
/// itself counts as overflow.
#[inline]
pub fn exceeds_u32(value: u64) -> bool {
    value >= ZIP64_MARKER_32 as u64
}

/// Clamp a 64-bit value into a 32-bit field, using the Zip64 sentinel.
#[inline]
pub fn saturate_u32(value: u64) -> u32 {
    if exceeds_u32(value) {
        ZIP64_MARKER_32
    } else {
        value as u32
    }
}

/// Clamp a 64-bit count into a 16-bit field, using the Zip64 sentinel.
#[inline]
pub fn saturate_u16(value: u64) -> u16 {
    if value >= ZIP64_MARKER_16 as u64 {
        ZIP64_MARKER_16
    } else {
        value as u16
    }
}

/// True if an entry with these values needs Zip64 extra data.
#[inline]
pub fn needs_zip64(uncompressed_size: u64, compressed_size: u64, local_header_offset: u64) -> bool {
    exceeds_u32(uncompressed_size) || exceeds_u32(compressed_size) || exceeds_u32(local_header_offset)
}

fn u16_len(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len)
        .map_err(|_| OxiZipError::invalid_header(format!("{} is too long ({} bytes)", what, len)))
}

fn read_vec<R: Read>(reader: &mut R, len: usize, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_full(reader, &mut buf, what)?;
    Ok(buf)
}

/// ZIP compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// No compression (method 0).
    Stored,
    /// DEFLATE compression (method 8).
    Deflate,
    /// Deflate64 (method 9); recognized but not decoded.
    Deflate64,
    /// WinZip AES marker (method 99); the real method is in the AES extra field.
    Aes,
    /// Unknown method.
    Unknown(u16),
}

impl CompressionMethod {
    /// Parse from the raw field value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Stored,
            8 => Self::Deflate,
            9 => Self::Deflate64,
            99 => Self::Aes,
            other => Self::Unknown(other),
        }
    }

    /// Raw field value.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Deflate64 => 9,
            Self::Aes => 99,
            Self::Unknown(value) => value,
        }
    }

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Stored => "Stored",
            Self::Deflate => "Deflate",
            Self::Deflate64 => "Deflate64",
            Self::Aes => "AES",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(id) => write!(f, "Unknown({})", id),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// ZIP local file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    /// Minimum version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method.
    pub method: CompressionMethod,
    /// Last modification time (DOS).
    pub mtime: u16,
    /// Last modification date (DOS).
    pub mdate: u16,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size, or the Zip64 sentinel.
    pub compressed_size: u32,
    /// Uncompressed size, or the Zip64 sentinel.
    pub uncompressed_size: u32,
    /// Raw file name bytes.
    pub file_name: Vec<u8>,
    /// Raw extra field blob.
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Read a local file header, leaving the reader at the start of the data.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; LOCAL_FILE_HEADER_LEN];
        read_full(reader, &mut buf, "local file header")?;

        let signature = le_u32(&buf, 0);
        if signature != LOCAL_FILE_HEADER_SIG {
            return Err(OxiZipError::invalid_signature(
                "local file header",
                LOCAL_FILE_HEADER_SIG,
                signature,
            ));
        }

        let name_len = le_u16(&buf, 26) as usize;
        let extra_len = le_u16(&buf, 28) as usize;

        Ok(Self {
            version_needed: le_u16(&buf, 4),
            flags: le_u16(&buf, 6),
            method: CompressionMethod::from_u16(le_u16(&buf, 8)),
            mtime: le_u16(&buf, 10),
            mdate: le_u16(&buf, 12),
            crc32: le_u32(&buf, 14),
            compressed_size: le_u32(&buf, 18),
            uncompressed_size: le_u32(&buf, 22),
            file_name: read_vec(reader, name_len, "local file name")?,
            extra: read_vec(reader, extra_len, "local extra field")?,
        })
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let name_len = u16_len(self.file_name.len(), "file name")?;
        let extra_len = u16_len(self.extra.len(), "local extra field")?;

        let mut out = Vec::with_capacity(self.written_size());
        out.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_u16().to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.mdate.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&extra_len.to_le_bytes());
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra);
        Ok(out)
    }

    /// Size of the header on disk.
    pub fn written_size(&self) -> usize {
        LOCAL_FILE_HEADER_LEN + self.file_name.len() + self.extra.len()
    }

    /// Check if the entry data is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Check if this entry has a data descriptor following the compressed data.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// ZIP central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method.
    pub method: CompressionMethod,
    /// Last modification time (DOS).
    pub mtime: u16,
    /// Last modification date (DOS).
    pub mdate: u16,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size, or the Zip64 sentinel.
    pub compressed_size: u32,
    /// Uncompressed size, or the Zip64 sentinel.
    pub uncompressed_size: u32,
    /// Disk number where the entry starts.
    pub disk_number_start: u16,
    /// Internal file attributes.
    pub internal_attr: u16,
    /// External file attributes.
    pub external_attr: u32,
    /// Local header offset, or the Zip64 sentinel.
    pub local_header_offset: u32,
    /// Raw file name bytes.
    pub file_name: Vec<u8>,
    /// Raw extra field blob.
    pub extra: Vec<u8>,
    /// Raw file comment bytes.
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    /// Read one central directory record.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; CENTRAL_DIR_HEADER_LEN];
        read_full(reader, &mut buf, "central directory record")?;

        let signature = le_u32(&buf, 0);
        if signature != CENTRAL_DIR_HEADER_SIG {
            return Err(OxiZipError::invalid_signature(
                "central directory record",
                CENTRAL_DIR_HEADER_SIG,
                signature,
            ));
        }

        let name_len = le_u16(&buf, 28) as usize;
        let extra_len = le_u16(&buf, 30) as usize;
        let comment_len = le_u16(&buf, 32) as usize;

        Ok(Self {
            version_made_by: le_u16(&buf, 4),
            version_needed: le_u16(&buf, 6),
            flags: le_u16(&buf, 8),
            method: CompressionMethod::from_u16(le_u16(&buf, 10)),
            mtime: le_u16(&buf, 12),
            mdate: le_u16(&buf, 14),
            crc32: le_u32(&buf, 16),
            compressed_size: le_u32(&buf, 20),
            uncompressed_size: le_u32(&buf, 24),
            disk_number_start: le_u16(&buf, 34),
            internal_attr: le_u16(&buf, 36),
            external_attr: le_u32(&buf, 38),
            local_header_offset: le_u32(&buf, 42),
            file_name: read_vec(reader, name_len, "central file name")?,
            extra: read_vec(reader, extra_len, "central extra field")?,
            comment: read_vec(reader, comment_len, "file comment")?,
        })
    }

    /// Serialize the record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let name_len = u16_len(self.file_name.len(), "file name")?;
        let extra_len = u16_len(self.extra.len(), "central extra field")?;
        let comment_len = u16_len(self.comment.len(), "file comment")?;

        let mut out = Vec::with_capacity(self.written_size());
        out.extend_from_slice(&CENTRAL_DIR_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_u16().to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.mdate.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&extra_len.to_le_bytes());
        out.extend_from_slice(&comment_len.to_le_bytes());
        out.extend_from_slice(&self.disk_number_start.to_le_bytes());
        out.extend_from_slice(&self.internal_attr.to_le_bytes());
        out.extend_from_slice(&self.external_attr.to_le_bytes());
        out.extend_from_slice(&self.local_header_offset.to_le_bytes());
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra);
        out.extend_from_slice(&self.comment);
        Ok(out)
    }

    /// Size of the record on disk.
    pub fn written_size(&self) -> usize {
        CENTRAL_DIR_HEADER_LEN + self.file_name.len() + self.extra.len() + self.comment.len()
    }

    /// Check if the entry data is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Check if the name is flagged as UTF-8.
    pub fn is_utf8(&self) -> bool {
        self.flags & FLAG_UTF8 != 0
    }

    /// Check if the record describes a directory.
    pub fn is_directory(&self) -> bool {
        self.external_attr & ATTR_DIRECTORY != 0 || self.file_name.last() == Some(&b'/')
    }
}

/// Classic end-of-central-directory record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndOfCentralDirectory {
    /// Number of this disk.
    pub disk_number: u16,
    /// Disk where the central directory starts.
    pub cd_start_disk: u16,
    /// Central directory records on this disk.
    pub entries_on_disk: u16,
    /// Total central directory records.
    pub total_entries: u16,
    /// Size of the central directory.
    pub cd_size: u32,
    /// Offset of the central directory.
    pub cd_offset: u32,
    /// Archive comment.
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Maximum comment length.
    pub const MAX_COMMENT_LEN: usize = u16::MAX as usize;

    /// Build a record for a single-disk archive, saturating oversized values.
    pub fn new(entries: u64, cd_size: u64, cd_offset: u64, comment: &[u8]) -> Self {
        let count = saturate_u16(entries);
        let comment_len = comment.len().min(Self::MAX_COMMENT_LEN);
        Self {
            disk_number: 0,
            cd_start_disk: 0,
            entries_on_disk: count,
            total_entries: count,
            cd_size: saturate_u32(cd_size),
            cd_offset: saturate_u32(cd_offset),
            comment: comment[..comment_len].to_vec(),
        }
    }

    /// Parse a record that starts at `buf[0]`.
    ///
    /// A comment running past the end of `buf` is clipped to what is there.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < END_OF_CENTRAL_DIR_LEN {
            return Err(OxiZipError::UnexpectedEof {
                what: "end of central directory",
            });
        }
        let signature = le_u32(buf, 0);
        if signature != END_OF_CENTRAL_DIR_SIG {
            return Err(OxiZipError::invalid_signature(
                "end of central directory",
                END_OF_CENTRAL_DIR_SIG,
                signature,
            ));
        }

        let comment_len = le_u16(buf, 20) as usize;
        let comment_end = (END_OF_CENTRAL_DIR_LEN + comment_len).min(buf.len());

        Ok(Self {
            disk_number: le_u16(buf, 4),
            cd_start_disk: le_u16(buf, 6),
            entries_on_disk: le_u16(buf, 8),
            total_entries: le_u16(buf, 10),
            cd_size: le_u32(buf, 12),
            cd_offset: le_u32(buf, 16),
            comment: buf[END_OF_CENTRAL_DIR_LEN..comment_end].to_vec(),
        })
    }

    /// True if any field carries a Zip64 sentinel.
    pub fn has_zip64_markers(&self) -> bool {
        self.entries_on_disk == ZIP64_MARKER_16
            || self.total_entries == ZIP64_MARKER_16
            || self.cd_size == ZIP64_MARKER_32
            || self.cd_offset == ZIP64_MARKER_32
    }

    /// Serialize the record; the comment is truncated to 65535 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let comment_len = self.comment.len().min(Self::MAX_COMMENT_LEN);
        let mut out = Vec::with_capacity(END_OF_CENTRAL_DIR_LEN + comment_len);
        out.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.cd_start_disk.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&(comment_len as u16).to_le_bytes());
        out.extend_from_slice(&self.comment[..comment_len]);
        out
    }
}

/// Zip64 end-of-central-directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    /// Size of the remaining record (excludes signature and this field).
    pub record_size: u64,
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// Number of this disk.
    pub disk_number: u32,
    /// Disk where the central directory starts.
    pub cd_start_disk: u32,
    /// Central directory records on this disk.
    pub entries_on_disk: u64,
    /// Total central directory records.
    pub total_entries: u64,
    /// Size of the central directory.
    pub cd_size: u64,
    /// Offset of the central directory.
    pub cd_offset: u64,
    /// Extensible data sector.
    pub extensible_data: Vec<u8>,
}

impl Zip64EndOfCentralDirectory {
    /// Fixed fields counted by `record_size`.
    const FIXED_RECORD_SIZE: u64 = 44;
    /// Refuse to allocate absurd extensible sectors from corrupt input.
    const MAX_EXTENSIBLE_DATA: u64 = 1 << 20;

    /// Build a record for a single-disk archive.
    pub fn new(entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            record_size: Self::FIXED_RECORD_SIZE,
            version_made_by: version_needed::ZIP64,
            version_needed: version_needed::ZIP64,
            disk_number: 0,
            cd_start_disk: 0,
            entries_on_disk: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
            extensible_data: Vec::new(),
        }
    }

    /// Read the record.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; ZIP64_END_OF_CENTRAL_DIR_LEN];
        read_full(reader, &mut buf, "zip64 end of central directory")?;

        let signature = le_u32(&buf, 0);
        if signature != ZIP64_END_OF_CENTRAL_DIR_SIG {
            return Err(OxiZipError::invalid_signature(
                "zip64 end of central directory",
                ZIP64_END_OF_CENTRAL_DIR_SIG,
                signature,
            ));
        }

        let record_size = le_u64(&buf, 4);
        if record_size < Self::FIXED_RECORD_SIZE {
            return Err(OxiZipError::invalid_header(format!(
                "zip64 end of central directory size {} is too small",
                record_size
            )));
        }
        let extensible_len = record_size - Self::FIXED_RECORD_SIZE;
        if extensible_len > Self::MAX_EXTENSIBLE_DATA {
            return Err(OxiZipError::invalid_header(format!(
                "zip64 extensible data of {} bytes",
                extensible_len
            )));
        }

        Ok(Self {
            record_size,
            version_made_by: le_u16(&buf, 12),
            version_needed: le_u16(&buf, 14),
            disk_number: le_u32(&buf, 16),
            cd_start_disk: le_u32(&buf, 20),
            entries_on_disk: le_u64(&buf, 24),
            total_entries: le_u64(&buf, 32),
            cd_size: le_u64(&buf, 40),
            cd_offset: le_u64(&buf, 48),
            extensible_data: read_vec(reader, extensible_len as usize, "zip64 extensible data")?,
        })
    }

    /// Serialize the record; `record_size` is recomputed from the data.
    pub fn to_bytes(&self) -> Vec<u8> {
        let record_size = Self::FIXED_RECORD_SIZE + self.extensible_data.len() as u64;
        let mut out = Vec::with_capacity(ZIP64_END_OF_CENTRAL_DIR_LEN + self.extensible_data.len());
        out.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        out.extend_from_slice(&record_size.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.cd_start_disk.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&self.extensible_data);
        out
    }
}

/// Zip64 end-of-central-directory locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectoryLocator {
    /// Disk holding the Zip64 end-of-central-directory record.
    pub zip64_eocd_disk: u32,
    /// Offset of the Zip64 end-of-central-directory record.
    pub zip64_eocd_offset: u64,
    /// Total number of disks.
    pub total_disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    /// Build a locator for a single-disk archive.
    pub fn new(zip64_eocd_offset: u64) -> Self {
        Self {
            zip64_eocd_disk: 0,
            zip64_eocd_offset,
            total_disks: 1,
        }
    }

    /// Parse a locator that starts at `buf[0]`.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < ZIP64_LOCATOR_LEN {
            return Err(OxiZipError::UnexpectedEof {
                what: "zip64 end of central directory locator",
            });
        }
        let signature = le_u32(buf, 0);
        if signature != ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG {
            return Err(OxiZipError::invalid_signature(
                "zip64 end of central directory locator",
                ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG,
                signature,
            ));
        }
        Ok(Self {
            zip64_eocd_disk: le_u32(buf, 4),
            zip64_eocd_offset: le_u64(buf, 8),
            total_disks: le_u32(buf, 16),
        })
    }

    /// Serialize the locator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ZIP64_LOCATOR_LEN);
        out.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG.to_le_bytes());
        out.extend_from_slice(&self.zip64_eocd_disk.to_le_bytes());
        out.extend_from_slice(&self.zip64_eocd_offset.to_le_bytes());
        out.extend_from_slice(&self.total_disks.to_le_bytes());
        out
    }
}

/// ZIP data descriptor (appears after compressed data when
/// [`FLAG_DATA_DESCRIPTOR`] is set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Read a data descriptor.
    ///
    /// The descriptor may optionally start with a signature. Returns the
    /// descriptor and the number of bytes consumed.
    pub fn read<R: Read>(reader: &mut R, is_zip64: bool) -> Result<(Self, usize)> {
        let mut word = [0u8; 4];
        read_full(reader, &mut word, "data descriptor")?;
        let mut consumed = 4;

        let first = u32::from_le_bytes(word);
        let crc32 = if first == DATA_DESCRIPTOR_SIG {
            read_full(reader, &mut word, "data descriptor")?;
            consumed += 4;
            u32::from_le_bytes(word)
        } else {
            first
        };

        let (compressed_size, uncompressed_size) = if is_zip64 {
            let mut sizes = [0u8; 16];
            read_full(reader, &mut sizes, "data descriptor")?;
            consumed += 16;
            (le_u64(&sizes, 0), le_u64(&sizes, 8))
        } else {
            let mut sizes = [0u8; 8];
            read_full(reader, &mut sizes, "data descriptor")?;
            consumed += 8;
            (le_u32(&sizes, 0) as u64, le_u32(&sizes, 4) as u64)
        };

        Ok((
            Self {
                crc32,
                compressed_size,
                uncompressed_size,
            },
            consumed,
        ))
    }

    /// Serialize with signature and 32-bit sizes saturated to the sentinel.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&saturate_u32(self.compressed_size).to_le_bytes());
        out.extend_from_slice(&saturate_u32(self.uncompressed_size).to_le_bytes());
        out
    }

    /// Serialize with signature and 64-bit sizes.
    pub fn to_bytes_zip64(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_local() -> LocalFileHeader {
        LocalFileHeader {
            version_needed: version_needed::DEFLATE,
            flags: FLAG_UTF8,
            method: CompressionMethod::Deflate,
            mtime: 0x6B2A,
            mdate: 0x5A31,
            crc32: 0xCBF43926,
            compressed_size: 11,
            uncompressed_size: 9,
            file_name: b"dir/file.txt".to_vec(),
            extra: vec![0x55, 0x54, 0x01, 0x00, 0x00],
        }
    }

    #[test]
    fn test_compression_method() {
        assert_eq!(CompressionMethod::from_u16(0), CompressionMethod::Stored);
        assert_eq!(CompressionMethod::from_u16(8), CompressionMethod::Deflate);
        assert_eq!(CompressionMethod::from_u16(99), CompressionMethod::Aes);
        assert_eq!(CompressionMethod::from_u16(14), CompressionMethod::Unknown(14));
        assert_eq!(CompressionMethod::Unknown(14).to_u16(), 14);
        assert_eq!(CompressionMethod::Aes.to_string(), "AES");
    }

    #[test]
    fn test_local_header_layout() {
        let header = sample_local();
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), header.written_size());
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        assert_eq!(le_u16(&bytes, 26), 12);
        assert_eq!(le_u16(&bytes, 28), 5);

        let mut cursor = Cursor::new(bytes);
        let parsed = LocalFileHeader::read(&mut cursor).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(cursor.position() as usize, header.written_size());
    }

    #[test]
    fn test_local_header_bad_signature() {
        let mut bytes = sample_local().to_bytes().unwrap();
        bytes[3] = 0x05;
        let err = LocalFileHeader::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, OxiZipError::InvalidSignature { .. }));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_local_header_truncated_name() {
        let bytes = sample_local().to_bytes().unwrap();
        let err = LocalFileHeader::read(&mut Cursor::new(&bytes[..35])).unwrap_err();
        assert!(matches!(err, OxiZipError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_central_header_parse() {
        let header = CentralDirectoryHeader {
            version_made_by: VERSION_MADE_BY,
            version_needed: version_needed::ZIP64,
            flags: FLAG_ENCRYPTED,
            method: CompressionMethod::Aes,
            mtime: 1,
            mdate: 2,
            crc32: 0,
            compressed_size: ZIP64_MARKER_32,
            uncompressed_size: 77,
            disk_number_start: 0,
            internal_attr: 0,
            external_attr: ATTR_DIRECTORY,
            local_header_offset: 1234,
            file_name: b"folder/".to_vec(),
            extra: vec![1, 0, 8, 0, 1, 2, 3, 4, 5, 6, 7, 8],
            comment: b"note".to_vec(),
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), header.written_size());
        let parsed = CentralDirectoryHeader::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.is_directory());
        assert!(parsed.is_encrypted());
        assert!(!parsed.is_utf8());
    }

    #[test]
    fn test_name_too_long() {
        let mut header = sample_local();
        header.file_name = vec![b'a'; 70_000];
        assert!(header.to_bytes().is_err());
    }

    #[test]
    fn test_eocd_saturation_and_comment() {
        let comment = vec![b'c'; 70_000];
        let eocd = EndOfCentralDirectory::new(0x1_0000, 0x1_0000_0000, 12, &comment);
        assert_eq!(eocd.total_entries, ZIP64_MARKER_16);
        assert_eq!(eocd.cd_size, ZIP64_MARKER_32);
        assert_eq!(eocd.cd_offset, 12);
        assert!(eocd.has_zip64_markers());

        let bytes = eocd.to_bytes();
        assert_eq!(bytes.len(), END_OF_CENTRAL_DIR_LEN + 65535);
        let parsed = EndOfCentralDirectory::parse(&bytes).unwrap();
        assert_eq!(parsed.comment.len(), 65535);
        assert_eq!(parsed.cd_offset, 12);
    }

    #[test]
    fn test_eocd_clipped_comment() {
        let eocd = EndOfCentralDirectory::new(1, 46, 100, b"hello world");
        let bytes = eocd.to_bytes();
        let parsed = EndOfCentralDirectory::parse(&bytes[..bytes.len() - 6]).unwrap();
        assert_eq!(parsed.comment, b"hello");
    }

    #[test]
    fn test_zip64_eocd_and_locator() {
        let record = Zip64EndOfCentralDirectory::new(70_000, 5_000_000, 0x1_2345_6789);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), ZIP64_END_OF_CENTRAL_DIR_LEN);
        assert_eq!(le_u64(&bytes, 4), 44);
        let parsed = Zip64EndOfCentralDirectory::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed, record);

        let locator = Zip64EndOfCentralDirectoryLocator::new(0x1_0000_0000);
        let bytes = locator.to_bytes();
        assert_eq!(bytes.len(), ZIP64_LOCATOR_LEN);
        let parsed = Zip64EndOfCentralDirectoryLocator::parse(&bytes).unwrap();
        assert_eq!(parsed.zip64_eocd_offset, 0x1_0000_0000);
        assert_eq!(parsed.total_disks, 1);
    }

    #[test]
    fn test_zip64_eocd_record_size_too_small() {
        let mut bytes = Zip64EndOfCentralDirectory::new(1, 1, 1).to_bytes();
        bytes[4] = 10;
        assert!(Zip64EndOfCentralDirectory::read(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_data_descriptor_with_signature() {
        let dd = DataDescriptor {
            crc32: 0xDEADBEEF,
            compressed_size: 100,
            uncompressed_size: 200,
        };
        let (parsed, consumed) = DataDescriptor::read(&mut Cursor::new(dd.to_bytes()), false).unwrap();
        assert_eq!(parsed, dd);
        assert_eq!(consumed, 16);

        let (parsed, consumed) =
            DataDescriptor::read(&mut Cursor::new(dd.to_bytes_zip64()), true).unwrap();
        assert_eq!(parsed, dd);
        assert_eq!(consumed, 24);
    }

    #[test]
    fn test_data_descriptor_without_signature() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x12345678u32.to_le_bytes());
        data.extend_from_slice(&50u32.to_le_bytes());
        data.extend_from_slice(&75u32.to_le_bytes());
        let (dd, consumed) = DataDescriptor::read(&mut Cursor::new(data), false).unwrap();
        assert_eq!(dd.crc32, 0x12345678);
        assert_eq!(dd.compressed_size, 50);
        assert_eq!(dd.uncompressed_size, 75);
        assert_eq!(consumed, 12);
    }

    #[test]
    fn test_data_descriptor_saturates() {
        let dd = DataDescriptor {
            crc32: 1,
            compressed_size: 0x1_0000_0000,
            uncompressed_size: 5,
        };
        let bytes = dd.to_bytes();
        assert_eq!(le_u32(&bytes, 8), ZIP64_MARKER_32);
        assert_eq!(le_u32(&bytes, 12), 5);
    }

    #[test]
    fn test_needs_zip64_boundary() {
        let limit = ZIP64_MARKER_32 as u64;
        assert!(!needs_zip64(limit - 1, limit - 1, limit - 1));
        assert!(needs_zip64(limit, 0, 0));
        assert!(needs_zip64(0, limit, 0));
        assert!(needs_zip64(0, 0, limit));
        assert!(!exceeds_u32(limit - 1));
        assert!(exceeds_u32(limit));
        assert_eq!(saturate_u32(limit - 1), 0xFFFF_FFFE);
        assert_eq!(saturate_u32(limit), ZIP64_MARKER_32);
        assert_eq!(saturate_u16(0xFFFE), 0xFFFE);
        assert_eq!(saturate_u16(0xFFFF), ZIP64_MARKER_16);
    }
}
