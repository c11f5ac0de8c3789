//! Extra field codec.
//!
//! Local and central headers carry an extra blob made of
//! `[id:2][size:2][payload:size]` tuples. [`ExtraFieldMap`] splits a blob by
//! id; the typed fields below parse a single payload and serialize a complete
//! tuple (header included).
//!
//! Supported fields:
//!
//! | id       | field                        |
//! |----------|------------------------------|
//! | `0x0001` | [`Zip64ExtraField`]          |
//! | `0x000A` | [`NtfsExtraField`]           |
//! | `0x5455` | [`ExtendedTimestamp`]        |
//! | `0x7075` | [`UnicodePathExtraField`]    |
//! | `0x9901` | [`AesExtraField`]            |

use super::header::{CompressionMethod, exceeds_u32, le_u16, le_u32, le_u64};
use oxizip_core::{Crc32, OxiZipError, Result};
use std::collections::BTreeMap;

/// Zip64 extended information.
pub const EXTRA_ZIP64: u16 = 0x0001;
/// NTFS timestamps.
pub const EXTRA_NTFS: u16 = 0x000A;
/// Info-ZIP extended timestamp.
pub const EXTRA_EXTENDED_TIMESTAMP: u16 = 0x5455;
/// Info-ZIP unicode path.
pub const EXTRA_UNICODE_PATH: u16 = 0x7075;
/// WinZip AES parameters.
pub const EXTRA_AES: u16 = 0x9901;

/// Append one `[id][size][payload]` tuple to `out`.
///
/// Payloads are built by this module and never exceed a few hundred bytes,
/// except the unicode path which is bounded by the name length check.
pub fn push_field(out: &mut Vec<u8>, id: u16, payload: &[u8]) {
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&(payload.len().min(u16::MAX as usize) as u16).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Extra blob split into id → payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFieldMap {
    fields: BTreeMap<u16, Vec<u8>>,
    truncated: bool,
}

impl ExtraFieldMap {
    /// Walk the blob. Parsing stops at the first tuple whose declared size
    /// runs past the end; the fields before it are kept. A repeated id keeps
    /// its first payload.
    pub fn parse(blob: &[u8]) -> Self {
        let mut fields = BTreeMap::new();
        let mut offset = 0;
        let mut truncated = false;

        while offset < blob.len() {
            if offset + 4 > blob.len() {
                truncated = true;
                break;
            }
            let id = le_u16(blob, offset);
            let size = le_u16(blob, offset + 2) as usize;
            let start = offset + 4;
            if start + size > blob.len() {
                truncated = true;
                break;
            }
            fields
                .entry(id)
                .or_insert_with(|| blob[start..start + size].to_vec());
            offset = start + size;
        }

        Self { fields, truncated }
    }

    /// Payload of field `id`.
    pub fn get(&self, id: u16) -> Option<&[u8]> {
        self.fields.get(&id).map(Vec::as_slice)
    }

    /// True if field `id` is present.
    pub fn contains(&self, id: u16) -> bool {
        self.fields.contains_key(&id)
    }

    /// Field ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.fields.keys().copied()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if no field was parsed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True if the blob ended with an inconsistent length.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Zip64 extended information extra field.
///
/// Only the values whose 32-bit header field holds the sentinel are present,
/// always in the order uncompressed size, compressed size, header offset,
/// disk number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtraField {
    /// Uncompressed size.
    pub uncompressed_size: Option<u64>,
    /// Compressed size.
    pub compressed_size: Option<u64>,
    /// Local header offset.
    pub local_header_offset: Option<u64>,
    /// Disk number where the entry starts.
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    /// Field for a central directory record: each value is present only if
    /// it does not fit its 32-bit slot.
    pub fn for_central(uncompressed_size: u64, compressed_size: u64, offset: u64) -> Self {
        Self {
            uncompressed_size: exceeds_u32(uncompressed_size).then_some(uncompressed_size),
            compressed_size: exceeds_u32(compressed_size).then_some(compressed_size),
            local_header_offset: exceeds_u32(offset).then_some(offset),
            disk_start: None,
        }
    }

    /// Field for a local header: both sizes if either one overflows, as
    /// the local header has no offset slot.
    pub fn for_local(uncompressed_size: u64, compressed_size: u64) -> Self {
        if exceeds_u32(uncompressed_size) || exceeds_u32(compressed_size) {
            Self {
                uncompressed_size: Some(uncompressed_size),
                compressed_size: Some(compressed_size),
                local_header_offset: None,
                disk_start: None,
            }
        } else {
            Self::default()
        }
    }

    /// Parse a payload given which header slots hold the sentinel.
    ///
    /// Each flagged value is taken only if 8 bytes remain, so a payload
    /// shorter than advertised yields `None` for the missing values.
    pub fn parse(
        payload: &[u8],
        want_uncompressed: bool,
        want_compressed: bool,
        want_offset: bool,
        want_disk: bool,
    ) -> Self {
        let mut field = Self::default();
        let mut pos = 0;

        let take_u64 = |wanted: bool, pos: &mut usize| -> Option<u64> {
            if wanted && *pos + 8 <= payload.len() {
                let value = le_u64(payload, *pos);
                *pos += 8;
                Some(value)
            } else {
                None
            }
        };

        field.uncompressed_size = take_u64(want_uncompressed, &mut pos);
        field.compressed_size = take_u64(want_compressed, &mut pos);
        field.local_header_offset = take_u64(want_offset, &mut pos);
        if want_disk && pos + 4 <= payload.len() {
            field.disk_start = Some(le_u32(payload, pos));
        }
        field
    }

    /// True if no value is present.
    pub fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none()
            && self.compressed_size.is_none()
            && self.local_header_offset.is_none()
            && self.disk_start.is_none()
    }

    /// Append the complete field to `out`; nothing is written when empty.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        if self.is_empty() {
            return;
        }
        let mut payload = Vec::with_capacity(28);
        for value in [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .flatten()
        {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        if let Some(disk) = self.disk_start {
            payload.extend_from_slice(&disk.to_le_bytes());
        }
        push_field(out, EXTRA_ZIP64, &payload);
    }
}

/// NTFS timestamps, stored as FILETIME ticks (100 ns since 1601-01-01 UTC).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtfsExtraField {
    /// Last modification.
    pub mtime: u64,
    /// Last access.
    pub atime: u64,
    /// Creation.
    pub ctime: u64,
}

impl NtfsExtraField {
    const TIMES_TAG: u16 = 0x0001;
    const TIMES_SIZE: usize = 24;

    /// Parse a payload: 4 reserved bytes followed by tagged attributes.
    /// Returns `None` if no times attribute is found.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut pos = 4;
        while pos + 4 <= payload.len() {
            let tag = le_u16(payload, pos);
            let size = le_u16(payload, pos + 2) as usize;
            pos += 4;
            if pos + size > payload.len() {
                return None;
            }
            if tag == Self::TIMES_TAG && size >= Self::TIMES_SIZE {
                return Some(Self {
                    mtime: le_u64(payload, pos),
                    atime: le_u64(payload, pos + 8),
                    ctime: le_u64(payload, pos + 16),
                });
            }
            pos += size;
        }
        None
    }

    /// Append the complete field (32-byte payload) to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::with_capacity(32);
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&Self::TIMES_TAG.to_le_bytes());
        payload.extend_from_slice(&(Self::TIMES_SIZE as u16).to_le_bytes());
        payload.extend_from_slice(&self.mtime.to_le_bytes());
        payload.extend_from_slice(&self.atime.to_le_bytes());
        payload.extend_from_slice(&self.ctime.to_le_bytes());
        push_field(out, EXTRA_NTFS, &payload);
    }
}

/// Info-ZIP extended timestamp (Unix seconds, UTC).
///
/// The local form carries every time named by the flags; the central form
/// keeps the same flags but only the modification time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    /// Flags: bit 0 mtime, bit 1 atime, bit 2 ctime.
    pub flags: u8,
    /// Last modification.
    pub mtime: Option<u32>,
    /// Last access.
    pub atime: Option<u32>,
    /// Creation.
    pub ctime: Option<u32>,
}

impl ExtendedTimestamp {
    /// All three times present.
    pub fn new(mtime: u32, atime: u32, ctime: u32) -> Self {
        Self {
            flags: 0b111,
            mtime: Some(mtime),
            atime: Some(atime),
            ctime: Some(ctime),
        }
    }

    /// Parse a payload, taking each flagged time while bytes remain.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let (&flags, rest) = payload.split_first()?;
        let mut field = Self {
            flags,
            ..Self::default()
        };
        let mut pos = 0;
        let mut take = |bit: u8| -> Option<u32> {
            if flags & bit != 0 && pos + 4 <= rest.len() {
                let value = le_u32(rest, pos);
                pos += 4;
                Some(value)
            } else {
                None
            }
        };
        field.mtime = take(0b001);
        field.atime = take(0b010);
        field.ctime = take(0b100);
        Some(field)
    }

    /// Append the local form to `out`.
    pub fn write_local(&self, out: &mut Vec<u8>) {
        let mut payload = vec![self.flags];
        for time in [self.mtime, self.atime, self.ctime].into_iter().flatten() {
            payload.extend_from_slice(&time.to_le_bytes());
        }
        push_field(out, EXTRA_EXTENDED_TIMESTAMP, &payload);
    }

    /// Append the central form (modification time only) to `out`.
    pub fn write_central(&self, out: &mut Vec<u8>) {
        let mut payload = vec![self.flags];
        if let Some(mtime) = self.mtime {
            payload.extend_from_slice(&mtime.to_le_bytes());
        }
        push_field(out, EXTRA_EXTENDED_TIMESTAMP, &payload);
    }
}

/// Info-ZIP unicode path extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodePathExtraField {
    /// CRC-32 of the raw header name the UTF-8 name replaces.
    pub name_crc32: u32,
    /// UTF-8 name.
    pub name: String,
}

impl UnicodePathExtraField {
    const VERSION: u8 = 1;

    /// Build the field for a header carrying `raw_name`.
    pub fn new(raw_name: &[u8], name: &str) -> Self {
        Self {
            name_crc32: Crc32::compute(raw_name),
            name: name.to_string(),
        }
    }

    /// Parse a payload. Returns `None` for an unknown version or a name that
    /// is not valid UTF-8.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 5 || payload[0] != Self::VERSION {
            return None;
        }
        let name = std::str::from_utf8(&payload[5..]).ok()?;
        Some(Self {
            name_crc32: le_u32(payload, 1),
            name: name.to_string(),
        })
    }

    /// True if the field was written for exactly this header name.
    pub fn matches(&self, raw_name: &[u8]) -> bool {
        Crc32::compute(raw_name) == self.name_crc32
    }

    /// Append the complete field to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::with_capacity(5 + self.name.len());
        payload.push(Self::VERSION);
        payload.extend_from_slice(&self.name_crc32.to_le_bytes());
        payload.extend_from_slice(self.name.as_bytes());
        push_field(out, EXTRA_UNICODE_PATH, &payload);
    }
}

/// AES key strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AesStrength {
    /// 128-bit key.
    Aes128,
    /// 192-bit key.
    Aes192,
    /// 256-bit key.
    Aes256,
}

impl AesStrength {
    /// Parse the 1-byte strength code.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Aes128),
            2 => Some(Self::Aes192),
            3 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// 1-byte strength code.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Aes128 => 1,
            Self::Aes192 => 2,
            Self::Aes256 => 3,
        }
    }

    /// Salt length in bytes.
    pub fn salt_len(self) -> usize {
        match self {
            Self::Aes128 => 8,
            Self::Aes192 => 12,
            Self::Aes256 => 16,
        }
    }

    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Key size in bits.
    pub fn bits(self) -> u32 {
        self.key_len() as u32 * 8
    }
}

/// WinZip AES parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    /// 1 (AE-1, CRC stored) or 2 (AE-2, CRC zeroed).
    pub version: u16,
    /// Key strength.
    pub strength: AesStrength,
    /// Compression method applied before encryption.
    pub method: CompressionMethod,
}

impl AesExtraField {
    /// AE-1: CRC-32 is stored and checked.
    pub const AE1: u16 = 1;
    /// AE-2: CRC-32 is zero and only the authentication tag is checked.
    pub const AE2: u16 = 2;
    const VENDOR: [u8; 2] = *b"AE";
    const SIZE: usize = 7;

    /// AE-2 parameters for a new entry.
    pub fn new(strength: AesStrength, method: CompressionMethod) -> Self {
        Self {
            version: Self::AE2,
            strength,
            method,
        }
    }

    /// Parse a payload. A payload shorter than 7 bytes is ignored; an
    /// unknown version, vendor or strength is a header error.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        if payload.len() < Self::SIZE {
            return Ok(None);
        }
        let version = le_u16(payload, 0);
        if version != Self::AE1 && version != Self::AE2 {
            return Err(OxiZipError::invalid_header(format!(
                "unsupported AES extra field version {}",
                version
            )));
        }
        if payload[2..4] != Self::VENDOR {
            return Err(OxiZipError::invalid_header("AES extra field vendor is not AE"));
        }
        let strength = AesStrength::from_u8(payload[4]).ok_or_else(|| {
            OxiZipError::invalid_header(format!("invalid AES strength {}", payload[4]))
        })?;
        Ok(Some(Self {
            version,
            strength,
            method: CompressionMethod::from_u16(le_u16(payload, 5)),
        }))
    }

    /// True if the entry's CRC-32 must be checked.
    pub fn checks_crc(&self) -> bool {
        self.version == Self::AE1
    }

    /// Append the complete field to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::with_capacity(Self::SIZE);
        payload.extend_from_slice(&self.version.to_le_bytes());
        payload.extend_from_slice(&Self::VENDOR);
        payload.push(self.strength.to_u8());
        payload.extend_from_slice(&self.method.to_u16().to_le_bytes());
        push_field(out, EXTRA_AES, &payload);
    }
}
