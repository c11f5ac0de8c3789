//! Writer and reader configuration.

use super::extra::AesStrength;
use encoding_rs::{Encoding, UTF_8};
use oxizip_core::{CancelToken, Limiter, OxiZipError, Result};
use regex::Regex;
use std::path::PathBuf;

/// Compression applied to entry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Store as-is.
    Stored,
    /// DEFLATE.
    #[default]
    Deflate,
}

/// DEFLATE effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeflateLevel {
    /// Balanced (level 6).
    #[default]
    Optimal,
    /// Fastest (level 1).
    Fastest,
    /// Deflate framing with stored blocks (level 0).
    NoCompression,
    /// Smallest output (level 9).
    SmallestSize,
}

impl DeflateLevel {
    /// Level handed to the encoder.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            Self::Optimal => flate2::Compression::default(),
            Self::Fastest => flate2::Compression::fast(),
            Self::NoCompression => flate2::Compression::none(),
            Self::SmallestSize => flate2::Compression::best(),
        }
    }

    /// General purpose flag bits 1-2 recorded for deflated entries.
    pub fn flag_bits(self) -> u16 {
        match self {
            Self::Optimal => 0b000,
            Self::Fastest => 0b100,
            Self::NoCompression => 0b110,
            Self::SmallestSize => 0b010,
        }
    }
}

/// Entry encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    /// No encryption.
    #[default]
    None,
    /// Traditional PKWARE encryption.
    Traditional,
    /// WinZip AES-128.
    Aes128,
    /// WinZip AES-192.
    Aes192,
    /// WinZip AES-256.
    Aes256,
}

impl Encryption {
    /// AES strength, for the AES variants.
    pub fn aes_strength(self) -> Option<AesStrength> {
        match self {
            Self::Aes128 => Some(AesStrength::Aes128),
            Self::Aes192 => Some(AesStrength::Aes192),
            Self::Aes256 => Some(AesStrength::Aes256),
            Self::None | Self::Traditional => None,
        }
    }

    /// True unless [`Encryption::None`].
    pub fn is_encrypted(self) -> bool {
        self != Self::None
    }
}

/// Which timestamp extra fields are written next to the DOS time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampMode {
    /// DOS date/time only.
    DosOnly,
    /// NTFS extra field.
    #[default]
    Ntfs,
    /// Info-ZIP extended timestamp.
    Extended,
    /// Both NTFS and extended timestamp.
    Both,
}

impl TimestampMode {
    /// True if the NTFS field is written.
    pub fn writes_ntfs(self) -> bool {
        matches!(self, Self::Ntfs | Self::Both)
    }

    /// True if the extended timestamp field is written.
    pub fn writes_extended(self) -> bool {
        matches!(self, Self::Extended | Self::Both)
    }
}

/// Archive writer options.
///
/// # Example
///
/// ```rust
/// use oxizip_archive::zip::{Encryption, WriterOptions};
///
/// let options = WriterOptions::default()
///     .with_encryption(Encryption::Aes256)
///     .with_password("secret")
///     .with_parallelism(4);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Compression method.
    pub compression: Compression,
    /// DEFLATE effort.
    pub level: DeflateLevel,
    /// Encryption scheme.
    pub encryption: Encryption,
    /// Password for encrypted entries.
    pub password: Option<String>,
    /// Write entries in the order they were added.
    pub store_in_order_added: bool,
    /// Emit parent directory entries.
    pub store_directories: bool,
    /// Timestamp extra fields.
    pub timestamp_mode: TimestampMode,
    /// Attach the unicode path field when the codepage cannot hold a name.
    pub store_utf8_extra: bool,
    /// Codepage for entry names.
    pub encoding: &'static Encoding,
    /// Archive comment.
    pub comment: String,
    /// Names matching any of these are stored without compression.
    pub no_compress_patterns: Vec<Regex>,
    /// Entries compressed at once.
    pub parallelism: usize,
    /// Directory for staging files.
    pub temp_dir: PathBuf,
    /// Cancellation signal.
    pub cancel: Option<CancelToken>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Deflate,
            level: DeflateLevel::Optimal,
            encryption: Encryption::None,
            password: None,
            store_in_order_added: true,
            store_directories: true,
            timestamp_mode: TimestampMode::Ntfs,
            store_utf8_extra: true,
            encoding: UTF_8,
            comment: String::new(),
            no_compress_patterns: Vec::new(),
            parallelism: (Limiter::processor_count() / 2).max(1),
            temp_dir: std::env::temp_dir(),
            cancel: None,
        }
    }
}

impl WriterOptions {
    /// Set the compression method.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the DEFLATE effort.
    pub fn with_level(mut self, level: DeflateLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the encryption scheme.
    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Keep add order in the output.
    pub fn with_store_in_order_added(mut self, ordered: bool) -> Self {
        self.store_in_order_added = ordered;
        self
    }

    /// Emit parent directory entries.
    pub fn with_store_directories(mut self, store: bool) -> Self {
        self.store_directories = store;
        self
    }

    /// Set the timestamp extra fields.
    pub fn with_timestamp_mode(mut self, mode: TimestampMode) -> Self {
        self.timestamp_mode = mode;
        self
    }

    /// Attach unicode path fields for non-UTF-8 codepages.
    pub fn with_store_utf8_extra(mut self, store: bool) -> Self {
        self.store_utf8_extra = store;
        self
    }

    /// Set the name codepage.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the archive comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Store names matching `pattern` without compression.
    pub fn with_no_compress_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| OxiZipError::invalid_option(format!("bad pattern {:?}: {}", pattern, e)))?;
        self.no_compress_patterns.push(regex);
        Ok(self)
    }

    /// Set the number of entries compressed at once (at least one).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the staging directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Attach a cancellation signal.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// True if `name` matches a no-compress pattern.
    pub fn skips_compression(&self, name: &str) -> bool {
        self.no_compress_patterns.iter().any(|re| re.is_match(name))
    }

    /// Check option consistency.
    pub fn validate(&self) -> Result<()> {
        if self.encryption.is_encrypted() && self.password.as_deref().is_none_or(str::is_empty) {
            return Err(OxiZipError::invalid_option("encryption requires a non-empty password"));
        }
        Ok(())
    }
}

/// Archive reader options.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Password for encrypted entries.
    pub password: Option<String>,
    /// Codepage for names without the UTF-8 flag.
    pub encoding: &'static Encoding,
    /// Entries extracted at once.
    pub parallelism: usize,
    /// Directory for stream copies and staged output.
    pub temp_dir: PathBuf,
    /// Authenticate AES entries before handing out any plaintext.
    pub verify_before_output: bool,
    /// Cancellation signal.
    pub cancel: Option<CancelToken>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            password: None,
            encoding: UTF_8,
            parallelism: Limiter::processor_count().clamp(1, 8),
            temp_dir: std::env::temp_dir(),
            verify_before_output: false,
            cancel: None,
        }
    }
}

impl ReaderOptions {
    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the name codepage.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the number of entries extracted at once (at least one).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Buffer AES output until its authentication code is checked.
    pub fn with_verify_before_output(mut self, verify: bool) -> Self {
        self.verify_before_output = verify;
        self
    }

    /// Attach a cancellation signal.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
