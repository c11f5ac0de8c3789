//! ZIP Traditional (PKWARE) Encryption Support.
//!
//! This module implements the traditional ZIP encryption algorithm, also known as
//! ZipCrypto or PKWARE encryption.
//!
//! **Security Warning**: This encryption is cryptographically weak and should only
//! be used for legacy compatibility. It is vulnerable to known-plaintext attacks.
//! For secure encryption, use AES-based ZIP encryption ([`super::aes`]) instead.
//!
//! ## Algorithm Overview
//!
//! - Three 32-bit keys initialized to magic values
//! - CRC-32 table lookups and a linear congruential step for key updates
//! - A 12-byte encryption header whose last byte is a password check
//!
//! ## Example
//!
//! ```rust
//! use oxizip_archive::zip::crypto::{ZipCryptoReader, ZipCryptoWriter};
//! use std::io::{Cursor, Read, Write};
//!
//! let mut writer = ZipCryptoWriter::new(Vec::new(), b"secret", 0xAB).unwrap();
//! writer.write_all(b"Hello, World!").unwrap();
//! let encrypted = writer.into_inner();
//!
//! let mut reader = ZipCryptoReader::new(Cursor::new(encrypted), b"secret", 0xAB).unwrap();
//! let mut plain = Vec::new();
//! reader.read_to_end(&mut plain).unwrap();
//! assert_eq!(plain, b"Hello, World!");
//! ```

use oxizip_core::crc::crc32_update_byte;
use oxizip_core::io::read_full;
use oxizip_core::{OxiZipError, Result};
use rand::RngCore;
use std::io::{self, Read, Write};

/// Initial key values for ZipCrypto.
const INITIAL_KEY0: u32 = 0x12345678;
const INITIAL_KEY1: u32 = 0x23456789;
const INITIAL_KEY2: u32 = 0x34567890;

/// Size of the encryption header in bytes.
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

/// Password check byte for an entry.
///
/// Entries written with a data descriptor use the high byte of the DOS
/// time, since the CRC is not known when the header is written.
pub fn check_byte(crc32: u32, dos_time: u16, has_data_descriptor: bool) -> u8 {
    if has_data_descriptor {
        (dos_time >> 8) as u8
    } else {
        (crc32 >> 24) as u8
    }
}

/// ZIP Traditional (PKWARE) Encryption Cipher.
#[derive(Debug, Clone)]
pub struct ZipCrypto {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipCrypto {
    /// Create a cipher initialized with the given password.
    #[must_use]
    pub fn new(password: &[u8]) -> Self {
        let mut cipher = Self::default();
        for &byte in password {
            cipher.update_keys(byte);
        }
        cipher
    }

    /// Update the key state with a plaintext byte.
    ///
    /// - key0 = crc32(key0, byte)
    /// - key1 = (key1 + (key0 & 0xff)) * 134775813 + 1
    /// - key2 = crc32(key2, key1 >> 24)
    #[inline]
    fn update_keys(&mut self, byte: u8) {
        self.key0 = crc32_update_byte(self.key0, byte);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.key2 = crc32_update_byte(self.key2, (self.key1 >> 24) as u8);
    }

    #[inline]
    fn stream_byte(&self) -> u8 {
        let temp = (self.key2 | 2) as u16;
        ((temp.wrapping_mul(temp ^ 1)) >> 8) as u8
    }

    /// Encrypt a single byte; the keys advance with the plaintext byte.
    #[inline]
    pub fn encrypt_byte(&mut self, byte: u8) -> u8 {
        let cipher_byte = byte ^ self.stream_byte();
        self.update_keys(byte);
        cipher_byte
    }

    /// Decrypt a single byte; the keys advance with the recovered byte.
    #[inline]
    pub fn decrypt_byte(&mut self, byte: u8) -> u8 {
        let plain_byte = byte ^ self.stream_byte();
        self.update_keys(plain_byte);
        plain_byte
    }

    /// Encrypt a buffer in place.
    pub fn encrypt_buffer(&mut self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            *byte = self.encrypt_byte(*byte);
        }
    }

    /// Decrypt a buffer in place.
    pub fn decrypt_buffer(&mut self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            *byte = self.decrypt_byte(*byte);
        }
    }

    /// Encrypt an encryption header made of 11 filler bytes and the check byte.
    pub fn generate_header(
        &mut self,
        check: u8,
        random_source: &[u8; 11],
    ) -> [u8; ENCRYPTION_HEADER_SIZE] {
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        header[..11].copy_from_slice(random_source);
        header[11] = check;
        self.encrypt_buffer(&mut header);
        header
    }

    /// Read, decrypt and verify the 12-byte encryption header.
    pub fn verify_header<R: Read>(&mut self, reader: &mut R, check: u8) -> Result<()> {
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        read_full(reader, &mut header, "encryption header")?;
        self.decrypt_buffer(&mut header);

        if header[11] != check {
            return Err(OxiZipError::IncorrectPassword);
        }
        Ok(())
    }

    /// Current key state.
    #[must_use]
    pub fn keys(&self) -> (u32, u32, u32) {
        (self.key0, self.key1, self.key2)
    }
}

impl Default for ZipCrypto {
    fn default() -> Self {
        Self {
            key0: INITIAL_KEY0,
            key1: INITIAL_KEY1,
            key2: INITIAL_KEY2,
        }
    }
}

/// An encrypting writer.
///
/// Construction writes the encryption header; every byte written afterwards
/// is encrypted before it reaches the inner writer.
pub struct ZipCryptoWriter<W: Write> {
    inner: W,
    cipher: ZipCrypto,
    scratch: Vec<u8>,
}

impl<W: Write> ZipCryptoWriter<W> {
    /// Create the writer and emit a header with random filler bytes.
    pub fn new(mut writer: W, password: &[u8], check: u8) -> Result<Self> {
        let mut cipher = ZipCrypto::new(password);
        let mut random = [0u8; 11];
        rand::rng().fill_bytes(&mut random);
        let header = cipher.generate_header(check, &random);
        writer.write_all(&header)?;
        Ok(Self {
            inner: writer,
            cipher,
            scratch: Vec::new(),
        })
    }

    /// Consume the writer and return the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ZipCryptoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.cipher.encrypt_buffer(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A decrypting reader.
///
/// Construction consumes and verifies the encryption header, so a wrong
/// password fails before any data byte is returned.
pub struct ZipCryptoReader<R: Read> {
    inner: R,
    cipher: ZipCrypto,
}

impl<R: Read> ZipCryptoReader<R> {
    /// Create the reader, verifying the header against `check`.
    pub fn new(mut reader: R, password: &[u8], check: u8) -> Result<Self> {
        let mut cipher = ZipCrypto::new(password);
        cipher.verify_header(&mut reader, check)?;
        Ok(Self {
            inner: reader,
            cipher,
        })
    }

    /// Consume the reader and return the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes_read = self.inner.read(buf)?;
        self.cipher.decrypt_buffer(&mut buf[..bytes_read]);
        Ok(bytes_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_initial_keys() {
        let cipher = ZipCrypto::new(b"");
        assert_eq!(cipher.keys(), (INITIAL_KEY0, INITIAL_KEY1, INITIAL_KEY2));
    }

    #[test]
    fn test_password_changes_keys() {
        let a = ZipCrypto::new(b"test");
        let b = ZipCrypto::new(b"test");
        let c = ZipCrypto::new(b"tesT");
        assert_eq!(a.keys(), b.keys());
        assert_ne!(a.keys(), c.keys());
        assert_ne!(a.keys(), ZipCrypto::default().keys());
    }

    #[test]
    fn test_roundtrip_buffer() {
        let plaintext: Vec<u8> = (0..10000).map(|i| (i % 251) as u8).collect();
        let mut data = plaintext.clone();
        ZipCrypto::new(b"pw").encrypt_buffer(&mut data);
        assert_ne!(data, plaintext);
        ZipCrypto::new(b"pw").decrypt_buffer(&mut data);
        assert_eq!(data, plaintext);
    }

    #[test]
    fn test_header_check_byte() {
        let mut cipher = ZipCrypto::new(b"correct");
        let header = cipher.generate_header(0xDE, &[7; 11]);

        let mut ok = ZipCrypto::new(b"correct");
        assert!(ok.verify_header(&mut Cursor::new(header), 0xDE).is_ok());

        let mut wrong = ZipCrypto::new(b"correct");
        assert!(matches!(
            wrong.verify_header(&mut Cursor::new(header), 0xDF),
            Err(OxiZipError::IncorrectPassword)
        ));
    }

    #[test]
    fn test_check_byte_source() {
        assert_eq!(check_byte(0xAB12_3456, 0x9C00, false), 0xAB);
        assert_eq!(check_byte(0xAB12_3456, 0x9C00, true), 0x9C);
    }

    #[test]
    fn test_stream_roundtrip() {
        let plaintext = b"Data to encrypt via writer";
        let mut writer = ZipCryptoWriter::new(Vec::new(), b"secret", 0x12).unwrap();
        writer.write_all(&plaintext[..5]).unwrap();
        writer.write_all(&plaintext[5..]).unwrap();
        let output = writer.into_inner();
        assert_eq!(output.len(), ENCRYPTION_HEADER_SIZE + plaintext.len());

        let mut reader = ZipCryptoReader::new(Cursor::new(output), b"secret", 0x12).unwrap();
        let mut decrypted = Vec::new();
        reader.read_to_end(&mut decrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_password_fails_before_data() {
        // A wrong password matches the check byte with probability 1/256;
        // five independent headers make a false accept practically impossible.
        let failures = (0..5)
            .filter(|_| {
                let mut writer = ZipCryptoWriter::new(Vec::new(), b"right", 0x42).unwrap();
                writer.write_all(b"payload").unwrap();
                let data = writer.into_inner();
                ZipCryptoReader::new(Cursor::new(data), b"wrong", 0x42).is_err()
            })
            .count();
        assert!(failures >= 4);
    }

    #[test]
    fn test_truncated_header() {
        let result = ZipCryptoReader::new(Cursor::new(vec![0u8; 5]), b"pw", 0);
        assert!(matches!(result, Err(OxiZipError::UnexpectedEof { .. })));
    }
}
