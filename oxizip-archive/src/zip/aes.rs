//! WinZip AES encryption (AE-1 / AE-2).
//!
//! Layout of an encrypted entry body:
//!
//! ```text
//! [salt: 8/12/16][password verifier: 2][ciphertext][authentication code: 10]
//! ```
//!
//! PBKDF2-HMAC-SHA1 with 1000 rounds turns the password and salt into
//! `2 * key_len + 2` bytes: the AES key, the HMAC-SHA1 key and the
//! verifier, in that order. The keystream comes from [`super::mask`]; the
//! authentication code is the first 10 bytes of HMAC-SHA1 over the
//! ciphertext.
//!
//! [`AesDecryptReader`] returns plaintext as it is decrypted and checks the
//! authentication code when the ciphertext runs out, so a corrupted entry is
//! reported only after its bytes were handed out. Callers that must not act
//! on unauthenticated data should stage the output and call
//! [`AesDecryptReader::finish`] before using it.

use super::extra::AesStrength;
use super::mask::{BlockCipher, Keystream, MaskPool};
use hmac::{Hmac, Mac};
use oxizip_core::io::read_full;
use oxizip_core::{BoundedReader, OxiZipError, Result};
use rand::RngCore;
use sha1::Sha1;
use std::io::{self, Read, Write};
use std::sync::Arc;

type HmacSha1 = Hmac<Sha1>;

/// PBKDF2 iteration count.
pub const KEY_DERIVATION_ITERATIONS: u32 = 1000;
/// Password verifier length.
pub const PASSWORD_VERIFIER_LEN: usize = 2;
/// Authentication code length.
pub const AUTH_CODE_LEN: usize = 10;

/// Bytes an AES entry adds around its ciphertext.
pub fn overhead(strength: AesStrength) -> u64 {
    (strength.salt_len() + PASSWORD_VERIFIER_LEN + AUTH_CODE_LEN) as u64
}

/// Keys derived from a password and salt.
pub struct DerivedKeys {
    aes_key: Vec<u8>,
    hmac_key: Vec<u8>,
    verifier: [u8; PASSWORD_VERIFIER_LEN],
}

impl DerivedKeys {
    /// Run PBKDF2-HMAC-SHA1 over `password` and `salt`.
    pub fn derive(password: &[u8], salt: &[u8], strength: AesStrength) -> Self {
        let key_len = strength.key_len();
        let mut output = vec![0u8; 2 * key_len + PASSWORD_VERIFIER_LEN];
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, KEY_DERIVATION_ITERATIONS, &mut output);

        let mut verifier = [0u8; PASSWORD_VERIFIER_LEN];
        verifier.copy_from_slice(&output[2 * key_len..]);
        Self {
            aes_key: output[..key_len].to_vec(),
            hmac_key: output[key_len..2 * key_len].to_vec(),
            verifier,
        }
    }

    /// Password verification value.
    pub fn verifier(&self) -> [u8; PASSWORD_VERIFIER_LEN] {
        self.verifier
    }

    fn cipher(&self) -> Result<BlockCipher> {
        BlockCipher::new(&self.aes_key)
    }

    fn mac(&self) -> Result<HmacSha1> {
        HmacSha1::new_from_slice(&self.hmac_key)
            .map_err(|_| OxiZipError::invalid_option("invalid HMAC key length"))
    }
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("key_len", &self.aes_key.len())
            .finish_non_exhaustive()
    }
}

/// Encrypting writer.
///
/// Construction writes salt and verifier; [`AesEncryptWriter::finish`]
/// appends the authentication code.
pub struct AesEncryptWriter<W: Write> {
    inner: W,
    keystream: Keystream,
    mac: HmacSha1,
    scratch: Vec<u8>,
}

impl<W: Write> AesEncryptWriter<W> {
    /// Create a writer using the global mask pool.
    pub fn new(writer: W, password: &[u8], strength: AesStrength) -> Result<Self> {
        Self::with_pool(writer, password, strength, &MaskPool::global())
    }

    /// Create a writer drawing its keystream generator from `pool`.
    pub fn with_pool(
        mut writer: W,
        password: &[u8],
        strength: AesStrength,
        pool: &Arc<MaskPool>,
    ) -> Result<Self> {
        let mut salt = vec![0u8; strength.salt_len()];
        rand::rng().fill_bytes(&mut salt);
        let keys = DerivedKeys::derive(password, &salt, strength);

        writer.write_all(&salt)?;
        writer.write_all(&keys.verifier())?;

        Ok(Self {
            inner: writer,
            keystream: Keystream::new(pool, keys.cipher()?)?,
            mac: keys.mac()?,
            scratch: Vec::new(),
        })
    }

    /// Write the authentication code and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let code = self.mac.finalize().into_bytes();
        self.inner.write_all(&code[..AUTH_CODE_LEN])?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for AesEncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.keystream.apply(&mut self.scratch)?;
        self.mac.update(&self.scratch);
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader over exactly one AES entry body.
pub struct AesDecryptReader<R: Read> {
    inner: BoundedReader<R>,
    keystream: Keystream,
    mac: HmacSha1,
    verified: bool,
}

impl<R: Read> AesDecryptReader<R> {
    /// Create a reader using the global mask pool.
    ///
    /// `body_len` is the entry's compressed size (salt, verifier, ciphertext
    /// and authentication code). Fails with
    /// [`OxiZipError::IncorrectPassword`] if the verifier does not match.
    pub fn new(reader: R, body_len: u64, password: &[u8], strength: AesStrength) -> Result<Self> {
        Self::with_pool(reader, body_len, password, strength, &MaskPool::global())
    }

    /// Create a reader drawing its keystream generator from `pool`.
    pub fn with_pool(
        mut reader: R,
        body_len: u64,
        password: &[u8],
        strength: AesStrength,
        pool: &Arc<MaskPool>,
    ) -> Result<Self> {
        if body_len < overhead(strength) {
            return Err(OxiZipError::invalid_header(format!(
                "AES entry body of {} bytes is shorter than its {} byte framing",
                body_len,
                overhead(strength)
            )));
        }

        let mut salt = vec![0u8; strength.salt_len()];
        read_full(&mut reader, &mut salt, "AES salt")?;
        let mut verifier = [0u8; PASSWORD_VERIFIER_LEN];
        read_full(&mut reader, &mut verifier, "AES password verifier")?;

        let keys = DerivedKeys::derive(password, &salt, strength);
        if keys.verifier() != verifier {
            return Err(OxiZipError::IncorrectPassword);
        }

        Ok(Self {
            inner: BoundedReader::new(reader, body_len - overhead(strength)),
            keystream: Keystream::new(pool, keys.cipher()?)?,
            mac: keys.mac()?,
            verified: false,
        })
    }

    /// Ciphertext bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.inner.remaining()
    }

    fn verify(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        let mut code = [0u8; AUTH_CODE_LEN];
        read_full(self.inner.get_mut(), &mut code, "AES authentication code")?;
        self.mac
            .clone()
            .verify_truncated_left(&code)
            .map_err(|_| OxiZipError::AuthenticationFailed)?;
        self.verified = true;
        Ok(())
    }

    /// Discard unread ciphertext, check the authentication code and
    /// return the inner reader.
    pub fn finish(mut self) -> Result<R> {
        let mut sink = [0u8; 8192];
        while self.inner.remaining() > 0 {
            let n = self.inner.read(&mut sink)?;
            if n == 0 {
                return Err(OxiZipError::UnexpectedEof {
                    what: "AES ciphertext",
                });
            }
            self.mac.update(&sink[..n]);
        }
        self.verify()?;
        Ok(self.inner.into_inner())
    }
}

impl<R: Read> Read for AesDecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.inner.remaining() == 0 {
            self.verify()?;
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            return Err(OxiZipError::UnexpectedEof {
                what: "AES ciphertext",
            }
            .into());
        }
        self.mac.update(&buf[..n]);
        self.keystream.apply(&mut buf[..n])?;
        Ok(n)
    }
}
