//! Stream adaptors shared by the archive reader and writer.
//!
//! Wrappers compose by value instead of inheriting from a base stream type:
//! each one implements exactly the `std::io` capabilities it supports
//! (`Read`, `Write`, `Seek`) and reports its length through its own
//! accessors ([`BoundedReader::remaining`], [`CountingWriter::position`]).

use crate::abort::{CancelToken, TaskAbort, check_point};
use crate::crc::Crc32;
use crate::error::{OxiZipError, Result};
use std::io::{self, Read, Write};

/// Reader that exposes at most `limit` bytes of the wrapped reader.
///
/// Reading past the window yields end-of-file, never bytes belonging to the
/// next record.
#[derive(Debug)]
pub struct BoundedReader<R> {
    inner: R,
    remaining: u64,
    length: u64,
}

impl<R: Read> BoundedReader<R> {
    /// Wrap `inner`, exposing `length` bytes from its current position.
    pub fn new(inner: R, length: u64) -> Self {
        Self {
            inner,
            remaining: length,
            length,
        }
    }

    /// Bytes left in the window.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Total window length.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// True if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.length - self.remaining
    }

    /// Fill `buf` completely or fail with [`OxiZipError::UnexpectedEof`].
    pub fn read_buffer(&mut self, buf: &mut [u8], what: &'static str) -> Result<()> {
        read_full(self, buf, what)
    }

    /// Borrow the inner reader, e.g. to read a trailer after the window.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwrap the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Fill `buf` from `reader`, mapping a short read to a format error.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            Err(OxiZipError::UnexpectedEof { what })
        }
        Err(err) => Err(err.into()),
    }
}

/// Writer that computes CRC-32 and byte count of everything written through it.
#[derive(Debug)]
pub struct CrcWriter<W> {
    inner: W,
    crc: Crc32,
    count: u64,
}

impl<W: Write> CrcWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
            count: 0,
        }
    }

    /// CRC-32 of the bytes written so far.
    pub fn crc32(&self) -> u32 {
        self.crc.value()
    }

    /// Number of bytes written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Borrow the inner writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that computes CRC-32 and byte count of everything read through it.
#[derive(Debug)]
pub struct CrcReader<R> {
    inner: R,
    crc: Crc32,
    count: u64,
}

impl<R: Read> CrcReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
            count: 0,
        }
    }

    /// CRC-32 of the bytes read so far.
    pub fn crc32(&self) -> u32 {
        self.crc.value()
    }

    /// Number of bytes read so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Writer that tracks the absolute output position.
///
/// The archive writer needs the offset of every local header but only
/// requires `Write` from its destination, so the position is counted here.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    /// Wrap a writer whose current position is `start`.
    pub fn new(inner: W, start: u64) -> Self {
        Self {
            inner,
            position: start,
        }
    }

    /// Current output position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that checks a cancel token and an abort flag before every read.
///
/// Long copies (compressing or extracting one large entry) become
/// interruptible at buffer granularity.
#[derive(Debug)]
pub struct CheckpointReader<'a, R> {
    inner: R,
    cancel: Option<&'a CancelToken>,
    abort: &'a TaskAbort,
}

impl<'a, R: Read> CheckpointReader<'a, R> {
    /// Wrap `inner`.
    pub fn new(inner: R, cancel: Option<&'a CancelToken>, abort: &'a TaskAbort) -> Self {
        Self {
            inner,
            cancel,
            abort,
        }
    }

    /// Unwrap the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CheckpointReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        check_point(self.cancel, self.abort)?;
        self.inner.read(buf)
    }
}
