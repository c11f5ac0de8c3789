//! Archive sources and the pool of read handles over them.
//!
//! Concurrent extraction needs one independent read position per task.
//! [`SourcePool`] hands out [`PooledHandle`]s, each wrapping its own file
//! handle or in-memory cursor, and takes them back on drop instead of
//! closing them.

use oxizip_core::{OxiZipError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;

/// Memory-mapped archive bytes.
#[cfg(feature = "mmap")]
#[derive(Debug, Clone)]
pub struct MappedBytes(Arc<memmap2::Mmap>);

#[cfg(feature = "mmap")]
impl AsRef<[u8]> for MappedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Where the archive bytes live.
#[derive(Debug)]
pub enum ArchiveSource {
    /// A file on disk, opened once per handle.
    File(PathBuf),
    /// An in-memory buffer shared by all handles.
    Bytes(Arc<[u8]>),
    /// A stream copied into a temp file; the file is deleted with the source.
    Temp(NamedTempFile),
    /// A memory-mapped file.
    #[cfg(feature = "mmap")]
    Mapped(MappedBytes),
}

impl ArchiveSource {
    /// Copy `reader` into a temp file under `temp_dir`.
    pub fn from_reader<R: Read>(mut reader: R, temp_dir: &Path) -> Result<Self> {
        if !temp_dir.is_dir() {
            return Err(OxiZipError::invalid_option(format!(
                "temp directory {} does not exist",
                temp_dir.display()
            )));
        }
        let mut file = NamedTempFile::new_in(temp_dir)?;
        let copied = io::copy(&mut reader, file.as_file_mut())?;
        file.as_file_mut().flush()?;
        log::debug!(
            "archive stream copied to {} ({} bytes)",
            file.path().display(),
            copied
        );
        Ok(Self::Temp(file))
    }

    /// Map `path` into memory.
    #[cfg(feature = "mmap")]
    pub fn map_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only; the archive must not be truncated
        // while the reader is open.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self::Mapped(MappedBytes(Arc::new(map))))
    }

    /// Total length in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(match self {
            Self::File(path) => std::fs::metadata(path)?.len(),
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Temp(file) => file.as_file().metadata()?.len(),
            #[cfg(feature = "mmap")]
            Self::Mapped(map) => map.as_ref().len() as u64,
        })
    }

    /// True if the source holds no bytes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn open_handle(&self) -> Result<SourceHandle> {
        Ok(match self {
            Self::File(path) => SourceHandle::File(BufReader::new(File::open(path)?)),
            Self::Bytes(bytes) => SourceHandle::Bytes(Cursor::new(Arc::clone(bytes))),
            Self::Temp(file) => SourceHandle::File(BufReader::new(file.reopen()?)),
            #[cfg(feature = "mmap")]
            Self::Mapped(map) => SourceHandle::Mapped(Cursor::new(map.clone())),
        })
    }
}

#[derive(Debug)]
enum SourceHandle {
    File(BufReader<File>),
    Bytes(Cursor<Arc<[u8]>>),
    #[cfg(feature = "mmap")]
    Mapped(Cursor<MappedBytes>),
}

impl Read for SourceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(reader) => reader.read(buf),
            Self::Bytes(cursor) => cursor.read(buf),
            #[cfg(feature = "mmap")]
            Self::Mapped(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for SourceHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::File(reader) => reader.seek(pos),
            Self::Bytes(cursor) => cursor.seek(pos),
            #[cfg(feature = "mmap")]
            Self::Mapped(cursor) => cursor.seek(pos),
        }
    }
}

/// Pool of read handles over one [`ArchiveSource`].
#[derive(Debug)]
pub struct SourcePool {
    // Handles close before the source is dropped (a temp source deletes its file).
    free: Mutex<Vec<SourceHandle>>,
    opened: AtomicUsize,
    source: ArchiveSource,
}

impl SourcePool {
    /// Pool over `source`.
    pub fn new(source: ArchiveSource) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
            source,
        }
    }

    /// The underlying source.
    pub fn source(&self) -> &ArchiveSource {
        &self.source
    }

    /// Take a free handle, or open a new one.
    pub fn acquire(&self) -> Result<PooledHandle<'_>> {
        let reused = self.free.lock().pop();
        let handle = match reused {
            Some(handle) => handle,
            None => {
                let handle = self.source.open_handle()?;
                self.opened.fetch_add(1, Ordering::Relaxed);
                handle
            }
        };
        Ok(PooledHandle {
            pool: self,
            handle: Some(handle),
        })
    }

    /// Handles opened so far.
    pub fn open_handles(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// Handles waiting in the pool.
    pub fn idle_handles(&self) -> usize {
        self.free.lock().len()
    }
}

/// A read handle on loan from a [`SourcePool`].
#[derive(Debug)]
pub struct PooledHandle<'a> {
    pool: &'a SourcePool,
    handle: Option<SourceHandle>,
}

impl PooledHandle<'_> {
    fn handle(&mut self) -> io::Result<&mut SourceHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::Error::other("read handle already returned"))
    }
}

impl Read for PooledHandle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle()?.read(buf)
    }
}

impl Seek for PooledHandle<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.handle()?.seek(pos)
    }
}

impl Drop for PooledHandle<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.free.lock().push(handle);
        }
    }
}
