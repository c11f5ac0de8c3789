//! Pooled staging storage for the archive writer.
//!
//! A [`StagingBuffer`] starts in memory. When a write would take it past the
//! pool's threshold (64 KiB by default), its contents move into a temp file
//! taken from the [`TempPool`] and all further I/O goes to that file. On drop
//! the file is truncated and returned to the pool, so a long run of entries
//! reuses a handful of files instead of creating one per entry.

use oxizip_core::Result;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default in-memory threshold.
pub const MEMORY_THRESHOLD: usize = 64 * 1024;

/// Pool of reusable anonymous temp files.
#[derive(Debug)]
pub struct TempPool {
    dir: PathBuf,
    threshold: usize,
    free: Mutex<Vec<File>>,
    created: AtomicUsize,
    in_use: AtomicUsize,
}

impl TempPool {
    /// Pool creating its files in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_threshold(dir, MEMORY_THRESHOLD)
    }

    /// Pool with a custom in-memory threshold.
    pub fn with_threshold(dir: impl Into<PathBuf>, threshold: usize) -> Self {
        Self {
            dir: dir.into(),
            threshold,
            free: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Directory holding the pool's files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// In-memory threshold in bytes.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// New staging buffer. A `size_hint` above the threshold starts it
    /// directly in a file.
    pub fn staging(self: &Arc<Self>, size_hint: Option<u64>) -> Result<StagingBuffer> {
        let storage = match size_hint {
            Some(size) if size > self.threshold as u64 => Storage::File(self.take_file()?),
            _ => Storage::Memory(Cursor::new(Vec::new())),
        };
        Ok(StagingBuffer {
            pool: Arc::clone(self),
            storage,
        })
    }

    fn take_file(&self) -> io::Result<File> {
        let reused = self.free.lock().pop();
        let file = match reused {
            Some(file) => file,
            None => {
                let file = tempfile::tempfile_in(&self.dir)?;
                let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("temp file created in {} ({} total)", self.dir.display(), total);
                file
            }
        };
        self.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(file)
    }

    fn return_file(&self, mut file: File) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let reset = file.set_len(0).and_then(|_| file.rewind());
        match reset {
            Ok(()) => {
                log::trace!("temp file recycled");
                self.free.lock().push(file);
            }
            Err(err) => {
                log::warn!("dropping temp file that could not be reset: {}", err);
            }
        }
    }

    /// Files created over the pool's lifetime.
    pub fn created_files(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Files currently backing a staging buffer.
    pub fn files_in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Idle files waiting for reuse.
    pub fn free_files(&self) -> usize {
        self.free.lock().len()
    }
}

#[derive(Debug)]
enum Storage {
    Memory(Cursor<Vec<u8>>),
    File(File),
    Released,
}

/// Memory buffer that spills into a pooled temp file.
#[derive(Debug)]
pub struct StagingBuffer {
    pool: Arc<TempPool>,
    storage: Storage,
}

fn released() -> io::Error {
    io::Error::other("staging buffer already released")
}

impl StagingBuffer {
    /// True while the contents are still in memory.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, Storage::Memory(_))
    }

    /// Total length of the staged data.
    pub fn len(&self) -> io::Result<u64> {
        match &self.storage {
            Storage::Memory(cursor) => Ok(cursor.get_ref().len() as u64),
            Storage::File(file) => Ok(file.metadata()?.len()),
            Storage::Released => Err(released()),
        }
    }

    /// True if nothing was staged.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    fn promote(&mut self) -> io::Result<()> {
        let Storage::Memory(cursor) = &self.storage else {
            return Ok(());
        };
        let position = cursor.position();
        let mut file = self.pool.take_file()?;
        let copied = file
            .write_all(cursor.get_ref())
            .and_then(|_| file.seek(SeekFrom::Start(position)));
        if let Err(err) = copied {
            self.pool.return_file(file);
            return Err(err);
        }
        log::trace!("staging buffer moved to temp file at {} bytes", cursor.get_ref().len());
        self.storage = Storage::File(file);
        Ok(())
    }
}

impl Write for StagingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Storage::Memory(cursor) = &self.storage {
            let end = cursor.position() as usize + buf.len();
            if end > self.pool.threshold {
                self.promote()?;
            }
        }
        match &mut self.storage {
            Storage::Memory(cursor) => cursor.write(buf),
            Storage::File(file) => file.write(buf),
            Storage::Released => Err(released()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.storage {
            Storage::Memory(_) => Ok(()),
            Storage::File(file) => file.flush(),
            Storage::Released => Err(released()),
        }
    }
}

impl Read for StagingBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.storage {
            Storage::Memory(cursor) => cursor.read(buf),
            Storage::File(file) => file.read(buf),
            Storage::Released => Err(released()),
        }
    }
}

impl Seek for StagingBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.storage {
            Storage::Memory(cursor) => cursor.seek(pos),
            Storage::File(file) => file.seek(pos),
            Storage::Released => Err(released()),
        }
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        if let Storage::File(file) = std::mem::replace(&mut self.storage, Storage::Released) {
            self.pool.return_file(file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(threshold: usize) -> (tempfile::TempDir, Arc<TempPool>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(TempPool::with_threshold(dir.path(), threshold));
        (dir, pool)
    }

    #[test]
    fn test_small_stays_in_memory() {
        let (_dir, pool) = pool(1024);
        let mut buffer = pool.staging(None).unwrap();
        buffer.write_all(&[1u8; 1024]).unwrap();
        assert!(buffer.is_in_memory());
        assert_eq!(buffer.len().unwrap(), 1024);
        assert_eq!(pool.created_files(), 0);
    }

    #[test]
    fn test_promotion_keeps_contents() {
        let (_dir, pool) = pool(1024);
        let mut buffer = pool.staging(None).unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        buffer.write_all(&data[..1000]).unwrap();
        assert!(buffer.is_in_memory());
        buffer.write_all(&data[1000..]).unwrap();
        assert!(!buffer.is_in_memory());
        assert_eq!(pool.files_in_use(), 1);

        buffer.rewind().unwrap();
        let mut back = Vec::new();
        buffer.read_to_end(&mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_large_hint_starts_in_file() {
        let (_dir, pool) = pool(1024);
        let buffer = pool.staging(Some(4096)).unwrap();
        assert!(!buffer.is_in_memory());
        let small = pool.staging(Some(10)).unwrap();
        assert!(small.is_in_memory());
    }

    #[test]
    fn test_files_are_recycled() {
        let (_dir, pool) = pool(16);
        for round in 0..20u8 {
            let mut buffer = pool.staging(None).unwrap();
            buffer.write_all(&[round; 100]).unwrap();
            buffer.rewind().unwrap();
            let mut back = Vec::new();
            buffer.read_to_end(&mut back).unwrap();
            assert_eq!(back, vec![round; 100]);
        }
        assert_eq!(pool.created_files(), 1);
        assert_eq!(pool.free_files(), 1);
        assert_eq!(pool.files_in_use(), 0);
    }

    #[test]
    fn test_recycled_file_is_empty() {
        let (_dir, pool) = pool(0);
        {
            let mut buffer = pool.staging(None).unwrap();
            buffer.write_all(b"old contents").unwrap();
        }
        let buffer = pool.staging(Some(1)).unwrap();
        assert_eq!(buffer.len().unwrap(), 0);
    }
}
