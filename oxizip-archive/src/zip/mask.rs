//! Pipelined AES keystream ("mask") generation.
//!
//! A [`MaskGenerator`] owns a worker thread that encrypts counter blocks
//! into 32 KiB masks. The worker always keeps the next mask ready while the
//! consumer XORs the current one into its data: two buffers circulate
//! between consumer and worker over a pair of channels.
//!
//! Generators are expensive to spawn, so [`MaskPool`] keeps idle ones
//! around and hands them out through an RAII [`PooledGenerator`]. A sweeper
//! thread retires generators that stayed idle longer than
//! [`IDLE_TIMEOUT`].
//!
//! Each `start` bumps the generator's epoch; masks produced for an earlier
//! key are tagged with the old epoch and discarded on receipt, so key state
//! never leaks from one stream into the next.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use crossbeam_channel::{Receiver, Sender};
use oxizip_core::{OxiZipError, Result};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

/// Mask size in bytes.
pub const MASK_SIZE: usize = 32 * 1024;
/// Idle time after which a pooled generator is retired.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Interval of the global pool's sweeper.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

const BLOCK_SIZE: usize = 16;

/// AES block cipher keyed for one stream.
#[derive(Clone)]
pub enum BlockCipher {
    /// 128-bit key.
    Aes128(Box<Aes128>),
    /// 192-bit key.
    Aes192(Box<Aes192>),
    /// 256-bit key.
    Aes256(Box<Aes256>),
}

impl BlockCipher {
    /// Key the cipher; the key length selects the variant.
    pub fn new(key: &[u8]) -> Result<Self> {
        let bad_key = |_| OxiZipError::invalid_option(format!("invalid AES key length {}", key.len()));
        match key.len() {
            16 => Ok(Self::Aes128(Box::new(Aes128::new_from_slice(key).map_err(bad_key)?))),
            24 => Ok(Self::Aes192(Box::new(Aes192::new_from_slice(key).map_err(bad_key)?))),
            32 => Ok(Self::Aes256(Box::new(Aes256::new_from_slice(key).map_err(bad_key)?))),
            other => Err(OxiZipError::invalid_option(format!(
                "invalid AES key length {}",
                other
            ))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let block = aes::Block::from_mut_slice(block);
        match self {
            Self::Aes128(cipher) => cipher.encrypt_block(block),
            Self::Aes192(cipher) => cipher.encrypt_block(block),
            Self::Aes256(cipher) => cipher.encrypt_block(block),
        }
    }

    /// Fill `mask` with encrypted counter blocks starting at `counter`,
    /// returning the next counter value.
    ///
    /// Each block holds the counter as little-endian u64 in its first 8
    /// bytes and zeros in the rest.
    pub fn fill_mask(&self, mask: &mut [u8], mut counter: u64) -> u64 {
        for block in mask.chunks_exact_mut(BLOCK_SIZE) {
            block[..8].copy_from_slice(&counter.to_le_bytes());
            block[8..].fill(0);
            self.encrypt_block(block);
            counter = counter.wrapping_add(1);
        }
        counter
    }
}

impl std::fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits = match self {
            Self::Aes128(_) => 128,
            Self::Aes192(_) => 192,
            Self::Aes256(_) => 256,
        };
        write!(f, "BlockCipher(AES-{})", bits)
    }
}

enum Command {
    Start { cipher: BlockCipher, epoch: u64 },
    Next(Vec<u8>),
}

struct Mask {
    epoch: u64,
    data: Vec<u8>,
}

fn generator_stopped() -> OxiZipError {
    OxiZipError::Io(io::Error::other("mask generator thread stopped"))
}

/// One keystream worker thread plus its double buffer.
#[derive(Debug)]
pub struct MaskGenerator {
    commands: Sender<Command>,
    masks: Receiver<Mask>,
    epoch: u64,
}

impl MaskGenerator {
    /// Spawn a worker thread.
    ///
    /// The worker exits when the generator is dropped.
    pub fn spawn() -> Result<Self> {
        let (commands, command_rx) = crossbeam_channel::unbounded::<Command>();
        let (mask_tx, masks) = crossbeam_channel::bounded::<Mask>(2);

        std::thread::Builder::new()
            .name("oxizip-mask".to_string())
            .spawn(move || {
                let mut state: Option<(BlockCipher, u64, u64)> = None;
                for command in command_rx.iter() {
                    let buffers = match command {
                        Command::Start { cipher, epoch } => {
                            state = Some((cipher, epoch, 1));
                            vec![vec![0u8; MASK_SIZE], vec![0u8; MASK_SIZE]]
                        }
                        Command::Next(buffer) => vec![buffer],
                    };
                    let Some((cipher, epoch, counter)) = state.as_mut() else {
                        continue;
                    };
                    for mut data in buffers {
                        data.resize(MASK_SIZE, 0);
                        *counter = cipher.fill_mask(&mut data, *counter);
                        if mask_tx.send(Mask { epoch: *epoch, data }).is_err() {
                            return;
                        }
                    }
                }
            })?;

        Ok(Self {
            commands,
            masks,
            epoch: 0,
        })
    }

    /// Rekey the generator; the worker starts producing the first two masks.
    pub fn start(&mut self, cipher: BlockCipher) -> Result<()> {
        self.epoch += 1;
        self.commands
            .send(Command::Start {
                cipher,
                epoch: self.epoch,
            })
            .map_err(|_| generator_stopped())
    }

    /// Receive the next mask of the current key.
    pub fn take(&mut self) -> Result<Vec<u8>> {
        loop {
            let mask = self.masks.recv().map_err(|_| generator_stopped())?;
            if mask.epoch == self.epoch {
                return Ok(mask.data);
            }
        }
    }

    /// Hand a consumed mask back so the worker refills it with the mask
    /// after the one already queued.
    pub fn give_back(&mut self, buffer: Vec<u8>) -> Result<()> {
        self.commands
            .send(Command::Next(buffer))
            .map_err(|_| generator_stopped())
    }
}

struct IdleGenerator {
    generator: MaskGenerator,
    since: Instant,
}

/// Pool of idle mask generators.
pub struct MaskPool {
    idle: Mutex<Vec<IdleGenerator>>,
    idle_timeout: Duration,
    created: AtomicUsize,
    retired: AtomicUsize,
}

static GLOBAL_POOL: LazyLock<Arc<MaskPool>> = LazyLock::new(|| {
    let pool = Arc::new(MaskPool::new(IDLE_TIMEOUT));
    let sweeper = Arc::clone(&pool);
    let spawned = std::thread::Builder::new()
        .name("oxizip-mask-sweeper".to_string())
        .spawn(move || {
            for _ in crossbeam_channel::tick(SWEEP_INTERVAL).iter() {
                sweeper.sweep_idle();
            }
        });
    if let Err(err) = spawned {
        log::warn!("mask generator sweeper not started: {}", err);
    }
    pool
});

impl MaskPool {
    /// Create a pool without a sweeper thread.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            idle_timeout,
            created: AtomicUsize::new(0),
            retired: AtomicUsize::new(0),
        }
    }

    /// Process-wide pool, swept every [`SWEEP_INTERVAL`].
    pub fn global() -> Arc<MaskPool> {
        Arc::clone(&GLOBAL_POOL)
    }

    /// Take an idle generator (or spawn one) and key it with `cipher`.
    pub fn acquire(self: &Arc<Self>, cipher: BlockCipher) -> Result<PooledGenerator> {
        let reused = self.idle.lock().pop().map(|idle| idle.generator);
        let mut generator = match reused {
            Some(generator) => generator,
            None => {
                let generator = MaskGenerator::spawn()?;
                let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("mask generator created ({} total)", total);
                generator
            }
        };
        generator.start(cipher)?;
        Ok(PooledGenerator {
            pool: Arc::clone(self),
            generator: Some(generator),
            broken: false,
        })
    }

    fn release(&self, generator: MaskGenerator) {
        self.idle.lock().push(IdleGenerator {
            generator,
            since: Instant::now(),
        });
    }

    /// Retire generators idle for longer than the timeout. Returns how many
    /// were retired.
    pub fn sweep_idle(&self) -> usize {
        let expired: Vec<IdleGenerator> = {
            let mut idle = self.idle.lock();
            let timeout = self.idle_timeout;
            let (expired, keep) = idle
                .drain(..)
                .partition(|entry| entry.since.elapsed() > timeout);
            *idle = keep;
            expired
        };
        let count = expired.len();
        if count > 0 {
            self.retired.fetch_add(count, Ordering::Relaxed);
            log::debug!("retired {} idle mask generators", count);
        }
        count
    }

    /// Generators waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Generators spawned by this pool so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Generators retired by sweeps so far.
    pub fn retired_count(&self) -> usize {
        self.retired.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskPool")
            .field("idle", &self.idle_count())
            .field("created", &self.created_count())
            .field("retired", &self.retired_count())
            .finish()
    }
}

/// A generator on loan from a [`MaskPool`]; returned on drop.
#[derive(Debug)]
pub struct PooledGenerator {
    pool: Arc<MaskPool>,
    generator: Option<MaskGenerator>,
    broken: bool,
}

impl PooledGenerator {
    fn generator(&mut self) -> Result<&mut MaskGenerator> {
        self.generator.as_mut().ok_or_else(generator_stopped)
    }

    /// See [`MaskGenerator::take`].
    pub fn take(&mut self) -> Result<Vec<u8>> {
        let result = self.generator()?.take();
        self.broken |= result.is_err();
        result
    }

    /// See [`MaskGenerator::give_back`].
    pub fn give_back(&mut self, buffer: Vec<u8>) -> Result<()> {
        let result = self.generator()?.give_back(buffer);
        self.broken |= result.is_err();
        result
    }
}

impl Drop for PooledGenerator {
    fn drop(&mut self) {
        if let Some(generator) = self.generator.take() {
            if !self.broken {
                self.pool.release(generator);
            }
        }
    }
}

/// XOR `mask` into `data`, eight bytes at a time with a scalar tail.
pub fn xor_in_place(data: &mut [u8], mask: &[u8]) {
    let len = data.len().min(mask.len());
    let (data, mask) = (&mut data[..len], &mask[..len]);

    let mut data_words = data.chunks_exact_mut(8);
    let mut mask_words = mask.chunks_exact(8);
    for (d, m) in (&mut data_words).zip(&mut mask_words) {
        let mut dw = [0u8; 8];
        let mut mw = [0u8; 8];
        dw.copy_from_slice(d);
        mw.copy_from_slice(m);
        d.copy_from_slice(&(u64::from_ne_bytes(dw) ^ u64::from_ne_bytes(mw)).to_ne_bytes());
    }
    for (d, m) in data_words
        .into_remainder()
        .iter_mut()
        .zip(mask_words.remainder())
    {
        *d ^= m;
    }
}

/// Keystream consumer shared by the AES writer and reader.
#[derive(Debug)]
pub struct Keystream {
    generator: PooledGenerator,
    current: Vec<u8>,
    pos: usize,
}

impl Keystream {
    /// Start a keystream for `cipher` on a generator from `pool`.
    pub fn new(pool: &Arc<MaskPool>, cipher: BlockCipher) -> Result<Self> {
        let mut generator = pool.acquire(cipher)?;
        let current = generator.take()?;
        Ok(Self {
            generator,
            current,
            pos: 0,
        })
    }

    /// XOR the next `data.len()` keystream bytes into `data`.
    pub fn apply(&mut self, data: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            if self.pos == MASK_SIZE {
                let used = std::mem::take(&mut self.current);
                self.generator.give_back(used)?;
                self.current = self.generator.take()?;
                self.pos = 0;
            }
            let n = (data.len() - done).min(MASK_SIZE - self.pos);
            xor_in_place(&mut data[done..done + n], &self.current[self.pos..self.pos + n]);
            self.pos += n;
            done += n;
        }
        Ok(())
    }
}
