// ============================================================================
// SWAP - disk backing for tiles and scratch buffers
// ============================================================================

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;
use crate::temp_buf::TempBuf;

/// Filename stem for swap files: `<dir>/<PREFIX><pid>.<counter>`.
const SWAP_PREFIX: &str = "tmswap";

/// Process-wide counter so concurrent swap files never collide on a name.
static SWAP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_swap_path(dir: &Path) -> PathBuf {
    let n = SWAP_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("{}{}.{}", SWAP_PREFIX, std::process::id(), n))
}

// ============================================================================
// SWAP FILE - slotted backing store shared by tile managers
// ============================================================================

/// Slotted scratch file holding raw headerless tile dumps.
///
/// Slots are recycled through a per-length free list, so a freed slot is only
/// ever handed back out for a block of the exact same byte length. The file
/// also carries the resident-byte ledger and the LRU clock shared by every
/// tile manager swapping through it.
pub struct SwapFile {
    file: File,
    path: PathBuf,
    end: u64,
    free: HashMap<usize, Vec<u64>>,
    budget: usize,
    resident: usize,
    clock: u64,
}

impl SwapFile {
    /// Creates a fresh swap file in `dir` with the given resident-byte budget.
    pub fn new(dir: &Path, budget: usize) -> Result<Self, StoreError> {
        let path = next_swap_path(dir);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            end: 0,
            free: HashMap::new(),
            budget,
            resident: 0,
            clock: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ---- resident ledger ---------------------------------------------------

    /// Bytes of tile data currently resident across all managers on this file.
    pub fn resident_bytes(&self) -> usize {
        self.resident
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    pub fn over_budget(&self) -> bool {
        self.resident > self.budget
    }

    pub(crate) fn note_resident(&mut self, bytes: usize) {
        self.resident += bytes;
    }

    pub(crate) fn note_evicted(&mut self, bytes: usize) {
        self.resident = self.resident.saturating_sub(bytes);
    }

    /// Advances the LRU clock and returns the new stamp.
    pub(crate) fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    // ---- slot management ----------------------------------------------------

    /// Hands out an offset able to hold `len` bytes, reusing freed slots.
    pub(crate) fn alloc_slot(&mut self, len: usize) -> u64 {
        if let Some(list) = self.free.get_mut(&len)
            && let Some(off) = list.pop()
        {
            return off;
        }
        let off = self.end;
        self.end += len as u64;
        off
    }

    pub(crate) fn release_slot(&mut self, offset: u64, len: usize) {
        self.free.entry(len).or_default().push(offset);
    }

    // ---- raw i/o -------------------------------------------------------------

    pub(crate) fn write_slot(&mut self, offset: u64, bytes: &[u8]) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    /// Reads exactly `len` bytes at `offset`; a short read is an error,
    /// never silent corruption.
    pub(crate) fn read_slot(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| StoreError::OutOfMemory { bytes: len })?;
        buf.resize(len, 0);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Drop for SwapFile {
    fn drop(&mut self) {
        // Ephemeral scratch; nothing in it outlives the process.
        let _ = std::fs::remove_file(&self.path);
    }
}

// ============================================================================
// BUF SWAPPER - whole-buffer swap for scratch rasters
// ============================================================================

/// Swaps whole [`TempBuf`] rasters out to individual files.
///
/// At most one swapped buffer is kept fully in memory as a write-combining
/// cache: swapping a second buffer forces the previous one onto disk. Unswap
/// always checks this single-slot cache before touching the filesystem.
pub struct BufSwapper {
    dir: PathBuf,
    cached: Option<(PathBuf, Vec<u8>)>,
}

impl BufSwapper {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            cached: None,
        }
    }

    /// Moves `buf`'s pixels out of memory.
    ///
    /// On flush failure the previous cache entry is kept and `buf` stays
    /// resident, so no pixel data is ever lost to a failed swap.
    pub fn swap(&mut self, buf: &mut TempBuf) -> Result<(), StoreError> {
        if buf.is_swapped() {
            return Ok(());
        }
        // Every second swap pays for the first: flush the previously cached
        // buffer to its own file before taking this one in.
        if let Some((path, bytes)) = self.cached.take() {
            if let Err(e) = write_whole(&path, &bytes) {
                log::warn!("swap flush to {path:?} failed: {e}; buffer stays in memory");
                self.cached = Some((path, bytes));
                return Err(StoreError::Swap(e));
            }
        }
        let path = buf.swap_path_or_assign(|| next_swap_path(&self.dir));
        let bytes = buf.take_pixels();
        self.cached = Some((path, bytes));
        Ok(())
    }

    /// Brings a swapped buffer back into memory, from cache when possible.
    pub fn unswap(&mut self, buf: &mut TempBuf) -> Result<(), StoreError> {
        if !buf.is_swapped() {
            return Ok(());
        }
        let path = buf.swap_path().ok_or(StoreError::NoSwapSlot)?.to_path_buf();
        let bytes = match self.cached.take_if(|(p, _)| *p == path) {
            Some((_, bytes)) => bytes,
            None => read_whole(&path, buf.size_bytes())?,
        };
        // Whether served from cache or disk, the on-disk copy is dead now.
        let _ = std::fs::remove_file(&path);
        buf.put_pixels(bytes);
        Ok(())
    }

    /// Drops any cached pixels bound for `path` and unlinks the file.
    pub(crate) fn discard(&mut self, path: &Path) {
        let _ = self.cached.take_if(|(p, _)| *p == *path);
        let _ = std::fs::remove_file(path);
    }
}

fn write_whole(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = File::create(path)?;
    f.write_all(bytes)
}

fn read_whole(path: &Path, len: usize) -> Result<Vec<u8>, StoreError> {
    let mut f = File::open(path)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| StoreError::OutOfMemory { bytes: len })?;
    buf.resize(len, 0);
    f.read_exact(&mut buf)?;
    Ok(buf)
}
