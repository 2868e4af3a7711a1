use std::collections::HashMap;
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;

use super::block::Block;
use super::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_BLOCKS};
use crate::error::{FcacheError, Result};
use crate::utils::block_base;

// Recency key: the file id stands in for the path so keys stay Copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockKey {
    file: u64,
    base: u64,
}

struct FileEntry {
    id: u64,
    file: File,
    blocks: HashMap<u64, Block>, // key = block-aligned offset
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writebacks: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    files: HashMap<PathBuf, FileEntry>, // path -> open file + its blocks
    paths: HashMap<u64, PathBuf>,       // file id -> path, for eviction
    recency: LruCache<BlockKey, ()>,    // front = most recent, back = next victim
    cur_blocks: usize,
    max_blocks: usize,
    block_size: usize,
    next_id: u64,
    stats: CacheStats,
}

/// Global write-back block cache over registered files.
///
/// One registry serves every file handle that was opened against it: reads
/// and writes resolve to fixed-size blocks, loaded from disk on first touch
/// and written back on flush, close, or eviction. The least-recently-used
/// block is evicted (persisting it first when dirty) whenever the resident
/// count would exceed the global capacity.
///
/// Every operation runs under a single manager-wide mutex, disk I/O
/// included.
pub struct BlockCacheManager {
    inner: Mutex<Inner>,
}

impl BlockCacheManager {
    /// Cache with the default 4 KiB blocks and a 1024-block capacity.
    pub fn new() -> Self {
        Self::with_capacity(
            NonZeroUsize::new(DEFAULT_BLOCK_SIZE).unwrap(),
            NonZeroUsize::new(DEFAULT_MAX_BLOCKS).unwrap(),
        )
    }

    /// Cache with a custom block size and block-count capacity. The block
    /// size is fixed for the lifetime of the cache; the capacity can be
    /// changed later with [`set_capacity`](Self::set_capacity).
    pub fn with_capacity(block_size: NonZeroUsize, max_blocks: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                files: HashMap::new(),
                paths: HashMap::new(),
                recency: LruCache::unbounded(),
                cur_blocks: 0,
                max_blocks: max_blocks.get(),
                block_size: block_size.get(),
                next_id: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Bind `file` to `path` in the registry. When a descriptor is already
    /// bound to the same path, its dirty blocks are flushed through it
    /// before it is replaced and closed; cached blocks survive.
    pub fn register(&self, path: impl AsRef<Path>, file: File) -> Result<()> {
        let path = path.as_ref();
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;

        if let Some(entry) = inner.files.get_mut(path) {
            flush_file(entry, &mut inner.stats)?;
            entry.file = file;
            log::debug!("re-registered {} with a fresh descriptor", path.display());
            return Ok(());
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.files.insert(
            path.to_path_buf(),
            FileEntry {
                id,
                file,
                blocks: HashMap::new(),
            },
        );
        inner.paths.insert(id, path.to_path_buf());
        log::debug!("registered {}", path.display());
        Ok(())
    }

    /// Flush the file's dirty blocks, drop its cached blocks and close its
    /// descriptor. No-op when the path is unknown. A failed write-back
    /// leaves the file registered with its dirty blocks intact.
    pub fn unregister(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;

        if !inner.files.contains_key(path) {
            return Ok(());
        }

        flush_file(inner.files.get_mut(path).unwrap(), &mut inner.stats)?;

        let entry = inner.files.remove(path).unwrap();
        for base in entry.blocks.keys() {
            inner.recency.pop(&BlockKey {
                file: entry.id,
                base: *base,
            });
        }
        inner.cur_blocks -= entry.blocks.len();
        inner.paths.remove(&entry.id);
        log::debug!(
            "unregistered {} ({} cached blocks dropped)",
            path.display(),
            entry.blocks.len()
        );

        // entry.file is dropped here, closing the descriptor
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `*offset`, advancing the offset by
    /// the bytes copied. Stops early at end of file; returns the total
    /// copied. Fails when `path` was never registered.
    pub fn read(&self, path: impl AsRef<Path>, buf: &mut [u8], offset: &mut u64) -> Result<usize> {
        let path = path.as_ref();
        let mut inner = self.inner.lock().unwrap();

        if !inner.files.contains_key(path) {
            return Err(unregistered(path));
        }

        let block_size = inner.block_size;
        let mut total = 0;
        while total < buf.len() {
            let base = block_base(*offset, block_size);
            let pos = (*offset - base) as usize;

            let block = inner.ensure_block(path, base)?;
            let n = block.read_at(pos, &mut buf[total..]);
            if n == 0 {
                break; // nothing valid at the cursor: end of file
            }

            total += n;
            *offset += n as u64;
        }

        Ok(total)
    }

    /// Write `buf` at `*offset`, advancing the offset. Data lands in cache
    /// blocks only (marked dirty); the disk is touched just to load a
    /// previously-unseen block. Writing past end of file grows the file.
    /// Fails when `path` was never registered.
    pub fn write(&self, path: impl AsRef<Path>, buf: &[u8], offset: &mut u64) -> Result<usize> {
        let path = path.as_ref();
        let mut inner = self.inner.lock().unwrap();

        if !inner.files.contains_key(path) {
            return Err(unregistered(path));
        }

        let block_size = inner.block_size;
        let mut total = 0;
        while total < buf.len() {
            let base = block_base(*offset, block_size);
            let pos = (*offset - base) as usize;

            let block = inner.ensure_block(path, base)?;
            let n = block.write_at(pos, &buf[total..]);
            debug_assert!(n > 0); // pos < block_size, so the block always takes bytes

            total += n;
            *offset += n as u64;
        }

        Ok(total)
    }

    /// Write every dirty block of the file back to disk. No-op when the
    /// path is unknown.
    pub fn flush(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;

        if let Some(entry) = inner.files.get_mut(path) {
            flush_file(entry, &mut inner.stats)?;
        }
        Ok(())
    }

    /// Write every dirty block of every registered file back to disk.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;

        for entry in inner.files.values_mut() {
            flush_file(entry, &mut inner.stats)?;
        }
        Ok(())
    }

    /// Change the global block-count bound and evict down to it at once.
    pub fn set_capacity(&self, max_blocks: NonZeroUsize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.max_blocks = max_blocks.get();
        log::debug!("capacity set to {} blocks", inner.max_blocks);
        inner.evict_if_needed()
    }

    /// Logical length of a registered file: the on-disk length or the
    /// furthest cached valid byte, whichever is larger. Dirty blocks past
    /// the on-disk tail count even before they are flushed.
    pub fn file_len(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let inner = self.inner.lock().unwrap();

        let entry = inner.files.get(path).ok_or_else(|| unregistered(path))?;
        let on_disk = entry.file.metadata()?.len();
        let cached = entry
            .blocks
            .values()
            .map(|block| block.base() + block.len() as u64)
            .max()
            .unwrap_or(0);
        Ok(on_disk.max(cached))
    }

    pub fn block_size(&self) -> usize {
        self.inner.lock().unwrap().block_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().max_blocks
    }

    /// Number of blocks currently resident, across all files.
    pub fn block_count(&self) -> usize {
        self.inner.lock().unwrap().cur_blocks
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats.clone()
    }
}

impl Default for BlockCacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Resolve the block holding `base`, loading it from disk on a miss.
    /// The only place blocks are created; runs the eviction pass after
    /// every insertion so the capacity bound holds on return.
    fn ensure_block(&mut self, path: &Path, base: u64) -> Result<&mut Block> {
        let entry = match self.files.get(path) {
            Some(entry) => entry,
            None => return Err(unregistered(path)),
        };
        let key = BlockKey {
            file: entry.id,
            base,
        };

        if entry.blocks.contains_key(&base) {
            self.stats.hits += 1;
            self.recency.promote(&key);
            return Ok(self
                .files
                .get_mut(path)
                .unwrap()
                .blocks
                .get_mut(&base)
                .unwrap());
        }

        self.stats.misses += 1;

        let mut block = Block::new(base, self.block_size);
        {
            let entry = self.files.get_mut(path).unwrap();
            if let Err(err) = block.load(&mut entry.file) {
                // a failed load reads the same as reading past end of file
                log::trace!(
                    "load of block {:#x} in {} failed: {}",
                    base,
                    path.display(),
                    err
                );
            }
            entry.blocks.insert(base, block);
        }
        self.recency.put(key, ());
        self.cur_blocks += 1;

        self.evict_if_needed()?;
        debug_assert_eq!(self.recency.len(), self.cur_blocks);

        // still resident: insertion made it the most recent entry, and the
        // eviction pass stops before reaching it
        Ok(self
            .files
            .get_mut(path)
            .unwrap()
            .blocks
            .get_mut(&base)
            .unwrap())
    }

    /// Evict from the cold end of the recency index until the resident
    /// count is back under the bound. A dirty victim is written back first;
    /// a failed write-back aborts the pass with the block still resident
    /// and still dirty.
    fn evict_if_needed(&mut self) -> Result<()> {
        while self.cur_blocks > self.max_blocks {
            let key = match self.recency.peek_lru() {
                Some((key, _)) => *key,
                None => break,
            };

            if let Some(path) = self.paths.get(&key.file) {
                if let Some(entry) = self.files.get_mut(path) {
                    if let Some(block) = entry.blocks.get_mut(&key.base) {
                        if block.dirty() {
                            block.store(&mut entry.file)?;
                            self.stats.writebacks += 1;
                        }
                    }
                    if entry.blocks.remove(&key.base).is_some() {
                        self.cur_blocks -= 1;
                    }
                }
                log::trace!(
                    "evicted block {:#x} of {} ({}/{} resident)",
                    key.base,
                    path.display(),
                    self.cur_blocks,
                    self.max_blocks
                );
            }
            self.recency.pop(&key);
        }

        Ok(())
    }
}

fn unregistered(path: &Path) -> FcacheError {
    FcacheError::Unregistered(path.display().to_string())
}

// Write back every dirty block of one file, clearing dirty flags only on
// blocks that actually reached the disk.
fn flush_file(entry: &mut FileEntry, stats: &mut CacheStats) -> Result<()> {
    let mut flushed = 0;
    for block in entry.blocks.values_mut() {
        if block.dirty() {
            block.store(&mut entry.file)?;
            flushed += 1;
        }
    }
    stats.writebacks += flushed;
    Ok(())
}
