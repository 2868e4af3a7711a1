use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::BlockCacheManager;
use crate::error::{FcacheError, Result};

/// A file handle whose reads and writes go through a shared block cache.
///
/// The handle tracks only its logical offset; all data movement is
/// delegated to the injected [`BlockCacheManager`], keyed by path. Dirty
/// data reaches the disk on `flush`, on `close`, or when the cache evicts
/// a block.
pub struct CachedFile {
    cache: Arc<BlockCacheManager>,
    path: PathBuf,
    offset: u64,
    open: bool,
}

impl CachedFile {
    /// Open `path` read-write (creating it if missing) and register it with
    /// the cache. Open failures leave nothing registered.
    pub fn open(cache: Arc<BlockCacheManager>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        cache.register(&path, file)?;

        Ok(Self {
            cache,
            path,
            offset: 0,
            open: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current logical offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flush the file's dirty blocks and drop its registration. Every later
    /// operation on the handle fails. Calling `close` twice is fine.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }

        self.cache.flush(&self.path)?;
        self.cache.unregister(&self.path)?;
        self.open = false;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(FcacheError::Closed)
        }
    }
}

impl Read for CachedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let n = self.cache.read(&self.path, buf, &mut self.offset)?;
        Ok(n)
    }
}

impl Write for CachedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let n = self.cache.write(&self.path, buf, &mut self.offset)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.cache.flush(&self.path)?;
        Ok(())
    }
}

impl Seek for CachedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;

        let next = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => offset_from(self.offset, delta),
            SeekFrom::End(delta) => {
                let len = self.cache.file_len(&self.path)?;
                offset_from(len, delta)
            }
        };

        match next {
            Some(offset) => {
                self.offset = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the file",
            )),
        }
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("close of {} failed: {}", self.path.display(), err);
        }
    }
}

fn offset_from(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}
