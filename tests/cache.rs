use fcache::*;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn cache_with(block_size: usize, max_blocks: usize) -> Arc<BlockCacheManager> {
    Arc::new(BlockCacheManager::with_capacity(
        NonZeroUsize::new(block_size).unwrap(),
        NonZeroUsize::new(max_blocks).unwrap(),
    ))
}

#[test]
fn write_spans_blocks_and_reads_back_before_flush() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(4, 8);
    let path = dir.path().join("a.dat");

    let mut file = CachedFile::open(Arc::clone(&cache), &path)?;
    file.write_all(b"ABCDEF")?;
    assert_eq!(file.offset(), 6);

    // "ABCD" and "EF" are two resident blocks; the disk has nothing yet
    assert_eq!(cache.block_count(), 2);
    assert_eq!(fs::metadata(&path)?.len(), 0);

    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 6];
    file.read_exact(&mut buf)?;
    assert_eq!(&buf, b"ABCDEF");

    // after a flush a direct reopen, bypassing the cache, sees the bytes
    file.flush()?;
    assert_eq!(fs::read(&path)?, b"ABCDEF");

    file.close()?;
    Ok(())
}

#[test]
fn close_flushes_dirty_blocks() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(16, 8);
    let path = dir.path().join("closed.dat");

    let mut file = CachedFile::open(cache, &path)?;
    file.write_all(b"written through the cache")?;
    file.close()?;

    assert_eq!(fs::read(&path)?, b"written through the cache");

    // the handle is dead afterwards
    let mut buf = [0u8; 4];
    let err = file.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
    Ok(())
}

#[test]
fn eviction_persists_dirty_blocks() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(4, 1);
    let path_a = dir.path().join("a.dat");
    let path_b = dir.path().join("b.dat");

    let mut file_a = CachedFile::open(Arc::clone(&cache), &path_a)?;
    let mut file_b = CachedFile::open(Arc::clone(&cache), &path_b)?;

    file_a.write_all(b"AAAA")?;
    assert_eq!(cache.block_count(), 1);

    // touching b's block 0 evicts a's, which must reach the disk first
    file_b.write_all(b"BBBB")?;
    assert_eq!(cache.block_count(), 1);
    assert_eq!(fs::read(&path_a)?, b"AAAA");

    // reading a reloads identical bytes from disk
    file_a.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 4];
    file_a.read_exact(&mut buf)?;
    assert_eq!(&buf, b"AAAA");

    file_a.close()?;
    file_b.close()?;
    Ok(())
}

#[test]
fn block_count_never_exceeds_capacity() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(4, 2);
    let path = dir.path().join("bound.dat");

    let mut file = CachedFile::open(Arc::clone(&cache), &path)?;
    for i in 0..16u8 {
        file.write_all(&[i; 4])?;
        assert!(cache.block_count() <= cache.capacity());
    }

    // shrinking enforces the bound at once, not at the next access
    cache.set_capacity(NonZeroUsize::new(1).unwrap())?;
    assert!(cache.block_count() <= 1);

    // the evicted dirty blocks were persisted, so everything reads back
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 64];
    file.read_exact(&mut buf)?;
    for i in 0..16usize {
        assert_eq!(&buf[i * 4..(i + 1) * 4], &[i as u8; 4]);
    }

    file.close()?;
    Ok(())
}

#[test]
fn sparse_write_zero_fills_up_to_the_data() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(16, 8);
    let path = dir.path().join("sparse.dat");

    let mut file = CachedFile::open(Arc::clone(&cache), &path)?;
    file.seek(SeekFrom::Start(100))?;
    file.write_all(b"X")?;
    assert_eq!(cache.file_len(&path)?, 101);

    // before the flush the on-disk file is still empty, so a read from
    // offset zero finds no valid bytes
    file.seek(SeekFrom::Start(0))?;
    let mut probe = [0u8; 8];
    assert_eq!(file.read(&mut probe)?, 0);

    file.flush()?;
    let bytes = fs::read(&path)?;
    assert_eq!(bytes.len(), 101);
    assert!(bytes[..100].iter().all(|b| *b == 0));
    assert_eq!(bytes[100], b'X');

    file.close()?;
    Ok(())
}

#[test]
fn unwritten_range_within_a_block_reads_as_zeros() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(16, 8);
    let path = dir.path().join("hole.dat");

    // writing at offset 4 of a fresh block zero-fills bytes 0..4
    let mut file = CachedFile::open(cache, &path)?;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(b"X")?;

    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 5];
    file.read_exact(&mut buf)?;
    assert_eq!(&buf, b"\0\0\0\0X");

    file.close()?;
    Ok(())
}

#[test]
fn read_is_bounded_by_file_size() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(16, 8);
    let path = dir.path().join("short.dat");
    fs::write(&path, b"hi")?;

    let mut file = CachedFile::open(cache, &path)?;
    let mut buf = [0u8; 16];
    let n = file.read(&mut buf)?;
    assert_eq!(n, 2);
    assert_eq!(&buf[..2], b"hi");

    // the cursor sits at end of file now; further reads return nothing
    assert_eq!(file.read(&mut buf)?, 0);

    file.close()?;
    Ok(())
}

#[test]
fn unregistered_path_is_a_recoverable_error() {
    let cache = cache_with(4, 4);
    let mut offset = 0u64;
    let mut buf = [0u8; 4];

    match cache.read("never-registered", &mut buf, &mut offset) {
        Err(FcacheError::Unregistered(_)) => {}
        other => panic!("expected Unregistered, got {:?}", other.map(|_| ())),
    }
    match cache.write("never-registered", b"data", &mut offset) {
        Err(FcacheError::Unregistered(_)) => {}
        other => panic!("expected Unregistered, got {:?}", other.map(|_| ())),
    }

    // flush and unregister of unknown paths are no-ops
    cache.flush("never-registered").unwrap();
    cache.unregister("never-registered").unwrap();
}

#[test]
fn reregistering_flushes_the_stale_descriptor() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(4, 4);
    let path = dir.path().join("dup.dat");

    let first = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)?;
    cache.register(&path, first)?;

    let mut offset = 0u64;
    cache.write(&path, b"data", &mut offset)?;
    assert_eq!(fs::metadata(&path)?.len(), 0);

    // a second open of the same cache key: the stale descriptor's dirty
    // block goes to disk before it is replaced and closed
    let second = OpenOptions::new().read(true).write(true).open(&path)?;
    cache.register(&path, second)?;
    assert_eq!(fs::read(&path)?, b"data");

    cache.unregister(&path)?;
    Ok(())
}

#[test]
fn seek_from_end_resolves_against_cached_length() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(4, 8);
    let path = dir.path().join("seek.dat");

    let mut file = CachedFile::open(cache, &path)?;
    file.write_all(b"ABCDEF")?;

    // nothing flushed: the length comes from the cached blocks
    assert_eq!(file.seek(SeekFrom::End(-2))?, 4);
    let mut buf = [0u8; 2];
    file.read_exact(&mut buf)?;
    assert_eq!(&buf, b"EF");

    let err = file.seek(SeekFrom::End(-10)).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    let err = file.seek(SeekFrom::Current(-100)).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

    file.close()?;
    Ok(())
}

#[test]
fn stats_track_hits_misses_and_writebacks() -> Result<()> {
    let dir = TempDir::new()?;
    let cache = cache_with(4, 4);
    let path = dir.path().join("stats.dat");

    let mut file = CachedFile::open(Arc::clone(&cache), &path)?;
    file.write_all(b"abcd")?; // miss: first touch of block 0
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?; // hit

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert!(stats.hit_rate() > 0.0 && stats.hit_rate() < 1.0);

    file.flush()?;
    assert_eq!(cache.stats().writebacks, 1);

    file.close()?;
    Ok(())
}

#[test]
fn concurrent_handles_on_distinct_paths() -> Result<()> {
    let dir = TempDir::new()?;
    // two resident blocks across eight files: constant cross-file eviction
    let cache = cache_with(8, 2);
    let barrier = Arc::new(Barrier::new(8));

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        let path = dir.path().join(format!("f{}.dat", i));
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut file = CachedFile::open(cache, &path).unwrap();
            file.write_all(&vec![i; 64]).unwrap();
            file.close().unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..8u8 {
        let bytes = fs::read(dir.path().join(format!("f{}.dat", i)))?;
        assert_eq!(bytes, vec![i; 64]);
    }
    assert!(cache.block_count() <= cache.capacity());
    Ok(())
}
