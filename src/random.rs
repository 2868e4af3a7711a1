use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use rand::Rng;

use crate::error::Result;

// 64KiB of buffering for generated files.
const WRITE_BUF_SIZE: usize = 1 << 16;

/// Uniform integer in `[min, max]` from the thread-local generator.
pub fn random_int(min: i32, max: i32) -> i32 {
    rand::thread_rng().gen_range(min..=max)
}

/// Vector of `len` uniform integers in `[min, max]`.
pub fn random_vec(min: i32, max: i32, len: usize) -> Vec<i32> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen_range(min..=max)).collect()
}

/// Write `count` uniform integers in `[min, max]` to `path` as packed
/// little-endian `i32`, the format the sorter consumes. The file may be
/// large, so values stream through a buffered writer instead of being
/// materialized at once.
pub fn random_file(path: impl AsRef<Path>, min: i32, max: i32, count: usize) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::with_capacity(WRITE_BUF_SIZE, file);

    let mut rng = rand::thread_rng();
    for _ in 0..count {
        out.write_i32::<LittleEndian>(rng.gen_range(min..=max))?;
    }
    out.flush()?;

    Ok(())
}
