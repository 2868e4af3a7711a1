use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::pool::ThreadPool;
use crate::utils::{merge_path, part_path, sorted_path};

/// Bytes of input sorted in memory at once, 16 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Sorted runs merged per task.
pub const DEFAULT_MERGE_WAY: usize = 8;

/// External merge sort over files of packed little-endian `i32`.
///
/// The input is split into chunks sorted in parallel on the pool, then the
/// sorted runs are merged k at a time, also on the pool, round after round
/// until a single `<input>.sorted` file remains. Intermediate runs live
/// beside the input file and are deleted as they are merged away.
pub struct ExternalSorter<'a> {
    pool: &'a ThreadPool,
    chunk_size: usize,
    k: usize,
}

impl<'a> ExternalSorter<'a> {
    pub fn new(pool: &'a ThreadPool) -> Self {
        Self::with_limits(pool, DEFAULT_CHUNK_SIZE, DEFAULT_MERGE_WAY)
    }

    /// Sorter with a custom chunk size (bytes) and merge fan-in. The chunk
    /// size is clamped to hold at least one integer, the fan-in to at
    /// least two runs.
    pub fn with_limits(pool: &'a ThreadPool, chunk_size: usize, k: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(mem::size_of::<i32>()),
            k: k.max(2),
        }
    }

    /// Sort `path`, producing and returning `<path>.sorted`.
    pub fn sort(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let mut input = BufReader::new(File::open(path)?);

        // Split into sorted runs on the pool.
        let per_chunk = self.chunk_size / mem::size_of::<i32>();
        let mut handles = Vec::new();
        let mut index = 0;
        loop {
            let chunk = read_ints(&mut input, per_chunk)?;
            if chunk.is_empty() {
                break;
            }

            let out = part_path(path, index);
            handles.push(self.pool.submit(move || write_sorted_run(chunk, out)));
            index += 1;
        }

        let mut runs = Vec::with_capacity(handles.len());
        for handle in handles {
            runs.push(handle.wait()??);
        }

        // An empty input still yields an (empty) output file.
        if runs.is_empty() {
            let out = sorted_path(path);
            File::create(&out)?;
            return Ok(out);
        }

        // Merge rounds: k runs per task, singletons pass through.
        let mut round = 0;
        while runs.len() > 1 {
            let mut handles = Vec::new();
            let mut next = Vec::new();

            for (group_id, group) in runs.chunks(self.k).enumerate() {
                if group.len() == 1 {
                    next.push(group[0].clone());
                    continue;
                }

                let group = group.to_vec();
                let out = merge_path(path, round, group_id);
                handles.push(self.pool.submit(move || merge_runs(&group, &out).map(|_| out)));
            }

            for handle in handles {
                next.push(handle.wait()??);
            }
            runs = next;
            round += 1;
        }

        let out = sorted_path(path);
        fs::rename(&runs[0], &out)?;
        log::debug!("sorted {} into {}", path.display(), out.display());
        Ok(out)
    }
}

fn read_ints(input: &mut impl Read, limit: usize) -> Result<Vec<i32>> {
    let mut vals = Vec::with_capacity(limit);
    while vals.len() < limit {
        match input.read_i32::<LittleEndian>() {
            Ok(v) => vals.push(v),
            Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(vals)
}

fn write_sorted_run(mut vals: Vec<i32>, out: PathBuf) -> Result<PathBuf> {
    vals.sort_unstable();

    let mut file = BufWriter::new(File::create(&out)?);
    for v in vals {
        file.write_i32::<LittleEndian>(v)?;
    }
    file.flush()?;

    Ok(out)
}

// Min-heap merge of sorted runs into `out`; the runs are deleted once the
// merge has succeeded.
fn merge_runs(inputs: &[PathBuf], out: &Path) -> Result<()> {
    let mut readers = Vec::with_capacity(inputs.len());
    for path in inputs {
        readers.push(BufReader::new(File::open(path)?));
    }

    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (i, reader) in readers.iter_mut().enumerate() {
        if let Some(v) = next_int(reader)? {
            heap.push(Reverse((v, i)));
        }
    }

    let mut file = BufWriter::new(File::create(out)?);
    while let Some(Reverse((v, i))) = heap.pop() {
        file.write_i32::<LittleEndian>(v)?;
        if let Some(v) = next_int(&mut readers[i])? {
            heap.push(Reverse((v, i)));
        }
    }
    file.flush()?;

    for path in inputs {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn next_int(reader: &mut impl Read) -> Result<Option<i32>> {
    match reader.read_i32::<LittleEndian>() {
        Ok(v) => Ok(Some(v)),
        Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err.into()),
    }
}
