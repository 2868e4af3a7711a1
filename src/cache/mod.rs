mod block;
mod manager;

pub use manager::*;

/// Write-back cache layer of fcache
/// file data is divided into fixed-size aligned blocks, loaded on first
/// access and written back lazily: on flush, on close, or when the cache
/// evicts the block to stay under the global capacity
///
/// one mutex serializes every operation of the manager, including the
/// disk I/O done while loading and writing back blocks
/// Conclusion: at most one block is in flight at any moment, so the
/// resident-block count and the recency index can never disagree

// 4KiB blocks, 1024 blocks: a 4MiB working set by default
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_MAX_BLOCKS: usize = 1024;
