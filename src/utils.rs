use std::path::{Path, PathBuf};

// Round a byte offset down to the start of its block.
pub(crate) fn block_base(offset: u64, block_size: usize) -> u64 {
    offset / block_size as u64 * block_size as u64
}

fn with_suffix(path: &Path, suffix: String) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn part_path(path: &Path, index: usize) -> PathBuf {
    with_suffix(path, format!(".part{}.sorted", index))
}

pub(crate) fn merge_path(path: &Path, round: usize, group: usize) -> PathBuf {
    with_suffix(path, format!(".merge{}_{}.bin", round, group))
}

pub(crate) fn sorted_path(path: &Path) -> PathBuf {
    with_suffix(path, ".sorted".to_owned())
}
