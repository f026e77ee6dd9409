use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::{CacheMode, MappedStream, MappedWriter, StreamConfig};

/// Slice shift used by most tests: 1 KiB slices.
pub const SHIFT: u32 = 10;
pub const SLICE: u64 = 1 << SHIFT;

/// Deterministic, non-repeating-per-slice content.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn open_rw(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

pub fn rw_config(cache: CacheMode) -> StreamConfig {
    StreamConfig::read_write()
        .with_slice_shift(SHIFT)
        .with_cache_mode(cache)
}

pub fn ro_config(cache: CacheMode) -> StreamConfig {
    StreamConfig::read_only()
        .with_slice_shift(SHIFT)
        .with_cache_mode(cache)
}

/// Writes `content` to `dir/name` and returns its path.
pub fn file_with(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, content)?;
    Ok(path)
}

/// A read-only stream over a fresh file holding `content`.
pub fn reader_over(dir: &Path, content: &[u8], cache: CacheMode) -> Result<MappedStream> {
    let path = file_with(dir, "input.bin", content)?;
    Ok(MappedStream::open(File::open(path)?, ro_config(cache))?)
}

/// A writer over an empty file at `dir/name`.
pub fn empty_writer(dir: &Path, name: &str, cache: CacheMode) -> Result<(MappedWriter, PathBuf)> {
    let path = dir.join(name);
    let writer = MappedWriter::open_file(open_rw(&path)?, rw_config(cache))?;
    Ok((writer, path))
}

/// A writer over a file already holding `content`, cursor at 0.
pub fn writer_over(
    dir: &Path,
    content: &[u8],
    cache: CacheMode,
) -> Result<(MappedWriter, PathBuf)> {
    let path = file_with(dir, "output.bin", content)?;
    let writer = MappedWriter::open_file(open_rw(&path)?, rw_config(cache))?;
    Ok((writer, path))
}
