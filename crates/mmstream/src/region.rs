//! One mapped slice of the file.

use std::fs::File;
use std::io;
use std::sync::OnceLock;

use config::MapMode;
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{Result, StreamError};

/// A live memory mapping covering one slice of the file.
///
/// Dropping a `Region` unmaps it immediately.
#[derive(Debug)]
pub(crate) enum Region {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Region {
    /// Maps `len` bytes of `file` starting at `offset`.
    ///
    /// `offset` need not be page aligned; `memmap2` aligns the underlying
    /// call and hides the adjustment.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Map`] if the range is empty or reaches past the
    /// file's current end. Touching pages beyond the end raises `SIGBUS`, so
    /// such a range is never mapped.
    pub(crate) fn map(file: &File, mode: MapMode, offset: u64, len: u64) -> Result<Self> {
        let map_err = |source: io::Error| StreamError::Map {
            offset,
            len,
            source,
        };

        let len_usize = usize::try_from(len).map_err(|_| {
            map_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "slice exceeds the addressable range",
            ))
        })?;
        if len_usize == 0 {
            return Err(map_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty range",
            )));
        }

        let file_len = file.metadata().map_err(map_err)?.len();
        if offset.saturating_add(len) > file_len {
            return Err(map_err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range ends past the file length {file_len}"),
            )));
        }

        let mut opts = MmapOptions::new();
        opts.offset(offset).len(len_usize);

        // SAFETY: mapping a file is unsafe because another process may
        // truncate or modify it underneath us. The stream owns the file handle
        // for as long as any of its regions exist, the range was checked
        // against the file length just above, and all access goes through
        // bounds-checked slices of the mapping.
        let region = match mode {
            MapMode::ReadOnly => Region::ReadOnly(unsafe { opts.map(file) }.map_err(map_err)?),
            MapMode::ReadWrite => {
                Region::ReadWrite(unsafe { opts.map_mut(file) }.map_err(map_err)?)
            }
        };
        Ok(region)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Region::ReadOnly(m) => &m[..],
            Region::ReadWrite(m) => &m[..],
        }
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self {
            Region::ReadOnly(_) => Err(StreamError::ReadOnly),
            Region::ReadWrite(m) => Ok(&mut m[..]),
        }
    }

    /// Writes the whole region back to the file. No-op for read-only maps.
    pub(crate) fn flush(&self) -> io::Result<()> {
        match self {
            Region::ReadOnly(_) => Ok(()),
            Region::ReadWrite(m) => m.flush(),
        }
    }

    /// Writes `[offset, offset + len)` of the region back to the file.
    pub(crate) fn flush_range(&self, offset: usize, len: usize) -> io::Result<()> {
        match self {
            Region::ReadOnly(_) => Ok(()),
            Region::ReadWrite(m) => m.flush_range(offset, len),
        }
    }
}

/// Whether this platform can release a mapping eagerly.
///
/// Probed once per process. Every target `memmap2` builds for unmaps on
/// drop, so this only reports `false` on targets outside that set.
#[must_use]
pub fn platform_has_hard_unmap() -> bool {
    static PROBE: OnceLock<bool> = OnceLock::new();
    *PROBE.get_or_init(|| cfg!(any(unix, windows)))
}
