use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use config::{CacheMode, MapMode, StreamConfig};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{Result, StreamError};
use crate::resize::FileResize;
use crate::state::{StreamState, StreamStats};
use crate::writer::MappedWriter;

/// A seekable byte stream over a memory-mapped file.
///
/// The file is covered by fixed-size slices of `1 << slice_shift` bytes that
/// are mapped the first time the cursor touches them. What happens to a slice
/// once the cursor leaves it is decided by the configured [`CacheMode`].
///
/// A stream and the [`MappedWriter`] obtained from it share one cursor, one
/// length and one mark. The underlying file is released when the last of
/// them is closed or dropped.
///
/// # Panics
///
/// Writes panic with an "end of tape" message if the stream still has no
/// room after growing, which means the resize op did not change the length.
pub struct MappedStream {
    pub(crate) shared: Arc<Mutex<StreamState>>,
    closed: AtomicBool,
}

impl MappedStream {
    /// Opens a stream over `file` with the given configuration.
    ///
    /// # Errors
    ///
    /// - [`StreamError::Config`] if the configuration is invalid
    /// - [`StreamError::Map`] if the file is empty and the map mode is
    ///   read-only
    /// - [`StreamError::Io`] if the file length cannot be read
    pub fn open(file: File, config: StreamConfig) -> Result<Self> {
        let state = StreamState::open(file, &config)?;
        Ok(Self::from_shared(Arc::new(Mutex::new(state))))
    }

    /// Opens a read-only stream with default slicing and caching.
    pub fn open_read_only(file: File) -> Result<Self> {
        Self::open(file, StreamConfig::read_only())
    }

    pub(crate) fn from_shared(shared: Arc<Mutex<StreamState>>) -> Self {
        Self {
            shared,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, StreamState>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }
        Ok(self.shared.lock())
    }

    /// Returns a writer sharing this stream's cursor and mapping.
    ///
    /// `resize` becomes the stream's resize op and is used whenever the
    /// writer has to grow or shrink the file.
    ///
    /// # Errors
    ///
    /// - [`StreamError::ReadOnly`] if the stream was opened read-only
    /// - [`StreamError::ResizeOpAlreadySet`] if a writer was already created
    pub fn writer<R>(&self, resize: R) -> Result<MappedWriter>
    where
        R: FileResize + 'static,
    {
        let mut state = self.lock()?;
        state.set_resize_op(Box::new(resize))?;
        state.acquire_handle()?;
        drop(state);
        Ok(MappedWriter::from_shared(Arc::clone(&self.shared)))
    }

    // -------------------- Cursor --------------------

    /// Current absolute position.
    pub fn position(&self) -> Result<u64> {
        self.lock()?.position()
    }

    /// Moves the cursor to `pos`, which may equal the length.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Range`] if `pos > length`.
    pub fn set_position(&self, pos: u64) -> Result<()> {
        self.lock()?.set_position(pos)
    }

    /// Logical length in bytes. Still answers after close.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.shared.lock().length()
    }

    pub fn remaining(&self) -> Result<u64> {
        self.lock()?.remaining()
    }

    /// Advances by `min(n, remaining)` bytes and returns the distance moved.
    /// Negative `n` is a no-op.
    pub fn skip(&self, n: i64) -> Result<u64> {
        self.lock()?.skip(n)
    }

    /// Records the current position for a later [`reset`](Self::reset).
    pub fn mark(&self) -> Result<()> {
        self.lock()?.mark()
    }

    /// Returns to the marked position.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::MarkNotSet`] if no mark exists, including when
    /// a length change dropped it.
    pub fn reset(&self) -> Result<()> {
        self.lock()?.reset()
    }

    // -------------------- Reads --------------------

    /// Reads one byte, or `None` at end of stream.
    pub fn read_byte(&self) -> Result<Option<u8>> {
        self.lock()?.read_byte()
    }

    /// Fills as much of `buf` as remains. `None` means end of stream.
    pub fn read_bytes(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.lock()?.read(buf)
    }

    /// Reads up to `count` bytes into `buf[offset..offset + count]`.
    ///
    /// Returns `Some(0)` when `count` is zero and `None` when nothing is left.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Range`] if the target range falls outside `buf`.
    pub fn read_into(&self, buf: &mut [u8], offset: usize, count: usize) -> Result<Option<usize>> {
        let target = sub_range_mut(buf, offset, count)?;
        self.lock()?.read(target)
    }

    /// Runs `f` on the mapped bytes from the cursor to the end of its slice,
    /// without copying. `f` gets an empty slice at end of stream.
    ///
    /// The cursor does not move.
    pub fn with_current_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.lock()?.with_current_slice(f)
    }

    /// Moves the cursor to the start of the next slice. Returns `false` if
    /// the cursor is already in the last one.
    pub fn next_slice(&self) -> Result<bool> {
        self.lock()?.next_slice()
    }

    // -------------------- Length & durability --------------------

    /// Adopts `new_len` as the length after the file was resized by someone
    /// else. The file itself is not touched.
    ///
    /// Slices whose byte range changed are unmapped, the position is clamped
    /// to the new length and a mark beyond it is dropped. A length past the
    /// file's real end is accepted here, but reading the bytes beyond that
    /// end fails with [`StreamError::Map`].
    pub fn notify_length_change(&self, new_len: u64) -> Result<()> {
        self.lock()?.apply_length(new_len)
    }

    /// Resizes the file through the stream's resize op and adopts the new
    /// length.
    ///
    /// # Errors
    ///
    /// - [`StreamError::ResizeUnsupported`] if no writer has registered a
    ///   resize op and `new_len` differs from the file's length
    /// - [`StreamError::ResizeShort`] if the resize op left the file shorter
    ///   than `new_len`; the stream keeps the length the file really has
    pub fn set_length(&self, new_len: u64) -> Result<()> {
        self.lock()?.set_length(new_len)
    }

    /// Writes dirty slices back and syncs the file. Has no effect on a
    /// read-only stream.
    pub fn flush(&self, sync_metadata: bool) -> Result<()> {
        self.lock()?.flush(sync_metadata)
    }

    /// Drops every soft-evicted mapping that is still pooled. Returns how
    /// many were dropped.
    pub fn reclaim_evicted(&self) -> Result<usize> {
        self.lock()?.reclaim_evicted()
    }

    pub fn synchronous(&self) -> Result<bool> {
        Ok(self.lock()?.synchronous())
    }

    pub fn set_synchronous(&self, synchronous: bool) -> Result<()> {
        self.lock()?.set_synchronous(synchronous);
        Ok(())
    }

    // -------------------- Introspection --------------------

    /// The effective cache mode. A stream configured for
    /// [`CacheMode::HardFlush`] reports [`CacheMode::SoftFlush`] once it has
    /// found that mappings cannot be released eagerly.
    #[must_use]
    pub fn cache_mode(&self) -> CacheMode {
        self.shared.lock().cache_mode()
    }

    #[must_use]
    pub fn map_mode(&self) -> MapMode {
        self.shared.lock().map_mode()
    }

    #[must_use]
    pub fn slice_shift(&self) -> u32 {
        self.shared.lock().slice_shift()
    }

    #[must_use]
    pub fn slice_size(&self) -> u64 {
        self.shared.lock().slice_size()
    }

    #[must_use]
    pub fn slice_count(&self) -> usize {
        self.shared.lock().slice_count()
    }

    /// Index of the slice the cursor is in.
    pub fn current_slice_index(&self) -> Result<usize> {
        Ok(self.lock()?.slice_index())
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.shared.lock().stats()
    }

    /// Closes this handle. The mapping is torn down once every handle
    /// sharing it has been closed. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] if the final sync of a writable file
    /// fails; the stream is closed regardless.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.lock().release_handle()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for MappedStream {
    fn drop(&mut self) {
        // Best-effort: Drop cannot propagate errors.
        let _ = self.close();
    }
}

impl fmt::Debug for MappedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedStream")
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Read for MappedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf)?.unwrap_or(0))
    }
}

impl Seek for MappedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.lock()?;
        let target = seek_target(pos, state.position()?, state.length())?;
        state.set_position(target)?;
        Ok(target)
    }
}

/// Resolves a [`SeekFrom`] against the current position and length.
pub(crate) fn seek_target(pos: SeekFrom, current: u64, len: u64) -> io::Result<u64> {
    let (base, delta) = match pos {
        SeekFrom::Start(n) => return Ok(n),
        SeekFrom::End(d) => (len, d),
        SeekFrom::Current(d) => (current, d),
    };
    base.checked_add_signed(delta).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek to a negative or overflowing position",
        )
    })
}

/// `buf[offset..offset + count]`, or a range error.
pub(crate) fn sub_range_mut(buf: &mut [u8], offset: usize, count: usize) -> Result<&mut [u8]> {
    let limit = buf.len() as u64;
    let end = offset
        .checked_add(count)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| {
            let end = (offset as u64).saturating_add(count as u64);
            StreamError::range("buffer range end", end, limit)
        })?;
    Ok(&mut buf[offset..end])
}

/// `buf[offset..offset + count]`, or a range error.
pub(crate) fn sub_range(buf: &[u8], offset: usize, count: usize) -> Result<&[u8]> {
    let limit = buf.len() as u64;
    let end = offset
        .checked_add(count)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| {
            let end = (offset as u64).saturating_add(count as u64);
            StreamError::range("buffer range end", end, limit)
        })?;
    Ok(&buf[offset..end])
}
