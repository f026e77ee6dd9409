use std::fmt;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use config::{CacheMode, StreamConfig};
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{Result, StreamError};
use crate::resize::FileResize;
use crate::state::{lock_pair, StreamState, StreamStats};
use crate::stream::{seek_target, sub_range, MappedStream};

/// The write side of a mapped stream.
///
/// Writes land directly in the mapping. A write that would run past the
/// end first grows the file through the stream's resize op by exactly the
/// shortfall, so the length always tracks the furthest byte written.
///
/// ```text
///   position           length
///      v                 v
///   [..|xxxxxxxxxxxxxxxxx]              before: 17 bytes remain
///   [..|xxxxxxxxxxxxxxxxxxxxxx]         write(22): grow by 5, then copy
///                             ^
///                       position == length
/// ```
///
/// # Panics
///
/// Writes panic with an "end of tape" message if the resize op reports
/// success but the stream still has no room afterwards.
pub struct MappedWriter {
    shared: Arc<Mutex<StreamState>>,
    closed: AtomicBool,
}

impl MappedWriter {
    /// Opens a read-write stream over `file` and returns its writer.
    ///
    /// # Errors
    ///
    /// - [`StreamError::ReadOnly`] if `config` asks for a read-only mapping
    /// - anything [`MappedStream::open`] returns
    pub fn open<R>(file: File, config: StreamConfig, resize: R) -> Result<Self>
    where
        R: FileResize + 'static,
    {
        if !config.map_mode.is_writable() {
            return Err(StreamError::ReadOnly);
        }
        let mut state = StreamState::open(file, &config)?;
        state.set_resize_op(Box::new(resize))?;
        Ok(Self::from_shared(Arc::new(Mutex::new(state))))
    }

    /// Opens `file` read-write, resizing through a clone of the same handle.
    pub fn open_file(file: File, config: StreamConfig) -> Result<Self> {
        let resize = file.try_clone()?;
        Self::open(file, config, resize)
    }

    pub(crate) fn from_shared(shared: Arc<Mutex<StreamState>>) -> Self {
        Self {
            shared,
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StreamState>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed);
        }
        Ok(self.shared.lock())
    }

    /// Returns a reader sharing this writer's cursor and mapping.
    pub fn reader(&self) -> Result<MappedStream> {
        self.lock()?.acquire_handle()?;
        Ok(MappedStream::from_shared(Arc::clone(&self.shared)))
    }

    // -------------------- Writes --------------------

    pub fn write_byte(&self, byte: u8) -> Result<()> {
        self.lock()?.write(&[byte])
    }

    /// Writes all of `buf` at the cursor, growing the file if needed.
    pub fn write_bytes(&self, buf: &[u8]) -> Result<()> {
        self.lock()?.write(buf)
    }

    /// Writes `buf[offset..offset + count]`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Range`] if the source range falls outside `buf`.
    pub fn write_from(&self, buf: &[u8], offset: usize, count: usize) -> Result<()> {
        let source = sub_range(buf, offset, count)?;
        self.lock()?.write(source)
    }

    /// Copies `count` bytes from `source`'s cursor into this stream, moving
    /// both cursors. Bytes go from one mapping to the other without an
    /// intermediate buffer.
    ///
    /// # Errors
    ///
    /// - [`StreamError::SelfCopy`] if `source` shares this writer's stream
    /// - [`StreamError::Range`] if `count` exceeds `source.remaining()`
    pub fn write_from_stream(&self, source: &MappedStream, count: u64) -> Result<()> {
        if Arc::ptr_eq(&self.shared, &source.shared) {
            return Err(StreamError::SelfCopy);
        }
        if self.closed.load(Ordering::Acquire) || source.is_closed() {
            return Err(StreamError::Closed);
        }
        let (mut dst, mut src) = lock_pair(&self.shared, &source.shared);
        dst.copy_from(&mut src, count)?;
        debug!(count, "copied between streams");
        Ok(())
    }

    // -------------------- Length --------------------

    /// Extends the file by `delta` bytes. The cursor does not move.
    pub fn grow(&self, delta: u64) -> Result<()> {
        let mut state = self.lock()?;
        let len = state.length();
        let new_len = len
            .checked_add(delta)
            .ok_or_else(|| StreamError::range("grow delta", delta, u64::MAX - len))?;
        state.set_length(new_len)
    }

    /// Resizes the file to `new_len` bytes.
    ///
    /// Shrinking clamps the cursor to the new end and drops a mark that lies
    /// beyond it. Slices whose range is unchanged stay mapped.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ResizeShort`] if the resize op left the file
    /// shorter than `new_len`.
    pub fn set_length(&self, new_len: u64) -> Result<()> {
        self.lock()?.set_length(new_len)
    }

    /// Writes dirty slices back and syncs the file, including metadata when
    /// `sync_metadata` is set.
    pub fn flush(&self, sync_metadata: bool) -> Result<()> {
        self.lock()?.flush(sync_metadata)
    }

    // -------------------- Cursor --------------------

    pub fn position(&self) -> Result<u64> {
        self.lock()?.position()
    }

    pub fn set_position(&self, pos: u64) -> Result<()> {
        self.lock()?.set_position(pos)
    }

    #[must_use]
    pub fn length(&self) -> u64 {
        self.shared.lock().length()
    }

    pub fn remaining(&self) -> Result<u64> {
        self.lock()?.remaining()
    }

    pub fn skip(&self, n: i64) -> Result<u64> {
        self.lock()?.skip(n)
    }

    pub fn mark(&self) -> Result<()> {
        self.lock()?.mark()
    }

    pub fn reset(&self) -> Result<()> {
        self.lock()?.reset()
    }

    /// Index of the slice the cursor is in.
    pub fn current_slice_index(&self) -> Result<usize> {
        Ok(self.lock()?.slice_index())
    }

    pub fn synchronous(&self) -> Result<bool> {
        Ok(self.lock()?.synchronous())
    }

    /// Turns per-write syncing on or off.
    pub fn set_synchronous(&self, synchronous: bool) -> Result<()> {
        self.lock()?.set_synchronous(synchronous);
        Ok(())
    }

    #[must_use]
    pub fn cache_mode(&self) -> CacheMode {
        self.shared.lock().cache_mode()
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.shared.lock().stats()
    }

    /// Closes this handle; see [`MappedStream::close`].
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

impl Drop for MappedWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for MappedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedWriter")
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Write for MappedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        MappedWriter::flush(self, false)?;
        Ok(())
    }
}

impl Seek for MappedWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.lock()?;
        let target = seek_target(pos, state.position()?, state.length())?;
        state.set_position(target)?;
        Ok(target)
    }
}
