//! The mutable state behind every stream handle.
//!
//! One `StreamState` lives inside one mutex. Reader and writer handles share
//! it, so every public operation is a single critical section over the
//! cursor, the slice table and the eviction policy together.

use std::fmt;
use std::fs::File;
use std::io;

use config::{CacheMode, MapMode, StreamConfig};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{Result, StreamError};
use crate::lifecycle::SliceLifecycle;
use crate::region::Region;
use crate::resize::FileResize;
use crate::slice_table::SliceTable;

/// Point-in-time diagnostics for a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    /// Logical length in bytes.
    pub length: u64,
    /// Absolute cursor position.
    pub position: u64,
    /// Marked position, if any.
    pub mark: Option<u64>,
    pub slice_shift: u32,
    /// Slice the cursor currently falls in.
    pub slice_index: usize,
    pub slice_count: usize,
    /// Slots holding a strong mapping.
    pub mapped_slices: usize,
    /// Slots holding an evicted stamp, live or already reclaimed.
    pub evicted_slices: usize,
    /// Evicted slots whose mapping is still resurrectable.
    pub live_evicted_slices: usize,
    /// Map calls issued so far.
    pub maps: u64,
    /// Evicted slices reused without a new map call.
    pub resurrections: u64,
    /// Evicted mappings dropped before they could be reused.
    pub reclaims: u64,
    pub map_mode: MapMode,
    /// Effective cache mode, after any downgrade.
    pub cache_mode: CacheMode,
    pub synchronous: bool,
    /// Open handles sharing this stream.
    pub handles: usize,
    pub closed: bool,
}

pub(crate) struct StreamState {
    file: Option<File>,
    map_mode: MapMode,
    table: SliceTable,
    lifecycle: SliceLifecycle,
    synchronous: bool,
    resize: Option<Box<dyn FileResize>>,
    slice_index: usize,
    position: u64,
    mark: Option<u64>,
    handles: usize,
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamState")
            .field("stats", &self.stats())
            .field("has_resize_op", &self.resize.is_some())
            .finish()
    }
}

impl StreamState {
    /// Binds a new state to `file`. Slices are mapped lazily.
    pub(crate) fn open(file: File, config: &StreamConfig) -> Result<Self> {
        config.validate()?;
        let len = file.metadata()?.len();
        if len == 0 && !config.map_mode.is_writable() {
            return Err(StreamError::Map {
                offset: 0,
                len: 0,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot map an empty file read-only",
                ),
            });
        }

        let table = SliceTable::new(
            config.slice_shift,
            config.map_mode,
            len,
            config.soft_capacity,
        )?;
        debug!(
            len,
            slice_shift = config.slice_shift,
            slices = table.slice_count(),
            map_mode = %config.map_mode,
            cache_mode = %config.cache_mode,
            "opened mapped stream"
        );

        Ok(Self {
            file: Some(file),
            map_mode: config.map_mode,
            table,
            lifecycle: SliceLifecycle::new(config.cache_mode, config.hard_unmap),
            synchronous: config.synchronous,
            resize: None,
            slice_index: 0,
            position: 0,
            mark: None,
            handles: 1,
        })
    }

    // -------------------- Checks & accessors --------------------

    #[inline]
    fn check_open(&self) -> Result<()> {
        if self.file.is_none() {
            return Err(StreamError::Closed);
        }
        Ok(())
    }

    #[inline]
    fn check_writable(&self) -> Result<()> {
        if !self.map_mode.is_writable() {
            return Err(StreamError::ReadOnly);
        }
        Ok(())
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(StreamError::Closed)
    }

    pub(crate) fn position(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.position)
    }

    #[inline]
    pub(crate) fn length(&self) -> u64 {
        self.table.total_size()
    }

    pub(crate) fn remaining(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.table.total_size() - self.position)
    }

    pub(crate) fn map_mode(&self) -> MapMode {
        self.map_mode
    }

    pub(crate) fn cache_mode(&self) -> CacheMode {
        self.lifecycle.mode()
    }

    pub(crate) fn slice_shift(&self) -> u32 {
        self.table.shift()
    }

    pub(crate) fn slice_size(&self) -> u64 {
        self.table.slice_size()
    }

    pub(crate) fn slice_count(&self) -> usize {
        self.table.slice_count()
    }

    pub(crate) fn slice_index(&self) -> usize {
        self.slice_index
    }

    pub(crate) fn synchronous(&self) -> bool {
        self.synchronous
    }

    pub(crate) fn set_synchronous(&mut self, synchronous: bool) {
        self.synchronous = synchronous;
    }

    pub(crate) fn set_resize_op(&mut self, op: Box<dyn FileResize>) -> Result<()> {
        self.check_open()?;
        self.check_writable()?;
        if self.resize.is_some() {
            return Err(StreamError::ResizeOpAlreadySet);
        }
        self.resize = Some(op);
        Ok(())
    }

    pub(crate) fn stats(&self) -> StreamStats {
        let counters = self.table.counters();
        StreamStats {
            length: self.table.total_size(),
            position: self.position,
            mark: self.mark,
            slice_shift: self.table.shift(),
            slice_index: self.slice_index,
            slice_count: self.table.slice_count(),
            mapped_slices: self.table.mapped_count(),
            evicted_slices: self.table.evicted_count(),
            live_evicted_slices: self.table.live_evicted_count(),
            maps: counters.maps,
            resurrections: counters.resurrections,
            reclaims: counters.reclaims,
            map_mode: self.map_mode,
            cache_mode: self.lifecycle.mode(),
            synchronous: self.synchronous,
            handles: self.handles,
            closed: self.file.is_none(),
        }
    }

    // -------------------- Cursor --------------------

    pub(crate) fn set_position(&mut self, pos: u64) -> Result<()> {
        self.check_open()?;
        let limit = self.table.total_size();
        if pos > limit {
            return Err(StreamError::range("position", pos, limit));
        }
        self.move_to(pos);
        Ok(())
    }

    /// Moves the cursor, running the eviction policy on the slice it leaves.
    fn move_to(&mut self, pos: u64) {
        let next = self.table.index_for(pos);
        if next != self.slice_index {
            self.vacate(self.slice_index);
            self.slice_index = next;
        }
        self.position = pos;
    }

    fn vacate(&mut self, index: usize) {
        if index < self.table.slice_count() {
            self.lifecycle
                .on_vacated(&mut self.table, index, self.synchronous);
        }
    }

    /// The mapping under the cursor and the cursor's offset inside it.
    /// Requires `position < length`.
    fn cursor_slice(&mut self) -> Result<(&mut Region, usize)> {
        let (index, offset) = self.table.resolve(self.position);
        debug_assert_eq!(index, self.slice_index);
        let file = self.file.as_ref().ok_or(StreamError::Closed)?;
        let region = self.table.ensure_mapped(file, index)?;
        Ok((region, offset))
    }

    pub(crate) fn skip(&mut self, n: i64) -> Result<u64> {
        self.check_open()?;
        if n < 0 {
            return Ok(0);
        }
        let skipped = (n as u64).min(self.table.total_size() - self.position);
        self.move_to(self.position + skipped);
        Ok(skipped)
    }

    pub(crate) fn mark(&mut self) -> Result<()> {
        self.check_open()?;
        self.mark = Some(self.position);
        Ok(())
    }

    pub(crate) fn reset(&mut self) -> Result<()> {
        self.check_open()?;
        let mark = self.mark.ok_or(StreamError::MarkNotSet)?;
        self.set_position(mark)
    }

    // -------------------- Reads --------------------

    pub(crate) fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok(self.read(&mut byte)?.map(|_| byte[0]))
    }

    /// Reads up to `buf.len()` bytes. `None` means end of stream was reached
    /// before any byte could be read.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        self.check_open()?;
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let remaining = self.table.total_size() - self.position;
        if remaining == 0 {
            return Ok(None);
        }

        let want = remaining.min(buf.len() as u64) as usize;
        let mut done = 0;
        while done < want {
            let (region, offset) = self.cursor_slice()?;
            let n = (want - done).min(region.len() - offset);
            buf[done..done + n].copy_from_slice(&region.as_slice()[offset..offset + n]);
            done += n;
            self.move_to(self.position + n as u64);
        }
        Ok(Some(done))
    }

    pub(crate) fn with_current_slice<R>(&mut self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.check_open()?;
        if self.position >= self.table.total_size() {
            return Ok(f(&[]));
        }
        let (region, offset) = self.cursor_slice()?;
        Ok(f(&region.as_slice()[offset..]))
    }

    pub(crate) fn next_slice(&mut self) -> Result<bool> {
        self.check_open()?;
        let next = self.slice_index + 1;
        if next >= self.table.slice_count() {
            return Ok(false);
        }
        self.move_to((next as u64) << self.table.shift());
        Ok(true)
    }

    // -------------------- Writes --------------------

    /// Grows the stream so at least `needed` bytes fit after the cursor.
    fn ensure_room(&mut self, needed: u64) -> Result<()> {
        let remaining = self.table.total_size() - self.position;
        if remaining >= needed {
            return Ok(());
        }
        let new_len = self
            .table
            .total_size()
            .checked_add(needed - remaining)
            .ok_or_else(|| StreamError::range("length", u64::MAX, u64::MAX))?;
        // A short resize leaves the length where it was; the write loop then
        // runs out of slices and panics with the stream's stats.
        self.resize_to(new_len).map(|_| ())
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        self.check_writable()?;
        if buf.is_empty() {
            return Ok(());
        }
        self.ensure_room(buf.len() as u64)?;

        let mut done = 0;
        while done < buf.len() {
            if self.position >= self.table.total_size() {
                self.end_of_tape(done as u64, buf.len() as u64);
            }
            let sync = self.synchronous;
            let (region, offset) = self.cursor_slice()?;
            let n = (buf.len() - done).min(region.len() - offset);
            region.as_mut_slice()?[offset..offset + n].copy_from_slice(&buf[done..done + n]);
            if sync {
                region.flush_range(offset, n)?;
            }
            done += n;
            self.move_to(self.position + n as u64);
        }
        Ok(())
    }

    /// Copies `count` bytes from `src`'s cursor to this stream's cursor,
    /// mapping to mapping, advancing both.
    pub(crate) fn copy_from(&mut self, src: &mut StreamState, count: u64) -> Result<()> {
        self.check_open()?;
        src.check_open()?;
        self.check_writable()?;
        let available = src.table.total_size() - src.position;
        if count > available {
            return Err(StreamError::range("copy count", count, available));
        }
        if count == 0 {
            return Ok(());
        }
        self.ensure_room(count)?;

        let mut done = 0u64;
        while done < count {
            if self.position >= self.table.total_size() {
                self.end_of_tape(done, count);
            }
            let sync = self.synchronous;
            let (src_region, src_off) = src.cursor_slice()?;
            let (dst_region, dst_off) = self.cursor_slice()?;
            let n = (count - done)
                .min((src_region.len() - src_off) as u64)
                .min((dst_region.len() - dst_off) as u64) as usize;
            dst_region.as_mut_slice()?[dst_off..dst_off + n]
                .copy_from_slice(&src_region.as_slice()[src_off..src_off + n]);
            if sync {
                dst_region.flush_range(dst_off, n)?;
            }
            done += n as u64;
            src.move_to(src.position + n as u64);
            self.move_to(self.position + n as u64);
        }
        Ok(())
    }

    #[cold]
    fn end_of_tape(&self, written: u64, requested: u64) -> ! {
        panic!(
            "end of tape: wrote {written} of {requested} bytes with no slice left \
             after growth ({:?})",
            self.stats()
        );
    }

    // -------------------- Length --------------------

    /// Resizes the file through the registered resize op, then adopts the
    /// new length.
    ///
    /// Fails with [`StreamError::ResizeShort`] if the op claims success but
    /// leaves the file shorter than `new_len`; the stream then keeps the
    /// length the file really has.
    pub(crate) fn set_length(&mut self, new_len: u64) -> Result<()> {
        let actual = self.resize_to(new_len)?;
        if actual < new_len {
            return Err(StreamError::ResizeShort {
                requested: new_len,
                actual,
            });
        }
        Ok(())
    }

    /// Runs the resize op and adopts the length the file ends up with,
    /// capped at `new_len`. Returns the adopted length.
    fn resize_to(&mut self, new_len: u64) -> Result<u64> {
        self.check_open()?;
        let file_len = self.file()?.metadata()?.len();
        if file_len != new_len {
            let Some(resize) = self.resize.as_mut() else {
                return Err(StreamError::ResizeUnsupported);
            };
            if cfg!(windows) {
                // Windows refuses to resize a file with a mapped section open.
                self.lifecycle
                    .release_all(&mut self.table, self.synchronous);
            }
            resize.set_len(new_len)?;
            if self.synchronous {
                self.file()?.sync_all()?;
            }
        }
        let adopted = self.file()?.metadata()?.len().min(new_len);
        if adopted < new_len {
            warn!(requested = new_len, actual = adopted, "resize op left the file short");
        }
        self.apply_length(adopted)?;
        Ok(adopted)
    }

    /// Adopts `new_len` as the logical length without touching the file.
    pub(crate) fn apply_length(&mut self, new_len: u64) -> Result<()> {
        self.check_open()?;
        let old_len = self.table.total_size();
        if new_len == old_len {
            return Ok(());
        }

        let keep = self.table.reusable_slots(new_len)?;
        let sync = self.synchronous;
        for index in keep..self.table.slice_count() {
            self.lifecycle.release(&mut self.table, index, sync);
        }
        self.table.set_total_size(new_len, keep)?;

        if new_len == 0 || self.mark.is_some_and(|m| m > new_len) {
            self.mark = None;
        }
        self.position = self.position.min(new_len);
        let next = self.table.index_for(self.position);
        if next != self.slice_index {
            if self.slice_index < keep {
                self.vacate(self.slice_index);
            }
            self.slice_index = next;
        }

        debug!(
            old_len,
            new_len,
            slices = self.table.slice_count(),
            kept = keep,
            "stream length changed"
        );
        Ok(())
    }

    // -------------------- Durability & teardown --------------------

    pub(crate) fn flush(&mut self, sync_metadata: bool) -> Result<()> {
        self.check_open()?;
        if !self.map_mode.is_writable() {
            return Ok(());
        }
        for region in self.table.live_regions() {
            region.flush()?;
        }
        let file = self.file()?;
        if sync_metadata {
            file.sync_all()?;
        } else {
            file.sync_data()?;
        }
        Ok(())
    }

    pub(crate) fn reclaim_evicted(&mut self) -> Result<usize> {
        self.check_open()?;
        Ok(self.table.reclaim_all())
    }

    pub(crate) fn acquire_handle(&mut self) -> Result<()> {
        self.check_open()?;
        self.handles += 1;
        Ok(())
    }

    /// Drops one handle's claim; the last one tears the stream down.
    pub(crate) fn release_handle(&mut self) -> Result<()> {
        if self.handles == 0 {
            return Ok(());
        }
        self.handles -= 1;
        if self.handles == 0 {
            self.teardown()
        } else {
            Ok(())
        }
    }

    fn teardown(&mut self) -> Result<()> {
        let writable = self.map_mode.is_writable();
        self.lifecycle.release_all(&mut self.table, writable);

        let result = match (&self.file, writable) {
            (Some(file), true) => file.sync_all().map_err(StreamError::from),
            _ => Ok(()),
        };
        self.file = None;
        self.resize = None;
        self.mark = None;
        self.position = 0;
        self.slice_index = 0;
        debug!(len = self.table.total_size(), "closed mapped stream");
        result
    }
}

/// Locks two distinct states in address order so that concurrent copies in
/// opposite directions cannot deadlock. Returns `(a, b)` guards.
pub(crate) fn lock_pair<'a>(
    a: &'a Mutex<StreamState>,
    b: &'a Mutex<StreamState>,
) -> (
    MutexGuard<'a, StreamState>,
    MutexGuard<'a, StreamState>,
) {
    if (a as *const Mutex<StreamState>) < (b as *const Mutex<StreamState>) {
        let ga = a.lock();
        let gb = b.lock();
        (ga, gb)
    } else {
        let gb = b.lock();
        let ga = a.lock();
        (ga, gb)
    }
}
