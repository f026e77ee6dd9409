//! Lazily mapped slices covering the whole file.
//!
//! ```text
//! file:    [ slice 0 | slice 1 | slice 2 | ... | slice n-1 (remainder) ]
//! mapped:  [  Some   |  None   |  None   | ... |  None   ]
//! evicted: [  None   | Some(7) |  None   | ... |  None   ]   <- stamps
//! pool:    { (1, 7) -> Region }                              <- still mapped
//! ```
//!
//! A slot is in exactly one of three states: mapped (strong), evicted (a
//! stamp that may still resolve to a pooled region) or empty. Soft eviction
//! moves the region into a bounded pool keyed by `(index, stamp)`. The pool
//! reclaims its oldest entry once it is over capacity, which leaves a stale
//! stamp behind: resurrection then misses and the slice is mapped again.

use std::collections::VecDeque;
use std::fs::File;

use config::MapMode;
use tracing::trace;

use crate::error::{Result, StreamError};
use crate::region::Region;

#[derive(Debug)]
struct PooledRegion {
    index: usize,
    stamp: u64,
    region: Region,
}

/// Counters describing how slices were obtained over the stream's life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TableCounters {
    pub(crate) maps: u64,
    pub(crate) resurrections: u64,
    pub(crate) reclaims: u64,
}

#[derive(Debug)]
pub(crate) struct SliceTable {
    shift: u32,
    map_mode: MapMode,
    total_size: u64,
    mapped: Vec<Option<Region>>,
    evicted: Vec<Option<u64>>,
    pool: VecDeque<PooledRegion>,
    soft_capacity: usize,
    next_stamp: u64,
    counters: TableCounters,
}

impl SliceTable {
    pub(crate) fn new(
        shift: u32,
        map_mode: MapMode,
        total_size: u64,
        soft_capacity: usize,
    ) -> Result<Self> {
        let count = slice_count_for(total_size, shift)?;
        let mut mapped = Vec::with_capacity(count);
        mapped.resize_with(count, || None);
        Ok(Self {
            shift,
            map_mode,
            total_size,
            mapped,
            evicted: vec![None; count],
            pool: VecDeque::new(),
            soft_capacity,
            next_stamp: 0,
            counters: TableCounters::default(),
        })
    }

    #[inline]
    pub(crate) fn shift(&self) -> u32 {
        self.shift
    }

    #[inline]
    pub(crate) fn slice_size(&self) -> u64 {
        1u64 << self.shift
    }

    #[inline]
    pub(crate) fn total_size(&self) -> u64 {
        self.total_size
    }

    #[inline]
    pub(crate) fn slice_count(&self) -> usize {
        self.mapped.len()
    }

    /// Splits `pos` into `(slice index, offset within slice)`.
    ///
    /// Requires `pos < total_size`.
    #[inline]
    pub(crate) fn resolve(&self, pos: u64) -> (usize, usize) {
        debug_assert!(pos < self.total_size);
        let index = (pos >> self.shift) as usize;
        let offset = (pos & (self.slice_size() - 1)) as usize;
        (index, offset)
    }

    /// Slice index the cursor belongs to at `pos`. The end-of-stream position
    /// maps to the last slice.
    #[inline]
    pub(crate) fn index_for(&self, pos: u64) -> usize {
        let count = self.slice_count();
        if count == 0 {
            0
        } else if pos >= self.total_size {
            count - 1
        } else {
            (pos >> self.shift) as usize
        }
    }

    /// Byte length of slice `index`; only the last slice may be short.
    pub(crate) fn extent(&self, index: usize) -> u64 {
        extent_of(index, self.total_size, self.shift)
    }

    /// Returns the mapping for slice `index`, mapping or resurrecting it on
    /// first touch.
    pub(crate) fn ensure_mapped(&mut self, file: &File, index: usize) -> Result<&mut Region> {
        let limit = self.slice_count() as u64;
        if index >= self.slice_count() {
            return Err(StreamError::range("slice index", index as u64, limit));
        }

        let region = match self.mapped[index].take() {
            Some(region) => region,
            None => match self.take_evicted(index) {
                Some(region) => {
                    self.counters.resurrections += 1;
                    trace!(index, "resurrected evicted slice");
                    region
                }
                None => self.map_slice(file, index)?,
            },
        };
        Ok(self.mapped[index].insert(region))
    }

    fn map_slice(&mut self, file: &File, index: usize) -> Result<Region> {
        let offset = (index as u64) << self.shift;
        let len = self.extent(index);
        let region = Region::map(file, self.map_mode, offset, len)?;
        self.counters.maps += 1;
        trace!(index, offset, len, "mapped slice");
        Ok(region)
    }

    /// Removes and returns the strong mapping of slice `index`, if any.
    pub(crate) fn take_mapped(&mut self, index: usize) -> Option<Region> {
        self.mapped.get_mut(index).and_then(Option::take)
    }

    #[inline]
    pub(crate) fn current(&self, index: usize) -> Option<&Region> {
        self.mapped.get(index).and_then(Option::as_ref)
    }

    /// Parks `region` in the resurrection pool under a fresh stamp.
    pub(crate) fn soft_evict(&mut self, index: usize, region: Region) {
        debug_assert!(self.mapped[index].is_none());
        // A slot holds at most one stamp; a stale one is simply overwritten.
        self.drop_pooled(index);

        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.evicted[index] = Some(stamp);
        self.pool.push_back(PooledRegion {
            index,
            stamp,
            region,
        });
        trace!(index, stamp, "soft evicted slice");

        while self.pool.len() > self.soft_capacity {
            if let Some(oldest) = self.pool.pop_front() {
                self.counters.reclaims += 1;
                trace!(index = oldest.index, stamp = oldest.stamp, "reclaimed slice");
            }
        }
    }

    /// Clears the evicted stamp of `index` and returns the pooled region if
    /// it has not been reclaimed yet.
    pub(crate) fn take_evicted(&mut self, index: usize) -> Option<Region> {
        let stamp = self.evicted.get_mut(index)?.take()?;
        let pos = self
            .pool
            .iter()
            .position(|p| p.index == index && p.stamp == stamp)?;
        self.pool.remove(pos).map(|p| p.region)
    }

    fn drop_pooled(&mut self, index: usize) {
        self.evicted[index] = None;
        self.pool.retain(|p| p.index != index);
    }

    /// Drops every pooled region. Returns how many were dropped.
    pub(crate) fn reclaim_all(&mut self) -> usize {
        let n = self.pool.len();
        self.pool.clear();
        self.counters.reclaims += n as u64;
        n
    }

    /// Applies a new total size. Slots `>= keep` must already be released.
    pub(crate) fn set_total_size(&mut self, new_total: u64, keep: usize) -> Result<()> {
        let new_count = slice_count_for(new_total, self.shift)?;
        debug_assert!(keep <= new_count);
        debug_assert!(self.mapped.iter().skip(keep).all(Option::is_none));
        debug_assert!(self.evicted.iter().skip(keep).all(Option::is_none));

        self.mapped.truncate(keep);
        self.evicted.truncate(keep);
        self.mapped.resize_with(new_count, || None);
        self.evicted.resize(new_count, None);
        self.total_size = new_total;
        Ok(())
    }

    /// Number of leading slots whose byte range is identical under both the
    /// current size and `new_total`, and can therefore be kept as they are.
    pub(crate) fn reusable_slots(&self, new_total: u64) -> Result<usize> {
        let new_count = slice_count_for(new_total, self.shift)?;
        let mut keep = new_count.min(self.slice_count());
        if keep > 0
            && extent_of(keep - 1, self.total_size, self.shift)
                != extent_of(keep - 1, new_total, self.shift)
        {
            keep -= 1;
        }
        Ok(keep)
    }

    /// Every region still mapped, strong or pooled.
    pub(crate) fn live_regions(&self) -> impl Iterator<Item = &Region> {
        self.mapped
            .iter()
            .filter_map(Option::as_ref)
            .chain(self.pool.iter().map(|p| &p.region))
    }

    pub(crate) fn mapped_count(&self) -> usize {
        self.mapped.iter().filter(|s| s.is_some()).count()
    }

    pub(crate) fn evicted_count(&self) -> usize {
        self.evicted.iter().filter(|s| s.is_some()).count()
    }

    pub(crate) fn live_evicted_count(&self) -> usize {
        self.pool.len()
    }

    pub(crate) fn counters(&self) -> TableCounters {
        self.counters
    }
}

fn slice_count_for(total_size: u64, shift: u32) -> Result<usize> {
    let count = total_size.div_ceil(1u64 << shift);
    usize::try_from(count).map_err(|_| StreamError::range("slice count", count, usize::MAX as u64))
}

fn extent_of(index: usize, total_size: u64, shift: u32) -> u64 {
    let start = (index as u64) << shift;
    (1u64 << shift).min(total_size.saturating_sub(start))
}
