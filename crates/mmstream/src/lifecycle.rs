//! Slice eviction policy.
//!
//! Runs whenever the cursor leaves a slice:
//!
//! ```text
//!              vacated slice
//!                    |
//!        +-----------+-------------+
//!        |           |             |
//!     NoFlush    SoftFlush     HardFlush
//!     (keep)     (pool it)    (unmap now)
//!                    ^             |
//!                    |   unmap unavailable:
//!                    +---- downgrade for good
//! ```
//!
//! Teardown paths (`release`, `release_all`) always unmap, whatever the mode.

use config::CacheMode;
use tracing::{debug, trace, warn};

use crate::region::{platform_has_hard_unmap, Region};
use crate::slice_table::SliceTable;

#[derive(Debug)]
pub(crate) struct SliceLifecycle {
    mode: CacheMode,
    has_hard_unmap: bool,
}

impl SliceLifecycle {
    pub(crate) fn new(mode: CacheMode, allow_hard_unmap: bool) -> Self {
        Self {
            mode,
            has_hard_unmap: allow_hard_unmap && platform_has_hard_unmap(),
        }
    }

    /// The effective cache mode, after any downgrade.
    #[inline]
    pub(crate) fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Handles the cursor leaving slice `index`.
    pub(crate) fn on_vacated(&mut self, table: &mut SliceTable, index: usize, sync: bool) {
        match self.mode {
            CacheMode::NoFlush => {
                if let Some(region) = table.current(index) {
                    sync_region(region, index, sync);
                }
            }
            CacheMode::SoftFlush => {
                if let Some(region) = table.take_mapped(index) {
                    sync_region(&region, index, sync);
                    table.soft_evict(index, region);
                }
            }
            CacheMode::HardFlush => {
                if let Some(region) = table.take_mapped(index) {
                    sync_region(&region, index, sync);
                    if let Err(region) = self.try_hard_unmap(region) {
                        self.downgrade();
                        table.soft_evict(index, region);
                    } else {
                        trace!(index, "hard unmapped slice");
                    }
                }
            }
        }
    }

    /// Unmaps slice `index` entirely: strong mapping and pooled region.
    pub(crate) fn release(&mut self, table: &mut SliceTable, index: usize, sync: bool) {
        if let Some(region) = table.take_mapped(index) {
            sync_region(&region, index, sync);
            drop(region);
        }
        if let Some(region) = table.take_evicted(index) {
            sync_region(&region, index, sync);
            drop(region);
        }
    }

    pub(crate) fn release_all(&mut self, table: &mut SliceTable, sync: bool) {
        for index in 0..table.slice_count() {
            self.release(table, index, sync);
        }
        // Anything left in the pool belongs to no slot any more.
        table.reclaim_all();
    }

    /// Eagerly unmaps `region`, handing it back if that is not possible here.
    fn try_hard_unmap(&self, region: Region) -> Result<(), Region> {
        if self.has_hard_unmap {
            drop(region);
            Ok(())
        } else {
            Err(region)
        }
    }

    fn downgrade(&mut self) {
        if self.mode == CacheMode::HardFlush {
            debug!("hard unmap unavailable, cache mode falls back to soft flush");
            self.mode = CacheMode::SoftFlush;
        }
    }
}

/// Best-effort sync of a vacated slice; failures are logged, not returned.
fn sync_region(region: &Region, index: usize, sync: bool) {
    if !sync {
        return;
    }
    if let Err(e) = region.flush() {
        warn!(index, error = %e, "failed to sync slice");
    }
}
