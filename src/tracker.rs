/*!
 * Allocation Tracker
 * Leak and free-mode-mismatch detection over a raw heap
 *
 * Every successful allocation is recorded with its size, call site, and
 * scalar/array kind. Frees are checked against the records; disagreements
 * are diagnosed but never fatal. `report_leaks` enumerates whatever is
 * still outstanding, typically once at shutdown.
 */

use crate::traits::{RawHeap, SystemHeap};
use crate::types::{
    Address, AllocKind, AllocationRecord, CallSite, Leak, LeakReport, MemoryError, MemoryResult,
    Size, TrackerStats,
};
use log::{error, info, warn};
use parking_lot::Mutex;
use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;

/// Alignment of every tracked block, matching the max-align rule of a
/// general-purpose heap. The per-record size is enough to rebuild the
/// layout on free.
const TRACKED_ALIGN: usize = 16;

/// State behind the tracker's single coarse lock.
#[derive(Default)]
struct TrackerState {
    records: HashMap<Address, AllocationRecord>,
    current_bytes: Size,
    peak_bytes: Size,
    mismatched_frees: u64,
    unknown_frees: u64,
}

/// Allocation interception layer over a [`RawHeap`].
///
/// The heap is injected at construction; there is no ambient global
/// instance, so tests can run independent trackers side by side.
///
/// Thread-safe: the record map and counters sit behind one mutex, held
/// only for the map operation, never across the underlying heap call.
pub struct AllocationTracker<H: RawHeap = SystemHeap> {
    heap: H,
    state: Mutex<TrackerState>,
}

impl AllocationTracker<SystemHeap> {
    /// Tracker over the process heap.
    pub fn new() -> Self {
        Self::with_heap(SystemHeap)
    }
}

impl Default for AllocationTracker<SystemHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: RawHeap> AllocationTracker<H> {
    /// Tracker over an explicitly supplied heap.
    pub fn with_heap(heap: H) -> Self {
        Self {
            heap,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Allocate `size` bytes and record the block under `site`/`kind`.
    ///
    /// On heap failure the error is returned and nothing is recorded.
    pub fn allocate(
        &self,
        size: Size,
        site: CallSite,
        kind: AllocKind,
    ) -> MemoryResult<NonNull<u8>> {
        let layout = Self::layout_for(size)?;
        let ptr = self.heap.allocate(layout)?;

        let mut state = self.state.lock();
        state
            .records
            .insert(ptr.as_ptr() as Address, AllocationRecord { size, site, kind });
        state.current_bytes += size;
        if state.current_bytes > state.peak_bytes {
            state.peak_bytes = state.current_bytes;
        }
        Ok(ptr)
    }

    /// Free a block allocated through this tracker.
    ///
    /// A `kind` disagreeing with the allocation is diagnosed, identifying
    /// the original call site, and the block is still freed. An address
    /// with no record (foreign, or already freed) is diagnosed and left
    /// alone: without a record there is no layout to free it with.
    pub fn free(&self, ptr: NonNull<u8>, kind: AllocKind) {
        let record = {
            let mut state = self.state.lock();
            match state.records.remove(&(ptr.as_ptr() as Address)) {
                Some(record) => {
                    if record.kind != kind {
                        state.mismatched_frees += 1;
                        warn!(
                            "mismatched free of {:p}: allocated as {} at {}, freed as {}",
                            ptr.as_ptr(),
                            record.kind,
                            record.site,
                            kind
                        );
                    }
                    state.current_bytes = state.current_bytes.saturating_sub(record.size);
                    Some(record)
                }
                None => {
                    state.unknown_frees += 1;
                    warn!(
                        "freeing unknown or already freed address {:p}",
                        ptr.as_ptr()
                    );
                    None
                }
            }
        };

        if let Some(record) = record {
            // Safety: the block came from our heap with this layout, and
            // removing its record above means it cannot be freed through
            // here twice.
            unsafe {
                let layout = Layout::from_size_align_unchecked(record.size, TRACKED_ALIGN);
                self.heap.deallocate(ptr, layout);
            }
        }
    }

    /// Enumerate every outstanding allocation and the lifetime peak.
    ///
    /// Observational only: records are left in place, so the report can
    /// be produced repeatedly with identical results.
    pub fn report_leaks(&self) -> LeakReport {
        let state = self.state.lock();
        let mut outstanding: Vec<Leak> = state
            .records
            .iter()
            .map(|(&address, &record)| Leak { address, record })
            .collect();
        outstanding.sort_by_key(|leak| leak.address);
        let report = LeakReport {
            outstanding,
            current_bytes: state.current_bytes,
            peak_bytes: state.peak_bytes,
        };
        drop(state);

        if report.is_clean() {
            info!("no memory leaks detected");
        } else {
            error!(
                "memory leaks detected: {} allocations still outstanding",
                report.outstanding.len()
            );
            for leak in &report.outstanding {
                error!(
                    "  leak at 0x{:x}: {} bytes ({}) allocated at {}",
                    leak.address, leak.record.size, leak.record.kind, leak.record.site
                );
            }
        }
        info!("peak memory usage: {} bytes", report.peak_bytes);
        report
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> TrackerStats {
        let state = self.state.lock();
        TrackerStats {
            live_allocations: state.records.len(),
            current_bytes: state.current_bytes,
            peak_bytes: state.peak_bytes,
            mismatched_frees: state.mismatched_frees,
            unknown_frees: state.unknown_frees,
        }
    }

    fn layout_for(size: Size) -> MemoryResult<Layout> {
        if size == 0 {
            return Err(MemoryError::InvalidLayout {
                size,
                align: TRACKED_ALIGN,
            });
        }
        Layout::from_size_align(size, TRACKED_ALIGN).map_err(|_| MemoryError::InvalidLayout {
            size,
            align: TRACKED_ALIGN,
        })
    }
}

impl<H: RawHeap + std::fmt::Debug> std::fmt::Debug for AllocationTracker<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("AllocationTracker")
            .field("heap", &self.heap)
            .field("live_allocations", &stats.live_allocations)
            .field("current_bytes", &stats.current_bytes)
            .field("peak_bytes", &stats.peak_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_allocate_records_and_free_clears() {
        let tracker = AllocationTracker::new();
        let ptr = tracker
            .allocate(48, CallSite::here(), AllocKind::Scalar)
            .unwrap();
        assert_eq!(ptr.as_ptr() as usize % TRACKED_ALIGN, 0);
        assert_eq!(tracker.stats().live_allocations, 1);
        assert_eq!(tracker.stats().current_bytes, 48);

        tracker.free(ptr, AllocKind::Scalar);
        let stats = tracker.stats();
        assert_eq!(stats.live_allocations, 0);
        assert_eq!(stats.current_bytes, 0);
        assert_eq!(stats.peak_bytes, 48);
        assert_eq!(stats.mismatched_frees, 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let tracker = AllocationTracker::new();
        let err = tracker
            .allocate(0, CallSite::here(), AllocKind::Scalar)
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidLayout { .. }));
        assert_eq!(tracker.stats().live_allocations, 0);
    }

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let tracker = AllocationTracker::new();
        let a = tracker
            .allocate(100, CallSite::here(), AllocKind::Array)
            .unwrap();
        let b = tracker
            .allocate(50, CallSite::here(), AllocKind::Array)
            .unwrap();
        tracker.free(a, AllocKind::Array);
        let c = tracker
            .allocate(20, CallSite::here(), AllocKind::Array)
            .unwrap();

        let stats = tracker.stats();
        assert_eq!(stats.peak_bytes, 150);
        assert_eq!(stats.current_bytes, 70);

        tracker.free(b, AllocKind::Array);
        tracker.free(c, AllocKind::Array);
    }
}
