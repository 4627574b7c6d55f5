/*!
 * Memory Types
 * Common types shared by the allocators
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Address type for memory operations
pub type Address = usize;

/// Size type for memory operations
pub type Size = usize;

/// Memory operation result
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Memory errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("arena exhausted: requested {requested} bytes (align {align}), capacity {capacity} bytes")]
    ArenaExhausted {
        requested: Size,
        align: Size,
        capacity: Size,
    },

    #[error("frame buffer exhausted: requested {requested} bytes (align {align}), {remaining} bytes remaining")]
    FrameExhausted {
        requested: Size,
        align: Size,
        remaining: Size,
    },

    #[error("system allocator exhausted: requested {requested} bytes")]
    SystemExhausted { requested: Size },

    #[error("invalid allocation request: size {size}, alignment {align}")]
    InvalidLayout { size: Size, align: Size },
}

/// Call-site identity for a tracked allocation.
///
/// Supplied by the caller, never inferred by the allocator. Construct it
/// literally with [`CallSite::new`] or capture the caller's location with
/// [`CallSite::here`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Capture the location of the calling code.
    #[track_caller]
    pub fn here() -> Self {
        let loc = std::panic::Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Whether a tracked block was requested as a single object or an array.
///
/// A block must be freed with the same kind it was allocated with; the
/// tracker reports any disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    Scalar,
    Array,
}

impl fmt::Display for AllocKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocKind::Scalar => write!(f, "scalar"),
            AllocKind::Array => write!(f, "array"),
        }
    }
}

/// Metadata kept for every live tracked block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    pub size: Size,
    pub site: CallSite,
    pub kind: AllocKind,
}

/// One outstanding allocation at report time.
#[derive(Debug, Clone, Copy)]
pub struct Leak {
    pub address: Address,
    pub record: AllocationRecord,
}

/// Snapshot of all outstanding allocations plus lifetime peak usage.
///
/// Produced by [`crate::AllocationTracker::report_leaks`]; purely
/// observational, the tracker state is left untouched.
#[derive(Debug, Clone)]
pub struct LeakReport {
    pub outstanding: Vec<Leak>,
    pub current_bytes: Size,
    pub peak_bytes: Size,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Tracker counters snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackerStats {
    pub live_allocations: usize,
    pub current_bytes: Size,
    pub peak_bytes: Size,
    pub mismatched_frees: u64,
    pub unknown_frees: u64,
}

/// Pool accounting snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolStats {
    pub element_size: Size,
    pub elements_per_chunk: usize,
    pub chunks: usize,
    pub free_slots: usize,
    pub foreign_frees: u64,
}

impl PoolStats {
    /// Upper bound on the number of addresses the pool can have issued.
    pub fn total_slots(&self) -> usize {
        self.chunks * self.elements_per_chunk
    }

    /// Slots currently handed out to callers.
    pub fn live_slots(&self) -> usize {
        self.total_slots() - self.free_slots
    }
}

/// Round `value` up to the next multiple of power-of-two `align`.
#[inline]
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}

/// Reject zero-size and non-power-of-two-alignment requests up front.
#[inline]
pub(crate) fn validate_request(size: Size, align: Size) -> MemoryResult<()> {
    if size == 0 || !align.is_power_of_two() {
        return Err(MemoryError::InvalidLayout { size, align });
    }
    Ok(())
}
