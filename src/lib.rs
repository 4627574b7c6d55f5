/*!
 * memkit
 * Engine memory layer: arena, pool, frame, and tracked allocation
 *
 * Four independent allocators, each targeting one lifetime pattern:
 * - [`ArenaAllocator`]: linear bump allocation, O(1) reset, optional growth
 * - [`PoolAllocator`]: fixed-size slots over a free list, thread-safe
 * - [`FrameAllocator`]: double-buffered per-cycle transient allocation
 * - [`AllocationTracker`]: leak and free-mode-mismatch detection over a raw heap
 *
 * None of the four depends on another; callers pick the allocator that
 * matches the lifetime of their data.
 */

pub mod arena;
pub mod frame;
pub mod pool;
pub mod tracker;
pub mod traits;
pub mod types;

// Re-exports
pub use arena::ArenaAllocator;
pub use frame::FrameAllocator;
pub use pool::PoolAllocator;
pub use tracker::AllocationTracker;
pub use traits::{RawHeap, SystemHeap};
pub use types::{
    Address, AllocKind, AllocationRecord, CallSite, Leak, LeakReport, MemoryError, MemoryResult,
    PoolStats, Size, TrackerStats,
};
