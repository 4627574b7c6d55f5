/*!
 * Heap Traits
 * Raw heap abstraction injected into the allocation tracker
 */

use crate::types::{MemoryError, MemoryResult};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Raw allocation primitive.
///
/// The tracker forwards every allocation and free to an implementation of
/// this trait, passed explicitly at construction. Tests inject counting or
/// failing heaps; production code uses [`SystemHeap`].
pub trait RawHeap: Send + Sync {
    /// Allocate a block for `layout`. `layout.size()` must be non-zero.
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>>;

    /// Release a block previously returned by [`RawHeap::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this heap with the
    /// same `layout`, and must not have been freed already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process heap, via `std::alloc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHeap;

impl RawHeap for SystemHeap {
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>> {
        debug_assert!(layout.size() > 0);
        // Safety: layout has non-zero size, checked by every caller
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(MemoryError::SystemExhausted {
            requested: layout.size(),
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}
