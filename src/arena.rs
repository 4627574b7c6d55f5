/*!
 * Arena Allocator
 * Linear bump allocation with optional growth
 *
 * Allocation advances a single cursor, costs O(1), and leaves no per-block
 * metadata behind; there is no per-block free. `reset` reclaims everything
 * at once in O(1). Suited to request- or subsystem-scoped scratch memory.
 */

use crate::types::{align_up, validate_request, MemoryError, MemoryResult, Size};
use log::{debug, warn};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Alignment of the backing buffer. Covers every alignment up to 16
/// without per-allocation layout bookkeeping; larger requests are
/// satisfied by padding from the buffer base.
const BUFFER_ALIGN: usize = 16;

/// Default alignment for [`ArenaAllocator::alloc`].
pub const DEFAULT_ALIGN: usize = 8;

/// Default initial capacity: 1 MiB.
pub const DEFAULT_CAPACITY: usize = 1 << 20;

/// Linear bump allocator over an owned or borrowed buffer.
///
/// An owned arena grows when a request does not fit: the backing buffer is
/// reallocated to at least double the capacity and its contents are
/// preserved. Growth may relocate the buffer, so **callers must not retain
/// arena addresses across an `allocate` call that can grow** — the bytes
/// are preserved but previously returned pointers are not. A borrowed
/// arena never grows and never frees its buffer.
///
/// Not thread-safe; the raw base pointer makes this type `!Send`/`!Sync`,
/// so one arena belongs to one owner.
pub struct ArenaAllocator {
    base: NonNull<u8>,
    cursor: usize,
    capacity: usize,
    owned: bool,
}

impl ArenaAllocator {
    /// Create an arena owning a fresh buffer of `initial_capacity` bytes.
    ///
    /// A capacity of zero defers the first buffer allocation to the first
    /// `allocate` call.
    pub fn new(initial_capacity: Size) -> MemoryResult<Self> {
        let mut arena = Self {
            base: NonNull::dangling(),
            cursor: 0,
            capacity: 0,
            owned: true,
        };
        if initial_capacity > 0 {
            arena.grow_to(initial_capacity)?;
        }
        debug!("arena created with {} byte capacity", initial_capacity);
        Ok(arena)
    }

    /// Create an arena over externally owned memory.
    ///
    /// The arena never grows and never frees the buffer in this mode; a
    /// request that does not fit fails with [`MemoryError::ArenaExhausted`].
    ///
    /// # Safety
    ///
    /// `base` must point to `size` bytes valid for reads and writes for
    /// the entire lifetime of the arena, and the memory must not be freed
    /// or repurposed while the arena is alive.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, size: Size) -> Self {
        Self {
            base,
            cursor: 0,
            capacity: size,
            owned: false,
        }
    }

    /// Allocate `size` bytes aligned to the power-of-two `align`.
    ///
    /// The returned address is a multiple of `align`. On overflow of an
    /// owned arena the buffer grows to at least double the current
    /// capacity; previously issued addresses become invalid when that
    /// happens (contents are preserved, locations are not).
    pub fn allocate(&mut self, size: Size, align: Size) -> MemoryResult<NonNull<u8>> {
        validate_request(size, align)?;

        let mut padding = self.padding_for(align);
        let needed = self
            .cursor
            .checked_add(padding)
            .and_then(|n| n.checked_add(size))
            .ok_or(MemoryError::InvalidLayout { size, align })?;
        if needed > self.capacity {
            if !self.owned {
                return Err(MemoryError::ArenaExhausted {
                    requested: size,
                    align,
                    capacity: self.capacity,
                });
            }
            // Worst-case padding is align - 1, so the request fits no
            // matter where the reallocated buffer lands.
            let worst_case = self
                .cursor
                .checked_add(size)
                .and_then(|n| n.checked_add(align - 1))
                .ok_or(MemoryError::InvalidLayout { size, align })?;
            let new_capacity = self.capacity.saturating_mul(2).max(worst_case);
            self.grow_to(new_capacity)?;
            padding = self.padding_for(align);
        }

        let offset = self.cursor + padding;
        self.cursor = offset + size;
        // Safety: offset + size <= capacity, so the pointer is in bounds
        // of the live backing buffer and non-null.
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) })
    }

    /// Allocate with the default 8-byte alignment.
    pub fn alloc(&mut self, size: Size) -> MemoryResult<NonNull<u8>> {
        self.allocate(size, DEFAULT_ALIGN)
    }

    /// Snap the cursor back to the buffer base in O(1).
    ///
    /// Memory is not zeroed. Every previously issued address is invalid
    /// after this call; reads or writes through one are undefined and
    /// deliberately not guarded against.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Bytes currently allocated (including alignment padding).
    pub fn size(&self) -> Size {
        self.cursor
    }

    /// Total capacity of the backing buffer in bytes.
    pub fn capacity(&self) -> Size {
        self.capacity
    }

    /// Padding needed to bring the cursor address up to `align`.
    #[inline]
    fn padding_for(&self, align: usize) -> usize {
        let current = self.base.as_ptr() as usize + self.cursor;
        align_up(current, align) - current
    }

    /// Replace the backing buffer with one of `new_capacity` bytes,
    /// preserving the bytes already issued. On failure the arena is left
    /// untouched.
    fn grow_to(&mut self, new_capacity: Size) -> MemoryResult<()> {
        debug_assert!(self.owned);
        debug_assert!(new_capacity > self.capacity);

        let new_layout = Layout::from_size_align(new_capacity, BUFFER_ALIGN).map_err(|_| {
            MemoryError::InvalidLayout {
                size: new_capacity,
                align: BUFFER_ALIGN,
            }
        })?;

        let ptr = if self.capacity == 0 {
            // Safety: new_layout has non-zero size
            unsafe { alloc::alloc(new_layout) }
        } else {
            // Safety: base was allocated with exactly this layout
            unsafe {
                let old_layout = Layout::from_size_align_unchecked(self.capacity, BUFFER_ALIGN);
                alloc::realloc(self.base.as_ptr(), old_layout, new_capacity)
            }
        };

        self.base = NonNull::new(ptr).ok_or(MemoryError::SystemExhausted {
            requested: new_capacity,
        })?;
        self.capacity = new_capacity;
        Ok(())
    }
}

impl Default for ArenaAllocator {
    /// An owned arena with the 1 MiB default capacity. If the initial
    /// buffer cannot be allocated the arena starts empty and retries on
    /// first use.
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY).unwrap_or_else(|err| {
            warn!("arena default capacity unavailable ({err}), starting empty");
            Self {
                base: NonNull::dangling(),
                cursor: 0,
                capacity: 0,
                owned: true,
            }
        })
    }
}

impl Drop for ArenaAllocator {
    fn drop(&mut self) {
        if self.owned && self.capacity > 0 {
            // Safety: base was allocated by grow_to with this exact layout
            unsafe {
                let layout = Layout::from_size_align_unchecked(self.capacity, BUFFER_ALIGN);
                alloc::dealloc(self.base.as_ptr(), layout);
            }
        }
    }
}

impl std::fmt::Debug for ArenaAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("size", &self.cursor)
            .field("capacity", &self.capacity)
            .field("owned", &self.owned)
            .finish()
    }
}
