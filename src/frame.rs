/*!
 * Frame Allocator
 * Double-buffered linear allocation for per-cycle transient data
 *
 * Two fixed buffers are used in strict alternation: `begin_cycle` flips
 * the active buffer and resets only that buffer's cursor, so everything
 * written during the previous cycle stays intact for exactly one more
 * cycle before its buffer is selected and reset again.
 */

use crate::types::{align_up, validate_request, MemoryError, MemoryResult, Size};
use log::{debug, warn};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Alignment of both backing buffers.
const BUFFER_ALIGN: usize = 16;

/// Default alignment for [`FrameAllocator::alloc`].
pub const DEFAULT_ALIGN: usize = 16;

/// Default size of each buffer: 1 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Which of the two buffers is receiving allocations this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveBuffer {
    First,
    Second,
}

impl ActiveBuffer {
    #[inline]
    fn flipped(self) -> Self {
        match self {
            ActiveBuffer::First => ActiveBuffer::Second,
            ActiveBuffer::Second => ActiveBuffer::First,
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            ActiveBuffer::First => 0,
            ActiveBuffer::Second => 1,
        }
    }
}

/// Double-buffered bump allocator for transient per-cycle data.
///
/// Data written in cycle N remains valid and unmodified through cycle
/// N + 1 and becomes eligible for overwrite at cycle N + 2's
/// [`FrameAllocator::begin_cycle`]. Callers must not retain an address
/// across more than one cycle boundary.
///
/// This allocator never grows; a request that does not fit in the active
/// buffer fails with [`MemoryError::FrameExhausted`], bounding per-cycle
/// memory use at construction time.
///
/// Not thread-safe; the raw buffer pointers make this type
/// `!Send`/`!Sync`, so one allocator belongs to one owner.
pub struct FrameAllocator {
    buffers: [NonNull<u8>; 2],
    cursors: [usize; 2],
    buffer_size: Size,
    active: ActiveBuffer,
}

impl FrameAllocator {
    /// Create a pair of fixed buffers of `buffer_size` bytes each.
    pub fn new(buffer_size: Size) -> MemoryResult<Self> {
        if buffer_size == 0 {
            return Err(MemoryError::InvalidLayout {
                size: buffer_size,
                align: BUFFER_ALIGN,
            });
        }
        let layout = Layout::from_size_align(buffer_size, BUFFER_ALIGN).map_err(|_| {
            MemoryError::InvalidLayout {
                size: buffer_size,
                align: BUFFER_ALIGN,
            }
        })?;

        // Safety: layout has non-zero size
        let first = NonNull::new(unsafe { alloc::alloc(layout) });
        let second = NonNull::new(unsafe { alloc::alloc(layout) });
        let (first, second) = match (first, second) {
            (Some(a), Some(b)) => (a, b),
            (a, b) => {
                // Safety: any buffer that did come back was allocated
                // with `layout` just above.
                unsafe {
                    if let Some(p) = a {
                        alloc::dealloc(p.as_ptr(), layout);
                    }
                    if let Some(p) = b {
                        alloc::dealloc(p.as_ptr(), layout);
                    }
                }
                return Err(MemoryError::SystemExhausted {
                    requested: buffer_size,
                });
            }
        };

        debug!("frame allocator created with 2 x {} byte buffers", buffer_size);
        Ok(Self {
            buffers: [first, second],
            cursors: [0, 0],
            buffer_size,
            active: ActiveBuffer::First,
        })
    }

    /// Start a new cycle: flip the active buffer and reset its cursor.
    ///
    /// The buffer that was active last cycle is left untouched, so its
    /// contents survive until it is selected again.
    pub fn begin_cycle(&mut self) {
        self.active = self.active.flipped();
        self.cursors[self.active.index()] = 0;
    }

    /// Bump-allocate `size` bytes from the active buffer, aligned to the
    /// power-of-two `align`.
    pub fn allocate(&mut self, size: Size, align: Size) -> MemoryResult<NonNull<u8>> {
        validate_request(size, align)?;

        let idx = self.active.index();
        let base = self.buffers[idx].as_ptr() as usize;
        let current = base + self.cursors[idx];
        let padding = align_up(current, align) - current;

        let needed = self.cursors[idx]
            .checked_add(padding)
            .and_then(|n| n.checked_add(size))
            .ok_or(MemoryError::InvalidLayout { size, align })?;
        if needed > self.buffer_size {
            return Err(MemoryError::FrameExhausted {
                requested: size,
                align,
                remaining: self.buffer_size - self.cursors[idx],
            });
        }

        let offset = self.cursors[idx] + padding;
        self.cursors[idx] = offset + size;
        // Safety: offset + size <= buffer_size, so the pointer is in
        // bounds of the active buffer and non-null.
        Ok(unsafe { NonNull::new_unchecked(self.buffers[idx].as_ptr().add(offset)) })
    }

    /// Allocate with the default 16-byte alignment.
    pub fn alloc(&mut self, size: Size) -> MemoryResult<NonNull<u8>> {
        self.allocate(size, DEFAULT_ALIGN)
    }

    /// Bytes allocated from the active buffer this cycle.
    pub fn size(&self) -> Size {
        self.cursors[self.active.index()]
    }

    /// Capacity of each buffer in bytes.
    pub fn capacity(&self) -> Size {
        self.buffer_size
    }
}

impl Default for FrameAllocator {
    /// A pair of 1 MiB buffers. If they cannot be allocated the allocator
    /// starts with zero capacity and every request fails recoverably.
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE).unwrap_or_else(|err| {
            warn!("frame allocator default buffers unavailable ({err}), starting empty");
            Self {
                buffers: [NonNull::dangling(), NonNull::dangling()],
                cursors: [0, 0],
                buffer_size: 0,
                active: ActiveBuffer::First,
            }
        })
    }
}

impl Drop for FrameAllocator {
    fn drop(&mut self) {
        if self.buffer_size > 0 {
            // Safety: both buffers were allocated in `new` with this layout
            unsafe {
                let layout = Layout::from_size_align_unchecked(self.buffer_size, BUFFER_ALIGN);
                alloc::dealloc(self.buffers[0].as_ptr(), layout);
                alloc::dealloc(self.buffers[1].as_ptr(), layout);
            }
        }
    }
}

impl std::fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("active", &self.active)
            .field("size", &self.size())
            .field("capacity", &self.buffer_size)
            .finish()
    }
}
