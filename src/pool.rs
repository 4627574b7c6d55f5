/*!
 * Pool Allocator
 * Fixed-size slot allocation over an index-based free list
 *
 * The free list is threaded through the free slots themselves: the first
 * four bytes of a free slot hold the slot index of the next free slot.
 * Links are checked integer indices rather than raw addresses, so a
 * corrupted or foreign pointer is detected instead of dereferenced.
 */

use crate::types::{align_up, MemoryError, MemoryResult, PoolStats, Size};
use log::{debug, warn};
use parking_lot::Mutex;
use std::alloc::{self, Layout};
use std::mem;
use std::ptr::NonNull;

/// Alignment of every chunk; slots inherit at least pointer alignment
/// from the rounded element size.
const CHUNK_ALIGN: usize = 16;

/// Sentinel terminating the free list.
const FREE_LIST_END: u32 = u32::MAX;

/// Default number of elements per chunk.
pub const DEFAULT_ELEMENTS_PER_CHUNK: usize = 1024;

/// State behind the pool's single coarse lock.
struct PoolInner {
    /// Every chunk ever allocated, in allocation order, for bulk release.
    chunks: Vec<NonNull<u8>>,
    /// Head of the free list as a global slot index, or `FREE_LIST_END`.
    free_head: u32,
    free_slots: usize,
    foreign_frees: u64,
}

/// Thread-safe allocator for uniform fixed-size blocks.
///
/// `allocate` pops the free-list head and `deallocate` pushes a slot back,
/// both O(1) with no search or coalescing. When the free list runs dry a
/// whole new chunk of [`PoolAllocator::elements_per_chunk`] slots is
/// allocated and threaded in. Chunks are only released when the pool
/// itself is dropped.
///
/// The pool manages raw storage only: it never constructs or drops values
/// in the returned memory.
pub struct PoolAllocator {
    /// Element size rounded up to pointer alignment for free-list linkage.
    element_size: Size,
    elements_per_chunk: usize,
    inner: Mutex<PoolInner>,
}

// Safety: the chunk pointers are owned by the pool for its whole lifetime
// and all bookkeeping that touches them goes through the inner mutex.
// Callers receive raw slot pointers and are responsible for their own
// synchronization of slot contents, as with any raw allocator.
unsafe impl Send for PoolAllocator {}
unsafe impl Sync for PoolAllocator {}

impl PoolAllocator {
    /// Create a pool for elements of `element_size` bytes, grouped into
    /// chunks of `elements_per_chunk` slots.
    ///
    /// The element size is rounded up to pointer alignment so a free-list
    /// link always fits in a free slot. The first chunk is allocated on
    /// first use.
    pub fn new(element_size: Size, elements_per_chunk: usize) -> Self {
        assert!(elements_per_chunk > 0, "pool chunks must hold at least one element");
        let element_size = align_up(element_size.max(1), mem::align_of::<usize>());
        debug!(
            "pool created: {} byte elements, {} per chunk",
            element_size, elements_per_chunk
        );
        Self {
            element_size,
            elements_per_chunk,
            inner: Mutex::new(PoolInner {
                chunks: Vec::new(),
                free_head: FREE_LIST_END,
                free_slots: 0,
                foreign_frees: 0,
            }),
        }
    }

    /// Create a pool with the default chunk size of 1024 elements.
    pub fn with_element_size(element_size: Size) -> Self {
        Self::new(element_size, DEFAULT_ELEMENTS_PER_CHUNK)
    }

    /// Pop one slot off the free list, growing by a chunk if it is empty.
    pub fn allocate(&self) -> MemoryResult<NonNull<u8>> {
        let mut inner = self.inner.lock();

        if inner.free_head == FREE_LIST_END {
            self.grow(&mut inner)?;
        }

        let idx = inner.free_head;
        let ptr = self.slot_ptr(&inner, idx);
        // Safety: idx came off the free list, so the slot is unissued and
        // its leading bytes hold the next link written by grow/deallocate.
        inner.free_head = unsafe { ptr.cast::<u32>().as_ptr().read() };
        inner.free_slots -= 1;
        Ok(ptr)
    }

    /// Push a slot back onto the free list head.
    ///
    /// A pointer that was not issued by this pool (outside every chunk,
    /// or not on a slot boundary) is diagnosed and ignored; the free list
    /// is never corrupted by it.
    pub fn deallocate(&self, ptr: NonNull<u8>) {
        let mut inner = self.inner.lock();

        let Some(idx) = self.slot_index(&inner, ptr) else {
            inner.foreign_frees += 1;
            warn!("pool deallocate of foreign pointer {:p}", ptr.as_ptr());
            return;
        };

        // Safety: the pointer decodes to a slot in one of our chunks and
        // the caller hands ownership of it back here.
        unsafe { ptr.cast::<u32>().as_ptr().write(inner.free_head) };
        inner.free_head = idx;
        inner.free_slots += 1;
    }

    /// Snapshot of the pool's chunk and slot accounting.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            element_size: self.element_size,
            elements_per_chunk: self.elements_per_chunk,
            chunks: inner.chunks.len(),
            free_slots: inner.free_slots,
            foreign_frees: inner.foreign_frees,
        }
    }

    /// Element size after rounding to pointer alignment.
    pub fn element_size(&self) -> Size {
        self.element_size
    }

    /// Allocate one more chunk and thread its slots into the free list.
    /// On failure no partial chunk is linked in.
    fn grow(&self, inner: &mut PoolInner) -> MemoryResult<()> {
        let chunk_index = inner.chunks.len();
        let total_slots = (chunk_index + 1).saturating_mul(self.elements_per_chunk);
        if total_slots >= FREE_LIST_END as usize {
            return Err(MemoryError::SystemExhausted {
                requested: self.chunk_bytes(),
            });
        }

        let bytes = self.chunk_bytes();
        let layout = Layout::from_size_align(bytes, CHUNK_ALIGN).map_err(|_| {
            MemoryError::InvalidLayout {
                size: bytes,
                align: CHUNK_ALIGN,
            }
        })?;
        // Safety: layout has non-zero size
        let base = NonNull::new(unsafe { alloc::alloc(layout) })
            .ok_or(MemoryError::SystemExhausted { requested: bytes })?;
        inner.chunks.push(base);

        for slot in 0..self.elements_per_chunk {
            let idx = (chunk_index * self.elements_per_chunk + slot) as u32;
            // Safety: slot * element_size + 4 <= chunk bytes, and the slot
            // is at least pointer-aligned.
            unsafe {
                let link = base.as_ptr().add(slot * self.element_size).cast::<u32>();
                link.write(inner.free_head);
            }
            inner.free_head = idx;
        }
        inner.free_slots += self.elements_per_chunk;

        debug!(
            "pool grew to {} chunks ({} slots)",
            inner.chunks.len(),
            inner.chunks.len() * self.elements_per_chunk
        );
        Ok(())
    }

    #[inline]
    fn chunk_bytes(&self) -> Size {
        self.element_size * self.elements_per_chunk
    }

    /// Pointer to the slot with global index `idx`.
    #[inline]
    fn slot_ptr(&self, inner: &PoolInner, idx: u32) -> NonNull<u8> {
        let chunk = idx as usize / self.elements_per_chunk;
        let slot = idx as usize % self.elements_per_chunk;
        debug_assert!(chunk < inner.chunks.len());
        // Safety: every index on the free list decodes into an allocated chunk
        unsafe { NonNull::new_unchecked(inner.chunks[chunk].as_ptr().add(slot * self.element_size)) }
    }

    /// Decode a pointer back to its global slot index, or `None` if it
    /// does not lie on a slot boundary of any chunk.
    fn slot_index(&self, inner: &PoolInner, ptr: NonNull<u8>) -> Option<u32> {
        let addr = ptr.as_ptr() as usize;
        let bytes = self.chunk_bytes();
        for (chunk, base) in inner.chunks.iter().enumerate() {
            let start = base.as_ptr() as usize;
            if addr < start || addr >= start + bytes {
                continue;
            }
            let offset = addr - start;
            if offset % self.element_size != 0 {
                return None;
            }
            return Some((chunk * self.elements_per_chunk + offset / self.element_size) as u32);
        }
        None
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        let chunk_bytes = self.chunk_bytes();
        let inner = self.inner.get_mut();
        // Safety: every chunk was allocated in grow with this exact layout
        unsafe {
            let layout = Layout::from_size_align_unchecked(chunk_bytes, CHUNK_ALIGN);
            for chunk in &inner.chunks {
                alloc::dealloc(chunk.as_ptr(), layout);
            }
        }
    }
}

impl std::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("PoolAllocator")
            .field("element_size", &stats.element_size)
            .field("chunks", &stats.chunks)
            .field("free_slots", &stats.free_slots)
            .finish()
    }
}
