use alloc::vec::Vec;
use core::alloc::Layout;
use core::cell::Cell;
use core::cell::RefCell;
use core::ptr::NonNull;

use super::Allocator;
use super::BLOCK_ALIGN;
use crate::error::AllocatorError;

/// Fixed-size block allocator.
///
/// Free blocks are threaded into an intrusive list through their first word.
/// A fixed pool fails once every block is in use; a growable pool (the
/// free-list kind) reserves another chunk of `block_count` blocks instead.
/// Requests larger than a block, or aligned beyond 16 bytes, always fail.
#[derive(Debug)]
pub struct PoolAllocator {
    block_size: usize,
    block_count: usize,
    growable: bool,
    head: Cell<Option<NonNull<u8>>>,
    available: Cell<usize>,
    chunks: RefCell<Vec<NonNull<u8>>>,
}

// SAFETY: The pool exclusively owns its chunks.
unsafe impl Send for PoolAllocator {}

impl PoolAllocator {
    /// Creates a pool of `block_count` blocks that never grows.
    pub fn fixed(block_size: usize, block_count: usize) -> Result<Self, AllocatorError> {
        Self::build(block_size, block_count, false)
    }

    /// Creates a pool that grows by `block_count` blocks whenever it runs dry.
    pub fn growable(block_size: usize, block_count: usize) -> Result<Self, AllocatorError> {
        Self::build(block_size, block_count, true)
    }

    fn build(block_size: usize, block_count: usize, growable: bool) -> Result<Self, AllocatorError> {
        if block_size == 0 {
            return Err(AllocatorError::InvalidConfig {
                reason: "block size must be non-zero",
            });
        }
        if block_count == 0 {
            return Err(AllocatorError::InvalidConfig {
                reason: "block count must be non-zero",
            });
        }
        let block_size = block_size
            .checked_next_multiple_of(BLOCK_ALIGN)
            .ok_or(AllocatorError::InvalidConfig {
                reason: "block size overflows",
            })?;

        let pool = Self {
            block_size,
            block_count,
            growable,
            head: Cell::new(None),
            available: Cell::new(0),
            chunks: RefCell::new(Vec::new()),
        };
        if !pool.add_chunk() {
            return Err(AllocatorError::OutOfMemory {
                size: block_size.saturating_mul(block_count),
            });
        }
        Ok(pool)
    }

    /// Usable size of each block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks not currently handed out.
    pub fn available(&self) -> usize {
        self.available.get()
    }

    /// Whether the pool reserves more blocks when it runs dry.
    pub fn is_growable(&self) -> bool {
        self.growable
    }

    fn chunk_layout(&self) -> Option<Layout> {
        let size = self.block_size.checked_mul(self.block_count)?;
        Layout::from_size_align(size, BLOCK_ALIGN).ok()
    }

    fn add_chunk(&self) -> bool {
        let Some(layout) = self.chunk_layout() else {
            return false;
        };
        // SAFETY: Block size and count are non-zero.
        let Some(chunk) = NonNull::new(unsafe { alloc::alloc::alloc(layout) }) else {
            log::warn!("pool: failed to reserve {} bytes", layout.size());
            return false;
        };

        for index in (0..self.block_count).rev() {
            // SAFETY: `index * block_size` is within the chunk.
            let block = unsafe { NonNull::new_unchecked(chunk.as_ptr().add(index * self.block_size)) };
            self.push(block);
        }
        self.chunks.borrow_mut().push(chunk);
        log::trace!(
            "pool: reserved chunk {} with {} blocks",
            self.chunks.borrow().len(),
            self.block_count
        );
        true
    }

    fn push(&self, block: NonNull<u8>) {
        // SAFETY: Blocks are at least 16 bytes and 16-aligned, so the first
        // word is writable and aligned for a pointer.
        unsafe { block.cast::<Option<NonNull<u8>>>().write(self.head.get()) };
        self.head.set(Some(block));
        self.available.set(self.available.get() + 1);
    }

    fn pop(&self) -> Option<NonNull<u8>> {
        let block = self.head.get()?;
        // SAFETY: Free blocks hold the next link in their first word.
        self.head.set(unsafe { block.cast::<Option<NonNull<u8>>>().read() });
        self.available.set(self.available.get() - 1);
        Some(block)
    }
}

// SAFETY: Each block is on the free list or handed out, never both, and
// chunks live until the pool is dropped.
unsafe impl Allocator for PoolAllocator {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() > self.block_size || layout.align() > BLOCK_ALIGN {
            log::trace!(
                "pool: {} byte request does not fit {} byte blocks",
                layout.size(),
                self.block_size
            );
            return None;
        }
        if let Some(block) = self.pop() {
            return Some(block);
        }
        if self.growable && self.add_chunk() {
            return self.pop();
        }
        None
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        _old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        (new_size <= self.block_size).then_some(ptr)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, _layout: Layout) {
        self.push(ptr);
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        if let Some(layout) = self.chunk_layout() {
            for chunk in self.chunks.get_mut().drain(..) {
                // SAFETY: Every chunk was allocated with `layout`.
                unsafe { alloc::alloc::dealloc(chunk.as_ptr(), layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pool_runs_dry() {
        let pool = PoolAllocator::fixed(20, 2).unwrap();
        assert_eq!(pool.block_size(), 32);
        let layout = Layout::from_size_align(20, 8).unwrap();
        let a = pool.alloc(layout).unwrap();
        let b = pool.alloc(layout).unwrap();
        assert_ne!(a, b);
        assert!(pool.alloc(layout).is_none());

        // SAFETY: `a` came from `pool`.
        unsafe { pool.free(a, layout) };
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.alloc(layout), Some(a));
    }

    #[test]
    fn growable_pool_adds_chunks() {
        let pool = PoolAllocator::growable(16, 2).unwrap();
        let layout = Layout::from_size_align(16, 16).unwrap();
        for _ in 0..5 {
            assert!(pool.alloc(layout).is_some());
        }
        assert_eq!(pool.chunks.borrow().len(), 3);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn oversized_requests_fail() {
        let pool = PoolAllocator::growable(16, 2).unwrap();
        assert!(pool.alloc(Layout::from_size_align(17, 1).unwrap()).is_none());
        assert!(pool.alloc(Layout::from_size_align(8, 32).unwrap()).is_none());
    }
}
