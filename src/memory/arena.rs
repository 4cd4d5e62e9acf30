use alloc::vec::Vec;
use core::alloc::Layout;
use core::cell::RefCell;
use core::ptr::NonNull;

use super::Allocator;
use super::BLOCK_ALIGN;

const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug)]
struct Block {
    ptr: NonNull<u8>,
    size: usize,
}

impl Block {
    fn layout(&self) -> Layout {
        // SAFETY: Every block was allocated with this exact layout.
        unsafe { Layout::from_size_align_unchecked(self.size, BLOCK_ALIGN) }
    }
}

#[derive(Debug, Default)]
struct ArenaState {
    blocks: Vec<Block>,
    /// Bytes handed out from the last block.
    used: usize,
}

/// Bump allocator over a chain of blocks.
///
/// Allocations are carved out of the newest block; when it cannot fit a
/// request a new block of at least `block_size` bytes is chained on.
/// [`free`](Allocator::free) does nothing, memory comes back only when the
/// arena is [`reset`](ArenaAllocator::reset) or dropped.
#[derive(Debug)]
pub struct ArenaAllocator {
    block_size: usize,
    state: RefCell<ArenaState>,
}

// SAFETY: The arena exclusively owns its blocks.
unsafe impl Send for ArenaAllocator {}

impl Default for ArenaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaAllocator {
    /// Creates an arena with 64 KiB blocks.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Creates an arena with blocks of `block_size` bytes, or the default size
    /// if `block_size` is zero. No memory is reserved until the first
    /// allocation.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size: if block_size == 0 {
                DEFAULT_BLOCK_SIZE
            } else {
                block_size
            },
            state: RefCell::new(ArenaState::default()),
        }
    }

    /// Number of blocks currently chained.
    pub fn block_count(&self) -> usize {
        self.state.borrow().blocks.len()
    }

    /// Total bytes reserved across all blocks.
    pub fn reserved_bytes(&self) -> usize {
        self.state.borrow().blocks.iter().map(|b| b.size).sum()
    }

    /// Releases every block. Requires exclusive access, so no allocation made
    /// through a shared borrow can outlive the call.
    pub fn reset(&mut self) {
        let state = self.state.get_mut();
        for block in state.blocks.drain(..) {
            // SAFETY: Block was allocated with `block.layout()` and is dropped
            // from the list here.
            unsafe { alloc::alloc::dealloc(block.ptr.as_ptr(), block.layout()) };
        }
        state.used = 0;
    }

    fn bump(block: &Block, used: usize, layout: Layout) -> Option<(NonNull<u8>, usize)> {
        let base = block.ptr.as_ptr() as usize;
        let start = (base + used).checked_next_multiple_of(layout.align())? - base;
        let end = start.checked_add(layout.size())?;
        if end > block.size {
            return None;
        }
        // SAFETY: `start < end <= block.size`, so the offset stays in the block.
        let ptr = unsafe { NonNull::new_unchecked(block.ptr.as_ptr().add(start)) };
        Some((ptr, end))
    }
}

// SAFETY: Each allocation is a disjoint range of a live block, and blocks are
// only released by `reset`/`drop`, which require exclusive access.
unsafe impl Allocator for ArenaAllocator {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut state = self.state.borrow_mut();
        if let Some(block) = state.blocks.last() {
            if let Some((ptr, end)) = Self::bump(block, state.used, layout) {
                state.used = end;
                return Some(ptr);
            }
        }

        // Over-allocate so the request fits even if it needs more alignment
        // than a block start provides.
        let size = layout
            .size()
            .checked_add(layout.align())?
            .max(self.block_size);
        let block_layout = Layout::from_size_align(size, BLOCK_ALIGN).ok()?;
        // SAFETY: `size` is non-zero.
        let Some(ptr) = NonNull::new(unsafe { alloc::alloc::alloc(block_layout) }) else {
            log::warn!("arena: failed to reserve a {size} byte block");
            return None;
        };
        log::trace!("arena: chained block {} of {size} bytes", state.blocks.len() + 1);

        let block = Block { ptr, size };
        let (ptr, end) = Self::bump(&block, 0, layout)?;
        state.blocks.push(block);
        state.used = end;
        Some(ptr)
    }

    #[inline]
    unsafe fn free(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

impl Drop for ArenaAllocator {
    fn drop(&mut self) {
        self.reset();
    }
}
