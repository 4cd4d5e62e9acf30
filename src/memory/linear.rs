use alloc::vec::Vec;
use core::alloc::Layout;
use core::cell::Cell;
use core::cell::RefCell;
use core::ptr::NonNull;

use super::Allocator;
use super::BLOCK_ALIGN;
use crate::error::AllocatorError;

/// A fixed buffer with a bump offset, shared by the linear and stack kinds.
#[derive(Debug)]
struct Region {
    ptr: NonNull<u8>,
    size: usize,
    top: Cell<usize>,
}

impl Region {
    fn new(size: usize) -> Result<Self, AllocatorError> {
        if size == 0 {
            return Err(AllocatorError::InvalidConfig {
                reason: "buffer size must be non-zero",
            });
        }
        let layout = Layout::from_size_align(size, BLOCK_ALIGN)
            .map_err(|_| AllocatorError::OutOfMemory { size })?;
        // SAFETY: `size` is non-zero.
        let ptr = NonNull::new(unsafe { alloc::alloc::alloc(layout) })
            .ok_or(AllocatorError::OutOfMemory { size })?;
        Ok(Self {
            ptr,
            size,
            top: Cell::new(0),
        })
    }

    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let base = self.ptr.as_ptr() as usize;
        let start = (base + self.top.get()).checked_next_multiple_of(layout.align())? - base;
        let end = start.checked_add(layout.size())?;
        if end > self.size {
            log::warn!(
                "{} byte buffer exhausted: {} bytes requested, {} used",
                self.size,
                layout.size(),
                self.top.get()
            );
            return None;
        }
        self.top.set(end);
        // SAFETY: `start < end <= size`, so the offset stays in the buffer.
        Some(unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(start)) })
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize - self.ptr.as_ptr() as usize
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: Allocated in `new` with this layout.
        unsafe {
            alloc::alloc::dealloc(
                self.ptr.as_ptr(),
                Layout::from_size_align_unchecked(self.size, BLOCK_ALIGN),
            )
        }
    }
}

/// Bump allocator over a single fixed buffer.
///
/// Requests fail once the buffer is exhausted. [`free`](Allocator::free) does
/// nothing; [`reset`](LinearAllocator::reset) makes the whole buffer available
/// again.
#[derive(Debug)]
pub struct LinearAllocator {
    region: Region,
}

// SAFETY: The allocator exclusively owns its buffer.
unsafe impl Send for LinearAllocator {}

impl LinearAllocator {
    /// Reserves a buffer of `size` bytes.
    pub fn new(size: usize) -> Result<Self, AllocatorError> {
        Ok(Self {
            region: Region::new(size)?,
        })
    }

    /// Bytes handed out since creation or the last reset.
    pub fn used(&self) -> usize {
        self.region.top.get()
    }

    /// Size of the buffer.
    pub fn capacity(&self) -> usize {
        self.region.size
    }

    /// Makes the whole buffer available again.
    pub fn reset(&mut self) {
        self.region.top.set(0);
    }
}

// SAFETY: Allocations are disjoint ranges of the buffer; the offset only moves
// backwards through `reset`, which requires exclusive access.
unsafe impl Allocator for LinearAllocator {
    #[inline]
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.region.bump(layout)
    }

    #[inline]
    unsafe fn free(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

/// Bump allocator over a single fixed buffer whose blocks are released in
/// last-in, first-out order.
///
/// Freeing the most recent block returns its space. A block freed out of
/// order is remembered, and its space comes back once every block above it
/// has been freed as well.
#[derive(Debug)]
pub struct StackAllocator {
    region: Region,
    frames: RefCell<Vec<Frame>>,
}

/// One live or pending-release block, in allocation order.
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Top of the stack before this block was bumped.
    prev_top: usize,
    start: usize,
    freed: bool,
}

// SAFETY: The allocator exclusively owns its buffer and frame list.
unsafe impl Send for StackAllocator {}

impl StackAllocator {
    /// Reserves a buffer of `size` bytes.
    pub fn new(size: usize) -> Result<Self, AllocatorError> {
        Ok(Self {
            region: Region::new(size)?,
            frames: RefCell::new(Vec::new()),
        })
    }

    /// Bytes between the buffer start and the top of the stack.
    pub fn used(&self) -> usize {
        self.region.top.get()
    }

    /// Pops every freed frame off the top and lowers the stack to match.
    fn unwind(&self, frames: &mut Vec<Frame>) {
        while let Some(frame) = frames.last().copied().filter(|frame| frame.freed) {
            frames.pop();
            self.region.top.set(frame.prev_top);
        }
    }
}

// SAFETY: Allocations are disjoint ranges below the top; the top only moves
// below a block once that block and every block above it have been freed.
unsafe impl Allocator for StackAllocator {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        let prev_top = self.region.top.get();
        let ptr = self.region.bump(layout)?;
        self.frames.borrow_mut().push(Frame {
            prev_top,
            start: self.region.offset_of(ptr),
            freed: false,
        });
        Some(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let start = self.region.offset_of(ptr);
        let on_top = self
            .frames
            .borrow()
            .last()
            .is_some_and(|frame| frame.start == start && !frame.freed);
        if on_top {
            let end = start.checked_add(new_size)?;
            if end > self.region.size {
                return None;
            }
            self.region.top.set(end);
            return Some(ptr);
        }

        let new_layout = Layout::from_size_align(new_size, old_layout.align()).ok()?;
        let new_ptr = self.alloc(new_layout)?;
        // SAFETY: Distinct live ranges of the buffer. The old block came from
        // this allocator with `old_layout` and is not used again.
        unsafe {
            core::ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                new_ptr.as_ptr(),
                old_layout.size().min(new_size),
            );
            self.free(ptr, old_layout);
        }
        Some(new_ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _layout: Layout) {
        let start = self.region.offset_of(ptr);
        let mut frames = self.frames.borrow_mut();
        match frames
            .iter_mut()
            .rev()
            .find(|frame| frame.start == start && !frame.freed)
        {
            Some(frame) => frame.freed = true,
            None => {
                log::warn!("stack: no live block at offset {start}");
                return;
            }
        }
        if frames.last().is_some_and(|frame| !frame.freed) {
            log::trace!("stack: block at offset {start} freed out of order, held until unwound");
        }
        self.unwind(&mut frames);
    }
}
