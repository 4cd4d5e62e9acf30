use core::alloc::Layout;
use core::ptr::NonNull;

use super::Allocator;

/// The global allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformAllocator {
    zeroed: bool,
}

impl PlatformAllocator {
    /// Creates an allocator handing out uninitialized blocks.
    pub const fn new() -> Self {
        Self { zeroed: false }
    }

    /// Creates an allocator handing out zeroed blocks.
    pub const fn zeroed() -> Self {
        Self { zeroed: true }
    }
}

// SAFETY: Forwards to the global allocator, which upholds the contract.
unsafe impl Allocator for PlatformAllocator {
    #[inline]
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() != 0);
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe {
            if self.zeroed {
                alloc::alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc::alloc(layout)
            }
        };
        NonNull::new(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // Rejects sizes that overflow when rounded to the alignment, which
        // `alloc::realloc` requires of its caller.
        Layout::from_size_align(new_size, old_layout.align()).ok()?;
        // SAFETY: `ptr` was allocated by the global allocator for `old_layout`
        // and `new_size` forms a valid layout with the same alignment.
        let new_ptr =
            NonNull::new(unsafe { alloc::alloc::realloc(ptr.as_ptr(), old_layout, new_size) })?;
        if self.zeroed && new_size > old_layout.size() {
            // SAFETY: The block is valid for `new_size` bytes.
            unsafe {
                core::ptr::write_bytes(
                    new_ptr.as_ptr().add(old_layout.size()),
                    0,
                    new_size - old_layout.size(),
                );
            }
        }
        Some(new_ptr)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees `ptr` came from `alloc` with `layout`.
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}
