//! Allocator capabilities consumed by the hash table.
//!
//! A [`HashTable`](crate::HashTable) never calls the global allocator
//! directly: slot storage and copied keys both go
//! through the table's [`Allocator`]. The allocators in this module obtain
//! their own backing memory from the global allocator.

use alloc::boxed::Box;
use core::alloc::Layout;
use core::ptr::NonNull;

use bitflags::bitflags;

use crate::error::AllocatorError;

mod arena;
mod linear;
mod platform;
mod pool;
mod proxy;

pub use arena::ArenaAllocator;
pub use linear::LinearAllocator;
pub use linear::StackAllocator;
pub use platform::PlatformAllocator;
pub use pool::PoolAllocator;
pub use proxy::ProxyAllocator;
pub use proxy::ProxyStats;

/// Alignment of blocks handed out by the block-based allocators.
pub(crate) const BLOCK_ALIGN: usize = 16;

/// An allocation capability: `alloc`, `realloc` and `free` against some
/// memory source.
///
/// Failure is reported by returning `None`; implementations must never abort
/// the process on exhaustion.
///
/// # Safety
///
/// Implementors must return pointers that are valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and not handed out
/// again until passed to [`free`](Allocator::free) (or forever, for
/// allocators whose `free` does nothing).
pub unsafe trait Allocator {
    /// Allocates a block for `layout`. `layout.size()` is never zero.
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Resizes the block at `ptr` to `new_size` bytes, keeping its alignment
    /// and the common prefix of its contents.
    ///
    /// On failure the original block is left untouched and still owned by the
    /// caller.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for `old_layout` and
    /// not freed since.
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let new_layout = Layout::from_size_align(new_size, old_layout.align()).ok()?;
        let new_ptr = self.alloc(new_layout)?;
        // SAFETY: Both blocks are valid for at least the copied length and do
        // not overlap because the new block was freshly allocated. `ptr` is
        // owned by the caller per this method's contract.
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

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for `layout` and not
    /// freed since.
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout);
}

// SAFETY: Forwards to `A`, which upholds the contract.
unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).alloc(layout)
    }

    #[inline]
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: Caller upholds the contract for `A`.
        unsafe { (**self).realloc(ptr, old_layout, new_size) }
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller upholds the contract for `A`.
        unsafe { (**self).free(ptr, layout) }
    }
}

bitflags! {
    /// Behaviour switches shared by every allocator kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u8 {
        /// Zero every block before handing it out, and the grown tail of
        /// every reallocated block.
        const ZEROED = 1 << 0;
    }
}

/// Which allocator to build, with the parameters only that kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorKind {
    /// The global allocator.
    Platform,
    /// Bump allocation out of a chain of blocks; `free` is a no-op.
    Arena {
        /// Size of each block, 0 for the default of 64 KiB
        block_size: usize,
    },
    /// A fixed number of fixed-size blocks.
    Pool {
        /// Largest allocation a block can hold
        block_size: usize,
        /// Number of blocks
        block_count: usize,
    },
    /// Bump allocation out of one fixed buffer; `free` is a no-op.
    Linear {
        /// Size of the buffer
        size: usize,
    },
    /// Bump allocation out of one fixed buffer, released in LIFO order.
    Stack {
        /// Size of the buffer
        size: usize,
    },
    /// Fixed-size blocks recycled through a free list, growing by
    /// `block_count` blocks whenever the list runs dry.
    FreeList {
        /// Largest allocation a block can hold
        block_size: usize,
        /// Number of blocks added per growth step
        block_count: usize,
    },
    /// Forwards to another allocator while counting traffic, optionally
    /// failing requests once `budget` bytes are live.
    Proxy {
        /// The allocator requests are forwarded to
        inner: Box<AllocatorConfig>,
        /// Maximum number of live bytes, if any
        budget: Option<usize>,
    },
}

/// Configuration selecting and parameterizing an allocator.
///
/// # Examples
///
/// ```rust
/// use rh_hash::memory::AllocFlags;
/// use rh_hash::memory::AllocatorConfig;
/// use rh_hash::memory::AllocatorKind;
/// use rh_hash::memory::AnyAllocator;
///
/// let allocator = AnyAllocator::new(AllocatorConfig {
///     kind: AllocatorKind::Arena { block_size: 4096 },
///     flags: AllocFlags::ZEROED,
/// })
/// .unwrap();
/// assert!(matches!(allocator, AnyAllocator::Arena { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// The allocator kind and its parameters
    pub kind: AllocatorKind,
    /// Flags applied to every allocation
    pub flags: AllocFlags,
}

impl AllocatorConfig {
    /// Configuration for the global allocator with no flags.
    pub const fn platform() -> Self {
        Self {
            kind: AllocatorKind::Platform,
            flags: AllocFlags::empty(),
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self::platform()
    }
}

/// An allocator built from an [`AllocatorConfig`].
#[derive(Debug)]
pub enum AnyAllocator {
    /// See [`AllocatorKind::Platform`]
    Platform(PlatformAllocator),
    /// See [`AllocatorKind::Arena`]
    Arena {
        /// The arena
        arena: ArenaAllocator,
        /// Zero blocks before returning them
        zeroed: bool,
    },
    /// See [`AllocatorKind::Pool`] and [`AllocatorKind::FreeList`]
    Pool {
        /// The pool
        pool: PoolAllocator,
        /// Zero blocks before returning them
        zeroed: bool,
    },
    /// See [`AllocatorKind::Linear`]
    Linear {
        /// The linear allocator
        linear: LinearAllocator,
        /// Zero blocks before returning them
        zeroed: bool,
    },
    /// See [`AllocatorKind::Stack`]
    Stack {
        /// The stack allocator
        stack: StackAllocator,
        /// Zero blocks before returning them
        zeroed: bool,
    },
    /// See [`AllocatorKind::Proxy`]
    Proxy(Box<ProxyAllocator<AnyAllocator>>),
}

impl AnyAllocator {
    /// Builds the allocator described by `config`.
    pub fn new(config: AllocatorConfig) -> Result<Self, AllocatorError> {
        let zeroed = config.flags.contains(AllocFlags::ZEROED);
        let allocator = match config.kind {
            AllocatorKind::Platform => Self::Platform(if zeroed {
                PlatformAllocator::zeroed()
            } else {
                PlatformAllocator::new()
            }),
            AllocatorKind::Arena { block_size } => Self::Arena {
                arena: ArenaAllocator::with_block_size(block_size),
                zeroed,
            },
            AllocatorKind::Pool {
                block_size,
                block_count,
            } => Self::Pool {
                pool: PoolAllocator::fixed(block_size, block_count)?,
                zeroed,
            },
            AllocatorKind::FreeList {
                block_size,
                block_count,
            } => Self::Pool {
                pool: PoolAllocator::growable(block_size, block_count)?,
                zeroed,
            },
            AllocatorKind::Linear { size } => Self::Linear {
                linear: LinearAllocator::new(size)?,
                zeroed,
            },
            AllocatorKind::Stack { size } => Self::Stack {
                stack: StackAllocator::new(size)?,
                zeroed,
            },
            AllocatorKind::Proxy { inner, budget } => {
                let mut inner = *inner;
                if zeroed {
                    inner.flags |= AllocFlags::ZEROED;
                }
                let inner = Self::new(inner)?;
                Self::Proxy(Box::new(ProxyAllocator::with_budget(inner, budget)))
            }
        };

        log::debug!("created {} allocator", allocator.kind_name());
        Ok(allocator)
    }

    /// Short name of the allocator kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Platform(_) => "platform",
            Self::Arena { .. } => "arena",
            Self::Pool { pool, .. } if pool.is_growable() => "free-list",
            Self::Pool { .. } => "pool",
            Self::Linear { .. } => "linear",
            Self::Stack { .. } => "stack",
            Self::Proxy(_) => "proxy",
        }
    }

    fn zero_if(zeroed: bool, block: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        if let Some(ptr) = block {
            if zeroed {
                // SAFETY: The allocator just returned `ptr` as valid for `size` bytes.
                unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, size) };
            }
        }
        block
    }
}

// SAFETY: Every variant forwards to an allocator upholding the contract.
unsafe impl Allocator for AnyAllocator {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        match self {
            Self::Platform(platform) => platform.alloc(layout),
            Self::Arena { arena, zeroed } => {
                Self::zero_if(*zeroed, arena.alloc(layout), layout.size())
            }
            Self::Pool { pool, zeroed } => Self::zero_if(*zeroed, pool.alloc(layout), layout.size()),
            Self::Linear { linear, zeroed } => {
                Self::zero_if(*zeroed, linear.alloc(layout), layout.size())
            }
            Self::Stack { stack, zeroed } => {
                Self::zero_if(*zeroed, stack.alloc(layout), layout.size())
            }
            Self::Proxy(proxy) => proxy.alloc(layout),
        }
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: Caller guarantees `ptr` came from this allocator, and each
        // variant only ever hands out blocks from its own inner allocator.
        let (block, zeroed) = unsafe {
            // Platform and proxy allocators zero on their own.
            match self {
                Self::Platform(platform) => (platform.realloc(ptr, old_layout, new_size), false),
                Self::Arena { arena, zeroed } => (arena.realloc(ptr, old_layout, new_size), *zeroed),
                Self::Pool { pool, zeroed } => (pool.realloc(ptr, old_layout, new_size), *zeroed),
                Self::Linear { linear, zeroed } => {
                    (linear.realloc(ptr, old_layout, new_size), *zeroed)
                }
                Self::Stack { stack, zeroed } => {
                    (stack.realloc(ptr, old_layout, new_size), *zeroed)
                }
                Self::Proxy(proxy) => (proxy.realloc(ptr, old_layout, new_size), false),
            }
        };

        if let Some(grown) = block {
            let old_size = old_layout.size();
            if zeroed && new_size > old_size {
                // SAFETY: `grown` is valid for `new_size` bytes.
                unsafe {
                    core::ptr::write_bytes(grown.as_ptr().add(old_size), 0, new_size - old_size)
                };
            }
        }
        block
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees `ptr` came from this allocator for `layout`.
        unsafe {
            match self {
                Self::Platform(platform) => platform.free(ptr, layout),
                Self::Arena { arena, .. } => arena.free(ptr, layout),
                Self::Pool { pool, .. } => pool.free(ptr, layout),
                Self::Linear { linear, .. } => linear.free(ptr, layout),
                Self::Stack { stack, .. } => stack.free(ptr, layout),
                Self::Proxy(proxy) => proxy.free(ptr, layout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: AllocatorKind) -> AllocatorConfig {
        AllocatorConfig {
            kind,
            flags: AllocFlags::ZEROED,
        }
    }

    #[test]
    fn builds_every_kind() {
        let kinds = [
            (AllocatorKind::Platform, "platform"),
            (AllocatorKind::Arena { block_size: 0 }, "arena"),
            (
                AllocatorKind::Pool {
                    block_size: 64,
                    block_count: 8,
                },
                "pool",
            ),
            (AllocatorKind::Linear { size: 1024 }, "linear"),
            (AllocatorKind::Stack { size: 1024 }, "stack"),
            (
                AllocatorKind::FreeList {
                    block_size: 64,
                    block_count: 8,
                },
                "free-list",
            ),
            (
                AllocatorKind::Proxy {
                    inner: Box::new(AllocatorConfig::platform()),
                    budget: None,
                },
                "proxy",
            ),
        ];

        for (kind, name) in kinds {
            let allocator = AnyAllocator::new(config(kind)).unwrap();
            assert_eq!(allocator.kind_name(), name);

            let layout = Layout::from_size_align(48, 8).unwrap();
            let ptr = allocator.alloc(layout).unwrap();
            // SAFETY: `ptr` is valid for 48 bytes.
            let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 48) };
            assert!(bytes.iter().all(|&b| b == 0), "{name} did not zero");
            // SAFETY: `ptr` was allocated above for `layout`.
            unsafe { allocator.free(ptr, layout) };
        }
    }

    #[test]
    fn rejects_invalid_configs() {
        let bad = [
            AllocatorKind::Pool {
                block_size: 0,
                block_count: 4,
            },
            AllocatorKind::FreeList {
                block_size: 32,
                block_count: 0,
            },
            AllocatorKind::Linear { size: 0 },
            AllocatorKind::Stack { size: 0 },
        ];
        for kind in bad {
            assert!(matches!(
                AnyAllocator::new(config(kind)),
                Err(AllocatorError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn zeroed_realloc_clears_grown_tail() {
        let kinds = [
            AllocatorKind::Platform,
            AllocatorKind::Arena { block_size: 0 },
            AllocatorKind::Pool {
                block_size: 64,
                block_count: 8,
            },
            AllocatorKind::Linear { size: 1024 },
            AllocatorKind::Stack { size: 1024 },
            AllocatorKind::Proxy {
                inner: Box::new(config(AllocatorKind::Arena { block_size: 0 })),
                budget: None,
            },
        ];

        for kind in kinds {
            let allocator = AnyAllocator::new(config(kind)).unwrap();
            let name = allocator.kind_name();
            let layout = Layout::from_size_align(16, 8).unwrap();
            let ptr = allocator.alloc(layout).unwrap();
            // SAFETY: `ptr` is valid for 16 bytes and came from `allocator`.
            unsafe {
                core::ptr::write_bytes(ptr.as_ptr(), 0xAB, 16);
                let grown = allocator.realloc(ptr, layout, 48).unwrap();
                let bytes = core::slice::from_raw_parts(grown.as_ptr(), 48);
                assert!(bytes[..16].iter().all(|&b| b == 0xAB), "{name} lost prefix");
                assert!(bytes[16..].iter().all(|&b| b == 0), "{name} left stale tail");
                allocator.free(grown, Layout::from_size_align(48, 8).unwrap());
            }
        }
    }

    #[test]
    fn flags_debug_and_truncation() {
        assert_eq!(alloc::format!("{:?}", AllocFlags::ZEROED), "AllocFlags(ZEROED)");
        assert!(AllocFlags::from_bits_truncate(0xFE).is_empty());
        assert!(!AllocatorConfig::platform().flags.contains(AllocFlags::ZEROED));
    }

    #[test]
    fn default_realloc_preserves_prefix() {
        let arena = ArenaAllocator::new();
        let layout = Layout::from_size_align(4, 1).unwrap();
        let ptr = arena.alloc(layout).unwrap();
        // SAFETY: `ptr` is valid for 4 bytes; realloc contract upheld.
        unsafe {
            core::ptr::copy_nonoverlapping(b"abcd".as_ptr(), ptr.as_ptr(), 4);
            let grown = arena.realloc(ptr, layout, 16).unwrap();
            assert_eq!(core::slice::from_raw_parts(grown.as_ptr(), 4), b"abcd");
        }
    }
}
