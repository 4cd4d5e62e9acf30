use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::NonNull;

use super::Allocator;

/// Traffic counters collected by a [`ProxyAllocator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Successful `alloc` calls
    pub allocations: usize,
    /// Successful `realloc` calls
    pub reallocations: usize,
    /// `free` calls
    pub frees: usize,
    /// Requests refused, by the budget or the inner allocator
    pub failures: usize,
    /// Bytes currently handed out
    pub live_bytes: usize,
    /// Highest value `live_bytes` has reached
    pub peak_bytes: usize,
}

/// Forwards to another allocator while counting traffic.
///
/// With a budget set, any request that would push live bytes past the budget
/// fails without reaching the inner allocator. Tests use this to inject
/// allocation failures at precise points.
///
/// # Examples
///
/// ```rust
/// use core::alloc::Layout;
///
/// use rh_hash::memory::Allocator;
/// use rh_hash::memory::PlatformAllocator;
/// use rh_hash::memory::ProxyAllocator;
///
/// let proxy = ProxyAllocator::with_budget(PlatformAllocator::new(), Some(64));
/// let layout = Layout::from_size_align(48, 8).unwrap();
/// let block = proxy.alloc(layout).unwrap();
/// assert!(proxy.alloc(layout).is_none());
///
/// unsafe { proxy.free(block, layout) };
/// assert_eq!(proxy.stats().live_bytes, 0);
/// assert_eq!(proxy.stats().failures, 1);
/// ```
#[derive(Debug)]
pub struct ProxyAllocator<A> {
    inner: A,
    budget: Cell<Option<usize>>,
    stats: Cell<ProxyStats>,
}

impl<A: Allocator> ProxyAllocator<A> {
    /// Wraps `inner` without a budget.
    pub fn new(inner: A) -> Self {
        Self::with_budget(inner, None)
    }

    /// Wraps `inner`, refusing requests past `budget` live bytes.
    pub fn with_budget(inner: A, budget: Option<usize>) -> Self {
        Self {
            inner,
            budget: Cell::new(budget),
            stats: Cell::new(ProxyStats::default()),
        }
    }

    /// Changes the budget. Blocks already handed out are unaffected.
    pub fn set_budget(&self, budget: Option<usize>) {
        self.budget.set(budget);
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ProxyStats {
        self.stats.get()
    }

    /// The wrapped allocator.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn within_budget(&self, live_after: usize) -> bool {
        self.budget.get().is_none_or(|budget| live_after <= budget)
    }

    fn update(&self, f: impl FnOnce(&mut ProxyStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        stats.peak_bytes = stats.peak_bytes.max(stats.live_bytes);
        self.stats.set(stats);
    }
}

// SAFETY: Forwards every successful request to `inner`.
unsafe impl<A: Allocator> Allocator for ProxyAllocator<A> {
    fn alloc(&self, layout: Layout) -> Option<NonNull<u8>> {
        let live_after = self.stats.get().live_bytes.saturating_add(layout.size());
        let block = if self.within_budget(live_after) {
            self.inner.alloc(layout)
        } else {
            log::debug!("proxy: refusing {} bytes over budget", layout.size());
            None
        };

        self.update(|stats| match block {
            Some(_) => {
                stats.allocations += 1;
                stats.live_bytes = live_after;
            }
            None => stats.failures += 1,
        });
        block
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let live_after = (self.stats.get().live_bytes - old_layout.size()).saturating_add(new_size);
        let block = if self.within_budget(live_after) {
            // SAFETY: Caller guarantees `ptr` came from `inner` via this proxy.
            unsafe { self.inner.realloc(ptr, old_layout, new_size) }
        } else {
            None
        };

        self.update(|stats| match block {
            Some(_) => {
                stats.reallocations += 1;
                stats.live_bytes = live_after;
            }
            None => stats.failures += 1,
        });
        block
    }

    unsafe fn free(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Caller guarantees `ptr` came from `inner` via this proxy.
        unsafe { self.inner.free(ptr, layout) };
        self.update(|stats| {
            stats.frees += 1;
            stats.live_bytes -= layout.size();
        });
    }
}
