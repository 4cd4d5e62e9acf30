//! Optional locking around a table.
//!
//! Table methods themselves never lock. A [`SharedTable`] owns a raw mutex
//! next to the table and only hands out access through a [`TableGuard`], so
//! a sequence of operations bracketed by one guard is atomic with respect to
//! every other thread going through the same `SharedTable`.

use core::cell::UnsafeCell;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ops::DerefMut;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;

use lock_api::GuardSend;
use lock_api::RawMutex;

use crate::flags::TableFlags;
use crate::hash_table::HashTable;
use crate::key::StoredKey;
use crate::memory::Allocator;
use crate::value::ValuePolicy;

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        /// Raw mutex used when none is named: `parking_lot`'s.
        pub type DefaultRawMutex = parking_lot::RawMutex;
    } else {
        /// Raw mutex used when none is named: a spin lock.
        pub type DefaultRawMutex = SpinRawMutex;
    }
}

/// A minimal spin lock, for targets without an OS mutex.
pub struct SpinRawMutex(AtomicBool);

// SAFETY: The flag is only set by a successful compare-exchange and cleared by
// the holder, so at most one party holds the lock.
unsafe impl RawMutex for SpinRawMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: SpinRawMutex = SpinRawMutex(AtomicBool::new(false));

    type GuardMarker = GuardSend;

    fn lock(&self) {
        while !self.try_lock() {
            core::hint::spin_loop();
        }
    }

    fn try_lock(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A table paired with an optional raw mutex.
///
/// Tables created with [`TableFlags::NO_LOCKING`] get no mutex: every
/// [`lock`](Self::lock) returns `None` and the table is only reachable through
/// [`get_mut`](Self::get_mut) or [`into_inner`](Self::into_inner).
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
///
/// use rh_hash::HashTable;
///
/// let shared = Arc::new(HashTable::new().unwrap().into_shared());
/// let workers: Vec<_> = (0..4u8)
///     .map(|t| {
///         let shared = Arc::clone(&shared);
///         thread::spawn(move || {
///             for i in 0..100u8 {
///                 let mut table = shared.lock().unwrap();
///                 table.put(&[t, i], u32::from(i)).unwrap();
///             }
///         })
///     })
///     .collect();
/// for worker in workers {
///     worker.join().unwrap();
/// }
///
/// assert_eq!(shared.lock().unwrap().len(), 400);
/// ```
pub struct SharedTable<T, R: RawMutex = DefaultRawMutex> {
    lock: Option<R>,
    table: UnsafeCell<T>,
}

// SAFETY: Shared access to the table only happens through a guard holding the
// mutex. Without a mutex, `&SharedTable` gives no access to the table at all.
unsafe impl<T: Send, R: RawMutex + Sync> Sync for SharedTable<T, R> {}

impl<T, R: RawMutex> SharedTable<T, R> {
    /// Wraps `table`, with a mutex if `locking` is set.
    pub fn new(table: T, locking: bool) -> Self {
        Self {
            lock: locking.then_some(R::INIT),
            table: UnsafeCell::new(table),
        }
    }

    /// Whether this table has a mutex.
    pub fn has_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Blocks until the mutex is acquired.
    ///
    /// Returns `None` if the table has no mutex.
    pub fn lock(&self) -> Option<TableGuard<'_, T, R>> {
        let lock = self.lock.as_ref()?;
        lock.lock();
        Some(TableGuard {
            lock,
            table: &self.table,
            _phantom: PhantomData,
        })
    }

    /// Acquires the mutex if it is free.
    ///
    /// Returns `None` if the table has no mutex or another guard holds it.
    pub fn try_lock(&self) -> Option<TableGuard<'_, T, R>> {
        let lock = self.lock.as_ref()?;
        if !lock.try_lock() {
            log::trace!("table lock is busy");
            return None;
        }
        Some(TableGuard {
            lock,
            table: &self.table,
            _phantom: PhantomData,
        })
    }

    /// Whether a guard currently holds the mutex. Always `false` without one.
    pub fn is_locked(&self) -> bool {
        self.lock.as_ref().is_some_and(RawMutex::is_locked)
    }

    /// Direct access when the caller holds the only reference.
    pub fn get_mut(&mut self) -> &mut T {
        self.table.get_mut()
    }

    /// Unwraps the table.
    pub fn into_inner(self) -> T {
        self.table.into_inner()
    }
}

impl<T: Debug, R: RawMutex> Debug for SharedTable<T, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut d = f.debug_struct("SharedTable");
        d.field("has_lock", &self.has_lock());
        match self.try_lock() {
            Some(guard) => d.field("table", &&*guard),
            None => d.field("table", &format_args!("<locked>")),
        };
        d.finish()
    }
}

/// Exclusive access to a [`SharedTable`]'s table. Unlocks on drop.
#[must_use = "the table is unlocked as soon as the guard is dropped"]
pub struct TableGuard<'a, T, R: RawMutex> {
    lock: &'a R,
    table: &'a UnsafeCell<T>,
    _phantom: PhantomData<(&'a mut T, R::GuardMarker)>,
}

impl<T, R: RawMutex> TableGuard<'_, T, R> {
    /// Releases the mutex.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T, R: RawMutex> Deref for TableGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard holds the mutex.
        unsafe { &*self.table.get() }
    }
}

impl<T, R: RawMutex> DerefMut for TableGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The guard holds the mutex and is borrowed mutably.
        unsafe { &mut *self.table.get() }
    }
}

impl<T, R: RawMutex> Drop for TableGuard<'_, T, R> {
    fn drop(&mut self) {
        // SAFETY: The guard acquired the mutex and releases it exactly once.
        unsafe { self.lock.unlock() };
    }
}

impl<V, A, K, P> HashTable<V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    /// Moves the table behind the default raw mutex, or behind none if
    /// [`TableFlags::NO_LOCKING`] is set.
    pub fn into_shared(self) -> SharedTable<Self> {
        self.into_shared_with()
    }

    /// Moves the table behind a raw mutex of type `R`, or behind none if
    /// [`TableFlags::NO_LOCKING`] is set.
    pub fn into_shared_with<R: RawMutex>(self) -> SharedTable<Self, R> {
        let locking = !self.flags().contains(TableFlags::NO_LOCKING);
        SharedTable::new(self, locking)
    }
}
