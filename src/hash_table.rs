//! The Robin Hood hash table engine.
//!
//! See [`HashTable`] for the probing scheme and [`TableBuilder`] for the
//! available configuration.

use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt::Debug;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use crate::error::TableError;
use crate::flags::TableFlags;
use crate::hasher::DEFAULT_HASH_FN;
use crate::hasher::HashFn;
use crate::key::BorrowedKey;
use crate::key::CopiedKey;
use crate::key::folded_hash;
use crate::key::KeyFrom;
use crate::key::StoredKey;
use crate::key::keys_match;
use crate::memory::Allocator;
use crate::memory::PlatformAllocator;
use crate::value::CallerOwned;
use crate::value::FreeWith;
use crate::value::ValuePolicy;

const DEFAULT_CAPACITY: usize = 16;

/// Tag of an empty slot. Hash tags only use the low seven bits, so they never
/// collide with it.
const EMPTY: u8 = 0x80;

/// Tag of an entry selected for removal by `remove_where`. Only present while
/// that call runs.
const DOOMED: u8 = 0xFE;

#[inline(always)]
fn hashtag(hash: u64) -> u8 {
    (hash >> 57) as u8
}

/// Load factor limit of 0.75, checked without floating point.
#[inline(always)]
fn exceeds_load_factor(len: usize, capacity: usize) -> bool {
    len as u128 * 4 > capacity as u128 * 3
}

/// Smallest power-of-two slot count holding `len` entries within the load
/// factor.
fn capacity_for(len: usize) -> Result<usize, TableError> {
    let min_slots = len
        .checked_mul(4)
        .ok_or(TableError::CapacityOverflow)?
        .div_ceil(3);
    min_slots
        .max(1)
        .checked_next_power_of_two()
        .ok_or(TableError::CapacityOverflow)
}

/// Key bytes before the first NUL.
#[inline]
fn until_nul(key: &str) -> &[u8] {
    let bytes = key.as_bytes();
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

struct Bucket<K, V> {
    key: K,
    value: V,
}

#[derive(Debug, Clone, Copy)]
struct DataLayout {
    layout: Layout,
    buckets_offset: usize,
    hashes_offset: usize,
}

impl DataLayout {
    fn new<K, V>(capacity: usize) -> Result<Self, TableError> {
        let tags_layout = Layout::array::<u8>(capacity).map_err(|_| TableError::CapacityOverflow)?;
        let buckets_layout = Layout::array::<MaybeUninit<Bucket<K, V>>>(capacity)
            .map_err(|_| TableError::CapacityOverflow)?;
        let hashes_layout = Layout::array::<MaybeUninit<u64>>(capacity)
            .map_err(|_| TableError::CapacityOverflow)?;

        let (layout, buckets_offset) = tags_layout
            .extend(buckets_layout)
            .map_err(|_| TableError::CapacityOverflow)?;
        let (layout, hashes_offset) = layout
            .extend(hashes_layout)
            .map_err(|_| TableError::CapacityOverflow)?;

        Ok(DataLayout {
            layout,
            buckets_offset,
            hashes_offset,
        })
    }
}

/// Slot arrays of one table generation: `tags`, then `buckets`, then `hashes`,
/// in a single allocation.
struct Storage<K, V> {
    ptr: NonNull<u8>,
    layout: DataLayout,
    mask: usize,
    _phantom: PhantomData<Bucket<K, V>>,
}

impl<K, V> Storage<K, V> {
    fn allocate<A: Allocator>(capacity: usize, alloc: &A) -> Result<Self, TableError> {
        debug_assert!(capacity.is_power_of_two());
        let layout = DataLayout::new::<K, V>(capacity)?;
        let Some(ptr) = alloc.alloc(layout.layout) else {
            log::warn!(
                "failed to allocate {} bytes for {capacity} slots",
                layout.layout.size()
            );
            return Err(TableError::AllocationFailed {
                size: layout.layout.size(),
            });
        };

        // SAFETY: Tags occupy the first `capacity` bytes of the allocation.
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), EMPTY, capacity) };

        Ok(Self {
            ptr,
            layout,
            mask: capacity - 1,
            _phantom: PhantomData,
        })
    }

    /// # Safety
    ///
    /// Every bucket must already have been moved out or dropped, `alloc` must
    /// be the allocator passed to `allocate`, and the storage must not be used
    /// afterwards.
    unsafe fn release<A: Allocator>(&self, alloc: &A) {
        // SAFETY: Forwarded from the caller.
        unsafe { alloc.free(self.ptr, self.layout.layout) }
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline(always)]
    fn probe_distance(&self, index: usize, hash: u64) -> usize {
        index.wrapping_sub(hash as usize) & self.mask
    }

    fn tags_ptr(&self) -> NonNull<[u8]> {
        NonNull::slice_from_raw_parts(self.ptr, self.capacity())
    }

    fn buckets_ptr(&self) -> NonNull<[MaybeUninit<Bucket<K, V>>]> {
        // SAFETY: Allocation is valid and properly sized for the buckets slice
        unsafe {
            NonNull::slice_from_raw_parts(
                self.ptr.add(self.layout.buckets_offset).cast(),
                self.capacity(),
            )
        }
    }

    fn hashes_ptr(&self) -> NonNull<[MaybeUninit<u64>]> {
        // SAFETY: Allocation is valid and properly sized for the hashes slice
        unsafe {
            NonNull::slice_from_raw_parts(
                self.ptr.add(self.layout.hashes_offset).cast(),
                self.capacity(),
            )
        }
    }

    /// # Safety
    ///
    /// `index` must be below capacity.
    #[inline(always)]
    unsafe fn tag(&self, index: usize) -> u8 {
        // SAFETY: Forwarded from the caller.
        unsafe { *self.tags_ptr().as_ref().get_unchecked(index) }
    }

    /// # Safety
    ///
    /// `index` must be below capacity.
    #[inline(always)]
    unsafe fn set_tag(&mut self, index: usize, tag: u8) {
        // SAFETY: Forwarded from the caller.
        unsafe { *self.tags_ptr().as_mut().get_unchecked_mut(index) = tag }
    }

    /// # Safety
    ///
    /// `index` must be below capacity and the slot occupied.
    #[inline(always)]
    unsafe fn hash(&self, index: usize) -> u64 {
        // SAFETY: Forwarded from the caller.
        unsafe { self.hashes_ptr().as_ref().get_unchecked(index).assume_init() }
    }

    /// # Safety
    ///
    /// `index` must be below capacity.
    #[inline(always)]
    unsafe fn set_hash(&mut self, index: usize, hash: u64) {
        // SAFETY: Forwarded from the caller.
        unsafe {
            *self.hashes_ptr().as_mut().get_unchecked_mut(index) = MaybeUninit::new(hash);
        }
    }

    /// # Safety
    ///
    /// `index` must be below capacity and the slot occupied.
    #[inline(always)]
    unsafe fn bucket(&self, index: usize) -> &Bucket<K, V> {
        // SAFETY: Forwarded from the caller.
        unsafe { self.buckets_ptr().as_ref().get_unchecked(index).assume_init_ref() }
    }

    /// # Safety
    ///
    /// `index` must be below capacity and the slot occupied.
    #[inline(always)]
    unsafe fn bucket_mut(&mut self, index: usize) -> &mut Bucket<K, V> {
        // SAFETY: Forwarded from the caller.
        unsafe {
            self.buckets_ptr()
                .as_mut()
                .get_unchecked_mut(index)
                .assume_init_mut()
        }
    }

    /// Fills an empty slot.
    ///
    /// # Safety
    ///
    /// `index` must be below capacity.
    #[inline(always)]
    unsafe fn write(&mut self, index: usize, hash: u64, bucket: Bucket<K, V>) {
        // SAFETY: Forwarded from the caller.
        unsafe {
            self.set_tag(index, hashtag(hash));
            self.set_hash(index, hash);
            self.buckets_ptr()
                .as_mut()
                .get_unchecked_mut(index)
                .write(bucket);
        }
    }

    /// Moves the bucket out of a slot, leaving its tag untouched.
    ///
    /// # Safety
    ///
    /// `index` must be below capacity and the slot occupied. The caller must
    /// mark the slot empty or overwrite it before it is read again.
    #[inline(always)]
    unsafe fn take(&mut self, index: usize) -> Bucket<K, V> {
        // SAFETY: Forwarded from the caller.
        unsafe { self.buckets_ptr().as_ref().get_unchecked(index).assume_init_read() }
    }

    /// Moves the occupant of `from` into `to`, leaving `from` logically
    /// vacated.
    ///
    /// # Safety
    ///
    /// Both indices must be below capacity and distinct, `from` occupied and
    /// `to` vacated.
    #[inline(always)]
    unsafe fn shift(&mut self, from: usize, to: usize) {
        // SAFETY: Forwarded from the caller.
        unsafe {
            let tag = self.tag(from);
            let hash = self.hash(from);
            self.set_tag(to, tag);
            self.set_hash(to, hash);
            let buckets = self.buckets_ptr().as_mut();
            let src = buckets.as_ptr().add(from);
            let dst = buckets.as_mut_ptr().add(to);
            core::ptr::copy_nonoverlapping(src, dst, 1);
        }
    }
}

/// Statistics for inspecting the shape of a table.
///
/// Available in tests and with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of entries in the table
    pub populated: usize,
    /// Number of slots
    pub capacity: usize,
    /// Load factor (populated / capacity)
    pub load_factor: f64,
    /// Largest distance of any entry from its home slot
    pub max_probe_distance: usize,
    /// Mean distance of entries from their home slots
    pub mean_probe_distance: f64,
    /// Bytes of slot storage
    pub total_bytes: usize,
    /// Bytes of slot storage held by empty slots
    pub wasted_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Probe distance: max {}, mean {:.3}",
            self.max_probe_distance, self.mean_probe_distance
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes in empty slots ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}

/// An open-addressing hash table over byte-string keys using Robin Hood
/// probing with backward-shift deletion.
///
/// Every entry sits at or after its *home slot* (`hash & mask`). Insertion
/// keeps entries ordered so that no entry is ever further from home than the
/// entry it displaced, which bounds probe lengths and lets unsuccessful
/// lookups stop early. Removal slides the following displaced entries back
/// by one slot instead of leaving tombstones.
///
/// The table is generic over:
/// - `A`, the [`Allocator`] every byte of table memory comes from,
/// - `K`, the key ownership policy ([`CopiedKey`] or [`BorrowedKey`]),
/// - `P`, the [`ValuePolicy`] applied to values the table discards.
///
/// Plain methods never lock. To share a table between threads, wrap it with
/// [`into_shared`](HashTable::into_shared) and bracket operation sequences
/// with the returned guard.
///
/// ## Memory
///
/// One allocation holds a tag byte, a cached `u64` hash and a `(K, V)` bucket
/// per slot. The table grows to twice its size before an insertion would push
/// the load factor above 0.75, unless growth is frozen by
/// [`TableFlags::FROZEN`] or [`TableFlags::FROZEN_UNTIL_GROWS`].
///
/// ## Example
///
/// ```rust
/// use rh_hash::HashTable;
///
/// let mut table = HashTable::with_capacity(2).unwrap();
/// for i in 1..=5 {
///     let key = format!("key{i}");
///     table.put(&key, format!("value{i}")).unwrap();
/// }
///
/// assert_eq!(table.len(), 5);
/// assert_eq!(table.get("key3").map(String::as_str), Some("value3"));
/// assert!(table.capacity() >= 8);
///
/// assert_eq!(table.remove("key1").as_deref(), Some("value1"));
/// assert_eq!(table.iter().count(), 4);
/// assert!(table.keys().all(|key| key != b"key1"));
/// ```
pub struct HashTable<
    V,
    A: Allocator = PlatformAllocator,
    K: StoredKey = CopiedKey,
    P: ValuePolicy<V> = CallerOwned,
> {
    storage: Storage<K, V>,
    populated: usize,
    flags: TableFlags,
    hash_fn: HashFn,
    policy: P,
    alloc: A,
}

// SAFETY: The table uniquely owns its storage, like a `Vec<(K, V)>`.
unsafe impl<V, A, K, P> Send for HashTable<V, A, K, P>
where
    V: Send,
    A: Allocator + Send,
    K: StoredKey + Send,
    P: ValuePolicy<V> + Send,
{
}

// SAFETY: Shared access never mutates the storage.
unsafe impl<V, A, K, P> Sync for HashTable<V, A, K, P>
where
    V: Sync,
    A: Allocator + Sync,
    K: StoredKey + Sync,
    P: ValuePolicy<V> + Sync,
{
}

/// Unmarks entries still tagged for removal when a callback unwinds out of
/// `remove_marked`, so they stay reachable.
struct DoomedGuard<'a, V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    table: &'a mut HashTable<V, A, K, P>,
    pending: usize,
}

impl<V, A, K, P> Drop for DoomedGuard<'_, V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    fn drop(&mut self) {
        if self.pending == 0 {
            return;
        }

        log::warn!("predicate removal interrupted, keeping {} marked entries", self.pending);
        let storage = &mut self.table.storage;
        // SAFETY: Indices are below capacity and marked slots are occupied.
        unsafe {
            for index in 0..storage.capacity() {
                if storage.tag(index) == DOOMED {
                    let hash = storage.hash(index);
                    storage.set_tag(index, hashtag(hash));
                }
            }
        }
    }
}

impl<V, A, K, P> Debug for HashTable<V, A, K, P>
where
    V: Debug,
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.iter() {
            map.entry(&format_args!("\"{}\"", key.escape_ascii()), value);
        }
        map.finish()
    }
}

impl<V, A, K, P> Drop for HashTable<V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    fn drop(&mut self) {
        self.empty_with(|policy, value| policy.discard(value));
        // SAFETY: Every bucket was moved out above and the storage came from
        // `self.alloc`.
        unsafe { self.storage.release(&self.alloc) };
    }
}

impl<V> HashTable<V> {
    /// Creates a table with 16 slots backed by the global allocator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let table: HashTable<u32> = HashTable::new().unwrap();
    /// assert_eq!(table.capacity(), 16);
    /// assert!(table.is_empty());
    /// ```
    pub fn new() -> Result<Self, TableError> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a table with at least `slots` slots, rounded up to a power of
    /// two.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let table: HashTable<u32> = HashTable::with_capacity(100).unwrap();
    /// assert_eq!(table.capacity(), 128);
    /// ```
    pub fn with_capacity(slots: usize) -> Result<Self, TableError> {
        Self::with_capacity_in(slots, PlatformAllocator::new())
    }

    /// Starts configuring a table.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    /// use rh_hash::TableFlags;
    ///
    /// let name = String::from("Content-Type");
    /// let mut table = HashTable::builder()
    ///     .capacity(4)
    ///     .flags(TableFlags::IGNORE_CASE)
    ///     .borrowed_keys()
    ///     .build()
    ///     .unwrap();
    ///
    /// table.put(&name, "text/plain").unwrap();
    /// assert_eq!(table.get("content-type"), Some(&"text/plain"));
    /// ```
    pub fn builder() -> TableBuilder<V> {
        TableBuilder {
            capacity: DEFAULT_CAPACITY,
            flags: TableFlags::empty(),
            hash_fn: DEFAULT_HASH_FN,
            policy: CallerOwned,
            alloc: PlatformAllocator::new(),
            _phantom: PhantomData,
        }
    }
}

impl<V, A: Allocator> HashTable<V, A> {
    /// Creates a table with 16 slots backed by `alloc`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    /// use rh_hash::memory::ArenaAllocator;
    ///
    /// let arena = ArenaAllocator::new();
    /// let mut table = HashTable::new_in(&arena).unwrap();
    /// table.put(b"answer", 42).unwrap();
    /// assert_eq!(table.get(b"answer"), Some(&42));
    /// ```
    pub fn new_in(alloc: A) -> Result<Self, TableError> {
        Self::with_capacity_in(DEFAULT_CAPACITY, alloc)
    }

    /// Creates a table with at least `slots` slots backed by `alloc`.
    pub fn with_capacity_in(slots: usize, alloc: A) -> Result<Self, TableError> {
        Self::from_parts(slots, TableFlags::empty(), DEFAULT_HASH_FN, CallerOwned, alloc)
    }
}

impl<V, A, K, P> HashTable<V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    fn from_parts(
        slots: usize,
        flags: TableFlags,
        hash_fn: HashFn,
        policy: P,
        alloc: A,
    ) -> Result<Self, TableError> {
        let capacity = slots
            .max(1)
            .checked_next_power_of_two()
            .ok_or(TableError::CapacityOverflow)?;
        let storage = Storage::allocate(capacity, &alloc)?;
        log::trace!("created table with {capacity} slots, flags {flags:?}");

        Ok(Self {
            storage,
            populated: 0,
            flags,
            hash_fn,
            policy,
            alloc,
        })
    }

    /// Returns the number of entries in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Returns the number of slots. Always a power of two.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Returns the allocator backing the table.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Returns the current flags.
    pub fn flags(&self) -> TableFlags {
        self.flags
    }

    /// Sets `flag` in addition to the current flags.
    ///
    /// Turning on [`TableFlags::IGNORE_CASE`] changes how keys hash, so it is
    /// only allowed while the table is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    /// use rh_hash::TableError;
    /// use rh_hash::TableFlags;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// table.set_flag(TableFlags::IGNORE_CASE).unwrap();
    /// table.put("Host", 1).unwrap();
    /// assert!(table.exists("HOST"));
    ///
    /// assert_eq!(
    ///     table.clear_flag(TableFlags::IGNORE_CASE),
    ///     Err(TableError::NotEmpty)
    /// );
    /// ```
    pub fn set_flag(&mut self, flag: TableFlags) -> Result<(), TableError> {
        self.update_flags(self.flags | flag)
    }

    /// Clears `flag`. See [`set_flag`](Self::set_flag) for restrictions.
    pub fn clear_flag(&mut self, flag: TableFlags) -> Result<(), TableError> {
        self.update_flags(self.flags & !flag)
    }

    fn update_flags(&mut self, flags: TableFlags) -> Result<(), TableError> {
        let case_changes = flags.contains(TableFlags::IGNORE_CASE)
            != self.flags.contains(TableFlags::IGNORE_CASE);
        if case_changes && !self.is_empty() {
            return Err(TableError::NotEmpty);
        }
        self.flags = flags;
        Ok(())
    }

    /// Returns the hash function in use.
    pub fn hash_fn(&self) -> HashFn {
        self.hash_fn
    }

    /// Replaces the hash function.
    ///
    /// A non-empty table recomputes every stored hash and rebuilds its slots.
    /// If that fails the table keeps its previous hash function and contents.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// fn fnv1a(bytes: &[u8]) -> u64 {
    ///     bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
    ///         (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    ///     })
    /// }
    ///
    /// let mut table = HashTable::new().unwrap();
    /// table.put(b"alpha", 1).unwrap();
    /// table.set_hash_fn(fnv1a).unwrap();
    /// assert_eq!(table.get(b"alpha"), Some(&1));
    /// ```
    pub fn set_hash_fn(&mut self, hash_fn: HashFn) -> Result<(), TableError> {
        if self.is_empty() {
            self.hash_fn = hash_fn;
            return Ok(());
        }

        let capacity = self.capacity();
        // The fresh storage doubles as scratch space for the new hashes. It is
        // allocated before any slot changes.
        let mut scratch = Storage::allocate(capacity, &self.alloc)?;
        // SAFETY: Indices are below capacity and only occupied slots are read.
        unsafe {
            for index in 0..capacity {
                if self.storage.tag(index) == EMPTY {
                    continue;
                }
                let key = self.storage.bucket(index).key.as_bytes();
                scratch.set_hash(index, self.hash_with(hash_fn, key));
            }

            for index in 0..capacity {
                if self.storage.tag(index) != EMPTY {
                    let hash = scratch.hash(index);
                    self.storage.set_hash(index, hash);
                    self.storage.set_tag(index, hashtag(hash));
                }
            }
        }

        log::debug!("rehashing {} entries with a new hash function", self.populated);
        self.hash_fn = hash_fn;
        self.install(scratch);
        Ok(())
    }

    fn hash_with(&self, hash_fn: HashFn, key: &[u8]) -> u64 {
        if self.flags.contains(TableFlags::IGNORE_CASE) {
            folded_hash(hash_fn, key)
        } else {
            hash_fn(key)
        }
    }

    fn find_index(&self, hash: u64, key: &[u8]) -> Option<usize> {
        let ignore_case = self.flags.contains(TableFlags::IGNORE_CASE);
        let tag = hashtag(hash);
        let mask = self.storage.mask;
        let mut index = hash as usize & mask;

        // SAFETY: Indices are masked to capacity; hashes and buckets are only
        // read for occupied slots.
        unsafe {
            for dist in 0..=mask {
                let slot_tag = self.storage.tag(index);
                if slot_tag == EMPTY {
                    return None;
                }

                let slot_hash = self.storage.hash(index);
                if slot_tag == tag
                    && slot_hash == hash
                    && keys_match(
                        self.storage.bucket(index).key.as_bytes(),
                        key,
                        ignore_case,
                    )
                {
                    return Some(index);
                }

                // Entries past this one are all closer to home than we are
                // from ours, so the key cannot be further along.
                if self.storage.probe_distance(index, slot_hash) < dist {
                    return None;
                }

                index = (index + 1) & mask;
            }
        }

        None
    }

    fn lookup(&self, key: &[u8]) -> Option<usize> {
        let hash = self.hash_with(self.hash_fn, key);
        self.find_index(hash, key)
    }

    /// Returns a reference to the value stored under `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// table.put(b"present", None::<u32>).unwrap();
    ///
    /// // A stored `None` is still a hit.
    /// assert_eq!(table.get(b"present"), Some(&None));
    /// assert_eq!(table.get(b"absent"), None);
    /// ```
    pub fn get<Q: AsRef<[u8]> + ?Sized>(&self, key: &Q) -> Option<&V> {
        let index = self.lookup(key.as_ref())?;
        // SAFETY: `lookup` only returns occupied indices.
        Some(unsafe { &self.storage.bucket(index).value })
    }

    /// Returns a mutable reference to the value stored under `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// table.put(b"hits", 0).unwrap();
    /// *table.get_mut(b"hits").unwrap() += 1;
    /// assert_eq!(table.get(b"hits"), Some(&1));
    /// ```
    pub fn get_mut<Q: AsRef<[u8]> + ?Sized>(&mut self, key: &Q) -> Option<&mut V> {
        let index = self.lookup(key.as_ref())?;
        // SAFETY: `lookup` only returns occupied indices.
        Some(unsafe { &mut self.storage.bucket_mut(index).value })
    }

    /// Returns the stored key bytes and value for `key`.
    ///
    /// On case-insensitive tables the stored key keeps the spelling it was
    /// first inserted with.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    /// use rh_hash::TableFlags;
    ///
    /// let mut table = HashTable::builder()
    ///     .flags(TableFlags::IGNORE_CASE)
    ///     .build()
    ///     .unwrap();
    /// table.put("Accept", 1).unwrap();
    /// assert_eq!(
    ///     table.get_key_value("ACCEPT"),
    ///     Some((&b"Accept"[..], &1))
    /// );
    /// ```
    pub fn get_key_value<Q: AsRef<[u8]> + ?Sized>(&self, key: &Q) -> Option<(&[u8], &V)> {
        let index = self.lookup(key.as_ref())?;
        // SAFETY: `lookup` only returns occupied indices.
        let bucket = unsafe { self.storage.bucket(index) };
        Some((bucket.key.as_bytes(), &bucket.value))
    }

    /// Returns `true` if `key` is present.
    pub fn exists<Q: AsRef<[u8]> + ?Sized>(&self, key: &Q) -> bool {
        self.lookup(key.as_ref()).is_some()
    }

    /// Inserts `value` under `key`.
    ///
    /// If the key is already present its value is replaced and the old value
    /// goes through the table's [`ValuePolicy`]: with [`CallerOwned`] it is
    /// returned, with [`FreeWith`] it is freed and `None` is returned. The
    /// stored key is kept.
    ///
    /// A new key is copied or borrowed according to `K`, then the table grows
    /// if the insertion would push its load factor above 0.75. On error
    /// nothing was inserted and every existing entry is intact.
    ///
    /// # Errors
    ///
    /// - [`TableError::AllocationFailed`] if the key copy or the grown slot
    ///   storage could not be allocated.
    /// - [`TableError::TableFull`] if growth is frozen and no slot is free.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// assert_eq!(table.put(b"k", "v1").unwrap(), None);
    /// assert_eq!(table.put(b"k", "v2").unwrap(), Some("v1"));
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn put<'q, Q>(&mut self, key: &'q Q, value: V) -> Result<Option<V>, TableError>
    where
        Q: AsRef<[u8]> + ?Sized,
        K: KeyFrom<'q>,
    {
        let key = key.as_ref();
        let hash = self.hash_with(self.hash_fn, key);

        if let Some(index) = self.find_index(hash, key) {
            // SAFETY: `find_index` only returns occupied indices.
            let bucket = unsafe { self.storage.bucket_mut(index) };
            let old = core::mem::replace(&mut bucket.value, value);
            return Ok(self.policy.overwritten(old));
        }

        let stored = K::store(key, &self.alloc)?;
        if let Err(err) = self.make_room() {
            // SAFETY: Stored with `self.alloc` just above.
            unsafe { stored.release(&self.alloc) };
            return Err(err);
        }

        // SAFETY: The key is absent and `make_room` guarantees a free slot.
        unsafe {
            self.insert_new(
                hash,
                Bucket {
                    key: stored,
                    value,
                },
            )
        };
        Ok(None)
    }

    /// Ensures a free slot for one more entry, growing if allowed.
    fn make_room(&mut self) -> Result<(), TableError> {
        let capacity = self.capacity();
        if self.flags.growth_suppressed() {
            if self.populated == capacity {
                log::warn!("insert into a frozen table with all {capacity} slots in use");
                return Err(TableError::TableFull { capacity });
            }
            return Ok(());
        }

        if exceeds_load_factor(self.populated + 1, capacity) {
            let grown = capacity
                .checked_mul(2)
                .ok_or(TableError::CapacityOverflow)?;
            self.resize(grown)?;
        }
        Ok(())
    }

    /// Robin Hood insertion: walk from the home slot carrying the new entry,
    /// and whenever the resident is closer to its home than the carried entry
    /// is to its own, leave the carried entry there and carry the resident on.
    ///
    /// # Safety
    ///
    /// The key must be absent and at least one slot must be empty.
    unsafe fn insert_new(&mut self, hash: u64, bucket: Bucket<K, V>) {
        let storage = &mut self.storage;
        let mut carried_hash = hash;
        let mut carried = bucket;
        let mut index = hash as usize & storage.mask;
        let mut dist = 0;

        // SAFETY: Indices are masked to capacity; hashes and buckets are only
        // read for occupied slots. A free slot exists, so the walk ends.
        unsafe {
            loop {
                if storage.tag(index) == EMPTY {
                    storage.write(index, carried_hash, carried);
                    break;
                }

                let resident_hash = storage.hash(index);
                let resident_dist = storage.probe_distance(index, resident_hash);
                if resident_dist < dist {
                    carried = core::mem::replace(storage.bucket_mut(index), carried);
                    storage.set_hash(index, carried_hash);
                    storage.set_tag(index, hashtag(carried_hash));
                    carried_hash = resident_hash;
                    dist = resident_dist;
                }

                index = (index + 1) & storage.mask;
                dist += 1;
                debug_assert!(dist <= storage.mask + 1);
            }
        }

        self.populated += 1;
    }

    /// Removes the entry at `index` and closes the gap by shifting the
    /// following displaced entries back one slot.
    ///
    /// # Safety
    ///
    /// `index` must be below capacity and occupied.
    unsafe fn remove_at(&mut self, index: usize) -> Bucket<K, V> {
        let storage = &mut self.storage;
        let mask = storage.mask;

        // SAFETY: Indices are masked to capacity; each shifted slot is
        // occupied and the gap is vacated before it is written.
        let removed = unsafe {
            let removed = storage.take(index);
            let mut gap = index;
            for _ in 0..mask {
                let next = (gap + 1) & mask;
                if storage.tag(next) == EMPTY {
                    break;
                }
                if storage.probe_distance(next, storage.hash(next)) == 0 {
                    break;
                }
                storage.shift(next, gap);
                gap = next;
            }
            storage.set_tag(gap, EMPTY);
            removed
        };

        self.populated -= 1;
        removed
    }

    /// Removes `key` and returns its value. The value is handed to the
    /// caller under every [`ValuePolicy`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// table.put(b"a", 1).unwrap();
    /// assert_eq!(table.remove(b"a"), Some(1));
    /// assert_eq!(table.remove(b"a"), None);
    /// assert!(table.is_empty());
    /// ```
    pub fn remove<Q: AsRef<[u8]> + ?Sized>(&mut self, key: &Q) -> Option<V> {
        let index = self.lookup(key.as_ref())?;
        // SAFETY: `lookup` only returns occupied indices.
        let Bucket { key, value } = unsafe { self.remove_at(index) };
        // SAFETY: Every stored key came from `self.alloc`.
        unsafe { key.release(&self.alloc) };
        Some(value)
    }

    /// Removes `key` and returns a copy of the stored key bytes with its
    /// value.
    pub fn remove_entry<Q: AsRef<[u8]> + ?Sized>(&mut self, key: &Q) -> Option<(Vec<u8>, V)> {
        let index = self.lookup(key.as_ref())?;
        // SAFETY: `lookup` only returns occupied indices.
        let Bucket { key, value } = unsafe { self.remove_at(index) };
        let bytes = key.as_bytes().to_vec();
        // SAFETY: Every stored key came from `self.alloc`.
        unsafe { key.release(&self.alloc) };
        Some((bytes, value))
    }

    /// Like [`get`](Self::get) for a string key, using only the bytes before
    /// the first NUL.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// table.put_str("name\0ignored", 7).unwrap();
    /// assert_eq!(table.get_str("name"), Some(&7));
    /// assert_eq!(table.get_str("name\0other"), Some(&7));
    /// ```
    pub fn get_str(&self, key: &str) -> Option<&V> {
        self.get(until_nul(key))
    }

    /// Like [`get_mut`](Self::get_mut) for a string key, using only the bytes
    /// before the first NUL.
    pub fn get_mut_str(&mut self, key: &str) -> Option<&mut V> {
        self.get_mut(until_nul(key))
    }

    /// Like [`exists`](Self::exists) for a string key, using only the bytes
    /// before the first NUL.
    pub fn exists_str(&self, key: &str) -> bool {
        self.exists(until_nul(key))
    }

    /// Like [`put`](Self::put) for a string key, using only the bytes before
    /// the first NUL.
    pub fn put_str<'q>(&mut self, key: &'q str, value: V) -> Result<Option<V>, TableError>
    where
        K: KeyFrom<'q>,
    {
        self.put(until_nul(key), value)
    }

    /// Like [`remove`](Self::remove) for a string key, using only the bytes
    /// before the first NUL.
    pub fn remove_str(&mut self, key: &str) -> Option<V> {
        self.remove(until_nul(key))
    }

    fn resize(&mut self, capacity: usize) -> Result<(), TableError> {
        let storage = Storage::allocate(capacity, &self.alloc)?;
        log::debug!(
            "resizing table from {} to {capacity} slots with {} entries",
            self.capacity(),
            self.populated
        );
        self.install(storage);
        Ok(())
    }

    /// Replays every entry into `storage` through Robin Hood insertion and
    /// releases the previous storage.
    fn install(&mut self, storage: Storage<K, V>) {
        debug_assert!(storage.capacity() >= self.populated);
        let mut old = core::mem::replace(&mut self.storage, storage);
        let expected = self.populated;
        self.populated = 0;

        // SAFETY: Only occupied slots of the old storage are moved, each
        // exactly once, and the old storage is released without reading them
        // again. Keys stay valid because moving a bucket never re-stores it.
        unsafe {
            for index in 0..old.capacity() {
                if old.tag(index) != EMPTY {
                    let hash = old.hash(index);
                    let bucket = old.take(index);
                    self.insert_new(hash, bucket);
                }
            }
            old.release(&self.alloc);
        }

        debug_assert_eq!(self.populated, expected);
    }

    /// Rebuilds the slots at the current capacity.
    ///
    /// Lookups stay correct without this; it only repacks entries.
    pub fn rehash(&mut self) -> Result<(), TableError> {
        self.resize(self.capacity())
    }

    /// Grows the table so `additional` more entries fit within the load
    /// factor.
    ///
    /// Growing clears [`TableFlags::FROZEN_UNTIL_GROWS`]. A table that is
    /// already large enough is left as is.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    /// use rh_hash::TableFlags;
    ///
    /// let mut table = HashTable::builder()
    ///     .capacity(4)
    ///     .flags(TableFlags::FROZEN_UNTIL_GROWS)
    ///     .build()
    ///     .unwrap();
    /// table.reserve(100).unwrap();
    /// assert_eq!(table.capacity(), 256);
    /// assert!(!table.flags().contains(TableFlags::FROZEN_UNTIL_GROWS));
    /// # table.put(b"k", ()).unwrap();
    /// ```
    pub fn reserve(&mut self, additional: usize) -> Result<(), TableError> {
        let needed = self
            .populated
            .checked_add(additional)
            .ok_or(TableError::CapacityOverflow)?;
        let capacity = capacity_for(needed)?;
        if capacity > self.capacity() {
            self.resize(capacity)?;
            self.flags = self.flags & !TableFlags::FROZEN_UNTIL_GROWS;
        }
        Ok(())
    }

    /// Shrinks the table to the smallest capacity that holds its entries
    /// within the load factor.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::with_capacity(1024).unwrap();
    /// table.put(b"a", 1).unwrap();
    /// table.put(b"b", 2).unwrap();
    /// table.shrink_to_fit().unwrap();
    /// assert_eq!(table.capacity(), 4);
    /// assert_eq!(table.get(b"b"), Some(&2));
    /// ```
    pub fn shrink_to_fit(&mut self) -> Result<(), TableError> {
        let capacity = capacity_for(self.populated)?;
        if capacity < self.capacity() {
            self.resize(capacity)?;
        }
        Ok(())
    }

    /// Empties every slot, handing each value to `dispose`. Keys are released.
    fn empty_with(&mut self, mut dispose: impl FnMut(&mut P, V)) {
        if self.populated == 0 {
            return;
        }

        // SAFETY: Each occupied slot is marked empty before its bucket is
        // moved out, so a panicking `dispose` cannot cause a double drop.
        unsafe {
            for index in 0..self.storage.capacity() {
                if self.storage.tag(index) != EMPTY {
                    self.storage.set_tag(index, EMPTY);
                    self.populated -= 1;
                    let Bucket { key, value } = self.storage.take(index);
                    key.release(&self.alloc);
                    dispose(&mut self.policy, value);
                }
            }
        }
    }

    /// Removes every entry, keeping the capacity. Values go through the
    /// table's [`ValuePolicy`].
    pub fn clear(&mut self) {
        self.empty_with(|policy, value| policy.discard(value));
    }

    /// Consumes the table. Values go through the table's [`ValuePolicy`].
    pub fn destroy(self) {
        drop(self);
    }

    /// Consumes the table, handing every value to `free` instead of the
    /// table's [`ValuePolicy`].
    pub fn destroy_with(mut self, mut free: impl FnMut(V)) {
        self.empty_with(|_, value| free(value));
    }

    /// Switches the table to a [`FreeWith`] value policy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut freed = Vec::new();
    /// let mut table = HashTable::new().unwrap().with_free_fn(|v| freed.push(v));
    /// table.put(b"a", 1).unwrap();
    /// table.put(b"a", 2).unwrap();
    /// drop(table);
    /// assert_eq!(freed, [1, 2]);
    /// ```
    pub fn with_free_fn<F: FnMut(V)>(self, free: F) -> HashTable<V, A, K, FreeWith<F>> {
        let this = ManuallyDrop::new(self);
        // SAFETY: Each field is read exactly once and `this` is never dropped,
        // so ownership moves to the new table.
        unsafe {
            drop(core::ptr::read(&this.policy));
            HashTable {
                storage: core::ptr::read(&this.storage),
                populated: this.populated,
                flags: this.flags,
                hash_fn: this.hash_fn,
                policy: FreeWith(free),
                alloc: core::ptr::read(&this.alloc),
            }
        }
    }

    /// Calls `visit` on every entry in storage order until it returns
    /// `false`. Returns the number of entries for which it returned `true`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// for i in 0..10u32 {
    ///     table.put(&i.to_le_bytes(), i).unwrap();
    /// }
    ///
    /// let mut sum = 0;
    /// assert_eq!(table.for_each(|_, v| { sum += v; true }), 10);
    /// assert_eq!(sum, 45);
    /// assert_eq!(table.for_each(|_, _| false), 0);
    /// ```
    pub fn for_each(&self, mut visit: impl FnMut(&[u8], &V) -> bool) -> usize {
        let mut visited = 0;
        for (key, value) in self.iter() {
            if !visit(key, value) {
                break;
            }
            visited += 1;
        }
        visited
    }

    /// Removes every entry for which `predicate` returns `true` and returns
    /// how many were removed. Removed values go through the table's
    /// [`ValuePolicy`].
    ///
    /// `predicate` runs exactly once per entry.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// for i in 0..100u32 {
    ///     table.put(&i.to_le_bytes(), i).unwrap();
    /// }
    /// assert_eq!(table.remove_where(|_, v| v % 2 == 0), 50);
    /// assert_eq!(table.get(&7u32.to_le_bytes()), Some(&7));
    /// assert_eq!(table.get(&8u32.to_le_bytes()), None);
    /// ```
    pub fn remove_where(&mut self, predicate: impl FnMut(&[u8], &V) -> bool) -> usize {
        self.remove_marked(predicate, |policy, value| policy.discard(value))
    }

    /// Like [`remove_where`](Self::remove_where), handing removed values to
    /// `free` instead of the table's [`ValuePolicy`].
    pub fn remove_where_with(
        &mut self,
        predicate: impl FnMut(&[u8], &V) -> bool,
        mut free: impl FnMut(V),
    ) -> usize {
        self.remove_marked(predicate, |_, value| free(value))
    }

    fn remove_marked(
        &mut self,
        mut predicate: impl FnMut(&[u8], &V) -> bool,
        mut dispose: impl FnMut(&mut P, V),
    ) -> usize {
        let capacity = self.storage.capacity();
        let mut guard = DoomedGuard {
            table: self,
            pending: 0,
        };

        // SAFETY: Indices are below capacity and only occupied slots are read.
        unsafe {
            for index in 0..capacity {
                if guard.table.storage.tag(index) == EMPTY {
                    continue;
                }
                let matched = {
                    let bucket = guard.table.storage.bucket(index);
                    predicate(bucket.key.as_bytes(), &bucket.value)
                };
                if matched {
                    guard.table.storage.set_tag(index, DOOMED);
                    guard.pending += 1;
                }
            }

            // Backward shifts only move entries into lower slots of the
            // unscanned range, or wrap survivors from the front to the back,
            // so one forward pass that revisits each freed slot sees every
            // marked entry.
            let doomed = guard.pending;
            let mut index = 0;
            while guard.pending > 0 && index < capacity {
                if guard.table.storage.tag(index) == DOOMED {
                    let Bucket { key, value } = guard.table.remove_at(index);
                    guard.pending -= 1;
                    key.release(&guard.table.alloc);
                    dispose(&mut guard.table.policy, value);
                } else {
                    index += 1;
                }
            }
            debug_assert_eq!(guard.pending, 0);

            if doomed > 0 {
                log::trace!("removed {doomed} entries by predicate");
            }
            doomed
        }
    }

    /// Returns an iterator over `(key, value)` pairs in storage order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// table.put(b"a", 1).unwrap();
    /// table.put(b"b", 2).unwrap();
    ///
    /// let mut pairs: Vec<_> = table.iter().collect();
    /// pairs.sort();
    /// assert_eq!(pairs, [(&b"a"[..], &1), (&b"b"[..], &2)]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        // SAFETY: The slices borrow `self`, so the storage outlives them.
        unsafe {
            Iter {
                tags: self.storage.tags_ptr().as_ref(),
                buckets: self.storage.buckets_ptr().as_ref(),
                index: 0,
                remaining: self.populated,
            }
        }
    }

    /// Returns an iterator over keys with mutable references to values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        // SAFETY: Tags and buckets are disjoint regions; the iterator borrows
        // `self` mutably for its lifetime.
        unsafe {
            IterMut {
                tags: self.storage.tags_ptr().as_ref(),
                buckets: self.storage.buckets_ptr().cast(),
                index: 0,
                remaining: self.populated,
                _phantom: PhantomData,
            }
        }
    }

    /// Returns an iterator over the stored keys.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over the values.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Removes every entry, yielding the values. Values not yet yielded when
    /// the iterator is dropped go through the table's [`ValuePolicy`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::HashTable;
    ///
    /// let mut table = HashTable::new().unwrap();
    /// table.put(b"a", 1).unwrap();
    /// table.put(b"b", 2).unwrap();
    ///
    /// let mut values: Vec<_> = table.drain().collect();
    /// values.sort();
    /// assert_eq!(values, [1, 2]);
    /// assert!(table.is_empty());
    /// ```
    pub fn drain(&mut self) -> Drain<'_, V, A, K, P> {
        Drain {
            table: self,
            index: 0,
        }
    }

    /// Returns a histogram of probe distances: entry `d` counts the entries
    /// sitting `d` slots past their home slot.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> Vec<usize> {
        let mut hist = Vec::new();

        // SAFETY: Indices are below capacity and only occupied slots are read.
        unsafe {
            for index in 0..self.capacity() {
                if self.storage.tag(index) == EMPTY {
                    continue;
                }
                let dist = self
                    .storage
                    .probe_distance(index, self.storage.hash(index));
                if hist.len() <= dist {
                    hist.resize(dist + 1, 0);
                }
                hist[dist] += 1;
            }
        }

        hist
    }

    /// Returns the largest probe distance of any entry.
    #[cfg(any(test, feature = "stats"))]
    pub fn max_probe_distance(&self) -> usize {
        self.probe_histogram().len().saturating_sub(1)
    }

    /// Returns detailed utilization statistics for debugging.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let hist = self.probe_histogram();
        let total_distance: usize = hist.iter().enumerate().map(|(d, n)| d * n).sum();
        let capacity = self.capacity();
        let slot_bytes = 1 + core::mem::size_of::<Bucket<K, V>>() + core::mem::size_of::<u64>();

        DebugStats {
            populated: self.populated,
            capacity,
            load_factor: self.populated as f64 / capacity as f64,
            max_probe_distance: hist.len().saturating_sub(1),
            mean_probe_distance: if self.populated == 0 {
                0.0
            } else {
                total_distance as f64 / self.populated as f64
            },
            total_bytes: self.storage.layout.layout.size(),
            wasted_bytes: (capacity - self.populated) * slot_bytes,
        }
    }

    /// Panics unless every structural invariant holds.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let capacity = self.capacity();
        assert!(capacity.is_power_of_two());
        if !self.flags.growth_suppressed() {
            assert!(
                !exceeds_load_factor(self.populated, capacity),
                "load factor above 0.75: {}/{capacity}",
                self.populated
            );
        }

        let mut occupied = 0;
        // SAFETY: Indices are masked to capacity and only occupied slots are
        // read.
        unsafe {
            for index in 0..capacity {
                let tag = self.storage.tag(index);
                if tag == EMPTY {
                    continue;
                }
                assert_ne!(tag, DOOMED);
                occupied += 1;

                let hash = self.storage.hash(index);
                assert_eq!(tag, hashtag(hash));
                let dist = self.storage.probe_distance(index, hash);

                // Scanning forward, distances grow by at most one per slot.
                let next = (index + 1) & self.storage.mask;
                if self.storage.tag(next) != EMPTY {
                    let next_dist = self.storage.probe_distance(next, self.storage.hash(next));
                    assert!(
                        next_dist <= dist + 1,
                        "slot {next} at distance {next_dist} follows distance {dist}"
                    );
                }

                let key = self.storage.bucket(index).key.as_bytes();
                assert_eq!(self.find_index(hash, key), Some(index));
            }
        }
        assert_eq!(occupied, self.populated);
    }
}

/// Configures and builds a [`HashTable`].
///
/// Created by [`HashTable::builder`]. The allocator, key policy and value
/// policy are chosen here and fixed in the built table's type.
pub struct TableBuilder<V, A = PlatformAllocator, K = CopiedKey, P = CallerOwned> {
    capacity: usize,
    flags: TableFlags,
    hash_fn: HashFn,
    policy: P,
    alloc: A,
    _phantom: PhantomData<fn(K) -> V>,
}

impl<V, A, K, P> TableBuilder<V, A, K, P> {
    /// Initial slot count, rounded up to a power of two. Defaults to 16.
    pub fn capacity(mut self, slots: usize) -> Self {
        self.capacity = slots;
        self
    }

    /// Initial flags.
    pub fn flags(mut self, flags: TableFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Hash function. Defaults to [`xxhash64`](crate::hasher::xxhash64).
    pub fn hash_fn(mut self, hash_fn: HashFn) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    /// Allocator for all table memory.
    pub fn allocator<B: Allocator>(self, alloc: B) -> TableBuilder<V, B, K, P> {
        TableBuilder {
            capacity: self.capacity,
            flags: self.flags,
            hash_fn: self.hash_fn,
            policy: self.policy,
            alloc,
            _phantom: PhantomData,
        }
    }

    /// Store keys by borrowing the caller's bytes instead of copying them.
    pub fn borrowed_keys<'k>(self) -> TableBuilder<V, A, BorrowedKey<'k>, P> {
        TableBuilder {
            capacity: self.capacity,
            flags: self.flags,
            hash_fn: self.hash_fn,
            policy: self.policy,
            alloc: self.alloc,
            _phantom: PhantomData,
        }
    }

    /// Hand every value the table discards to `free`.
    pub fn free_values<F: FnMut(V)>(self, free: F) -> TableBuilder<V, A, K, FreeWith<F>> {
        self.value_policy(FreeWith(free))
    }

    /// Use `policy` for values the table discards.
    pub fn value_policy<Q: ValuePolicy<V>>(self, policy: Q) -> TableBuilder<V, A, K, Q> {
        TableBuilder {
            capacity: self.capacity,
            flags: self.flags,
            hash_fn: self.hash_fn,
            policy,
            alloc: self.alloc,
            _phantom: PhantomData,
        }
    }
}

impl<V, A, K, P> TableBuilder<V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    /// Allocates the table.
    pub fn build(self) -> Result<HashTable<V, A, K, P>, TableError> {
        HashTable::from_parts(
            self.capacity,
            self.flags,
            self.hash_fn,
            self.policy,
            self.alloc,
        )
    }
}

/// An iterator over the entries of a [`HashTable`].
///
/// Created by [`HashTable::iter`]. Each iterator owns its own cursor, so any
/// number of iterations over any number of tables may be interleaved.
pub struct Iter<'a, K, V> {
    tags: &'a [u8],
    buckets: &'a [MaybeUninit<Bucket<K, V>>],
    index: usize,
    remaining: usize,
}

impl<'a, K: StoredKey, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && self.index < self.tags.len() {
            let index = self.index;
            self.index += 1;
            if self.tags[index] != EMPTY {
                self.remaining -= 1;
                // SAFETY: Occupied slots hold initialized buckets.
                let bucket = unsafe { self.buckets[index].assume_init_ref() };
                return Some((bucket.key.as_bytes(), &bucket.value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: StoredKey, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K: StoredKey, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            tags: self.tags,
            buckets: self.buckets,
            index: self.index,
            remaining: self.remaining,
        }
    }
}

impl<'a, V, A, K, P> IntoIterator for &'a HashTable<V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    type Item = (&'a [u8], &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// An iterator over keys and mutable values of a [`HashTable`].
///
/// Created by [`HashTable::iter_mut`].
pub struct IterMut<'a, K, V> {
    tags: &'a [u8],
    buckets: NonNull<MaybeUninit<Bucket<K, V>>>,
    index: usize,
    remaining: usize,
    _phantom: PhantomData<&'a mut Bucket<K, V>>,
}

impl<'a, K: StoredKey, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a [u8], &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 && self.index < self.tags.len() {
            let index = self.index;
            self.index += 1;
            if self.tags[index] != EMPTY {
                self.remaining -= 1;
                // SAFETY: Occupied slots hold initialized buckets, and each
                // index is yielded at most once.
                let bucket: &'a mut Bucket<K, V> =
                    unsafe { (*self.buckets.as_ptr().add(index)).assume_init_mut() };
                return Some((bucket.key.as_bytes(), &mut bucket.value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: StoredKey, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K: StoredKey, V> FusedIterator for IterMut<'_, K, V> {}

/// An iterator over the keys of a [`HashTable`].
///
/// Created by [`HashTable::keys`].
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K: StoredKey, V> Iterator for Keys<'a, K, V> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: StoredKey, V> ExactSizeIterator for Keys<'_, K, V> {}

/// An iterator over the values of a [`HashTable`].
///
/// Created by [`HashTable::values`].
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K: StoredKey, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: StoredKey, V> ExactSizeIterator for Values<'_, K, V> {}

/// A draining iterator over the values of a [`HashTable`].
///
/// Created by [`HashTable::drain`].
pub struct Drain<'a, V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    table: &'a mut HashTable<V, A, K, P>,
    index: usize,
}

impl<V, A, K, P> Iterator for Drain<'_, V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let table = &mut *self.table;
        while table.populated > 0 && self.index < table.capacity() {
            let index = self.index;
            self.index += 1;
            // SAFETY: `index` is below capacity; the slot is marked empty
            // before its bucket is moved out.
            unsafe {
                if table.storage.tag(index) != EMPTY {
                    table.storage.set_tag(index, EMPTY);
                    table.populated -= 1;
                    let Bucket { key, value } = table.storage.take(index);
                    key.release(&table.alloc);
                    return Some(value);
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.table.populated, Some(self.table.populated))
    }
}

impl<V, A, K, P> Drop for Drain<'_, V, A, K, P>
where
    A: Allocator,
    K: StoredKey,
    P: ValuePolicy<V>,
{
    fn drop(&mut self) {
        self.table.clear();
    }
}
