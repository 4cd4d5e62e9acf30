use core::fmt::Debug;

use crate::error::TableError;
use crate::hash_table::HashTable;
use crate::hash_table::Keys;
use crate::key::CopiedKey;
use crate::memory::Allocator;
use crate::memory::PlatformAllocator;

/// A set of byte strings backed by a [`HashTable`] with unit values.
///
/// Members are copied into memory from the set's allocator on insertion.
///
/// # Examples
///
/// ```rust
/// use rh_hash::ByteSet;
///
/// let mut set = ByteSet::new().unwrap();
/// assert!(set.insert(b"alpha").unwrap());
/// assert!(!set.insert(b"alpha").unwrap());
/// assert!(set.contains(b"alpha"));
/// assert!(set.remove(b"alpha"));
/// assert!(set.is_empty());
/// ```
pub struct ByteSet<A: Allocator = PlatformAllocator> {
    table: HashTable<(), A>,
}

impl<A: Allocator> PartialEq for ByteSet<A> {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|member| other.contains(member))
    }
}

impl<A: Allocator> Eq for ByteSet<A> {}

impl<A: Allocator> Debug for ByteSet<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut set = f.debug_set();
        for member in self.iter() {
            set.entry(&format_args!("\"{}\"", member.escape_ascii()));
        }
        set.finish()
    }
}

impl ByteSet {
    /// Creates an empty set with 16 slots.
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            table: HashTable::new()?,
        })
    }

    /// Creates an empty set with at least `slots` slots.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::ByteSet;
    ///
    /// let set = ByteSet::with_capacity(100).unwrap();
    /// assert!(set.capacity() >= 100);
    /// ```
    pub fn with_capacity(slots: usize) -> Result<Self, TableError> {
        Ok(Self {
            table: HashTable::with_capacity(slots)?,
        })
    }
}

impl<A: Allocator> ByteSet<A> {
    /// Creates an empty set backed by `alloc`.
    pub fn new_in(alloc: A) -> Result<Self, TableError> {
        Ok(Self {
            table: HashTable::new_in(alloc)?,
        })
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Removes every member, keeping the capacity.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Reserves room for `additional` more members.
    pub fn reserve(&mut self, additional: usize) -> Result<(), TableError> {
        self.table.reserve(additional)
    }

    /// Shrinks the set to the smallest capacity holding its members.
    pub fn shrink_to_fit(&mut self) -> Result<(), TableError> {
        self.table.shrink_to_fit()
    }

    /// Adds `member`. Returns whether it was newly inserted.
    pub fn insert<Q: AsRef<[u8]> + ?Sized>(&mut self, member: &Q) -> Result<bool, TableError> {
        Ok(self.table.put(member, ())?.is_none())
    }

    /// Returns `true` if `member` is in the set.
    pub fn contains<Q: AsRef<[u8]> + ?Sized>(&self, member: &Q) -> bool {
        self.table.exists(member)
    }

    /// Removes `member`. Returns whether it was present.
    pub fn remove<Q: AsRef<[u8]> + ?Sized>(&mut self, member: &Q) -> bool {
        self.table.remove(member).is_some()
    }

    /// Calls `visit` on each member until it returns `false`. Returns the
    /// number of members for which it returned `true`.
    pub fn for_each(&self, mut visit: impl FnMut(&[u8]) -> bool) -> usize {
        self.table.for_each(|member, _| visit(member))
    }

    /// Keeps only the members for which `keep` returns `true`. Returns the
    /// number removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&[u8]) -> bool) -> usize {
        self.table.remove_where(|member, _| !keep(member))
    }

    /// Returns an iterator over the members.
    pub fn iter(&self) -> Keys<'_, CopiedKey, ()> {
        self.table.keys()
    }

    /// Returns `true` if every member of `self` is in `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::ByteSet;
    ///
    /// let mut small = ByteSet::new().unwrap();
    /// let mut large = ByteSet::new().unwrap();
    /// small.insert("a").unwrap();
    /// large.insert("a").unwrap();
    /// large.insert("b").unwrap();
    /// assert!(small.is_subset(&large));
    /// assert!(!large.is_subset(&small));
    /// ```
    pub fn is_subset<B: Allocator>(&self, other: &ByteSet<B>) -> bool {
        self.len() <= other.len() && self.iter().all(|member| other.contains(member))
    }

    /// Returns `true` if `self` and `other` share no member.
    pub fn is_disjoint<B: Allocator>(&self, other: &ByteSet<B>) -> bool {
        if self.len() <= other.len() {
            self.iter().all(|member| !other.contains(member))
        } else {
            other.iter().all(|member| !self.contains(member))
        }
    }
}

impl<'a, A: Allocator> IntoIterator for &'a ByteSet<A> {
    type Item = &'a [u8];
    type IntoIter = Keys<'a, CopiedKey, ()>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::vec::Vec;

    use super::*;
    use crate::memory::ProxyAllocator;

    #[test]
    fn test_insert_and_contains() {
        let mut set = ByteSet::new().unwrap();
        assert!(set.insert(b"one").unwrap());
        assert!(set.insert(b"two").unwrap());
        assert!(!set.insert(b"one").unwrap());
        assert_eq!(set.len(), 2);
        assert!(set.contains(b"two"));
        assert!(!set.contains(b"three"));
    }

    #[test]
    fn test_remove() {
        let mut set = ByteSet::new().unwrap();
        set.insert("gone").unwrap();
        assert!(set.remove("gone"));
        assert!(!set.remove("gone"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_many_members() {
        let mut set = ByteSet::with_capacity(1).unwrap();
        for i in 0..500u32 {
            set.insert(&i.to_be_bytes()).unwrap();
        }
        assert_eq!(set.len(), 500);
        assert_eq!(set.retain(|m| m[3] % 2 == 0), 250);
        set.table.check_invariants();
        for i in 0..500u32 {
            assert_eq!(set.contains(&i.to_be_bytes()), i % 2 == 0);
        }
        set.shrink_to_fit().unwrap();
        assert_eq!(set.capacity(), 512);
    }

    #[test]
    fn test_for_each_and_iter() {
        let mut set = ByteSet::new().unwrap();
        for member in ["x", "y", "z"] {
            set.insert(member).unwrap();
        }
        let mut seen: Vec<&[u8]> = set.iter().collect();
        seen.sort();
        assert_eq!(seen, [b"x", b"y", b"z"]);
        assert_eq!(set.for_each(|_| true), 3);
        assert_eq!((&set).into_iter().count(), 3);
    }

    #[test]
    fn test_equality_ignores_order() {
        let mut a = ByteSet::new().unwrap();
        let mut b = ByteSet::with_capacity(128).unwrap();
        for i in 0..20u8 {
            a.insert(&[i]).unwrap();
            b.insert(&[19 - i]).unwrap();
        }
        assert_eq!(a, b);
        b.remove(&[0u8]);
        assert_ne!(a, b);
        assert!(b.is_subset(&a));
        assert!(!a.is_disjoint(&b));
    }

    #[test]
    fn test_clear_releases_members() {
        let proxy = ProxyAllocator::new(PlatformAllocator::new());
        let mut set = ByteSet::new_in(&proxy).unwrap();
        let empty = proxy.stats().live_bytes;
        set.insert("member").unwrap();
        assert_eq!(proxy.stats().live_bytes, empty + 6);
        set.clear();
        assert_eq!(proxy.stats().live_bytes, empty);
    }

    #[test]
    fn test_debug() {
        let mut set = ByteSet::new().unwrap();
        set.insert("a\tb").unwrap();
        assert_eq!(format!("{set:?}"), "{\"a\\tb\"}");
    }
}
