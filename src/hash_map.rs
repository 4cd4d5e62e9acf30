use core::fmt::Debug;
use core::iter::FusedIterator;

use crate::error::TableError;
use crate::flags::TableFlags;
use crate::hash_table;
use crate::hash_table::HashTable;
use crate::hash_table::Values;
use crate::key::CopiedKey;
use crate::memory::Allocator;
use crate::memory::PlatformAllocator;
use crate::value::CallerOwned;
use crate::value::FreeWith;
use crate::value::ValuePolicy;

/// A map from string keys to values, backed by a [`HashTable`].
///
/// Keys are taken as `&str` and, like every string operation on the table,
/// end at the first NUL. Because only string keys go in, iteration hands keys
/// back as `&str`.
///
/// # Examples
///
/// ```rust
/// use rh_hash::StringMap;
///
/// let mut headers = StringMap::case_insensitive().unwrap();
/// headers.insert("Content-Type", "text/html").unwrap();
/// headers.insert("content-type", "text/plain").unwrap();
///
/// assert_eq!(headers.len(), 1);
/// assert_eq!(headers.get("CONTENT-TYPE"), Some(&"text/plain"));
/// assert_eq!(headers.keys().collect::<Vec<_>>(), ["Content-Type"]);
/// ```
pub struct StringMap<V, A: Allocator = PlatformAllocator, P: ValuePolicy<V> = CallerOwned> {
    table: HashTable<V, A, CopiedKey, P>,
}

impl<V, A, P> Debug for StringMap<V, A, P>
where
    V: Debug,
    A: Allocator,
    P: ValuePolicy<V>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V> StringMap<V> {
    /// Creates an empty map with 16 slots.
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            table: HashTable::new()?,
        })
    }

    /// Creates an empty map with at least `slots` slots.
    pub fn with_capacity(slots: usize) -> Result<Self, TableError> {
        Ok(Self {
            table: HashTable::with_capacity(slots)?,
        })
    }

    /// Creates an empty map whose keys compare ASCII case-insensitively.
    pub fn case_insensitive() -> Result<Self, TableError> {
        Ok(Self {
            table: HashTable::builder()
                .flags(TableFlags::IGNORE_CASE)
                .build()?,
        })
    }
}

impl<V, A: Allocator> StringMap<V, A> {
    /// Creates an empty map backed by `alloc`.
    pub fn new_in(alloc: A) -> Result<Self, TableError> {
        Ok(Self {
            table: HashTable::new_in(alloc)?,
        })
    }

    /// Hands every value the map discards to `free`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::StringMap;
    ///
    /// let mut closed = 0;
    /// let mut files = StringMap::new().unwrap().with_free_fn(|_fd: i32| closed += 1);
    /// files.insert("a.txt", 3).unwrap();
    /// files.insert("a.txt", 4).unwrap();
    /// files.clear();
    /// drop(files);
    /// assert_eq!(closed, 2);
    /// ```
    pub fn with_free_fn<F: FnMut(V)>(self, free: F) -> StringMap<V, A, FreeWith<F>> {
        StringMap {
            table: self.table.with_free_fn(free),
        }
    }
}

impl<V, A, P> StringMap<V, A, P>
where
    A: Allocator,
    P: ValuePolicy<V>,
{
    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Inserts `value` under `key`, returning the previous value if the
    /// value policy hands it back.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rh_hash::StringMap;
    ///
    /// let mut map = StringMap::new().unwrap();
    /// assert_eq!(map.insert("k", 1).unwrap(), None);
    /// assert_eq!(map.insert("k", 2).unwrap(), Some(1));
    /// ```
    pub fn insert(&mut self, key: &str, value: V) -> Result<Option<V>, TableError> {
        self.table.put_str(key, value)
    }

    /// Returns a reference to the value under `key`.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.table.get_str(key)
    }

    /// Returns a mutable reference to the value under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.table.get_mut_str(key)
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.table.exists_str(key)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.table.remove_str(key)
    }

    /// Removes every entry. Values go through the value policy.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Returns an iterator over `(key, value)` pairs.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Returns an iterator over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over the values.
    pub fn values(&self) -> Values<'_, CopiedKey, V> {
        self.table.values()
    }

    /// The underlying table.
    pub fn as_table(&self) -> &HashTable<V, A, CopiedKey, P> {
        &self.table
    }
}

/// An iterator over the entries of a [`StringMap`].
pub struct Iter<'a, V> {
    inner: hash_table::Iter<'a, CopiedKey, V>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.inner.next()?;
        // SAFETY: Keys only enter the map as `&str` prefixes ending at a NUL,
        // which is always a char boundary.
        Some((unsafe { core::str::from_utf8_unchecked(key) }, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}
impl<V> FusedIterator for Iter<'_, V> {}

impl<'a, V, A, P> IntoIterator for &'a StringMap<V, A, P>
where
    A: Allocator,
    P: ValuePolicy<V>,
{
    type Item = (&'a str, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut map = StringMap::new().unwrap();
        for i in 0..100 {
            assert_eq!(map.insert(&format!("key{i}"), i).unwrap(), None);
        }
        assert_eq!(map.len(), 100);
        assert_eq!(map.get("key42"), Some(&42));
        *map.get_mut("key42").unwrap() = -1;
        assert_eq!(map.remove("key42"), Some(-1));
        assert!(!map.contains_key("key42"));
        map.as_table().check_invariants();
    }

    #[test]
    fn test_keys_stop_at_nul() {
        let mut map = StringMap::new().unwrap();
        map.insert("head\0tail", 1).unwrap();
        assert!(map.contains_key("head"));
        assert_eq!(map.get_mut("head\0other"), Some(&mut 1));
        assert_eq!(map.keys().collect::<Vec<_>>(), ["head"]);
    }

    #[test]
    fn test_iter_yields_str() {
        let mut map = StringMap::new().unwrap();
        map.insert("ünïcödé", 'u').unwrap();
        map.insert("ascii", 'a').unwrap();
        let mut pairs: Vec<(String, char)> = map.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        pairs.sort();
        assert_eq!(
            pairs,
            [("ascii".to_string(), 'a'), ("ünïcödé".to_string(), 'u')]
        );
        assert_eq!(map.values().count(), 2);
        assert_eq!((&map).into_iter().len(), 2);
    }

    #[test]
    fn test_free_fn_sees_discarded_values() {
        let mut freed = vec![];
        {
            let mut map = StringMap::new().unwrap().with_free_fn(|v: String| freed.push(v));
            map.insert("a", "first".to_string()).unwrap();
            assert_eq!(map.insert("a", "second".to_string()).unwrap(), None);
            assert_eq!(map.remove("a").as_deref(), Some("second"));
            map.insert("b", "third".to_string()).unwrap();
        }
        assert_eq!(freed, ["first", "third"]);
    }

    #[test]
    fn test_debug() {
        let mut map = StringMap::new().unwrap();
        map.insert("k", 1).unwrap();
        assert_eq!(format!("{map:?}"), "{\"k\": 1}");
    }
}
