//! Value disposal policies.
//!
//! Explicit removal always hands the value back to the caller. The policy
//! decides what happens to values the table lets go of on its own: the old
//! value on overwrite, values dropped by
//! [`remove_where`](crate::HashTable::remove_where), and values still present
//! when the table is cleared or dropped.

/// Disposal policy for values the table discards.
pub trait ValuePolicy<V> {
    /// Called with the previous value when `put` overwrites an entry. The
    /// returned value, if any, is handed back to the caller of `put`.
    fn overwritten(&mut self, old: V) -> Option<V>;

    /// Called with every value the table discards without returning it.
    fn discard(&mut self, value: V);
}

/// Values belong to the caller: overwritten values are returned from `put`,
/// discarded values are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerOwned;

impl<V> ValuePolicy<V> for CallerOwned {
    #[inline]
    fn overwritten(&mut self, old: V) -> Option<V> {
        Some(old)
    }

    #[inline]
    fn discard(&mut self, value: V) {
        drop(value);
    }
}

/// Values are handed to a free function whenever the table discards them,
/// including the old value on overwrite.
///
/// # Examples
///
/// ```rust
/// use std::cell::Cell;
///
/// use rh_hash::HashTable;
///
/// let freed = Cell::new(0);
/// let mut table = HashTable::builder()
///     .free_values(|_: u32| freed.set(freed.get() + 1))
///     .build()
///     .unwrap();
///
/// table.put(b"key", 1).unwrap();
/// assert_eq!(table.put(b"key", 2).unwrap(), None);
/// assert_eq!(freed.get(), 1);
///
/// drop(table);
/// assert_eq!(freed.get(), 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FreeWith<F>(pub F);

impl<V, F: FnMut(V)> ValuePolicy<V> for FreeWith<F> {
    #[inline]
    fn overwritten(&mut self, old: V) -> Option<V> {
        (self.0)(old);
        None
    }

    #[inline]
    fn discard(&mut self, value: V) {
        (self.0)(value)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    #[test]
    fn caller_owned_returns_overwritten() {
        let mut policy = CallerOwned;
        assert_eq!(ValuePolicy::<u8>::overwritten(&mut policy, 7), Some(7));
    }

    #[test]
    fn free_with_consumes() {
        let mut freed = Vec::new();
        let mut policy = FreeWith(|v: u8| freed.push(v));
        assert_eq!(policy.overwritten(1), None);
        policy.discard(2);
        drop(policy);
        assert_eq!(freed, [1, 2]);
    }
}
