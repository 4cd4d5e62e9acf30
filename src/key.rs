//! Key ownership policies.
//!
//! A table's key type decides who owns the key bytes. [`CopiedKey`] copies
//! every inserted key into memory from the table's allocator and releases it
//! when the entry leaves the table. [`BorrowedKey`] stores the caller's slice
//! as-is; the borrow checker keeps the caller's buffer alive for as long as
//! the table.

use core::alloc::Layout;
use core::fmt::Debug;
use core::ptr::NonNull;

use crate::error::TableError;
use crate::hasher::HashFn;
use crate::memory::Allocator;

/// Key bytes held by an occupied slot.
pub trait StoredKey {
    /// The key bytes, exactly as inserted.
    fn as_bytes(&self) -> &[u8];

    /// Releases whatever memory the key holds.
    ///
    /// # Safety
    ///
    /// `alloc` must be the allocator the key was stored with.
    unsafe fn release<A: Allocator>(self, alloc: &A);
}

/// Key types that can be stored from a caller slice living for `'q`.
pub trait KeyFrom<'q>: StoredKey + Sized {
    /// Turns the caller's bytes into a stored key, allocating from `alloc` if
    /// the policy owns its bytes.
    fn store<A: Allocator>(key: &'q [u8], alloc: &A) -> Result<Self, TableError>;
}

/// A key copied into table-owned memory.
pub struct CopiedKey {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: `CopiedKey` uniquely owns its bytes, like a `Box<[u8]>`.
unsafe impl Send for CopiedKey {}
// SAFETY: Shared access only ever reads the bytes.
unsafe impl Sync for CopiedKey {}

impl StoredKey for CopiedKey {
    #[inline]
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` initialized bytes, or dangling with
        // `len == 0`.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    unsafe fn release<A: Allocator>(self, alloc: &A) {
        if self.len != 0 {
            // SAFETY: Allocated in `store` from `alloc` with this layout.
            unsafe {
                alloc.free(
                    self.ptr,
                    Layout::from_size_align_unchecked(self.len, 1),
                )
            }
        }
    }
}

impl<'q> KeyFrom<'q> for CopiedKey {
    fn store<A: Allocator>(key: &'q [u8], alloc: &A) -> Result<Self, TableError> {
        if key.is_empty() {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len: 0,
            });
        }

        let layout = Layout::array::<u8>(key.len()).map_err(|_| TableError::CapacityOverflow)?;
        let ptr = alloc
            .alloc(layout)
            .ok_or(TableError::AllocationFailed { size: key.len() })?;
        // SAFETY: `ptr` was just allocated for `key.len()` bytes.
        unsafe { core::ptr::copy_nonoverlapping(key.as_ptr(), ptr.as_ptr(), key.len()) };
        Ok(Self {
            ptr,
            len: key.len(),
        })
    }
}

impl Debug for CopiedKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "\"{}\"", self.as_bytes().escape_ascii())
    }
}

/// A key borrowed from the caller for the lifetime of the table.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BorrowedKey<'k>(&'k [u8]);

impl StoredKey for BorrowedKey<'_> {
    #[inline]
    fn as_bytes(&self) -> &[u8] {
        self.0
    }

    #[inline]
    unsafe fn release<A: Allocator>(self, _alloc: &A) {}
}

impl<'k> KeyFrom<'k> for BorrowedKey<'k> {
    #[inline]
    fn store<A: Allocator>(key: &'k [u8], _alloc: &A) -> Result<Self, TableError> {
        Ok(Self(key))
    }
}

impl Debug for BorrowedKey<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "\"{}\"", self.0.escape_ascii())
    }
}

/// Compares a stored key against a probe key.
#[inline]
pub(crate) fn keys_match(stored: &[u8], probe: &[u8], ignore_case: bool) -> bool {
    if ignore_case {
        stored.eq_ignore_ascii_case(probe)
    } else {
        stored == probe
    }
}

const FOLD_CHUNK: usize = 64;
const DIGEST: usize = size_of::<u64>();

/// Hashes the ASCII-lowercased form of `key` without allocating.
///
/// Keys up to 64 bytes are folded into a stack buffer and hashed in one go.
/// Longer keys are folded 56 bytes at a time, and each chunk is hashed
/// together with the digest of everything before it.
pub(crate) fn folded_hash(hash_fn: HashFn, key: &[u8]) -> u64 {
    let mut buf = [0u8; FOLD_CHUNK];
    if key.len() <= FOLD_CHUNK {
        let folded = &mut buf[..key.len()];
        folded.copy_from_slice(key);
        folded.make_ascii_lowercase();
        return hash_fn(folded);
    }

    let mut digest = key.len() as u64;
    for chunk in key.chunks(FOLD_CHUNK - DIGEST) {
        let end = DIGEST + chunk.len();
        buf[..DIGEST].copy_from_slice(&digest.to_le_bytes());
        buf[DIGEST..end].copy_from_slice(chunk);
        buf[DIGEST..end].make_ascii_lowercase();
        digest = hash_fn(&buf[..end]);
    }
    digest
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::hasher::xxhash64;
    use crate::memory::PlatformAllocator;
    use crate::memory::ProxyAllocator;

    #[test]
    fn copied_key_owns_its_bytes() {
        let proxy = ProxyAllocator::new(PlatformAllocator::new());
        let mut source = *b"borrowed";
        let key = CopiedKey::store(&source, &proxy).unwrap();
        source[0] = b'X';
        assert_eq!(key.as_bytes(), b"borrowed");
        assert_eq!(proxy.stats().live_bytes, 8);

        // SAFETY: Stored with `proxy`.
        unsafe { key.release(&proxy) };
        assert_eq!(proxy.stats().live_bytes, 0);
    }

    #[test]
    fn empty_keys_do_not_allocate() {
        let proxy = ProxyAllocator::with_budget(PlatformAllocator::new(), Some(0));
        let key = CopiedKey::store(b"", &proxy).unwrap();
        assert!(key.as_bytes().is_empty());
        // SAFETY: Stored with `proxy`.
        unsafe { key.release(&proxy) };
        assert_eq!(proxy.stats().allocations, 0);
    }

    #[test]
    fn copy_failure_is_reported() {
        let proxy = ProxyAllocator::with_budget(PlatformAllocator::new(), Some(2));
        assert_eq!(
            CopiedKey::store(b"key", &proxy).err(),
            Some(TableError::AllocationFailed { size: 3 })
        );
    }

    #[test]
    fn short_keys_fold_in_one_pass() {
        assert_eq!(folded_hash(xxhash64, b"MiXeD"), xxhash64(b"mixed"));
        assert_eq!(folded_hash(xxhash64, b""), xxhash64(b""));
        let edge = [b'Q'; FOLD_CHUNK];
        assert_eq!(folded_hash(xxhash64, &edge), xxhash64(&[b'q'; FOLD_CHUNK]));
    }

    #[test]
    fn long_keys_fold_across_chunks() {
        let upper: Vec<u8> = (0..300u32).map(|i| b'A' + (i % 26) as u8).collect();
        let lower = upper.to_ascii_lowercase();
        assert_eq!(folded_hash(xxhash64, &upper), folded_hash(xxhash64, &lower));

        // A difference well past the first chunk still changes the hash.
        let mut tail = lower.clone();
        tail[250] = b'#';
        assert_ne!(folded_hash(xxhash64, &tail), folded_hash(xxhash64, &lower));

        // So does the length, even when one key is a prefix of the other.
        assert_ne!(
            folded_hash(xxhash64, &lower[..120]),
            folded_hash(xxhash64, &lower[..121])
        );
    }

    #[test]
    fn case_insensitive_match() {
        assert!(keys_match(b"Content-Type", b"content-type", true));
        assert!(!keys_match(b"Content-Type", b"content-type", false));
        assert!(!keys_match(b"abc", b"abcd", true));
    }
}
