//! Hash functions usable with [`HashTable`](crate::HashTable).
//!
//! A table hashes raw key bytes through a plain function pointer so the
//! function can be swapped per table with
//! [`HashTable::set_hash_fn`](crate::HashTable::set_hash_fn).

/// Signature of a table hash function.
///
/// The function must be deterministic: equal byte strings must always produce
/// equal digests for the lifetime of the table.
pub type HashFn = fn(&[u8]) -> u64;

const PRIME64_1: u64 = 0x9E37_79B1_85EB_CA87;
const PRIME64_2: u64 = 0xC2B2_AE3D_27D4_EB4F;
const PRIME64_3: u64 = 0x1656_67B1_9E37_79F9;
const PRIME64_4: u64 = 0x85EB_CA77_C2B2_AE63;
const PRIME64_5: u64 = 0x27D4_EB2F_1656_67C5;

#[inline(always)]
fn read_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

#[inline(always)]
fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

#[inline(always)]
fn round(acc: u64, lane: u64) -> u64 {
    acc.wrapping_add(lane.wrapping_mul(PRIME64_2))
        .rotate_left(31)
        .wrapping_mul(PRIME64_1)
}

#[inline(always)]
fn merge_round(hash: u64, acc: u64) -> u64 {
    (hash ^ round(0, acc))
        .wrapping_mul(PRIME64_1)
        .wrapping_add(PRIME64_4)
}

/// The default table hash: 64-bit xxHash (XXH64) with a zero seed.
///
/// Input is consumed in 32-byte stripes across four accumulators, the
/// remainder in 8, 4 and 1 byte steps, followed by the avalanche finalizer.
/// Words are read little-endian so digests match across platforms.
///
/// # Examples
///
/// ```rust
/// use rh_hash::hasher::xxhash64;
///
/// assert_eq!(xxhash64(b""), 0xEF46_DB37_51D8_E999);
/// assert_eq!(xxhash64(b"key1"), xxhash64(b"key1"));
/// assert_ne!(xxhash64(b"key1"), xxhash64(b"key2"));
/// ```
pub fn xxhash64(input: &[u8]) -> u64 {
    let len = input.len() as u64;
    let mut rest = input;

    let mut hash = if input.len() >= 32 {
        let mut v1 = PRIME64_1.wrapping_add(PRIME64_2);
        let mut v2 = PRIME64_2;
        let mut v3 = 0u64;
        let mut v4 = 0u64.wrapping_sub(PRIME64_1);

        while rest.len() >= 32 {
            v1 = round(v1, read_u64(rest));
            v2 = round(v2, read_u64(&rest[8..]));
            v3 = round(v3, read_u64(&rest[16..]));
            v4 = round(v4, read_u64(&rest[24..]));
            rest = &rest[32..];
        }

        let mut hash = v1
            .rotate_left(1)
            .wrapping_add(v2.rotate_left(7))
            .wrapping_add(v3.rotate_left(12))
            .wrapping_add(v4.rotate_left(18));
        hash = merge_round(hash, v1);
        hash = merge_round(hash, v2);
        hash = merge_round(hash, v3);
        merge_round(hash, v4)
    } else {
        PRIME64_5
    };

    hash = hash.wrapping_add(len);

    while rest.len() >= 8 {
        hash ^= round(0, read_u64(rest));
        hash = hash
            .rotate_left(27)
            .wrapping_mul(PRIME64_1)
            .wrapping_add(PRIME64_4);
        rest = &rest[8..];
    }

    if rest.len() >= 4 {
        hash ^= (read_u32(rest) as u64).wrapping_mul(PRIME64_1);
        hash = hash
            .rotate_left(23)
            .wrapping_mul(PRIME64_2)
            .wrapping_add(PRIME64_3);
        rest = &rest[4..];
    }

    for &byte in rest {
        hash ^= (byte as u64).wrapping_mul(PRIME64_5);
        hash = hash.rotate_left(11).wrapping_mul(PRIME64_1);
    }

    hash ^= hash >> 33;
    hash = hash.wrapping_mul(PRIME64_2);
    hash ^= hash >> 29;
    hash = hash.wrapping_mul(PRIME64_3);
    hash ^= hash >> 32;
    hash
}

/// Alternative table hash backed by foldhash's fixed-seed hasher.
///
/// Faster than [`xxhash64`] on short keys, but digests are only stable for a
/// given foldhash release.
#[cfg(feature = "foldhash")]
pub fn foldhash_hash(input: &[u8]) -> u64 {
    use core::hash::BuildHasher;

    foldhash::fast::FixedState::with_seed(0).hash_one(input)
}

/// The hash function new tables start with.
pub const DEFAULT_HASH_FN: HashFn = xxhash64;
