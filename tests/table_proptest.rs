use std::collections::HashMap;

use proptest::prelude::*;
use rh_hash::HashTable;
use rh_hash::TableFlags;
use rh_hash::hasher::HashFn;
use rh_hash::hasher::xxhash64;

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>, u32),
    Remove(Vec<u8>),
    Get(Vec<u8>),
    RemoveWhere(u32),
    Reserve(usize),
    ShrinkToFit,
    Rehash,
    Clear,
}

// Short keys over a tiny alphabet, so most operations hit existing entries.
fn key() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'B'), Just(b'c'), Just(0u8)], 0..4)
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (key(), any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        3 => key().prop_map(Op::Remove),
        2 => key().prop_map(Op::Get),
        1 => (2u32..5).prop_map(Op::RemoveWhere),
        1 => (0usize..64).prop_map(Op::Reserve),
        1 => Just(Op::ShrinkToFit),
        1 => Just(Op::Rehash),
        1 => Just(Op::Clear),
    ]
}

fn by_length(bytes: &[u8]) -> u64 {
    bytes.len() as u64
}

fn run_against_model(hash_fn: HashFn, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut table = HashTable::builder()
        .capacity(1)
        .hash_fn(hash_fn)
        .build()
        .unwrap();
    let mut model: HashMap<Vec<u8>, u32> = HashMap::new();

    for op in ops {
        match op {
            Op::Put(k, v) => {
                prop_assert_eq!(table.put(&k, v).unwrap(), model.insert(k, v));
            }
            Op::Remove(k) => {
                prop_assert_eq!(table.remove(&k), model.remove(&k));
            }
            Op::Get(k) => {
                prop_assert_eq!(table.get(&k), model.get(&k));
            }
            Op::RemoveWhere(m) => {
                let expected = model.values().filter(|v| *v % m == 0).count();
                model.retain(|_, v| *v % m != 0);
                prop_assert_eq!(table.remove_where(|_, v| v % m == 0), expected);
            }
            Op::Reserve(n) => table.reserve(n).unwrap(),
            Op::ShrinkToFit => table.shrink_to_fit().unwrap(),
            Op::Rehash => table.rehash().unwrap(),
            Op::Clear => {
                table.clear();
                model.clear();
            }
        }

        prop_assert_eq!(table.len(), model.len());
        prop_assert!(table.capacity().is_power_of_two());
        prop_assert!(table.len() * 4 <= table.capacity() * 3);
    }

    prop_assert_eq!(table.iter().count(), model.len());
    for (key, value) in table.iter() {
        prop_assert_eq!(model.get(key), Some(value));
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_matches_std_hash_map(ops in proptest::collection::vec(op(), 1..200)) {
        run_against_model(xxhash64, ops)?;
    }

    #[test]
    fn prop_matches_std_hash_map_under_collisions(ops in proptest::collection::vec(op(), 1..200)) {
        run_against_model(by_length, ops)?;
    }

    #[test]
    fn prop_ignore_case_keeps_first_spelling(
        puts in proptest::collection::vec((key(), any::<u8>()), 1..100)
    ) {
        let mut table = HashTable::builder()
            .capacity(2)
            .flags(TableFlags::IGNORE_CASE)
            .build()
            .unwrap();
        let mut model: HashMap<Vec<u8>, (Vec<u8>, u8)> = HashMap::new();

        for (k, v) in puts {
            let folded = k.to_ascii_lowercase();
            let previous = match model.get_mut(&folded) {
                Some(entry) => Some(std::mem::replace(&mut entry.1, v)),
                None => {
                    model.insert(folded, (k.clone(), v));
                    None
                }
            };
            prop_assert_eq!(table.put(&k, v).unwrap(), previous);
        }

        prop_assert_eq!(table.len(), model.len());
        for (folded, (spelling, value)) in &model {
            let upper = folded.to_ascii_uppercase();
            prop_assert_eq!(
                table.get_key_value(&upper),
                Some((spelling.as_slice(), value))
            );
        }
    }

    #[test]
    fn prop_drain_yields_every_value(values in proptest::collection::vec(any::<u16>(), 0..300)) {
        let mut table = HashTable::new().unwrap();
        let mut model = HashMap::new();
        for v in values {
            table.put(&v.to_le_bytes(), v).unwrap();
            model.insert(v, v);
        }

        let mut drained: Vec<u16> = table.drain().collect();
        drained.sort_unstable();
        let mut expected: Vec<u16> = model.into_values().collect();
        expected.sort_unstable();
        prop_assert_eq!(drained, expected);
        prop_assert!(table.is_empty());
    }
}
