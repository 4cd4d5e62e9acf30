use core::hint::black_box;

use criterion::AxisScale;
use criterion::BatchSize;
use criterion::Criterion;
use criterion::PlotConfiguration;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use hashbrown::hash_table::Entry as HashbrownEntry;
use hashbrown::hash_table::HashTable as HashbrownHashTable;
use rand::Rng;
use rand::SeedableRng;
use rand::TryRngCore;
use rand::rngs::OsRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rh_hash::HashTable as RhHashTable;
use rh_hash::hasher::xxhash64;
use rh_hash::memory::ArenaAllocator;

/// Shape of the keys fed to both tables.
trait KeyShape {
    fn key(n: u64) -> Vec<u8>;
}

struct ShortKey;

impl KeyShape for ShortKey {
    fn key(n: u64) -> Vec<u8> {
        black_box(n.to_le_bytes().to_vec())
    }
}

struct TextKey;

impl KeyShape for TextKey {
    fn key(n: u64) -> Vec<u8> {
        black_box(format!("key_{n:016X}").into_bytes())
    }
}

struct LongKey;

impl KeyShape for LongKey {
    fn key(n: u64) -> Vec<u8> {
        black_box(format!("key_{n:064b}").into_bytes())
    }
}

type Baseline = HashbrownHashTable<(Vec<u8>, u64)>;

fn baseline_hash(entry: &(Vec<u8>, u64)) -> u64 {
    xxhash64(&entry.0)
}

fn baseline_insert(table: &mut Baseline, key: &[u8], value: u64) {
    let hash = xxhash64(key);
    match table.entry(hash, |(k, _)| k == key, baseline_hash) {
        HashbrownEntry::Occupied(mut entry) => entry.get_mut().1 = value,
        HashbrownEntry::Vacant(entry) => {
            entry.insert((key.to_vec(), value));
        }
    }
}

const SIZES: &[usize] = &[
    (1 << 10),
    (1 << 11),
    (1 << 12),
    (1 << 13),
    (1 << 14),
    (1 << 15),
    (1 << 16),
    (1 << 17),
];

fn keys<K: KeyShape>(count: usize, random: bool) -> Vec<Vec<u8>> {
    let mut rng = OsRng;
    (0..count as u64)
        .map(|i| {
            if random {
                K::key(rng.try_next_u64().unwrap())
            } else {
                K::key(i)
            }
        })
        .collect()
}

fn bench_insert_random<K: KeyShape, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!(
        "insert_random_{}",
        core::any::type_name::<K>()
    ));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        let keys = keys::<K>(size, true);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("rh_hash/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut keys = keys.clone();
                    keys.shuffle(&mut SmallRng::from_os_rng());
                    keys
                },
                |keys| {
                    let mut table = RhHashTable::with_capacity(0).unwrap();
                    for (i, key) in keys.iter().enumerate() {
                        black_box(table.put(key, i as u64).unwrap());
                    }
                    black_box(table)
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("rh_hash_arena/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut keys = keys.clone();
                    keys.shuffle(&mut SmallRng::from_os_rng());
                    keys
                },
                |keys| {
                    let arena = ArenaAllocator::new();
                    let mut table = RhHashTable::new_in(&arena).unwrap();
                    for (i, key) in keys.iter().enumerate() {
                        black_box(table.put(key, i as u64).unwrap());
                    }
                    black_box(table.len())
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut keys = keys.clone();
                    keys.shuffle(&mut SmallRng::from_os_rng());
                    keys
                },
                |keys| {
                    let mut table = Baseline::with_capacity(0);
                    for (i, key) in keys.iter().enumerate() {
                        baseline_insert(&mut table, key, i as u64);
                    }
                    black_box(table)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_find_hit_miss<K: KeyShape, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!(
        "find_hit_miss_{}",
        core::any::type_name::<K>()
    ));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        let present = keys::<K>(size, false);
        let mut probes: Vec<Vec<u8>> = present
            .iter()
            .cloned()
            .chain((size as u64..2 * size as u64).map(K::key))
            .collect();
        probes.shuffle(&mut SmallRng::from_os_rng());

        let mut table = RhHashTable::with_capacity(0).unwrap();
        let mut baseline = Baseline::with_capacity(0);
        for (i, key) in present.iter().enumerate() {
            table.put(key, i as u64).unwrap();
            baseline_insert(&mut baseline, key, i as u64);
        }

        group.throughput(Throughput::Elements(probes.len() as u64));
        group.bench_function(format!("rh_hash/{size}"), |b| {
            b.iter(|| {
                for key in &probes {
                    black_box(table.get(key));
                }
            })
        });

        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter(|| {
                for key in &probes {
                    let hash = xxhash64(key);
                    black_box(baseline.find(hash, |(k, _)| k == key));
                }
            })
        });
    }

    group.finish();
}

fn bench_remove<K: KeyShape, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!("remove_{}", core::any::type_name::<K>()));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        let keys = keys::<K>(size, false);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("rh_hash/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut table = RhHashTable::with_capacity(0).unwrap();
                    for (i, key) in keys.iter().enumerate() {
                        table.put(key, i as u64).unwrap();
                    }
                    let mut order = keys.clone();
                    order.shuffle(&mut SmallRng::from_os_rng());
                    (table, order)
                },
                |(mut table, order)| {
                    for key in &order {
                        black_box(table.remove(key));
                    }
                    black_box(table)
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut table = Baseline::with_capacity(0);
                    for (i, key) in keys.iter().enumerate() {
                        baseline_insert(&mut table, key, i as u64);
                    }
                    let mut order = keys.clone();
                    order.shuffle(&mut SmallRng::from_os_rng());
                    (table, order)
                },
                |(mut table, order)| {
                    for key in &order {
                        let hash = xxhash64(key);
                        let result = match table.find_entry(hash, |(k, _)| k == key) {
                            Ok(entry) => Some(entry.remove().0.1),
                            Err(_) => None,
                        };
                        black_box(result);
                    }
                    black_box(table)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_iteration<K: KeyShape, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!("iteration_{}", core::any::type_name::<K>()));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        let keys = keys::<K>(size, false);
        let mut table = RhHashTable::with_capacity(0).unwrap();
        let mut baseline = Baseline::with_capacity(0);
        for (i, key) in keys.iter().enumerate() {
            table.put(key, i as u64).unwrap();
            baseline_insert(&mut baseline, key, i as u64);
        }

        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("rh_hash/{size}"), |b| {
            b.iter(|| black_box(table.values().sum::<u64>()))
        });
        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter(|| black_box(baseline.iter().map(|(_, v)| v).sum::<u64>()))
        });
    }

    group.finish();
}

fn bench_churn<K: KeyShape, const MAX_SIZE: usize>(c: &mut Criterion) {
    let mut group = c.benchmark_group(format!("churn_{}", core::any::type_name::<K>()));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES[..=MAX_SIZE].iter() {
        let keys = keys::<K>(size, false);
        let mut rng = SmallRng::from_os_rng();
        let ops: Vec<(usize, bool)> = (0..size * 2)
            .map(|_| (rng.random_range(0..size), rng.random_bool(0.5)))
            .collect();

        group.throughput(Throughput::Elements(ops.len() as u64));
        group.bench_function(format!("rh_hash/{size}"), |b| {
            b.iter(|| {
                let mut table = RhHashTable::with_capacity(0).unwrap();
                for &(index, insert) in &ops {
                    let key = &keys[index];
                    if insert {
                        black_box(table.put(key, index as u64).unwrap());
                    } else {
                        black_box(table.remove(key));
                    }
                }
                black_box(table)
            })
        });

        group.bench_function(format!("hashbrown/{size}"), |b| {
            b.iter(|| {
                let mut table = Baseline::with_capacity(0);
                for &(index, insert) in &ops {
                    let key = &keys[index];
                    if insert {
                        baseline_insert(&mut table, key, index as u64);
                    } else if let Ok(entry) = table.find_entry(xxhash64(key), |(k, _)| k == key) {
                        black_box(entry.remove().0);
                    }
                }
                black_box(table)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_random::<ShortKey, 7>,
    bench_insert_random::<TextKey, 7>,
    bench_insert_random::<LongKey, 5>,
    bench_find_hit_miss::<ShortKey, 7>,
    bench_find_hit_miss::<TextKey, 7>,
    bench_find_hit_miss::<LongKey, 5>,
    bench_remove::<ShortKey, 7>,
    bench_remove::<TextKey, 7>,
    bench_remove::<LongKey, 5>,
    bench_iteration::<ShortKey, 7>,
    bench_iteration::<TextKey, 7>,
    bench_churn::<ShortKey, 7>,
    bench_churn::<TextKey, 7>,
    bench_churn::<LongKey, 5>,
);

criterion_main!(benches);
