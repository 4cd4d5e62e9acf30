use clap::Parser;
use clap::ValueEnum;
use rh_hash::HashTable;
use rh_hash::TableError;
use rh_hash::TableFlags;
use rh_hash::hasher::HashFn;
use rh_hash::hasher::foldhash_hash;
use rh_hash::hasher::xxhash64;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Hash {
    Xxhash,
    Foldhash,
    /// Hash only the first byte, to provoke long probe sequences
    FirstByte,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    /// Fill a frozen table to every slot instead of letting it grow
    #[arg(short, long)]
    frozen: bool,

    #[arg(long, value_enum, default_value_t = Hash::Xxhash)]
    hash: Hash,

    /// Remove every n-th key after filling, 0 to skip
    #[arg(short, long, default_value_t = 3)]
    remove_every: u64,
}

fn first_byte(bytes: &[u8]) -> u64 {
    bytes.first().map_or(0, |&b| u64::from(b) << 56)
}

fn print_histogram(hist: &[usize]) {
    let widest = hist.iter().copied().max().unwrap_or(0).max(1);
    println!("Probe distance histogram:");
    for (dist, &count) in hist.iter().enumerate() {
        let bar = "#".repeat((count * 50).div_ceil(widest));
        println!("{dist:>4} | {count:>8} {bar}");
    }
}

fn main() -> Result<(), TableError> {
    env_logger::init();
    let args = Args::parse();

    let hash_fn: HashFn = match args.hash {
        Hash::Xxhash => xxhash64,
        Hash::Foldhash => foldhash_hash,
        Hash::FirstByte => first_byte,
    };
    let flags = if args.frozen {
        TableFlags::FROZEN
    } else {
        TableFlags::empty()
    };

    println!(
        "Creating HashTable with target capacity: {}",
        args.target_capacity
    );
    let mut table = HashTable::builder()
        .capacity(args.target_capacity)
        .flags(flags)
        .hash_fn(hash_fn)
        .build()?;
    println!("Actual capacity: {}", table.capacity());

    let num_values = if args.frozen {
        table.capacity()
    } else {
        table.capacity() * 3 / 4
    };
    println!("Filling table with {num_values} keys...");
    for i in 0..num_values as u64 {
        table.put(&i.to_be_bytes(), i)?;
    }

    println!("Inserted {} values into table", table.len());
    println!(
        "Final load factor: {:.2}%",
        (table.len() as f64 / table.capacity() as f64) * 100.0
    );
    print_histogram(&table.probe_histogram());
    table.debug_stats().print();

    if args.remove_every > 0 {
        let removed = table.remove_where(|_, v| v % args.remove_every == 0);
        println!("\nRemoved {removed} keys; probe distances after backward shifts:");
        print_histogram(&table.probe_histogram());
        table.debug_stats().print();
    }

    Ok(())
}
