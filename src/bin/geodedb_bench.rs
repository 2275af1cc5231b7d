use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use GeodeDB::check::check_store;
use GeodeDB::config::StoreConfig;
use GeodeDB::metrics;
use GeodeDB::store::BlobStore;

/// Простой детерминированный PRNG (SplitMix64).
/// Достаточен для бенчей; не криптостойкий.
#[derive(Clone)]
struct Rng64 {
    state: u64,
}

impl Rng64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }
    #[inline]
    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
    #[inline]
    fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n.max(1)
    }
}

/// Бенч alloc/free-чурна поверх GeodeDB.
#[derive(Parser, Debug)]
#[command(name = "geodedb_bench", version, about = "GeodeDB alloc/free churn bench")]
struct Args {
    /// Store file (created if missing; removed unless --keep)
    #[arg(long, default_value = "bench.geode")]
    path: PathBuf,

    /// Rounds of churn
    #[arg(long, default_value_t = 100)]
    rounds: usize,

    /// Allocations per round
    #[arg(long, default_value_t = 100)]
    allocs: usize,

    /// Max payload size in bytes
    #[arg(long, default_value_t = 65536)]
    max_size: u32,

    /// PRNG seed
    #[arg(long, default_value_t = 0xDEC0DE)]
    seed: u64,

    /// Keep the store file afterwards
    #[arg(long, default_value_t = false)]
    keep: bool,

    /// Run the consistency check at the end
    #[arg(long, default_value_t = true)]
    check: bool,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    if args.path.exists() {
        std::fs::remove_file(&args.path)?;
    }
    let cfg = StoreConfig::from_env().with_commit_sync(false);
    let mut store = BlobStore::create(&args.path, &cfg)?;

    let mut rng = Rng64::new(args.seed);
    let mut live: Vec<u32> = Vec::new();
    let mut total_ops = 0u64;
    let start = Instant::now();

    for round in 0..args.rounds {
        let mut tx = store.begin()?;
        for _ in 0..args.allocs {
            let size = 1 + rng.below(args.max_size as u64) as u32;
            live.push(tx.alloc(size)?);
            total_ops += 1;
        }
        // Освобождаем примерно половину живых блобов, вразнобой.
        let frees = live.len() / 2;
        for _ in 0..frees {
            let i = rng.below(live.len() as u64) as usize;
            let page = live.swap_remove(i);
            tx.free(page)?;
            total_ops += 1;
        }
        tx.commit()?;
        if (round + 1) % 10 == 0 {
            let secs = start.elapsed().as_secs_f64();
            println!(
                "round {:4}: {} live blobs, {} pages, {:.0} ops/s",
                round + 1,
                live.len(),
                store.total_pages(),
                total_ops as f64 / secs.max(1e-9)
            );
        }
    }

    let secs = start.elapsed().as_secs_f64();
    println!(
        "done: {} ops in {:.2}s ({:.0} ops/s), store {} pages",
        total_ops,
        secs,
        total_ops as f64 / secs.max(1e-9),
        store.total_pages()
    );
    println!("metrics: {:?}", metrics::snapshot());

    if args.check {
        let rep = check_store(&store)?;
        if rep.is_clean() {
            println!("check: OK");
        } else {
            for e in &rep.errors {
                println!("check ERROR: {}", e);
            }
        }
    }

    drop(store);
    if !args.keep {
        let _ = std::fs::remove_file(&args.path);
        let mut lock = args.path.as_os_str().to_os_string();
        lock.push(".lock");
        let _ = std::fs::remove_file(PathBuf::from(lock));
    }
    Ok(())
}
