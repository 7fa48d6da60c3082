//! spoolcache CLI
//!
//! Operator tooling for spooled disk tiers.
//!
//! - `inspect` opens a persistent disk tier and reports what it holds
//! - `exercise` drives a put/get/flush workload through a tiered store

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spoolcache::store::{DiskConfig, LifespanConfig, MemoryConfig, StoreConfig, TieredConfig};
use spoolcache::{DiskStore, Element, ElementKey, EvictionPolicy, StatsSnapshot, Store, TieredStore};

// =============================================================================
// CLI Arguments
// =============================================================================

/// spoolcache - two-tier key/value cache tooling
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a persistent disk tier and print its statistics
    Inspect(InspectArgs),
    /// Run a workload through a memory-over-disk store
    Exercise(ExerciseArgs),
}

#[derive(ClapArgs, Debug)]
struct InspectArgs {
    /// Directory holding <name>.data and <name>.index
    #[arg(long, env = "SPOOLCACHE_DIR")]
    dir: PathBuf,

    /// Store name
    #[arg(long, env = "SPOOLCACHE_NAME")]
    name: String,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(ClapArgs, Debug)]
struct ExerciseArgs {
    /// Directory for the disk tier files
    #[arg(long, env = "SPOOLCACHE_DIR", default_value_os_t = std::env::temp_dir().join("spoolcache"))]
    dir: PathBuf,

    /// Store name
    #[arg(long, env = "SPOOLCACHE_NAME", default_value = "exercise")]
    name: String,

    /// Number of elements to put
    #[arg(long, default_value = "10000")]
    count: usize,

    /// Value size in bytes
    #[arg(long, default_value = "1024")]
    value_size: usize,

    /// Memory tier capacity in elements (0 = unbounded)
    #[arg(long, env = "SPOOLCACHE_MEMORY_CAPACITY", default_value = "1000")]
    memory_capacity: usize,

    /// Disk tier capacity in elements (0 = unbounded)
    #[arg(long, env = "SPOOLCACHE_DISK_CAPACITY", default_value = "0")]
    disk_capacity: usize,

    /// Memory eviction policy (LRU, LFU, FIFO)
    #[arg(long, env = "SPOOLCACHE_EVICTION_POLICY", default_value = "LRU")]
    policy: EvictionPolicy,

    /// Time to live in seconds (0 = none)
    #[arg(long, default_value = "0")]
    ttl: u32,

    /// Keep the disk tier across runs
    #[arg(long)]
    persistent: bool,

    /// Seed for eviction sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    match args.command {
        Command::Inspect(inspect_args) => inspect(inspect_args),
        Command::Exercise(exercise_args) => exercise(exercise_args),
    }
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Inspect
// =============================================================================

#[derive(Debug, Serialize)]
struct InspectReport {
    name: String,
    directory: PathBuf,
    elements: usize,
    on_disk_elements: usize,
    on_disk_bytes: u64,
    data_file_bytes: u64,
    index_file_bytes: u64,
    sparseness: f64,
    worker_alive: bool,
}

fn inspect(args: InspectArgs) -> Result<()> {
    let config = DiskConfig {
        name: args.name.clone(),
        directory: args.dir.clone(),
        persistent: true,
        ..Default::default()
    };

    if !config.data_file().exists() {
        anyhow::bail!("no data file at {}", config.data_file().display());
    }

    let store = DiskStore::open_default(config)
        .with_context(|| format!("failed to open disk tier {}", args.name))?;

    let report = InspectReport {
        name: args.name,
        directory: args.dir,
        elements: store.len(),
        on_disk_elements: store.on_disk_len(),
        on_disk_bytes: store.on_disk_size_in_bytes(),
        data_file_bytes: store.data_file_size(),
        index_file_bytes: store.index_file_size(),
        sparseness: store.sparseness(),
        worker_alive: store.is_worker_alive(),
    };

    // Writes a fresh index so the next open still trusts the data file
    store.dispose();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Store:            {}", report.name);
        println!("Directory:        {}", report.directory.display());
        println!("Elements:         {}", report.elements);
        println!("On disk:          {}", report.on_disk_elements);
        println!("Record bytes:     {}", report.on_disk_bytes);
        println!("Data file bytes:  {}", report.data_file_bytes);
        println!("Index file bytes: {}", report.index_file_bytes);
        println!("Sparseness:       {:.3}", report.sparseness);
    }
    Ok(())
}

// =============================================================================
// Exercise
// =============================================================================

#[derive(Debug, Serialize)]
struct ExerciseReport {
    name: String,
    puts: usize,
    found: usize,
    put_millis: u128,
    get_millis: u128,
    flush_millis: u128,
    elements: usize,
    in_memory: usize,
    on_disk: usize,
    on_disk_bytes: u64,
    stats: StatsSnapshot,
}

fn exercise(args: ExerciseArgs) -> Result<()> {
    let config = StoreConfig {
        memory: MemoryConfig {
            name: format!("{}-memory", args.name),
            capacity: args.memory_capacity,
            eviction_policy: args.policy,
            sample_seed: args.seed,
            ..Default::default()
        },
        disk: DiskConfig {
            name: args.name.clone(),
            directory: args.dir.clone(),
            capacity: args.disk_capacity,
            persistent: args.persistent,
            lifespan: LifespanConfig {
                time_to_live_secs: args.ttl,
                ..Default::default()
            },
            sample_seed: args.seed,
            ..Default::default()
        },
        tiered: TieredConfig::default(),
    };

    let store = TieredStore::open(config).context("failed to open tiered store")?;
    info!(name = %args.name, count = args.count, value_size = args.value_size, "Starting workload");

    let value = vec![0x5a_u8; args.value_size];

    let started = Instant::now();
    for i in 0..args.count {
        store.put(Element::new(format!("key-{}", i), value.clone()))?;
    }
    let put_millis = started.elapsed().as_millis();

    let started = Instant::now();
    let found = (0..args.count)
        .filter(|i| store.get(&ElementKey::from(format!("key-{}", i))).is_some())
        .count();
    let get_millis = started.elapsed().as_millis();

    let started = Instant::now();
    store.flush()?;
    let flush_millis = started.elapsed().as_millis();

    let report = ExerciseReport {
        name: args.name,
        puts: args.count,
        found,
        put_millis,
        get_millis,
        flush_millis,
        elements: store.len(),
        in_memory: store.in_memory_len(),
        on_disk: store.on_disk_len(),
        on_disk_bytes: store.on_disk_size_in_bytes(),
        stats: store.stats(),
    };

    store.dispose();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Store:          {}", report.name);
        println!("Puts:           {} in {}ms", report.puts, report.put_millis);
        println!("Found:          {} in {}ms", report.found, report.get_millis);
        println!("Flush:          {}ms", report.flush_millis);
        println!("Elements:       {}", report.elements);
        println!("In memory:      {}", report.in_memory);
        println!("On disk:        {}", report.on_disk);
        println!("Record bytes:   {}", report.on_disk_bytes);
        println!("Hit ratio:      {:.3}", report.stats.hit_ratio);
        println!("Evictions:      {}", report.stats.evictions);
        println!("Expirations:    {}", report.stats.expirations);
    }
    Ok(())
}
