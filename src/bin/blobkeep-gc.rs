//! `blobkeep-gc`: runs one mark-and-sweep pass against a `roots` store and a
//! `blobs` store, then reports what it deleted.

use std::time::Duration;

use clap::Parser;

use blobkeep::gc::{self, GcConfig};
use blobkeep::store::backend::BaseStore;
use blobkeep::StoreSpec;

#[derive(Parser, Debug)]
#[command(name = "blobkeep-gc", about = "Reachability-based garbage collector")]
struct Args {
    /// `type:address` for the store holding named root pointers.
    #[arg(long)]
    roots: String,

    /// `type:address` for the content-addressed blob store to sweep.
    #[arg(long)]
    blobs: String,

    #[arg(long, default_value_t = 64)]
    sweep_workers: usize,

    /// Wall-clock budget for the sweep phase, in seconds. Unbounded if omitted.
    #[arg(long)]
    sweep_time_limit_secs: Option<u64>,

    /// Run even if no root pointers exist (deletes every blob).
    #[arg(long)]
    force: bool,

    #[arg(long, default_value_t = 0.01)]
    target_fpr: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let roots_spec = StoreSpec::parse(&args.roots)?;
    let blobs_spec = StoreSpec::parse(&args.blobs)?;
    let roots = BaseStore::open(&roots_spec)?;
    let blobs = BaseStore::open(&blobs_spec)?;

    let cfg = GcConfig {
        sweep_workers: args.sweep_workers,
        sweep_time_limit: args.sweep_time_limit_secs.map(Duration::from_secs),
        force: args.force,
        target_fpr: args.target_fpr,
    };

    let report = gc::run(&roots, &blobs, &cfg)?;

    println!("deleted: {}", report.deleted);
    println!("transient failures: {}", report.transient_failures);
    if report.sweep_limit_reached {
        println!("sweep time limit reached; pass may be partial");
    }

    if report.transient_failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
