use std::sync::Arc;

use clap::Parser;
use exportd::{
    cli::ExportdArgs,
    config::load_exports,
    resolve::Resolver,
    server::{fork_workers, wait_for_workers, CacheServer, WorkerRole},
    CacheResult,
};
use tracing_subscriber::{fmt, EnvFilter};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

fn main() -> CacheResult<()> {
    let args = ExportdArgs::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    fmt()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();

    let table = Arc::new(load_exports(&args.exports)?);
    tracing::info!(
        "loaded {} export entries from {}",
        table.len(),
        args.exports.display()
    );
    let resolver = Arc::new(Resolver::new(table).with_mounts_path(&args.mounts));

    match fork_workers(args.workers)? {
        WorkerRole::Parent(children) => wait_for_workers(&children),
        // Each worker opens its own channels; the kernel spreads requests
        // across the readers.
        WorkerRole::Worker => CacheServer::open_standard(resolver)?.run(),
    }
}
