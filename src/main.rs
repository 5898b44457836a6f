use clap::Parser;
use log::{info, LevelFilter};
use stashd::config::{Cli, Config};
use stashd::server::{self, ServerContext};
use stashd::store::{Backend, FileStore};
use stashd::{ingest, ServerStats};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logger(cli.debug == 1);

    // Any failure from here to the listening socket is an init failure and
    // exits with status 1.
    let config = Config::load(cli.configuration.as_deref())?;
    let addr = config.listen_addr(cli.port)?;

    let backend: Arc<dyn Backend> = Arc::new(FileStore::init(
        &config.file_backend.file_directory,
        config.file_backend.dir_level,
    )?);
    let stats = Arc::new(ServerStats::new());
    let (dispatcher, writers) = ingest::spawn(backend.clone(), stats.clone());

    let ctx = Arc::new(ServerContext {
        backend,
        dispatcher,
        stats,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        info!(
            "{} {} listening on {addr}, storing under {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            config.file_backend.file_directory.display()
        );
        server::serve(ctx, addr, shutdown_signal()).await
    })?;

    // All dispatcher handles are gone once the server future resolves; the
    // writers drain whatever is still queued, then exit.
    info!("draining writer queues");
    writers.join();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received, shutting down");
}

fn init_logger(debug: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    // RUST_LOG still wins over --debug.
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    builder.init();
}
