//! Proxy control daemon.
//!
//! Watches the managed proxy configuration and reports its route table
//! whenever the file changes on disk. Mutations go through `proxy-cli`
//! (or a library caller); this process only reads.
//!
//! ```text
//!   settings.toml ──▶ load_config ──▶ init_logging / init_metrics
//!                                           │
//!   proxy file ──▶ read_table_from ──▶ initial summary
//!        │
//!        └── notify ──▶ TableWatcher ──mpsc──▶ summary + invariant check
//! ```

use clap::Parser;
use std::path::PathBuf;

use proxy_control::config::loader::load_or_default;
use proxy_control::config::watcher::TableWatcher;
use proxy_control::controller::{read_table_from, FsStorage};
use proxy_control::observability::{self, metrics};
use proxy_control::RouteTable;

#[derive(Parser)]
#[command(name = "proxy-control")]
#[command(about = "Watch a managed reverse-proxy configuration", long_about = None)]
struct Args {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn report(table: &RouteTable, reason: &str) {
    let summary = table.summary();
    metrics::record_table_size(&summary);
    tracing::info!(
        hosts = summary.hosts,
        locations = summary.locations,
        upstreams = summary.upstreams,
        backends = summary.backends,
        "{}",
        reason
    );
    for violation in table.check_invariants() {
        tracing::warn!(violation = %violation, "Route table inconsistency");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(args.config.as_deref())?;

    observability::init_logging(&config.observability)?;
    tracing::info!("proxy-control v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = observability::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let path = config.proxy.config_path.clone();
    let table = read_table_from(&FsStorage, &path, &config.listener_policy)?;
    report(&table, "Route table loaded");

    let (watcher, mut updates) = TableWatcher::new(&path, config.listener_policy.clone());
    let _handle = watcher.run()?;

    loop {
        tokio::select! {
            Some(table) = updates.recv() => report(&table, "Route table changed on disk"),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
